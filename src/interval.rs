//! Genomic intervals: parsing `referenceName:start-end` tokens, normalizing
//! caller-supplied sets and translating them into index chunks.

use crate::error::SplitError;
use crate::index::{merge_chunks, AlignmentIndex, Chunk};
use crate::refdict::ReferenceDictionary;
use serde::{Deserialize, Serialize};
use std::cmp::max;
use std::fmt;

/// 1-based inclusive interval on a reference from the header dictionary.
///
/// Field order gives the derived `Ord` the (reference, start, end) order
/// used for normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenomicInterval {
    pub reference_id: u32,
    pub start: u32,
    pub end: u32,
}

impl GenomicInterval {
    /// Sentinel reference id selecting records without a reference.
    /// Sorts after every real reference, as those records do in a sorted file.
    pub const UNPLACED: u32 = u32::MAX;

    pub fn new(reference_id: u32, start: u32, end: u32) -> Self {
        Self {
            reference_id,
            start,
            end,
        }
    }

    pub fn unplaced() -> Self {
        Self::new(Self::UNPLACED, 1, u32::MAX)
    }

    pub fn is_unplaced(&self) -> bool {
        self.reference_id == Self::UNPLACED
    }

    /// Render as a `name:start-end` token using the dictionary when possible
    pub fn describe(&self, references: &ReferenceDictionary) -> String {
        if self.is_unplaced() {
            return "*".to_string();
        }
        match references.get_name(self.reference_id) {
            Some(name) => format!("{}:{}-{}", name, self.start, self.end),
            None => format!("#{}:{}-{}", self.reference_id, self.start, self.end),
        }
    }
}

/// A parsed but unresolved interval token.
///
/// Tokens are checked for syntax before any file is opened; names are only
/// resolved once the header's reference dictionary is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub range: Option<(u32, u32)>,
}

impl RegionSpec {
    pub fn unplaced() -> Self {
        Self {
            name: "*".to_string(),
            range: None,
        }
    }

    pub fn is_unplaced(&self) -> bool {
        self.name == "*" && self.range.is_none()
    }

    pub fn resolve(&self, references: &ReferenceDictionary) -> Result<GenomicInterval, SplitError> {
        if self.is_unplaced() {
            return Ok(GenomicInterval::unplaced());
        }

        // A reference name may itself contain ':'; a whole-name match wins
        let token = self.to_string();
        if self.range.is_some() {
            if let Some(id) = references.get_id(&token) {
                return Ok(whole_reference(id, references));
            }
        }

        let id = references
            .get_id(&self.name)
            .ok_or_else(|| SplitError::InvalidInterval {
                token: token.clone(),
                reason: format!("unknown reference '{}'", self.name),
            })?;
        Ok(match self.range {
            Some((start, end)) => GenomicInterval::new(id, start, end),
            None => whole_reference(id, references),
        })
    }
}

impl fmt::Display for RegionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((start, end)) => write!(f, "{}:{}-{}", self.name, start, end),
            None => write!(f, "{}", self.name),
        }
    }
}

fn whole_reference(id: u32, references: &ReferenceDictionary) -> GenomicInterval {
    let length = references.get_len(id).unwrap_or(0);
    GenomicInterval::new(id, 1, max(length, 1))
}

/// Parse one `referenceName:start-end`, `referenceName` or `*` token.
pub fn parse_region(token: &str) -> Result<RegionSpec, SplitError> {
    let token = token.trim();
    let invalid = |reason: &str| SplitError::InvalidInterval {
        token: token.to_string(),
        reason: reason.to_string(),
    };

    if token.is_empty() {
        return Err(invalid("empty interval"));
    }
    if token == "*" {
        return Ok(RegionSpec::unplaced());
    }

    if let Some((name, range)) = token.rsplit_once(':') {
        if let Some((start, end)) = range.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
                if name.is_empty() {
                    return Err(invalid("missing reference name"));
                }
                if start == 0 {
                    return Err(invalid("positions are 1-based, start must be at least 1"));
                }
                if start > end {
                    return Err(invalid("start is greater than end"));
                }
                return Ok(RegionSpec {
                    name: name.to_string(),
                    range: Some((start, end)),
                });
            }
        }
    }

    Ok(RegionSpec {
        name: token.to_string(),
        range: None,
    })
}

/// Parse a comma-delimited list of interval tokens.
pub fn parse_region_list(list: &str) -> Result<Vec<RegionSpec>, SplitError> {
    list.split(',')
        .filter(|token| !token.trim().is_empty())
        .map(parse_region)
        .collect()
}

pub fn format_region_list(regions: &[RegionSpec]) -> String {
    regions
        .iter()
        .map(|region| region.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Sort by (reference, start) and coalesce intervals that overlap or abut.
///
/// The result depends only on the multiset of inputs, never on their order.
pub fn normalize(
    intervals: &[GenomicInterval],
    references: &ReferenceDictionary,
) -> Result<Vec<GenomicInterval>, SplitError> {
    for interval in intervals {
        let invalid = |reason: String| SplitError::InvalidInterval {
            token: interval.describe(references),
            reason,
        };
        if !interval.is_unplaced() && interval.reference_id as usize >= references.len() {
            return Err(invalid(format!(
                "reference id {} is not in the header ({} references)",
                interval.reference_id,
                references.len()
            )));
        }
        if interval.start == 0 {
            return Err(invalid("positions are 1-based, start must be at least 1".to_string()));
        }
        if interval.start > interval.end {
            return Err(invalid("start is greater than end".to_string()));
        }
    }

    let mut merged = intervals.to_vec();
    merged.sort();
    if merged.is_empty() {
        return Ok(merged);
    }

    let mut write = 0;
    for read in 1..merged.len() {
        let next = merged[read];
        let current = &mut merged[write];
        if next.reference_id == current.reference_id
            && next.start <= current.end.saturating_add(1)
        {
            current.end = max(current.end, next.end);
        } else {
            write += 1;
            merged[write] = next;
        }
    }
    merged.truncate(write + 1);

    Ok(merged)
}

/// Index chunks for each normalized interval, in interval order.
pub fn chunks_by_interval(
    normalized: &[GenomicInterval],
    index: &dyn AlignmentIndex,
) -> Result<Vec<(GenomicInterval, Vec<Chunk>)>, SplitError> {
    normalized
        .iter()
        .map(|interval| Ok((*interval, index.chunks_overlapping(interval)?)))
        .collect()
}

/// Merged virtual-offset ranges covering every normalized interval.
pub fn to_virtual_offset_ranges(
    normalized: &[GenomicInterval],
    index: &dyn AlignmentIndex,
) -> Result<Vec<Chunk>, SplitError> {
    let mut chunks: Vec<Chunk> = chunks_by_interval(normalized, index)?
        .into_iter()
        .flat_map(|(_, chunks)| chunks)
        .collect();
    merge_chunks(&mut chunks);
    Ok(chunks)
}
