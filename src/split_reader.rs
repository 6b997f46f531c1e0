//! Reading the records of one split.
//!
//! Filtering happens in two stages: the index chunks of a split bound what
//! gets decoded, then every decoded record is checked against the split's
//! intervals, since chunks are coarser than single records.

use crate::bam::{BamReader, RecordSource};
use crate::error::SplitError;
use crate::index::Chunk;
use crate::interval::GenomicInterval;
use crate::record::AlignmentRecord;
use crate::splitter::Split;
use crate::virtual_offset::VirtualOffset;
use coitrees::{BasicCOITree, Interval, IntervalTree};
use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::Path;

/// Exact per-record overlap test against a set of intervals.
pub struct IntervalFilter {
    trees: FxHashMap<u32, BasicCOITree<u32, u32>>,
    include_unplaced: bool,
}

impl IntervalFilter {
    pub fn new(intervals: &[GenomicInterval]) -> Self {
        let mut by_reference: FxHashMap<u32, Vec<Interval<u32>>> = FxHashMap::default();
        let mut include_unplaced = false;
        for (i, interval) in intervals.iter().enumerate() {
            if interval.is_unplaced() {
                include_unplaced = true;
                continue;
            }
            by_reference
                .entry(interval.reference_id)
                .or_default()
                .push(Interval {
                    first: to_coordinate(interval.start),
                    last: to_coordinate(interval.end),
                    metadata: i as u32,
                });
        }

        let trees = by_reference
            .into_iter()
            .map(|(reference_id, nodes)| (reference_id, BasicCOITree::new(nodes.as_slice())))
            .collect();

        Self {
            trees,
            include_unplaced,
        }
    }

    pub fn matches(&self, record: &AlignmentRecord) -> bool {
        if record.is_unplaced() {
            return self.include_unplaced;
        }
        let (Some(start), Some(end)) = (record.alignment_start(), record.alignment_end()) else {
            return false;
        };
        self.trees
            .get(&(record.reference_id as u32))
            .is_some_and(|tree| tree.query_count(to_coordinate(start), to_coordinate(end)) > 0)
    }
}

fn to_coordinate(position: u32) -> i32 {
    position.min(i32::MAX as u32) as i32
}

/// Pull-style reader over the records of one split.
///
/// Keys are the virtual offsets records start at, so they increase
/// monotonically through a split.
pub struct SplitReader<S> {
    source: S,
    ranges: Vec<Chunk>,
    range_index: usize,
    positioned: bool,
    filter: Option<IntervalFilter>,
    current: Option<(VirtualOffset, AlignmentRecord)>,
    failed: bool,
}

impl SplitReader<BamReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, split: &Split) -> Result<Self, SplitError> {
        let reader = BamReader::open(path)?;
        Ok(Self::new(reader, split))
    }
}

impl<S: RecordSource> SplitReader<S> {
    pub fn new(source: S, split: &Split) -> Self {
        let filter = split
            .is_interval_split()
            .then(|| IntervalFilter::new(&split.intervals));
        Self {
            source,
            ranges: split.ranges(),
            range_index: 0,
            positioned: false,
            filter,
            current: None,
            failed: false,
        }
    }

    /// Move to the next record. Returns `false` once the split is exhausted.
    pub fn advance(&mut self) -> Result<bool, SplitError> {
        loop {
            let Some(range) = self.ranges.get(self.range_index).copied() else {
                self.current = None;
                return Ok(false);
            };
            if !self.positioned {
                self.source.seek(range.start)?;
                self.positioned = true;
            }

            let offset = self.source.virtual_offset();
            if offset >= range.end {
                self.next_range();
                continue;
            }

            match self.source.read_record()? {
                None => {
                    self.range_index = self.ranges.len();
                }
                Some(record) => {
                    let keep = self
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(&record));
                    if keep {
                        self.current = Some((offset, record));
                        return Ok(true);
                    }
                }
            }
        }
    }

    pub fn current(&self) -> Option<&AlignmentRecord> {
        self.current.as_ref().map(|(_, record)| record)
    }

    pub fn current_key(&self) -> Option<VirtualOffset> {
        self.current.as_ref().map(|(offset, _)| *offset)
    }

    /// Start over from the beginning of the split.
    pub fn rewind(&mut self) {
        self.range_index = 0;
        self.positioned = false;
        self.current = None;
        self.failed = false;
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn next_range(&mut self) {
        self.range_index += 1;
        self.positioned = false;
    }
}

impl<S: RecordSource> Iterator for SplitReader<S> {
    type Item = Result<(VirtualOffset, AlignmentRecord), SplitError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(true) => self.current.take().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Count the records of every split, reading splits in parallel.
///
/// Each worker opens its own reader; results follow the order of `splits`.
pub fn count_split_records<P: AsRef<Path> + Sync>(
    path: P,
    splits: &[Split],
) -> Result<Vec<u64>, SplitError> {
    let counts = splits
        .par_iter()
        .map(|split| {
            let mut reader = SplitReader::open(path.as_ref(), split)?;
            let mut count = 0u64;
            while reader.advance()? {
                count += 1;
            }
            debug!(
                "Split {}..{} holds {} record(s)",
                split.start, split.end, count
            );
            Ok(count)
        })
        .collect::<Result<Vec<_>, SplitError>>()?;
    Ok(counts)
}
