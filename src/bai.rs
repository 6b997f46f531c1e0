//! BAM index (`.bai`) access.
//!
//! Loading and bin/linear-index queries come from `noodles::bam::bai`; this
//! wrapper checks the index against the header, rejects inverted chunks and
//! answers the handful of questions the split calculator asks.

use crate::error::SplitError;
use crate::index::{merge_chunks, AlignmentIndex, Chunk};
use crate::interval::GenomicInterval;
use crate::refdict::ReferenceDictionary;
use crate::virtual_offset::VirtualOffset;
use log::debug;
use noodles::bam::bai;
use noodles::core::region::Interval;
use noodles::core::Position;
use noodles::csi::binning_index::ReferenceSequence as _;
use noodles::csi::BinningIndex;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// The BAI binning scheme covers positions below 2^29
const MAX_POSITION: usize = (1 << 29) - 1;

/// Loaded `.bai` contents. Immutable after construction.
#[derive(Debug, Clone)]
pub struct BaiIndex {
    inner: bai::Index,
}

impl BaiIndex {
    /// Wrap an index, rejecting chunks whose end precedes their start.
    pub fn new(inner: bai::Index, label: &str) -> Result<Self, SplitError> {
        for (ref_id, reference) in inner.reference_sequences().iter().enumerate() {
            for (bin_id, bin) in reference.bins() {
                for chunk in bin.chunks() {
                    if chunk.end() < chunk.start() {
                        return Err(SplitError::MalformedIndex {
                            path: label.to_string(),
                            message: format!(
                                "chunk end {} precedes start {} in bin {} of reference {}",
                                VirtualOffset::from(chunk.end()),
                                VirtualOffset::from(chunk.start()),
                                bin_id,
                                ref_id
                            ),
                        });
                    }
                }
            }
        }
        Ok(Self { inner })
    }

    /// Read an index and check it against the header's reference dictionary.
    pub fn read<P: AsRef<Path>>(
        path: P,
        references: &ReferenceDictionary,
    ) -> Result<Self, SplitError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let file = File::open(path).map_err(|e| {
            SplitError::Io(io::Error::new(
                e.kind(),
                format!("Failed to open index '{}': {}", label, e),
            ))
        })?;
        let index = Self::from_reader(BufReader::new(file), &label)?;

        let n_refs = index.inner.reference_sequences().len();
        if n_refs != references.len() {
            return Err(SplitError::MalformedIndex {
                path: label,
                message: format!(
                    "index has {} references but the header has {}",
                    n_refs,
                    references.len()
                ),
            });
        }

        debug!(
            "Loaded index {} ({} references, {} chunks)",
            label,
            n_refs,
            index.chunks().count()
        );
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R, label: &str) -> Result<Self, SplitError> {
        let inner = bai::io::Reader::new(reader)
            .read_index()
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => SplitError::MalformedIndex {
                    path: label.to_string(),
                    message: "truncated index".to_string(),
                },
                io::ErrorKind::InvalidData => SplitError::MalformedIndex {
                    path: label.to_string(),
                    message: e.to_string(),
                },
                _ => SplitError::Io(e),
            })?;
        Self::new(inner, label)
    }

    pub fn inner(&self) -> &bai::Index {
        &self.inner
    }

    fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        self.inner
            .reference_sequences()
            .iter()
            .flat_map(|reference| reference.bins().values())
            .flat_map(|bin| bin.chunks())
            .map(|chunk| Chunk::new(chunk.start().into(), chunk.end().into()))
    }
}

impl AlignmentIndex for BaiIndex {
    fn chunks_overlapping(&self, interval: &GenomicInterval) -> Result<Vec<Chunk>, SplitError> {
        if interval.is_unplaced() {
            if self.unplaced_unmapped_count() == Some(0) {
                return Ok(Vec::new());
            }
            // Unplaced records follow every placed one
            let start = self.last_record_offset_bound().unwrap_or(VirtualOffset::MIN);
            return Ok(vec![Chunk::new(start, VirtualOffset::MAX)]);
        }

        let token = || {
            format!(
                "#{}:{}-{}",
                interval.reference_id, interval.start, interval.end
            )
        };
        let ref_id = interval.reference_id as usize;
        if ref_id >= self.inner.reference_sequences().len() {
            return Err(SplitError::InvalidInterval {
                token: token(),
                reason: "reference is not present in the index".to_string(),
            });
        }

        let start = (interval.start as usize).clamp(1, MAX_POSITION);
        let end = (interval.end as usize).clamp(start, MAX_POSITION);
        let region = match (Position::new(start), Position::new(end)) {
            (Some(start), Some(end)) => Interval::from(start..=end),
            _ => {
                return Err(SplitError::InvalidInterval {
                    token: token(),
                    reason: "positions are outside the indexable range".to_string(),
                })
            }
        };

        let mut chunks: Vec<Chunk> = self
            .inner
            .query(ref_id, region)
            .map_err(|e| SplitError::InvalidInterval {
                token: token(),
                reason: e.to_string(),
            })?
            .into_iter()
            .map(|chunk| Chunk::new(chunk.start().into(), chunk.end().into()))
            .collect();
        merge_chunks(&mut chunks);

        Ok(chunks)
    }

    fn first_record_offset(&self) -> Option<VirtualOffset> {
        let from_metadata = self
            .inner
            .reference_sequences()
            .iter()
            .filter_map(|reference| reference.metadata())
            .map(|metadata| VirtualOffset::from(metadata.start_position()))
            .min();
        from_metadata.or_else(|| self.chunks().map(|chunk| chunk.start).min())
    }

    fn last_record_offset_bound(&self) -> Option<VirtualOffset> {
        let from_metadata = self
            .inner
            .reference_sequences()
            .iter()
            .filter_map(|reference| reference.metadata())
            .map(|metadata| VirtualOffset::from(metadata.end_position()))
            .max();
        from_metadata.or_else(|| self.chunks().map(|chunk| chunk.end).max())
    }

    fn record_start_offsets(&self) -> Vec<VirtualOffset> {
        let mut offsets = BTreeSet::new();
        for chunk in self.chunks() {
            offsets.insert(chunk.start);
            offsets.insert(chunk.end);
        }
        for reference in self.inner.reference_sequences() {
            // Empty windows are stored as 0
            offsets.extend(
                reference
                    .index()
                    .iter()
                    .map(|&position| VirtualOffset::from(position))
                    .filter(|&offset| offset > VirtualOffset::MIN),
            );
        }
        offsets.into_iter().collect()
    }

    fn unplaced_unmapped_count(&self) -> Option<u64> {
        self.inner.unplaced_unmapped_record_count()
    }
}
