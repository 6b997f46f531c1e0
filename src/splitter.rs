//! Split calculation: turning coarse byte ranges into record-aligned
//! virtual-offset splits, optionally restricted to genomic intervals.

use crate::alignment_file::AlignmentFile;
use crate::bam::RecordSource;
use crate::blocks::BlockLocator;
use crate::config::SplitConfig;
use crate::error::SplitError;
use crate::index::{merge_chunks, AlignmentIndex, Chunk};
use crate::interval::{chunks_by_interval, normalize, GenomicInterval};
use crate::pairing::keep_pairs_together;
use crate::virtual_offset::VirtualOffset;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::max;

/// Remaining bytes may exceed the target by this factor before another split is cut
pub const SPLIT_SLOP: f64 = 1.1;

/// A unit of work: the records starting in `[start, end)`.
///
/// Interval splits also carry the index chunks to decode and the normalized
/// intervals records must overlap; whole-file splits leave both empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
    pub intervals: Vec<GenomicInterval>,
    pub chunks: Vec<Chunk>,
}

impl Split {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Self {
            start,
            end,
            intervals: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn is_interval_split(&self) -> bool {
        !self.intervals.is_empty()
    }

    /// Virtual-offset ranges to decode, in file order
    pub fn ranges(&self) -> Vec<Chunk> {
        if self.chunks.is_empty() {
            vec![Chunk::new(self.start, self.end)]
        } else {
            self.chunks.clone()
        }
    }

    /// Approximate compressed size in bytes
    pub fn compressed_size(&self) -> u64 {
        self.end
            .to_byte_offset_floor()
            .saturating_sub(self.start.to_byte_offset_floor())
    }

    fn absorb(&mut self, next: Split) {
        self.end = next.end;
        self.chunks.extend(next.chunks);
        self.intervals.extend(next.intervals);
        self.intervals.sort();
        self.intervals.dedup();
    }
}

/// Compute the splits of an opened file.
///
/// Intervals are resolved and validated against the header before the index
/// is consulted. Without an index the whole file becomes one split.
pub fn compute_splits(file: &AlignmentFile, config: &SplitConfig) -> Result<Vec<Split>, SplitError> {
    config.validate()?;
    let label = file.label();

    let intervals = if config.has_intervals() {
        let resolved = config
            .regions()
            .iter()
            .map(|region| region.resolve(file.references()))
            .collect::<Result<Vec<_>, _>>()?;
        Some(normalize(&resolved, file.references())?)
    } else {
        None
    };

    let Some(index) = file.index() else {
        if intervals.is_some() {
            return Err(SplitError::MissingIndex { path: label });
        }
        warn!(
            "{} has no index; it will be read as a single split",
            label
        );
        let (start, end) = (file.first_record_offset(), file.eof());
        return Ok(if start < end {
            vec![Split::new(start, end)]
        } else {
            Vec::new()
        });
    };

    let mut source = file.reader()?;
    let calculator = SplitCalculator::new(
        file.blocks(),
        index,
        file.first_record_offset(),
        file.eof(),
        &label,
    );

    let splits = match intervals {
        Some(intervals) => {
            if config.keep_paired_reads_together {
                debug!("Pairs are not kept together for interval-restricted splits");
            }
            calculator.interval_splits(&mut source, &intervals, config)?
        }
        None => {
            let splits = calculator.whole_file_splits(&mut source, config)?;
            if config.keep_paired_reads_together {
                keep_pairs_together(
                    &mut source,
                    splits,
                    file.eof(),
                    config.max_pair_lookahead,
                    &label,
                )?
            } else {
                splits
            }
        }
    };

    info!("Computed {} split(s) for {}", splits.len(), label);
    Ok(splits)
}

/// Byte offsets a host framework would cut a file of `file_size` bytes at.
///
/// Boundaries fall every `target` bytes while the remainder exceeds
/// `target * SPLIT_SLOP`; the remainder forms the last split.
pub fn coarse_boundaries(file_size: u64, target: u64) -> Vec<u64> {
    let mut boundaries = Vec::new();
    if target == 0 {
        return boundaries;
    }
    let mut remaining = file_size;
    while remaining as f64 / target as f64 > SPLIT_SLOP {
        boundaries.push(file_size - remaining + target);
        remaining -= target;
    }
    boundaries
}

/// Fold a trailing split smaller than `min_size` bytes into its predecessor.
pub fn merge_small_trailing_split(splits: &mut Vec<Split>, min_size: u64) {
    if splits.len() < 2 {
        return;
    }
    let is_small = splits
        .last()
        .is_some_and(|last| last.compressed_size() < min_size);
    if is_small {
        if let Some(last) = splits.pop() {
            debug!(
                "Merging trailing split {}..{} ({} bytes) into its predecessor",
                last.start,
                last.end,
                last.compressed_size()
            );
            if let Some(previous) = splits.last_mut() {
                previous.absorb(last);
            }
        }
    }
}

/// Boundary snapping against one file's block table and index.
pub struct SplitCalculator<'a, B: BlockLocator> {
    blocks: &'a B,
    index: &'a dyn AlignmentIndex,
    record_starts: Vec<VirtualOffset>,
    first_record: VirtualOffset,
    eof: VirtualOffset,
    label: &'a str,
}

impl<'a, B: BlockLocator> SplitCalculator<'a, B> {
    pub fn new(
        blocks: &'a B,
        index: &'a dyn AlignmentIndex,
        first_record: VirtualOffset,
        eof: VirtualOffset,
        label: &'a str,
    ) -> Self {
        Self {
            blocks,
            index,
            record_starts: index.record_start_offsets(),
            first_record,
            eof,
            label,
        }
    }

    pub fn whole_file_splits<S: RecordSource>(
        &self,
        source: &mut S,
        config: &SplitConfig,
    ) -> Result<Vec<Split>, SplitError> {
        let proposals = coarse_boundaries(self.blocks.file_size(), config.target_split_size);

        if let Some(&first_end) = proposals.first() {
            if self.first_record.to_byte_offset_floor() >= first_end {
                return Err(SplitError::EmptyFirstSplit {
                    path: self.label.to_string(),
                    first_record: self.first_record,
                    split_end: first_end,
                });
            }
        }

        let boundaries = self.snapped_boundaries(source, &proposals)?;
        let mut splits: Vec<Split> = boundaries
            .windows(2)
            .map(|pair| Split::new(pair[0], pair[1]))
            .collect();
        merge_small_trailing_split(&mut splits, config.min_split_size);

        debug!(
            "{} coarse boundaries snapped to {} split(s) for {}",
            proposals.len(),
            splits.len(),
            self.label
        );
        Ok(splits)
    }

    /// One split per coarse region holding any chunk of the normalized intervals.
    pub fn interval_splits<S: RecordSource>(
        &self,
        source: &mut S,
        intervals: &[GenomicInterval],
        config: &SplitConfig,
    ) -> Result<Vec<Split>, SplitError> {
        let readable = Chunk::new(self.first_record, self.eof);
        let per_interval: Vec<(GenomicInterval, Vec<Chunk>)> =
            chunks_by_interval(intervals, self.index)?
                .into_iter()
                .map(|(interval, chunks)| {
                    let clipped = chunks
                        .iter()
                        .filter_map(|chunk| chunk.clip(readable.start, readable.end))
                        .collect::<Vec<_>>();
                    (interval, clipped)
                })
                .collect();

        let mut merged: Vec<Chunk> = per_interval
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().copied())
            .collect();
        merge_chunks(&mut merged);
        if merged.is_empty() {
            info!("No index chunks overlap the requested intervals in {}", self.label);
            return Ok(Vec::new());
        }

        let proposals = coarse_boundaries(self.blocks.file_size(), config.target_split_size);
        let boundaries = self.snapped_boundaries(source, &proposals)?;

        let mut splits = Vec::new();
        for region in boundaries.windows(2) {
            let pieces: Vec<Chunk> = merged
                .iter()
                .filter_map(|chunk| chunk.clip(region[0], region[1]))
                .collect();
            let (Some(first), Some(last)) = (pieces.first(), pieces.last()) else {
                continue;
            };

            let contributing: Vec<GenomicInterval> = per_interval
                .iter()
                .filter(|(_, chunks)| {
                    chunks.iter().any(|chunk| {
                        pieces
                            .iter()
                            .any(|piece| chunk.start < piece.end && piece.start < chunk.end)
                    })
                })
                .map(|(interval, _)| *interval)
                .collect();

            splits.push(Split {
                start: first.start,
                end: last.end,
                intervals: contributing,
                chunks: pieces,
            });
        }
        merge_small_trailing_split(&mut splits, config.min_split_size);

        debug!(
            "{} interval(s) in {} chunk(s) grouped into {} split(s) for {}",
            intervals.len(),
            merged.len(),
            splits.len(),
            self.label
        );
        Ok(splits)
    }

    /// `[first_record, snapped..., eof]`, strictly increasing.
    fn snapped_boundaries<S: RecordSource>(
        &self,
        source: &mut S,
        proposals: &[u64],
    ) -> Result<Vec<VirtualOffset>, SplitError> {
        let mut boundaries = vec![self.first_record];
        let mut last = self.first_record;
        for &proposal in proposals {
            let snapped = self.snap(source, proposal)?;
            if snapped > last && snapped < self.eof {
                boundaries.push(snapped);
                last = snapped;
            }
        }
        if self.eof > last {
            boundaries.push(self.eof);
        }
        Ok(boundaries)
    }

    /// Record-aligned offset for a raw byte boundary.
    ///
    /// The boundary moves to the first block starting at or after it, then to
    /// the first record starting at or after that block. Decoding to find that
    /// record starts from the closest record start the index knows about.
    pub fn snap<S: RecordSource>(
        &self,
        source: &mut S,
        byte_offset: u64,
    ) -> Result<VirtualOffset, SplitError> {
        let Some(block) = self.blocks.block_at_or_after(byte_offset) else {
            return Ok(self.eof);
        };
        let target = VirtualOffset::at_block_start(block);
        if target <= self.first_record {
            return Ok(self.first_record);
        }
        if target >= self.eof {
            return Ok(self.eof);
        }

        let anchor = match self.record_starts.partition_point(|&offset| offset <= target) {
            0 => self.first_record,
            i => max(self.record_starts[i - 1], self.first_record),
        };
        source.seek(anchor)?;

        loop {
            let offset = source.virtual_offset();
            match source.read_record()? {
                None => return Ok(self.eof),
                Some(_) if offset >= target => return Ok(offset),
                Some(_) => {}
            }
        }
    }
}
