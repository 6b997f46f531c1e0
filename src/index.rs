//! Index abstraction used by the split calculator.
//!
//! The splitter only needs a handful of queries from an index, so they live
//! behind a trait; `BaiIndex` is the on-disk implementation and tests can
//! supply their own.

use crate::error::SplitError;
use crate::interval::GenomicInterval;
use crate::virtual_offset::VirtualOffset;
use serde::{Deserialize, Serialize};
use std::cmp::max;

/// A contiguous virtual-offset range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Part of this chunk inside `[start, end)`, if any
    pub fn clip(&self, start: VirtualOffset, end: VirtualOffset) -> Option<Chunk> {
        let clipped = Chunk::new(max(self.start, start), self.end.min(end));
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// Queries the split calculator makes against a companion index.
///
/// Implementations are immutable once built and shared read-only between
/// every split derived from the same file.
pub trait AlignmentIndex: Send + Sync {
    /// Chunks that may hold records overlapping `interval`, sorted and merged.
    /// False positives are allowed, false negatives are not.
    fn chunks_overlapping(&self, interval: &GenomicInterval) -> Result<Vec<Chunk>, SplitError>;

    /// Smallest offset of any indexed record
    fn first_record_offset(&self) -> Option<VirtualOffset>;

    /// Offset just past the last indexed (placed) record
    fn last_record_offset_bound(&self) -> Option<VirtualOffset>;

    /// Every offset the index knows to be a record boundary, sorted and deduplicated.
    fn record_start_offsets(&self) -> Vec<VirtualOffset>;

    /// Number of records without a reference, when the index records it.
    fn unplaced_unmapped_count(&self) -> Option<u64> {
        None
    }
}

/// Sort chunks by start and coalesce overlapping or touching ones, in place.
pub fn merge_chunks(chunks: &mut Vec<Chunk>) {
    chunks.retain(|chunk| !chunk.is_empty());
    if chunks.is_empty() {
        return;
    }
    chunks.sort_by_key(|chunk| (chunk.start, chunk.end));

    let mut write = 0;
    for read in 1..chunks.len() {
        if chunks[read].start <= chunks[write].end {
            chunks[write].end = max(chunks[write].end, chunks[read].end);
        } else {
            write += 1;
            chunks[write] = chunks[read];
        }
    }
    chunks.truncate(write + 1);
}
