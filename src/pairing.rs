//! Moving split boundaries so that mates end up in the same split.
//!
//! Boundaries are resolved in one forward sweep over the records. The sweep
//! keeps the names of templates whose first primary record has been read but
//! whose mate has not, and a boundary may only settle on a record where that
//! set is empty. This holds for name-grouped input, where mates are adjacent,
//! and for coordinate-sorted input, where any number of templates can be open
//! across a boundary.
//!
//! In a coordinate-sorted file a mate can never appear after a record that
//! sorts past the mate's expected position, so such entries are dropped as
//! missing. Secondary and supplementary records are never tracked.

use crate::bam::RecordSource;
use crate::error::SplitError;
use crate::record::AlignmentRecord;
use crate::splitter::Split;
use crate::virtual_offset::VirtualOffset;
use log::debug;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Templates with one primary record read and the mate still to come.
#[derive(Debug, Default)]
pub struct PendingPairs {
    /// name -> where the mate is expected
    by_name: FxHashMap<Vec<u8>, (u32, i32)>,
    by_mate: BTreeSet<((u32, i32), Vec<u8>)>,
    expired: usize,
}

impl PendingPairs {
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.by_name.contains_key(name)
    }

    /// Templates dropped because their mate never showed up
    pub fn expired(&self) -> usize {
        self.expired
    }

    /// Drop templates whose mate should have been read before `key`.
    pub fn expire_before(&mut self, key: (u32, i32)) {
        while let Some((mate_key, _)) = self.by_mate.first() {
            if *mate_key >= key {
                break;
            }
            if let Some((_, name)) = self.by_mate.pop_first() {
                self.by_name.remove(&name);
                self.expired += 1;
            }
        }
    }

    /// Close the record's template if it is pending, open it otherwise.
    pub fn observe(&mut self, record: &AlignmentRecord) {
        if !record.is_paired() || !record.is_primary() {
            return;
        }
        match self.by_name.remove(&record.name) {
            Some(mate_key) => {
                self.by_mate.remove(&(mate_key, record.name.clone()));
            }
            None => {
                let mate_key = record.mate_placement_key();
                self.by_name.insert(record.name.clone(), mate_key);
                self.by_mate.insert((mate_key, record.name.clone()));
            }
        }
    }
}

/// Forward-only boundary resolution over a single record stream.
pub struct BoundaryResolver<'a, S> {
    source: &'a mut S,
    pending: PendingPairs,
    eof: VirtualOffset,
    max_lookahead: usize,
    label: &'a str,
}

impl<'a, S: RecordSource> BoundaryResolver<'a, S> {
    /// Start sweeping at `start`, which must be the first record of the file.
    pub fn new(
        source: &'a mut S,
        start: VirtualOffset,
        eof: VirtualOffset,
        max_lookahead: usize,
        label: &'a str,
    ) -> Result<Self, SplitError> {
        source.seek(start)?;
        Ok(Self {
            source,
            pending: PendingPairs::default(),
            eof,
            max_lookahead,
            label,
        })
    }

    pub fn pending(&self) -> &PendingPairs {
        &self.pending
    }

    /// First record start at or after `proposal` that no open template
    /// straddles, or `eof` when the rest of the file is absorbed.
    ///
    /// Proposals must be passed in increasing order.
    pub fn resolve(&mut self, proposal: VirtualOffset) -> Result<VirtualOffset, SplitError> {
        while self.source.virtual_offset() < proposal {
            let Some(record) = self.source.read_record()? else {
                return Ok(self.eof);
            };
            self.pending.expire_before(record.placement_key());
            self.pending.observe(&record);
        }

        let mut scanned = 0;
        loop {
            let offset = self.source.virtual_offset();
            let Some(record) = self.source.read_record()? else {
                return Ok(self.eof);
            };
            self.pending.expire_before(record.placement_key());
            let settles = self.pending.is_empty() && record.is_primary();
            self.pending.observe(&record);
            if settles {
                return Ok(offset);
            }

            scanned += 1;
            if scanned > self.max_lookahead {
                return Err(SplitError::PairLookaheadExceeded {
                    path: self.label.to_string(),
                    boundary: proposal,
                    limit: self.max_lookahead,
                });
            }
        }
    }
}

/// Rebuild `splits` with every internal boundary resolved.
///
/// Splits that get swallowed by their predecessor are dropped; the rest stay
/// contiguous and keep the first start and last end of the input.
pub fn keep_pairs_together<S: RecordSource>(
    source: &mut S,
    splits: Vec<Split>,
    eof: VirtualOffset,
    max_lookahead: usize,
    label: &str,
) -> Result<Vec<Split>, SplitError> {
    if splits.len() < 2 {
        return Ok(splits);
    }
    let start = splits[0].start;
    let end = splits[splits.len() - 1].end;

    let mut resolver = BoundaryResolver::new(source, start, eof, max_lookahead, label)?;
    let mut boundaries = vec![start];
    for split in &splits[1..] {
        if boundaries.last().is_some_and(|&previous| split.start <= previous) {
            continue;
        }
        let resolved = resolver.resolve(split.start)?;
        if resolved >= end {
            break;
        }
        if resolved != split.start {
            debug!(
                "Moved split boundary {} to {} to keep mates together",
                split.start, resolved
            );
        }
        boundaries.push(resolved);
    }
    boundaries.push(end);

    if resolver.pending().expired() > 0 {
        debug!(
            "{} template(s) in {} had no mate where one was expected",
            resolver.pending().expired(),
            label
        );
    }
    let dropped = splits.len() + 1 - boundaries.len();
    if dropped > 0 {
        debug!("{} split(s) absorbed while keeping mates together", dropped);
    }

    Ok(boundaries
        .windows(2)
        .map(|pair| Split::new(pair[0], pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::flags;

    /// Records at consecutive offsets `0, 1, 2, ...` (one per block).
    struct VecSource {
        records: Vec<AlignmentRecord>,
        position: usize,
    }

    impl VecSource {
        fn new(records: Vec<AlignmentRecord>) -> Self {
            Self {
                records,
                position: 0,
            }
        }
    }

    fn at(i: usize) -> VirtualOffset {
        VirtualOffset::at_block_start(i as u64)
    }

    impl RecordSource for VecSource {
        fn seek(&mut self, offset: VirtualOffset) -> Result<(), SplitError> {
            self.position = offset.compressed() as usize;
            Ok(())
        }

        fn virtual_offset(&self) -> VirtualOffset {
            at(self.position)
        }

        fn read_record(&mut self) -> Result<Option<AlignmentRecord>, SplitError> {
            let record = self.records.get(self.position).cloned();
            if record.is_some() {
                self.position += 1;
            }
            Ok(record)
        }
    }

    fn mate(name: &str, segment: u16, position: i32, mate_position: i32) -> AlignmentRecord {
        AlignmentRecord {
            name: name.as_bytes().to_vec(),
            flags: flags::PAIRED | segment,
            reference_id: 0,
            position,
            reference_span: 36,
            mate_reference_id: 0,
            mate_position,
        }
    }

    fn single(name: &str, position: i32) -> AlignmentRecord {
        AlignmentRecord {
            name: name.as_bytes().to_vec(),
            flags: 0,
            reference_id: 0,
            position,
            reference_span: 36,
            mate_reference_id: -1,
            mate_position: -1,
        }
    }

    /// Adjacent mates, 100 bp apart, templates 1 kbp apart
    fn pairs(names: &[&str]) -> Vec<AlignmentRecord> {
        names
            .iter()
            .enumerate()
            .flat_map(|(i, name)| {
                let pos = (i as i32 + 1) * 1000;
                [
                    mate(name, flags::FIRST_SEGMENT, pos, pos + 100),
                    mate(name, flags::LAST_SEGMENT, pos + 100, pos),
                ]
            })
            .collect()
    }

    fn resolve_one(
        records: Vec<AlignmentRecord>,
        proposal: usize,
        max_lookahead: usize,
    ) -> Result<VirtualOffset, SplitError> {
        let eof = at(records.len());
        let mut source = VecSource::new(records);
        let mut resolver = BoundaryResolver::new(&mut source, at(0), eof, max_lookahead, "test.bam")?;
        resolver.resolve(at(proposal))
    }

    #[test]
    fn test_boundary_on_template_start_stays() {
        assert_eq!(resolve_one(pairs(&["a", "b", "c"]), 2, 100).unwrap(), at(2));
    }

    #[test]
    fn test_boundary_between_mates_moves_past_mate() {
        assert_eq!(resolve_one(pairs(&["a", "b", "c"]), 3, 100).unwrap(), at(4));
    }

    #[test]
    fn test_interleaved_templates() {
        // Coordinate order: a1 b1 | a2 b2 c1 c2
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 300),
            mate("b", flags::FIRST_SEGMENT, 200, 400),
            mate("a", flags::LAST_SEGMENT, 300, 100),
            mate("b", flags::LAST_SEGMENT, 400, 200),
            mate("c", flags::FIRST_SEGMENT, 500, 600),
            mate("c", flags::LAST_SEGMENT, 600, 500),
        ];
        assert_eq!(resolve_one(records, 2, 100).unwrap(), at(4));
    }

    #[test]
    fn test_template_opened_well_before_boundary() {
        // a1 spans the whole window; the boundary after b2 still straddles a
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 900),
            mate("b", flags::FIRST_SEGMENT, 200, 300),
            mate("b", flags::LAST_SEGMENT, 300, 200),
            single("s", 400),
            mate("a", flags::LAST_SEGMENT, 900, 100),
            single("t", 1000),
        ];
        assert_eq!(resolve_one(records, 3, 100).unwrap(), at(5));
    }

    #[test]
    fn test_mate_sorted_first_without_segment_flags() {
        // Paired records with neither segment flag set
        let records = vec![
            mate("a", 0, 100, 150),
            mate("a", 0, 150, 100),
            single("s", 200),
        ];
        assert_eq!(resolve_one(records, 1, 100).unwrap(), at(2));
    }

    #[test]
    fn test_missing_mate_does_not_hold_boundary() {
        // a's mate is expected at 250 but the file moves on past it
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 250),
            single("s", 200),
            single("t", 300),
        ];
        assert_eq!(resolve_one(records.clone(), 1, 100).unwrap(), at(2));

        let eof = at(records.len());
        let mut source = VecSource::new(records);
        let mut resolver = BoundaryResolver::new(&mut source, at(0), eof, 100, "test").unwrap();
        resolver.resolve(at(1)).unwrap();
        assert!(resolver.pending().is_empty());
        assert_eq!(resolver.pending().expired(), 1);
    }

    #[test]
    fn test_supplementary_is_not_a_boundary() {
        let mut supplementary = mate("a", flags::FIRST_SEGMENT, 150, 200);
        supplementary.flags |= flags::SUPPLEMENTARY;
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 200),
            supplementary,
            mate("a", flags::LAST_SEGMENT, 200, 100),
            single("b", 300),
        ];
        assert_eq!(resolve_one(records, 1, 100).unwrap(), at(3));
    }

    #[test]
    fn test_pending_pairs_tracks_names() {
        let mut pending = PendingPairs::default();
        pending.observe(&mate("a", flags::FIRST_SEGMENT, 100, 300));
        pending.observe(&mate("b", flags::FIRST_SEGMENT, 200, 250));
        pending.observe(&single("s", 220));
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(b"a"));

        pending.observe(&mate("b", flags::LAST_SEGMENT, 250, 200));
        assert_eq!(pending.len(), 1);
        assert!(!pending.contains(b"b"));

        pending.expire_before((0, 300));
        assert_eq!(pending.len(), 1);
        pending.expire_before((0, 301));
        assert!(pending.is_empty());
        assert_eq!(pending.expired(), 1);
    }

    #[test]
    fn test_absorbing_the_tail_returns_eof() {
        let records = pairs(&["a"]);
        let mut source = VecSource::new(records);
        let mut resolver = BoundaryResolver::new(&mut source, at(0), at(99), 100, "test").unwrap();
        assert_eq!(resolver.resolve(at(1)).unwrap(), at(99));
    }

    #[test]
    fn test_lookahead_cap() {
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 10_000),
            single("b", 200),
            single("c", 300),
            single("d", 400),
            single("e", 500),
        ];
        match resolve_one(records, 1, 2) {
            Err(SplitError::PairLookaheadExceeded {
                limit,
                path,
                boundary,
            }) => {
                assert_eq!(limit, 2);
                assert_eq!(path, "test.bam");
                assert_eq!(boundary, at(1));
            }
            other => panic!("expected lookahead error: {:?}", other),
        }
    }

    #[test]
    fn test_keep_pairs_together_moves_and_drops() {
        let mut source = VecSource::new(pairs(&["a", "b", "c", "d"]));
        let splits = vec![
            Split::new(at(0), at(3)),
            Split::new(at(3), at(4)),
            Split::new(at(4), at(7)),
            Split::new(at(7), at(8)),
        ];
        let splits = keep_pairs_together(&mut source, splits, at(8), 100, "test").unwrap();
        // 3 -> 4, the second split collapses, 7 absorbs the tail
        assert_eq!(splits, vec![Split::new(at(0), at(4)), Split::new(at(4), at(8))]);
    }

    #[test]
    fn test_keep_pairs_together_over_overlapping_templates() {
        // a1 b1 c1 a2 d1 b2 c2 d2 | e1 e2
        let records = vec![
            mate("a", flags::FIRST_SEGMENT, 100, 400),
            mate("b", flags::FIRST_SEGMENT, 200, 600),
            mate("c", flags::FIRST_SEGMENT, 300, 700),
            mate("a", flags::LAST_SEGMENT, 400, 100),
            mate("d", flags::FIRST_SEGMENT, 500, 800),
            mate("b", flags::LAST_SEGMENT, 600, 200),
            mate("c", flags::LAST_SEGMENT, 700, 300),
            mate("d", flags::LAST_SEGMENT, 800, 500),
            mate("e", flags::FIRST_SEGMENT, 900, 950),
            mate("e", flags::LAST_SEGMENT, 950, 900),
        ];
        let mut source = VecSource::new(records);
        let splits = vec![
            Split::new(at(0), at(2)),
            Split::new(at(2), at(5)),
            Split::new(at(5), at(10)),
        ];
        let splits = keep_pairs_together(&mut source, splits, at(10), 100, "test").unwrap();
        assert_eq!(splits, vec![Split::new(at(0), at(8)), Split::new(at(8), at(10))]);
    }
}
