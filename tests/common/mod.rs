//! Synthetic BAM + BAI fixtures for integration tests.
//!
//! Records are encoded with the noodles BAM writer, then laid out into BGZF
//! blocks by hand so that split boundaries land at known places: either every
//! `n` records (an odd count makes some blocks start on the second read of a
//! pair) or every `n` bytes, which cuts records across block boundaries. The
//! index is built from the resulting virtual positions with the csi indexer.

#![allow(dead_code)]

use bstr::BString;
use noodles::bam::{self, bai};
use noodles::bgzf::{self, VirtualPosition};
use noodles::core::Position;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::csi::binning_index::index::reference_sequence::index::LinearIndex;
use noodles::csi::binning_index::Indexer;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::alignment::record::cigar::op::{Kind, Op};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record_buf::{Cigar, QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::map::ReferenceSequence;
use noodles::sam::header::record::value::Map;
use noodles::sam::Header;
use std::fs::{self, File};
use std::io::Write;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::path::PathBuf;
use tempfile::TempDir;

pub const READ_LENGTH: u32 = 36;
pub const CHR21_LENGTH: u32 = 1_000_135;

pub const FLAG_PAIRED: u16 = 0x1;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_MATE_REVERSE: u16 = 0x20;
pub const FLAG_FIRST: u16 = 0x40;
pub const FLAG_LAST: u16 = 0x80;

#[derive(Debug, Clone)]
pub struct TestRecord {
    pub name: String,
    pub flags: u16,
    pub reference_id: i32,
    /// 0-based, -1 when unplaced
    pub position: i32,
    pub mate_reference_id: i32,
    pub mate_position: i32,
}

impl TestRecord {
    fn is_placed(&self) -> bool {
        self.reference_id >= 0
    }

    fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    fn to_record_buf(&self) -> RecordBuf {
        let mut builder = RecordBuf::builder()
            .set_name(BString::from(self.name.as_str()))
            .set_flags(Flags::from(self.flags))
            .set_sequence(Sequence::from(vec![b'A'; READ_LENGTH as usize]))
            .set_quality_scores(QualityScores::from(vec![30; READ_LENGTH as usize]));
        if self.is_placed() {
            builder = builder
                .set_reference_sequence_id(self.reference_id as usize)
                .set_alignment_start(Position::try_from(self.position as usize + 1).unwrap());
            if !self.is_unmapped() {
                builder = builder.set_cigar(Cigar::from(vec![Op::new(
                    Kind::Match,
                    READ_LENGTH as usize,
                )]));
            }
        }
        if self.mate_reference_id >= 0 {
            builder = builder
                .set_mate_reference_sequence_id(self.mate_reference_id as usize)
                .set_mate_alignment_start(
                    Position::try_from(self.mate_position as usize + 1).unwrap(),
                );
        }
        builder.build()
    }

    /// `(reference, start, end, mapped)` as the indexer wants it
    fn alignment_context(&self) -> Option<(usize, Position, Position, bool)> {
        if !self.is_placed() {
            return None;
        }
        let span = if self.is_unmapped() { 1 } else { READ_LENGTH as usize };
        let start = self.position as usize + 1;
        Some((
            self.reference_id as usize,
            Position::try_from(start).unwrap(),
            Position::try_from(start + span - 1).unwrap(),
            !self.is_unmapped(),
        ))
    }
}

fn pair(name: String, reference_id: i32, first: i32, second: i32) -> [TestRecord; 2] {
    [
        TestRecord {
            name: name.clone(),
            flags: FLAG_PAIRED | FLAG_FIRST | FLAG_MATE_REVERSE,
            reference_id,
            position: first,
            mate_reference_id: reference_id,
            mate_position: second,
        },
        TestRecord {
            name,
            flags: FLAG_PAIRED | FLAG_LAST | FLAG_REVERSE,
            reference_id,
            position: second,
            mate_reference_id: reference_id,
            mate_position: first,
        },
    ]
}

fn unplaced_records(n_unplaced: usize) -> impl Iterator<Item = TestRecord> {
    (0..n_unplaced).map(|i| TestRecord {
        name: format!("unplaced{:03}", i),
        flags: FLAG_UNMAPPED,
        reference_id: -1,
        position: -1,
        mate_reference_id: -1,
        mate_position: -1,
    })
}

/// `n_pairs` name- and coordinate-sorted pairs on chr21 (reference 1), the
/// first read of pair `i` starting at `(i + 1) * 1000`, its mate 100 bases on,
/// followed by `n_unplaced` unmapped reads without a reference.
pub fn paired_records(n_pairs: usize, n_unplaced: usize) -> Vec<TestRecord> {
    let mut records = Vec::with_capacity(n_pairs * 2 + n_unplaced);
    for i in 0..n_pairs {
        let first = (i as i32 + 1) * 1000 - 1;
        records.extend(pair(format!("pair{:05}", i), 1, first, first + 100));
    }
    records.extend(unplaced_records(n_unplaced));
    records
}

/// `n_pairs` coordinate-sorted pairs on chr21 whose mates lie `insert` bases
/// downstream, with templates starting every `spacing` bases. With `insert`
/// larger than `spacing` some template is open at every record.
pub fn staggered_records(n_pairs: usize, spacing: i32, insert: i32) -> Vec<TestRecord> {
    let mut records: Vec<TestRecord> = (0..n_pairs)
        .flat_map(|i| {
            let first = (i as i32 + 1) * spacing - 1;
            pair(format!("pair{:05}", i), 1, first, first + insert)
        })
        .collect();
    records.sort_by_key(|record| (record.reference_id, record.position));
    records
}

/// Coordinate-sorted groups of `group_size` overlapping templates on chr21:
/// every first read of a group precedes every mate (`a1 b1 c1 a2 b2 c2`).
/// No template is open between groups.
pub fn grouped_records(n_groups: usize, group_size: usize) -> Vec<TestRecord> {
    let mut records = Vec::with_capacity(n_groups * group_size * 2);
    for g in 0..n_groups {
        let base = g as i32 * 9_000 + 999;
        let group: Vec<[TestRecord; 2]> = (0..group_size)
            .map(|j| {
                let first = base + j as i32 * 100;
                pair(format!("group{:03}-{}", g, j), 1, first, first + 5_000)
            })
            .collect();
        records.extend(group.iter().map(|[first, _]| first.clone()));
        records.extend(group.iter().map(|[_, second]| second.clone()));
    }
    records
}

/// Where BGZF blocks are cut.
#[derive(Debug, Clone, Copy)]
pub enum BlockCut {
    /// After every `n` records
    Records(usize),
    /// Every `n` uncompressed bytes, regardless of record boundaries
    Bytes(usize),
}

pub struct Fixture {
    pub dir: TempDir,
    pub bam: PathBuf,
    pub bai: PathBuf,
    /// Virtual offset of every record, in file order
    pub record_offsets: Vec<VirtualPosition>,
}

pub fn references() -> Vec<(&'static str, u32)> {
    vec![("chr20", 64_444_167), ("chr21", CHR21_LENGTH)]
}

fn header() -> Header {
    references()
        .into_iter()
        .fold(Header::builder(), |builder, (name, length)| {
            builder.add_reference_sequence(
                name,
                Map::<ReferenceSequence>::new(NonZeroUsize::new(length as usize).unwrap()),
            )
        })
        .build()
}

/// Write `records` as `reads.bam` with a matching `reads.bam.bai`.
pub fn write_fixture(records: &[TestRecord], records_per_block: usize) -> Fixture {
    build_fixture(records, BlockCut::Records(records_per_block), None)
}

pub fn write_fixture_with(records: &[TestRecord], cut: BlockCut) -> Fixture {
    build_fixture(records, cut, None)
}

/// Like [`write_fixture`], but record `corrupt` claims more CIGAR operations
/// than it holds. The index still covers it.
pub fn write_corrupt_fixture(
    records: &[TestRecord],
    records_per_block: usize,
    corrupt: usize,
) -> Fixture {
    build_fixture(records, BlockCut::Records(records_per_block), Some(corrupt))
}

pub fn write_paired_fixture(n_pairs: usize, n_unplaced: usize) -> Fixture {
    write_fixture(&paired_records(n_pairs, n_unplaced), 7)
}

/// Uncompressed BAM stream, the end of its header and the byte range of every record.
fn encode(records: &[TestRecord], header: &Header) -> (Vec<u8>, usize, Vec<Range<usize>>) {
    let mut writer = bam::io::Writer::from(Vec::new());
    writer.write_header(header).unwrap();
    let header_end = writer.get_ref().len();

    let mut ranges = Vec::with_capacity(records.len());
    for record in records {
        let start = writer.get_ref().len();
        writer
            .write_alignment_record(header, &record.to_record_buf())
            .unwrap();
        ranges.push(start..writer.get_ref().len());
    }
    (writer.into_inner(), header_end, ranges)
}

fn build_fixture(records: &[TestRecord], cut: BlockCut, corrupt: Option<usize>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let bam = dir.path().join("reads.bam");
    let bai = dir.path().join("reads.bam.bai");

    let header = header();
    let (mut raw, header_end, ranges) = encode(records, &header);
    if let Some(i) = corrupt {
        // block_size (4), refID, pos, l_read_name, mapq, bin, then n_cigar_op
        let at = ranges[i].start + 16;
        raw[at..at + 2].copy_from_slice(&u16::MAX.to_le_bytes());
    }

    let mut writer = bgzf::io::Writer::new(Vec::new());
    writer.write_all(&raw[..header_end]).unwrap();
    writer.flush().unwrap();

    let mut record_offsets = Vec::with_capacity(records.len());
    let mut staged = 0;
    for (i, range) in ranges.iter().enumerate() {
        record_offsets.push(writer.virtual_position());
        match cut {
            BlockCut::Records(n) => {
                writer.write_all(&raw[range.clone()]).unwrap();
                if (i + 1) % n == 0 {
                    writer.flush().unwrap();
                }
            }
            BlockCut::Bytes(n) => {
                let mut rest = &raw[range.clone()];
                while !rest.is_empty() {
                    let take = (n - staged).min(rest.len());
                    writer.write_all(&rest[..take]).unwrap();
                    staged += take;
                    rest = &rest[take..];
                    if staged == n {
                        writer.flush().unwrap();
                        staged = 0;
                    }
                }
            }
        }
    }
    let end = writer.virtual_position();
    fs::write(&bam, writer.finish().unwrap()).unwrap();

    let mut indexer = Indexer::<LinearIndex>::default();
    for (i, record) in records.iter().enumerate() {
        let chunk_end = record_offsets.get(i + 1).copied().unwrap_or(end);
        indexer
            .add_record(
                record.alignment_context(),
                Chunk::new(record_offsets[i], chunk_end),
            )
            .unwrap();
    }
    let index = indexer.build(references().len());
    bai::io::Writer::new(File::create(&bai).unwrap())
        .write_index(&index)
        .unwrap();

    Fixture {
        dir,
        bam,
        bai,
        record_offsets,
    }
}
