//! BAM record access over a seekable BGZF stream.
//!
//! Decoding is left to `noodles::bam`; this module only maps each record down
//! to the fields splitting and filtering look at, and attaches the virtual
//! offset it was read from to every failure.

use crate::error::SplitError;
use crate::record::AlignmentRecord;
use crate::refdict::ReferenceDictionary;
use crate::virtual_offset::VirtualOffset;
use noodles::sam::alignment::record::Cigar as _;
use noodles::{bam, bgzf, sam};
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

/// Sequential record decoding from a virtual offset.
///
/// `virtual_offset` reports where the next `read_record` call starts, so a
/// caller can read the position, decode, and attribute the record to it.
pub trait RecordSource {
    fn seek(&mut self, offset: VirtualOffset) -> Result<(), SplitError>;

    fn virtual_offset(&self) -> VirtualOffset;

    /// Decode the next record, or `None` at end of file.
    fn read_record(&mut self) -> Result<Option<AlignmentRecord>, SplitError>;
}

#[derive(Debug, Clone)]
pub struct BamHeader {
    pub header: sam::Header,
    pub references: ReferenceDictionary,
}

impl BamHeader {
    fn new(header: sam::Header) -> Self {
        let mut references = ReferenceDictionary::new();
        for (name, map) in header.reference_sequences() {
            let length = u32::try_from(map.length().get()).unwrap_or(u32::MAX);
            references.push(&String::from_utf8_lossy(name), length);
        }
        Self { header, references }
    }
}

pub struct BamReader<R> {
    inner: bam::io::Reader<bgzf::io::Reader<R>>,
    label: String,
    record: bam::Record,
}

impl BamReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open BAM file '{}': {}", path.display(), e),
            )
        })?;
        Ok(Self::new(file, path.display().to_string()))
    }
}

impl<R: Read + Seek> BamReader<R> {
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self {
            inner: bam::io::Reader::from(bgzf::io::Reader::new(inner)),
            label: label.into(),
            record: bam::Record::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read the header from the start of the stream. Afterwards the reader is
    /// positioned at the first record.
    pub fn read_header(&mut self) -> Result<BamHeader, SplitError> {
        self.seek(VirtualOffset::MIN)?;
        let offset = self.virtual_offset();
        let header = self
            .inner
            .read_header()
            .map_err(|e| self.decode_error(offset, format!("invalid BAM header: {}", e)))?;
        Ok(BamHeader::new(header))
    }

    fn decode_error(&self, offset: VirtualOffset, message: String) -> SplitError {
        SplitError::Decode {
            path: self.label.clone(),
            offset,
            message,
        }
    }

    fn read_error(&self, offset: VirtualOffset, e: io::Error) -> SplitError {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                self.decode_error(offset, "truncated record".to_string())
            }
            io::ErrorKind::InvalidData => self.decode_error(offset, e.to_string()),
            _ => SplitError::Io(e),
        }
    }
}

impl<R: Read + Seek> RecordSource for BamReader<R> {
    fn seek(&mut self, offset: VirtualOffset) -> Result<(), SplitError> {
        self.inner.get_mut().seek(offset.into()).map_err(|e| {
            SplitError::Io(io::Error::new(
                e.kind(),
                format!("Failed to seek to {} in '{}': {}", offset, self.label, e),
            ))
        })?;
        Ok(())
    }

    fn virtual_offset(&self) -> VirtualOffset {
        self.inner.get_ref().virtual_position().into()
    }

    fn read_record(&mut self) -> Result<Option<AlignmentRecord>, SplitError> {
        let offset = self.virtual_offset();
        match self.inner.read_record(&mut self.record) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(self.read_error(offset, e)),
        }

        to_alignment_record(&self.record)
            .map(Some)
            .map_err(|e| self.read_error(offset, e))
    }
}

/// 0-based position, or -1 when absent
fn position_or_missing(position: Option<io::Result<noodles::core::Position>>) -> io::Result<i32> {
    match position.transpose()? {
        Some(position) => i32::try_from(usize::from(position) - 1)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        None => Ok(-1),
    }
}

fn reference_id_or_missing(id: Option<io::Result<usize>>) -> io::Result<i32> {
    match id.transpose()? {
        Some(id) => {
            i32::try_from(id).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
        None => Ok(-1),
    }
}

pub(crate) fn to_alignment_record(record: &bam::Record) -> io::Result<AlignmentRecord> {
    let reference_span = record.cigar().alignment_span()?;

    Ok(AlignmentRecord {
        name: record.name().map(|name| name.to_vec()).unwrap_or_default(),
        flags: record.flags().bits(),
        reference_id: reference_id_or_missing(record.reference_sequence_id())?,
        position: position_or_missing(record.alignment_start())?,
        reference_span: u32::try_from(reference_span)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        mate_reference_id: reference_id_or_missing(record.mate_reference_sequence_id())?,
        mate_position: position_or_missing(record.mate_alignment_start())?,
    })
}
