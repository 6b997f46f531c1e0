//! An opened alignment file: header, block table and optional index.
//!
//! Everything here is read once when the file is opened and never changes
//! afterwards; workers each open their own [`BamReader`] over the same path.

use crate::bai::BaiIndex;
use crate::bam::{BamHeader, BamReader, RecordSource};
use crate::blocks::{BgzfBlockMap, BlockLocator};
use crate::error::SplitError;
use crate::refdict::ReferenceDictionary;
use crate::virtual_offset::VirtualOffset;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub struct AlignmentFile {
    path: PathBuf,
    header: BamHeader,
    first_record: VirtualOffset,
    blocks: BgzfBlockMap,
    index: Option<BaiIndex>,
}

impl AlignmentFile {
    /// Open a BAM file, picking up `<file>.bai` or `<stem>.bai` when present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SplitError> {
        let path = path.as_ref();
        let index_path = find_index(path);
        Self::open_with_index(path, index_path.as_deref())
    }

    /// Open a BAM file with an explicit index, or none at all.
    pub fn open_with_index(path: &Path, index_path: Option<&Path>) -> Result<Self, SplitError> {
        let mut reader = BamReader::open(path)?;
        let header = reader.read_header()?;
        let first_record = reader.virtual_offset();
        let blocks = BgzfBlockMap::from_path(path)?;

        let index = match index_path {
            Some(index_path) => {
                check_index_timestamp(path, index_path);
                Some(BaiIndex::read(index_path, &header.references)?)
            }
            None => {
                info!("No index found for {}", path.display());
                None
            }
        };

        debug!(
            "Opened {}: {} references, first record at {}, {} bytes",
            path.display(),
            header.references.len(),
            first_record,
            blocks.file_size()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            first_record,
            blocks,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> String {
        self.path.display().to_string()
    }

    pub fn header(&self) -> &BamHeader {
        &self.header
    }

    pub fn references(&self) -> &ReferenceDictionary {
        &self.header.references
    }

    /// Offset of the first record, right after the header
    pub fn first_record_offset(&self) -> VirtualOffset {
        self.first_record
    }

    /// Offset one past the last byte of the file
    pub fn eof(&self) -> VirtualOffset {
        VirtualOffset::at_block_start(self.blocks.file_size())
    }

    pub fn file_size(&self) -> u64 {
        self.blocks.file_size()
    }

    pub fn blocks(&self) -> &BgzfBlockMap {
        &self.blocks
    }

    pub fn index(&self) -> Option<&BaiIndex> {
        self.index.as_ref()
    }

    /// A fresh reader over the file. Position it with [`RecordSource::seek`].
    pub fn reader(&self) -> Result<BamReader<File>, SplitError> {
        Ok(BamReader::open(&self.path)?)
    }
}

/// `<file>.bai` takes precedence over `<stem>.bai`.
pub fn find_index(path: &Path) -> Option<PathBuf> {
    let mut appended = path.as_os_str().to_owned();
    appended.push(".bai");
    let candidates = [PathBuf::from(appended), path.with_extension("bai")];
    candidates.into_iter().find(|candidate| candidate.is_file())
}

fn check_index_timestamp(path: &Path, index_path: &Path) {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (modified(path), modified(index_path)) {
        (Ok(file_ts), Ok(index_ts)) => {
            if file_ts > index_ts {
                warn!(
                    "{} has been modified since index {} was created",
                    path.display(),
                    index_path.display()
                );
            }
        }
        _ => warn!(
            "Unable to compare timestamps of {} and {}; the index may be stale",
            path.display(),
            index_path.display()
        ),
    }
}
