//! BGZF block table used to snap raw byte offsets onto block starts.

use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// gzip magic, DEFLATE, FEXTRA
const GZIP_MAGIC: [u8; 4] = [0x1f, 0x8b, 0x08, 0x04];

/// Fixed gzip member header up to and including XLEN
const GZIP_HEADER_LEN: usize = 12;

/// Maps raw byte offsets onto compressed block starts.
pub trait BlockLocator {
    /// Start of the first block at or after `byte_offset`, or `None` past the last block.
    fn block_at_or_after(&self, byte_offset: u64) -> Option<u64>;

    /// Total length of the compressed file in bytes.
    fn file_size(&self) -> u64;
}

/// Start offsets of every block in a BGZF file, in file order.
#[derive(Debug, Clone)]
pub struct BgzfBlockMap {
    starts: Vec<u64>,
    file_size: u64,
}

impl BgzfBlockMap {
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let blocks = Self::scan(&mut BufReader::new(file)).map_err(|e| {
            io::Error::new(e.kind(), format!("'{}': {}", path.display(), e))
        })?;
        debug!(
            "Scanned {} BGZF blocks in {} ({} bytes)",
            blocks.len(),
            path.display(),
            blocks.file_size
        );
        Ok(blocks)
    }

    /// Walk the block chain by reading each header's BSIZE field.
    pub fn scan<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut starts = Vec::new();
        let mut position = 0u64;
        while position < file_size {
            let block_size = read_block_size(reader).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid BGZF block at byte {}: {}", position, e),
                )
            })?;
            starts.push(position);
            position += block_size;
            reader.seek(SeekFrom::Start(position))?;
        }
        if position != file_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "last BGZF block ends at byte {}, past the end of the file ({} bytes)",
                    position, file_size
                ),
            ));
        }

        Ok(Self { starts, file_size })
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

impl BlockLocator for BgzfBlockMap {
    fn block_at_or_after(&self, byte_offset: u64) -> Option<u64> {
        let i = self.starts.partition_point(|&start| start < byte_offset);
        self.starts.get(i).copied()
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }
}

/// Parse one block header and return the total block size (BSIZE + 1).
fn read_block_size<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut header = [0u8; GZIP_HEADER_LEN];
    reader.read_exact(&mut header)?;
    if header[0..4] != GZIP_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing gzip magic with extra field",
        ));
    }

    let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
    let mut extra = vec![0u8; xlen];
    reader.read_exact(&mut extra)?;

    // Subfields: SI1 SI2 SLEN(u16) DATA
    let mut i = 0;
    while i + 4 <= extra.len() {
        let slen = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        if extra[i] == b'B' && extra[i + 1] == b'C' && slen == 2 && i + 6 <= extra.len() {
            let bsize = u16::from_le_bytes([extra[i + 4], extra[i + 5]]);
            return Ok(u64::from(bsize) + 1);
        }
        i += 4 + slen;
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "gzip member has no BGZF 'BC' subfield (regular gzip, not BGZF?)",
    ))
}
