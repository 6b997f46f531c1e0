//! Split plans: the computed split list of one file, serialized so a
//! planning step can hand it to workers.

use crate::config::SplitConfig;
use crate::splitter::Split;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8] = b"BSPLIT01";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// Alignment file the splits refer to
    pub path: String,
    pub config: SplitConfig,
    pub splits: Vec<Split>,
}

impl SplitPlan {
    pub fn new(path: impl Into<String>, config: SplitConfig, splits: Vec<Split>) -> Self {
        Self {
            path: path.into(),
            config,
            splits,
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        let data = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| io::Error::other(format!("Failed to encode split plan: {e:?}")))?;
        writer.write_all(&data)?;
        writer.flush()
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic_buf = [0u8; 8];
        reader.read_exact(&mut magic_buf)?;
        if magic_buf != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic bytes - not a split plan file",
            ));
        }

        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(
            |e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Failed to load split plan: {e:?}"),
                )
            },
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        self.write_to(BufWriter::new(File::create(path)?))?;
        info!(
            "Wrote {} split(s) for {} to {}",
            self.splits.len(),
            self.path,
            path.display()
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open split plan '{}': {}", path.display(), e),
            )
        })?;
        Self::read_from(BufReader::new(file))
    }
}
