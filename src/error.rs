use crate::virtual_offset::VirtualOffset;
use std::io;

/// Errors raised while planning or reading splits.
///
/// Every variant is fatal for the operation that raised it; nothing is
/// retried or downgraded to an empty result at this layer.
#[derive(Debug)]
pub enum SplitError {
    /// The index is structurally inconsistent (truncated, chunk end before start, ...)
    MalformedIndex { path: String, message: String },
    /// A caller-supplied interval is unparseable, unknown or inverted
    InvalidInterval { token: String, reason: String },
    /// The first split would not contain a single record
    EmptyFirstSplit {
        path: String,
        first_record: VirtualOffset,
        split_end: u64,
    },
    /// A record could not be decoded while streaming
    Decode {
        path: String,
        offset: VirtualOffset,
        message: String,
    },
    /// Mate resolution scanned past its configured record limit
    PairLookaheadExceeded {
        path: String,
        boundary: VirtualOffset,
        limit: usize,
    },
    /// Intervals were requested for a file without an index
    MissingIndex { path: String },
    /// A configuration property has an unusable value
    InvalidConfig { key: String, value: String },
    Io(io::Error),
}

impl std::fmt::Display for SplitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitError::MalformedIndex { path, message } => {
                write!(f, "'{}': malformed index: {}", path, message)
            }
            SplitError::InvalidInterval { token, reason } => {
                write!(f, "Invalid interval '{}': {}", token, reason)
            }
            SplitError::EmptyFirstSplit {
                path,
                first_record,
                split_end,
            } => write!(
                f,
                "'{}': no reads in first split (first record at {}, split ends at byte {}): bad BAM file or tiny split size? Increase the split size",
                path, first_record, split_end
            ),
            SplitError::Decode {
                path,
                offset,
                message,
            } => write!(
                f,
                "'{}': failed to decode record at {}: {}",
                path, offset, message
            ),
            SplitError::PairLookaheadExceeded {
                path,
                boundary,
                limit,
            } => write!(
                f,
                "'{}': could not resolve mates around split boundary {} within {} records",
                path, boundary, limit
            ),
            SplitError::MissingIndex { path } => write!(
                f,
                "'{}': intervals require an index (.bai) next to the alignment file",
                path
            ),
            SplitError::InvalidConfig { key, value } => {
                write!(f, "Invalid value '{}' for property '{}'", value, key)
            }
            SplitError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SplitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplitError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplitError {
    fn from(e: io::Error) -> Self {
        SplitError::Io(e)
    }
}

impl From<SplitError> for io::Error {
    fn from(e: SplitError) -> Self {
        match e {
            SplitError::Io(e) => e,
            SplitError::InvalidInterval { .. } | SplitError::InvalidConfig { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            _ => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        }
    }
}
