//! Split computation settings.
//!
//! Settings come either from CLI flags or from `key=value` properties as a
//! host job configuration would carry them. Keys outside the `bamsplit.`
//! namespace are ignored so a shared configuration file can be passed as is.

use crate::error::SplitError;
use crate::interval::{format_region_list, parse_region_list, RegionSpec};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const KEEP_PAIRED_READS_TOGETHER: &str = "bamsplit.keep-paired-reads-together";
pub const INTERVALS: &str = "bamsplit.intervals";
pub const TRAVERSE_UNPLACED_UNMAPPED: &str = "bamsplit.traverse-unplaced-unmapped";
pub const SPLIT_SIZE: &str = "bamsplit.split-size";
pub const MIN_SPLIT_SIZE: &str = "bamsplit.min-split-size";
pub const PAIR_LOOKAHEAD: &str = "bamsplit.pair-lookahead";

const NAMESPACE: &str = "bamsplit.";

/// 128 MiB, a common distributed file system block size
pub const DEFAULT_SPLIT_SIZE: u64 = 128 * 1024 * 1024;

pub const DEFAULT_PAIR_LOOKAHEAD: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Move boundaries so that mates always land in the same split
    pub keep_paired_reads_together: bool,
    /// Restrict splits to these regions; `None` splits the whole file
    pub intervals: Option<Vec<RegionSpec>>,
    /// Also read records without a reference when intervals are set
    pub traverse_unplaced_unmapped: bool,
    /// Coarse split size in compressed bytes
    pub target_split_size: u64,
    /// A trailing split smaller than this is merged into its predecessor
    pub min_split_size: u64,
    /// Records pair resolution may scan past a proposed boundary before giving up
    pub max_pair_lookahead: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            keep_paired_reads_together: true,
            intervals: None,
            traverse_unplaced_unmapped: false,
            target_split_size: DEFAULT_SPLIT_SIZE,
            min_split_size: 0,
            max_pair_lookahead: DEFAULT_PAIR_LOOKAHEAD,
        }
    }
}

impl SplitConfig {
    pub fn with_intervals(mut self, intervals: Vec<RegionSpec>) -> Self {
        self.intervals = (!intervals.is_empty()).then_some(intervals);
        self
    }

    /// Whether splitting is restricted to regions, including the unplaced pseudo-region.
    pub fn has_intervals(&self) -> bool {
        self.intervals.is_some() || self.traverse_unplaced_unmapped
    }

    /// Configured regions plus the unplaced pseudo-region when requested.
    pub fn regions(&self) -> Vec<RegionSpec> {
        let mut regions = self.intervals.clone().unwrap_or_default();
        if self.traverse_unplaced_unmapped && !regions.iter().any(|r| r.is_unplaced()) {
            regions.push(RegionSpec::unplaced());
        }
        regions
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        if self.target_split_size == 0 {
            return Err(SplitError::InvalidConfig {
                key: SPLIT_SIZE.to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_pair_lookahead == 0 {
            return Err(SplitError::InvalidConfig {
                key: PAIR_LOOKAHEAD.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), SplitError> {
        let value = value.trim();
        let invalid = || SplitError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            KEEP_PAIRED_READS_TOGETHER => {
                self.keep_paired_reads_together = parse_bool(value).ok_or_else(invalid)?
            }
            TRAVERSE_UNPLACED_UNMAPPED => {
                self.traverse_unplaced_unmapped = parse_bool(value).ok_or_else(invalid)?
            }
            INTERVALS => {
                let regions = parse_region_list(value)?;
                self.intervals = (!regions.is_empty()).then_some(regions);
            }
            SPLIT_SIZE => {
                self.target_split_size = value
                    .parse::<u64>()
                    .ok()
                    .filter(|&size| size > 0)
                    .ok_or_else(invalid)?
            }
            MIN_SPLIT_SIZE => self.min_split_size = value.parse().map_err(|_| invalid())?,
            PAIR_LOOKAHEAD => {
                self.max_pair_lookahead = value
                    .parse::<usize>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(invalid)?
            }
            _ if key.starts_with(NAMESPACE) => return Err(invalid()),
            _ => debug!("Ignoring configuration key {}", key),
        }
        Ok(())
    }

    /// Parse `key=value` lines on top of the defaults. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_properties(text: &str) -> Result<Self, SplitError> {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| SplitError::InvalidConfig {
                key: line.to_string(),
                value: String::new(),
            })?;
            config.set_property(key.trim(), value)?;
        }
        Ok(config)
    }

    pub fn from_properties_file<P: AsRef<Path>>(path: P) -> Result<Self, SplitError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_properties(&text)
    }

    pub fn to_properties(&self) -> String {
        let mut out = String::new();
        let mut push = |key: &str, value: String| {
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        };
        push(
            KEEP_PAIRED_READS_TOGETHER,
            self.keep_paired_reads_together.to_string(),
        );
        if let Some(intervals) = &self.intervals {
            push(INTERVALS, format_region_list(intervals));
        }
        push(
            TRAVERSE_UNPLACED_UNMAPPED,
            self.traverse_unplaced_unmapped.to_string(),
        );
        push(SPLIT_SIZE, self.target_split_size.to_string());
        push(MIN_SPLIT_SIZE, self.min_split_size.to_string());
        push(PAIR_LOOKAHEAD, self.max_pair_lookahead.to_string());
        out
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
