use bamsplit::alignment_file::{find_index, AlignmentFile};
use bamsplit::bam::BamReader;
use bamsplit::config::SplitConfig;
use bamsplit::interval::{parse_region_list, RegionSpec};
use bamsplit::refdict::ReferenceDictionary;
use bamsplit::split_plan::SplitPlan;
use bamsplit::split_reader::{count_split_records, SplitReader};
use bamsplit::splitter::{compute_splits, Split};
use clap::Parser;
use log::info;
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Number of threads for parallel processing (defaults to all cores).
    #[clap(short = 't', long, value_parser)]
    num_threads: Option<NonZeroUsize>,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Options describing how to split one alignment file
#[derive(Parser, Debug)]
struct SplitOpts {
    /// Path to the BAM file.
    #[clap(short = 'b', long, value_parser)]
    bam: String,

    /// Path to the BAM index. Defaults to `<bam>.bai` or `<stem>.bai` when present.
    #[clap(long, value_parser)]
    index: Option<String>,

    /// Properties file with `bamsplit.*` settings; flags below take precedence.
    #[clap(short = 'c', long, value_parser)]
    config: Option<String>,

    /// Target split size in compressed bytes.
    #[clap(short = 's', long, value_parser)]
    split_size: Option<u64>,

    /// A trailing split smaller than this many bytes is merged into the previous one.
    #[clap(long, value_parser)]
    min_split_size: Option<u64>,

    /// Comma-separated intervals in the format `seq_name:start-end` (or `seq_name`, or `*` for unplaced reads)
    #[clap(short = 'r', long, value_parser)]
    intervals: Option<String>,

    /// Path to a BED file with intervals to restrict splits to
    #[clap(long, value_parser)]
    intervals_bed: Option<String>,

    /// Also read unplaced unmapped reads when intervals are given
    #[clap(short = 'u', long, action)]
    traverse_unplaced_unmapped: bool,

    /// Allow split boundaries to separate mates
    #[clap(long, action)]
    split_pairs: bool,

    /// Maximum number of records scanned when moving a boundary past mates
    #[clap(long, value_parser)]
    pair_lookahead: Option<usize>,
}

/// Command-line tool for splitting indexed BAM files into independent work units.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Compute the splits of a BAM file
    Splits {
        #[clap(flatten)]
        common: CommonOpts,

        #[clap(flatten)]
        split: SplitOpts,

        /// Write the split plan to this file
        #[clap(short = 'o', long, value_parser)]
        output: Option<String>,
    },
    /// Count the records of every split, reading splits in parallel
    Count {
        #[clap(flatten)]
        common: CommonOpts,

        #[clap(flatten)]
        split: SplitOpts,
    },
    /// Print the records of one split from a split plan
    View {
        #[clap(flatten)]
        common: CommonOpts,

        /// Path to a split plan written by `splits --output`
        #[clap(short = 'p', long, value_parser)]
        plan: String,

        /// Index of the split to print (0-based)
        #[clap(short = 'n', long, value_parser)]
        split: usize,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Splits {
            common,
            split,
            output,
        } => {
            initialize(&common)?;
            let file = open_alignment_file(&split)?;
            let config = build_config(&split)?;
            let splits = compute_splits(&file, &config)?;

            print_splits(&file, &splits)?;
            if let Some(output) = output {
                SplitPlan::new(split.bam, config, splits).save(output)?;
            }
        }
        Args::Count { common, split } => {
            initialize(&common)?;
            let file = open_alignment_file(&split)?;
            let config = build_config(&split)?;
            let splits = compute_splits(&file, &config)?;

            let counts = count_split_records(file.path(), &splits)?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for (i, (split, count)) in splits.iter().zip(&counts).enumerate() {
                writeln!(out, "{}\t{}\t{}\t{}", i, split.start, split.end, count)?;
            }
            out.flush()?;
            info!(
                "{} record(s) in {} split(s)",
                counts.iter().sum::<u64>(),
                splits.len()
            );
        }
        Args::View {
            common,
            plan,
            split,
        } => {
            initialize(&common)?;
            let plan = SplitPlan::load(&plan)?;
            let selected = plan.splits.get(split).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "Split {} does not exist; the plan has {} split(s)",
                        split,
                        plan.splits.len()
                    ),
                )
            })?;
            print_split_records(&plan.path, selected)?;
        }
    }

    Ok(())
}

/// Initialize logger and thread pool based on common options
fn initialize(common: &CommonOpts) -> io::Result<()> {
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let num_threads = common
        .num_threads
        .map_or_else(num_cpus::get, NonZeroUsize::get);
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| io::Error::other(format!("Failed to build thread pool: {e}")))
}

fn open_alignment_file(opts: &SplitOpts) -> io::Result<AlignmentFile> {
    let path = Path::new(&opts.bam);
    let index = opts
        .index
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| find_index(path));
    Ok(AlignmentFile::open_with_index(path, index.as_deref())?)
}

fn build_config(opts: &SplitOpts) -> io::Result<SplitConfig> {
    let mut config = match &opts.config {
        Some(path) => SplitConfig::from_properties_file(path)?,
        None => SplitConfig::default(),
    };

    if let Some(split_size) = opts.split_size {
        config.target_split_size = split_size;
    }
    if let Some(min_split_size) = opts.min_split_size {
        config.min_split_size = min_split_size;
    }
    if let Some(pair_lookahead) = opts.pair_lookahead {
        config.max_pair_lookahead = pair_lookahead;
    }
    if opts.split_pairs {
        config.keep_paired_reads_together = false;
    }
    if opts.traverse_unplaced_unmapped {
        config.traverse_unplaced_unmapped = true;
    }

    let mut regions = Vec::new();
    if let Some(intervals) = &opts.intervals {
        regions.extend(parse_region_list(intervals)?);
    }
    if let Some(bed) = &opts.intervals_bed {
        let bed_regions = parse_bed_file(bed)?;
        info!("Parsed {} intervals from BED file", bed_regions.len());
        regions.extend(bed_regions);
    }
    if !regions.is_empty() {
        let mut intervals = config.intervals.take().unwrap_or_default();
        intervals.extend(regions);
        config = config.with_intervals(intervals);
    }

    config.validate()?;
    Ok(config)
}

/// BED intervals (0-based, half-open) as 1-based inclusive regions
fn parse_bed_file(bed_file: &str) -> io::Result<Vec<RegionSpec>> {
    let file = File::open(bed_file)?;
    let reader = BufReader::new(file);
    let mut regions = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 3 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid BED line: {}", line),
            ));
        }

        let start = parts[1].parse::<u32>();
        let end = parts[2].parse::<u32>();
        match (start, end) {
            (Ok(start), Ok(end)) if start < end => regions.push(RegionSpec {
                name: parts[0].to_string(),
                range: Some((start + 1, end)),
            }),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid BED interval: {}", line),
                ))
            }
        }
    }

    Ok(regions)
}

fn print_splits(file: &AlignmentFile, splits: &[Split]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for (i, split) in splits.iter().enumerate() {
        let intervals = if split.is_interval_split() {
            split
                .intervals
                .iter()
                .map(|interval| interval.describe(file.references()))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            ".".to_string()
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            i,
            split.start,
            split.end,
            split.compressed_size(),
            intervals
        )?;
    }
    out.flush()
}

fn print_split_records(path: &str, split: &Split) -> io::Result<()> {
    let mut header_reader = BamReader::open(path)?;
    let references = header_reader.read_header()?.references;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for item in SplitReader::open(path, split)? {
        let (key, record) = item?;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            key,
            record.name_lossy(),
            record.flags,
            reference_name(&references, record.reference_id),
            record.position + 1,
            reference_name(&references, record.mate_reference_id),
            record.mate_position + 1
        )?;
    }
    out.flush()
}

fn reference_name(references: &ReferenceDictionary, reference_id: i32) -> &str {
    u32::try_from(reference_id)
        .ok()
        .and_then(|id| references.get_name(id))
        .unwrap_or("*")
}

