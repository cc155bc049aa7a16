use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory containing the input shards.
    pub input: PathBuf,

    /// Path of the merged output artifact.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Process at most this many input shards, sampled at random.
    #[arg(short, long)]
    pub shards: Option<usize>,

    /// Run the shuffle phase (the default).
    #[arg(long, conflicts_with = "no_shuffle")]
    pub shuffle: bool,

    /// Skip the shuffle phase and merge map output directly, unsorted.
    #[arg(long)]
    pub no_shuffle: bool,

    /// Port the worker-announcement listener binds.
    #[arg(short, long, default_value_t = 65520)]
    pub port: u16,

    /// Shuffle keys grouped into one shuffle unit.
    #[arg(long, default_value_t = 5)]
    pub keys_per_unit: usize,

    /// Poll interval of the farming loop, in milliseconds.
    #[arg(long, default_value_t = 400)]
    pub farm_interval_ms: u64,
}
