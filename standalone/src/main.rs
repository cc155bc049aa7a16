use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use standalone::{run_pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory containing the input shards.
    input: PathBuf,

    /// Path of the merged output artifact.
    #[arg(short, long)]
    output: PathBuf,

    /// Name of the workload to run.
    #[arg(short, long)]
    workload: String,

    /// Skip the shuffle phase and merge map output directly, unsorted.
    #[arg(long)]
    no_shuffle: bool,

    /// Shuffle keys grouped into one shuffle unit.
    #[arg(long, default_value_t = 5)]
    keys_per_unit: usize,

    /// Auxiliary arguments forwarded to the workload on every invocation.
    #[clap(value_parser, last = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let workload = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!("the workload `{}` is not a known workload", args.workload))?;

    let config = PipelineConfig {
        skip_shuffle: args.no_shuffle,
        keys_per_unit: args.keys_per_unit,
    };
    run_pipeline(&args.input, &args.output, workload, &args.args, &config)
}
