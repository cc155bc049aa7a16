use anyhow::{anyhow, Result};
use clap::Parser;

use wordsim_worker::args::Args;
use wordsim_worker::core::{run, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let workload = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!("the workload `{}` is not a known workload", args.workload))?;

    let config = WorkerConfig {
        registry_addr: format!("{}:{}", args.coordinator, args.registry_port),
        advertise_host: args.advertise_host,
        workload,
        aux: args.args,
        load_previous: args.load_previous,
    };

    run(config).await
}
