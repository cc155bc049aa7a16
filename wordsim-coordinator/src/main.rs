use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use wordsim_coordinator::args::Args;
use wordsim_coordinator::finalizer::ShardedFinalizer;
use wordsim_coordinator::registry::{serve_announcements, Registry};
use wordsim_coordinator::scheduler::{GenerationState, Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("registry listening on port {}", args.port);

    let registry = Arc::new(Mutex::new(Registry::default()));
    tokio::spawn(serve_announcements(listener, Arc::clone(&registry)));

    let finalizer = ShardedFinalizer::discover(&args.input, args.shards, &args.output)?;
    let base_path = finalizer
        .base_path()
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 input path"))?
        .to_string();

    let state = GenerationState::new(finalizer.map_tokens(), args.no_shuffle);
    let config = SchedulerConfig {
        farm_interval: Duration::from_millis(args.farm_interval_ms),
        keys_per_unit: args.keys_per_unit,
    };

    let scheduler = Scheduler::new(Arc::clone(&registry), state, base_path, config);
    let shards = scheduler.run().await;

    finalizer.end_task(&registry, &shards).await?;
    Ok(())
}
