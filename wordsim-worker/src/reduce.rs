//! Shuffle-unit execution: gather, order, reduce.

use std::collections::BinaryHeap;
use std::io::BufRead;

use anyhow::Result;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use common::codec::{self, ShardWriter};
use common::Emitter;

use crate::core::WorkerContext;

/// Execute one shuffle unit: scan every map-phase shard, keep the lines
/// carrying one of the assigned prefixes, impose a total lexicographic
/// order through a priority queue, and run the application reduce callback
/// over the sorted stream.
pub fn perform_shuffle(
    ctx: &WorkerContext,
    prefixes: &[String],
    base_path: &str,
    shards: &[String],
) -> Result<String> {
    info!(
        "processing shuffle unit [{}] over {} map shards",
        prefixes.join("+"),
        shards.len()
    );

    // Randomized access order, so concurrent shuffle units don't herd over
    // the same shard at the same time.
    let mut order: Vec<&String> = shards.iter().collect();
    order.shuffle(&mut rand::thread_rng());

    let mut heap = BinaryHeap::new();
    for (i, shard) in order.iter().enumerate() {
        debug!("scanning shard {}/{} [{shard}]", i + 1, order.len());
        for line in codec::shard_reader(shard)?.lines() {
            let line = line?;
            if line.len() >= 2 && prefixes.iter().any(|p| line.starts_with(p.as_str())) {
                heap.push(line);
            }
        }
    }

    let sorted = heap.into_sorted_vec();
    let out_path = codec::shuffle_shard_name(base_path, prefixes, &ctx.host, ctx.port);
    let mut emitter = Emitter::new(ShardWriter::create(&out_path)?);
    (ctx.workload.reduce_fn)(sorted, &ctx.aux, &mut emitter)?;
    let (writer, _) = emitter.into_inner();
    writer.finish()?;

    Ok(out_path)
}
