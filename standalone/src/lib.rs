//! The whole pipeline in one process: map every input shard, bucket the
//! observed prefixes, shuffle each bucket, merge. Same semantics as the
//! cluster, none of the networking — useful for small corpora and for
//! exercising workloads.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::info;

use common::{group, Workload};
use wordsim_coordinator::finalizer::{merge_shards, ShardedFinalizer};
use wordsim_worker::core::WorkerContext;
use wordsim_worker::{map, reduce};

pub struct PipelineConfig {
    pub skip_shuffle: bool,
    pub keys_per_unit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_shuffle: false,
            keys_per_unit: 5,
        }
    }
}

pub fn run_pipeline(
    input: &Path,
    output: &Path,
    workload: Workload,
    aux: &[String],
    config: &PipelineConfig,
) -> Result<()> {
    let finalizer = ShardedFinalizer::discover(input, None, output)?;
    let base_path = input
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 input path"))?;

    let ctx = WorkerContext {
        host: "standalone".to_string(),
        port: 0,
        workload,
        aux: aux.to_vec(),
        load_previous: false,
    };

    let mut map_shards = Vec::new();
    let mut shuffle_keys = BTreeSet::new();
    for shard in finalizer.shards() {
        let (out_shard, prefixes) = map::perform_map(&ctx, shard)?
            .ok_or_else(|| anyhow!("map unit failed on [{shard}]"))?;
        shuffle_keys.extend(prefixes);
        map_shards.push(out_shard);
    }
    info!(
        "mapped {} shards, {} shuffle keys",
        map_shards.len(),
        shuffle_keys.len()
    );

    let final_shards = if config.skip_shuffle {
        map_shards
    } else {
        let keys: Vec<String> = shuffle_keys.into_iter().collect();
        let mut shuffle_shards = Vec::new();
        for prefixes in group(&keys, config.keys_per_unit) {
            shuffle_shards.push(reduce::perform_shuffle(
                &ctx, &prefixes, base_path, &map_shards,
            )?);
        }
        shuffle_shards
    };

    merge_shards(&final_shards, output)?;
    info!("done writing [{}]", output.display());
    Ok(())
}
