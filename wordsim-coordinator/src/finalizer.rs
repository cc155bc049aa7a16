//! Input discovery and the terminal merge for directory-sharded corpora.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use glob::glob;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info};

use common::codec::{self, ShardWriter};
use common::rpc::worker_client::WorkerClient;
use common::rpc::TerminateRequest;

use crate::registry::Registry;
use crate::token::{self, TokenSet};

/// Coordinator specialization for the common case: inputs are the
/// compressed shard files sitting in one directory.
pub struct ShardedFinalizer {
    base_path: PathBuf,
    output: PathBuf,
    shards: Vec<String>,
}

impl ShardedFinalizer {
    /// List the eligible input shards under `base_path`: every `*.gz` file
    /// whose name does not mark it as a previously produced result,
    /// downsampled at random when a shard count is requested.
    pub fn discover(
        base_path: &Path,
        shards_to_use: Option<usize>,
        output: &Path,
    ) -> Result<Self> {
        if !base_path.is_dir() {
            bail!("input directory [{}] does not exist", base_path.display());
        }

        let pattern = base_path.join("*.gz");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 input path"))?;

        let mut shards: Vec<String> = glob(pattern)
            .context("listing input shards")?
            .filter_map(Result::ok)
            .filter(|path| {
                path.file_name()
                    .map_or(false, |name| !name.to_string_lossy().contains(codec::RESULT_MARKER))
            })
            .filter_map(|path| path.to_str().map(String::from))
            .collect();
        shards.sort();

        if let Some(count) = shards_to_use {
            if count < shards.len() {
                let mut rng = rand::thread_rng();
                shards = shards
                    .choose_multiple(&mut rng, count)
                    .cloned()
                    .collect();
                shards.sort();
            }
        }

        info!("got {} shards from [{}]", shards.len(), base_path.display());

        Ok(Self {
            base_path: base_path.to_path_buf(),
            output: output.to_path_buf(),
            shards,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    /// One map token per retained input shard.
    pub fn map_tokens(&self) -> TokenSet {
        token::map_tokens(&self.shards)
    }

    /// Terminal step of a generation: tell every still-registered worker to
    /// exit, then merge the final shards into the output artifact.
    pub async fn end_task(
        &self,
        registry: &Arc<Mutex<Registry>>,
        shards: &[String],
    ) -> Result<()> {
        terminate_workers(registry).await;

        info!(
            "merging {} result shards to [{}]",
            shards.len(),
            self.output.display()
        );
        merge_shards(shards, &self.output)?;
        info!("done writing");
        Ok(())
    }
}

/// Best-effort terminate broadcast; a worker that cannot be reached is
/// simply left behind.
pub async fn terminate_workers(registry: &Arc<Mutex<Registry>>) {
    let live = { registry.lock().await.live_endpoints() };

    for endpoint in live {
        info!("terminating {endpoint}");
        let result = async {
            let mut client = WorkerClient::connect(format!("http://{endpoint}")).await?;
            client.terminate(TerminateRequest {}).await?;
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = result {
            info!("not terminating {endpoint}: {e:#}");
        }
    }
}

/// Pure pass-through merge: decompressed shard contents concatenated in
/// order, byte for byte. Global ordering depends entirely on the shuffle
/// phase having partitioned keys disjointly.
pub fn merge_shards(shards: &[String], output: &Path) -> Result<()> {
    let mut writer = ShardWriter::create(output)?;

    for (i, shard) in shards.iter().enumerate() {
        debug!("processing shard {i} [{shard}]");
        let mut reader = codec::shard_reader(shard)?;
        io::copy(&mut reader, &mut writer)
            .with_context(|| format!("merging shard [{shard}]"))?;
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::LineSink;
    use std::collections::HashSet;

    fn write_shard(path: &Path, lines: &[&str]) {
        let mut emitter = common::Emitter::new(ShardWriter::create(path).unwrap());
        for line in lines {
            emitter.output(line).unwrap();
        }
        let (writer, _) = emitter.into_inner();
        writer.finish().unwrap();
    }

    #[test]
    fn discover_skips_result_shards() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(&dir.path().join("part-000.txt.gz"), &["aa\tfoo"]);
        write_shard(&dir.path().join("part-001.txt.gz"), &["ab\tbar"]);
        write_shard(
            &dir.path().join("part-000.txt.gz-h-1-results.txt.gz"),
            &["stale"],
        );

        let finalizer =
            ShardedFinalizer::discover(dir.path(), None, &dir.path().join("out.txt.gz")).unwrap();

        assert_eq!(finalizer.shards().len(), 2);
        assert!(finalizer.shards().iter().all(|s| !s.contains("results")));
        assert_eq!(finalizer.map_tokens().len(), 2);
    }

    #[test]
    fn discover_downsamples_to_requested_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_shard(&dir.path().join(format!("part-{i:03}.txt.gz")), &["aa\tx"]);
        }

        let finalizer =
            ShardedFinalizer::discover(dir.path(), Some(3), &dir.path().join("out.txt.gz"))
                .unwrap();

        assert_eq!(finalizer.shards().len(), 3);
        let unique: HashSet<_> = finalizer.shards().iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn discover_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(ShardedFinalizer::discover(&missing, None, &dir.path().join("o")).is_err());
    }

    #[test]
    fn merge_is_pure_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.gz");
        let second = dir.path().join("second.gz");
        write_shard(&first, &["a", "b"]);
        write_shard(&second, &["c"]);

        let output = dir.path().join("merged.txt.gz");
        let shards = vec![
            first.to_str().unwrap().to_string(),
            second.to_str().unwrap().to_string(),
        ];
        merge_shards(&shards, &output).unwrap();

        assert_eq!(codec::read_lines(&output).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_of_nothing_is_an_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged.txt.gz");
        merge_shards(&[], &output).unwrap();
        assert!(codec::read_lines(&output).unwrap().is_empty());
    }
}
