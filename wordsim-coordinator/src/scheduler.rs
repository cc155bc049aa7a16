//! The generation scheduler: MAP → SHUFFLE → DONE.
//!
//! One poll loop farms tokens to idle workers; every assignment runs as its
//! own task so a slow or dead worker never blocks the others. Generation
//! state is mutated only inside this module's critical section, worker
//! membership only inside the registry's — and neither lock is ever held
//! while waiting on the other.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::rpc::worker_client::WorkerClient;
use common::rpc::{MapRequest, ShuffleRequest};

use crate::registry::{Endpoint, Registry};
use crate::token::{self, TokenKey, TokenSet};

/// What a worker reported for one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The application callback signaled failure; the unit stays active.
    Failed,
    MapDone {
        shard: String,
        prefixes: Vec<String>,
    },
    ShuffleDone {
        shard: String,
    },
}

/// How a reported outcome was applied to the generation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted { remaining: usize },
    Duplicate,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Tokens remain; keep farming.
    Assign,
    /// The generation is complete.
    Done,
}

/// State of one generation. Single writer at a time, under the scheduler's
/// mutex.
#[derive(Debug)]
pub struct GenerationState {
    tokens: TokenSet,
    shuffle_keys: BTreeSet<String>,
    map_shards: Vec<String>,
    shuffle_shards: Vec<String>,
    shuffled: bool,
    skip_shuffle: bool,
}

impl GenerationState {
    pub fn new(tokens: TokenSet, skip_shuffle: bool) -> Self {
        Self {
            tokens,
            shuffle_keys: BTreeSet::new(),
            map_shards: Vec::new(),
            shuffle_shards: Vec::new(),
            shuffled: false,
            skip_shuffle,
        }
    }

    /// Phase step: once the active token set drains, either build the
    /// shuffle units from the observed prefixes or declare the generation
    /// done.
    pub fn advance(&mut self, keys_per_unit: usize) -> Phase {
        if !self.tokens.is_empty() {
            return Phase::Assign;
        }
        if self.shuffled || self.skip_shuffle {
            return Phase::Done;
        }

        self.tokens = token::shuffle_tokens(&self.shuffle_keys, keys_per_unit);
        self.shuffled = true;
        info!("starting on {} shuffle units", self.tokens.len());

        if self.tokens.is_empty() {
            // Nothing alphabetic was ever emitted; there is nothing to sort.
            Phase::Done
        } else {
            Phase::Assign
        }
    }

    /// Pick and mark the next token for an idle worker.
    pub fn assign(&mut self) -> Option<TokenKey> {
        token::pick_token(&mut self.tokens)
    }

    /// Apply one worker-reported outcome.
    ///
    /// Only the first accepted result for a token is recorded; anything
    /// arriving for an already-consumed token is a late duplicate whose
    /// shard file is deleted so no orphan output leaks.
    pub fn apply_result(&mut self, key: &TokenKey, outcome: WorkOutcome) -> Applied {
        match outcome {
            WorkOutcome::Failed => Applied::Failed,
            WorkOutcome::MapDone { shard, prefixes } => {
                if self.tokens.remove(key).is_none() {
                    discard_shard(&shard);
                    return Applied::Duplicate;
                }
                self.shuffle_keys.extend(prefixes);
                debug!("have {} shuffle keys (alphabetic only)", self.shuffle_keys.len());
                self.map_shards.push(shard);
                Applied::Accepted {
                    remaining: self.tokens.len(),
                }
            }
            WorkOutcome::ShuffleDone { shard } => {
                if self.tokens.remove(key).is_none() {
                    discard_shard(&shard);
                    return Applied::Duplicate;
                }
                self.shuffle_shards.push(shard);
                Applied::Accepted {
                    remaining: self.tokens.len(),
                }
            }
        }
    }

    pub fn map_shards(&self) -> &[String] {
        &self.map_shards
    }

    /// The shards the finalizer should merge. With the shuffle skipped, the
    /// map output stands in for shuffle output.
    pub fn final_shards(&self) -> &[String] {
        if self.skip_shuffle {
            &self.map_shards
        } else {
            &self.shuffle_shards
        }
    }

    pub fn shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len()
    }
}

fn discard_shard(shard: &str) {
    debug!("discarding duplicate result shard [{shard}]");
    if let Err(e) = fs::remove_file(shard) {
        debug!("could not remove duplicate shard [{shard}]: {e}");
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Poll interval of the farming loop.
    pub farm_interval: Duration,

    /// Shuffle keys grouped into one shuffle unit; trades speed for worker
    /// memory.
    pub keys_per_unit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            farm_interval: Duration::from_millis(400),
            keys_per_unit: 5,
        }
    }
}

pub struct Scheduler {
    registry: Arc<Mutex<Registry>>,
    state: Arc<Mutex<GenerationState>>,
    base_path: String,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Mutex<Registry>>,
        state: GenerationState,
        base_path: String,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            state: Arc::new(Mutex::new(state)),
            base_path,
            config,
        }
    }

    /// Drive the generation to completion and return the final shard list.
    pub async fn run(&self) -> Vec<String> {
        info!("starting scheduler ({} units)", self.state.lock().await.remaining());

        loop {
            tokio::time::sleep(self.config.farm_interval).await;

            {
                let mut state = self.state.lock().await;
                if state.advance(self.config.keys_per_unit) == Phase::Done {
                    break;
                }
            }

            let idle = { self.registry.lock().await.acquire_idle() };
            if idle.is_empty() {
                continue;
            }

            let mut unassigned = Vec::new();
            {
                let mut state = self.state.lock().await;
                for endpoint in idle {
                    match state.assign() {
                        Some(key) => self.spawn_dispatch(endpoint, key),
                        None => unassigned.push(endpoint),
                    }
                }
            }

            if !unassigned.is_empty() {
                let mut registry = self.registry.lock().await;
                for endpoint in &unassigned {
                    registry.release(endpoint);
                }
            }
        }

        self.state.lock().await.final_shards().to_vec()
    }

    fn spawn_dispatch(&self, endpoint: Endpoint, key: TokenKey) {
        debug!("assigning token [{key}] to {endpoint}");

        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        let base_path = self.base_path.clone();

        tokio::spawn(async move {
            match call_worker(&endpoint, &key, &state, &base_path).await {
                Err(e) => {
                    // The token stays farmed and active; some other worker
                    // will pick it up on a later tick. This worker is gone
                    // until it announces UP again.
                    warn!("dropping worker {endpoint}: {e:#}");
                    registry.lock().await.unregister(&endpoint);
                }
                Ok(outcome) => {
                    let (live, idle) = {
                        let mut registry = registry.lock().await;
                        registry.release(&endpoint);
                        (registry.live_count(), registry.idle_count())
                    };

                    let mut state = state.lock().await;
                    match state.apply_result(&key, outcome) {
                        Applied::Accepted { remaining } => info!(
                            "COMPLETE [{key}] ({remaining} remaining) on {endpoint} ({live} live, {idle} idle)"
                        ),
                        Applied::Duplicate => {
                            debug!("late result for [{key}] from {endpoint}, discarded")
                        }
                        Applied::Failed => warn!("unit [{key}] failed on {endpoint}, will retry"),
                    }
                }
            }
        });
    }
}

/// One blocking remote call, from the perspective of the dispatch task.
async fn call_worker(
    endpoint: &Endpoint,
    key: &TokenKey,
    state: &Arc<Mutex<GenerationState>>,
    base_path: &str,
) -> Result<WorkOutcome> {
    let mut client = WorkerClient::connect(format!("http://{endpoint}")).await?;

    match key {
        TokenKey::Map { shard } => {
            let reply = client
                .map(MapRequest {
                    shard: shard.clone(),
                })
                .await?
                .into_inner();
            if reply.failed {
                Ok(WorkOutcome::Failed)
            } else {
                Ok(WorkOutcome::MapDone {
                    shard: reply.shard,
                    prefixes: reply.prefixes,
                })
            }
        }
        TokenKey::Shuffle { prefixes } => {
            // Snapshot of the completed map shards at dispatch time.
            let shards = { state.lock().await.map_shards().to_vec() };
            let reply = client
                .shuffle(ShuffleRequest {
                    prefixes: prefixes.clone(),
                    base_path: base_path.to_string(),
                    shards,
                })
                .await?
                .into_inner();
            Ok(WorkOutcome::ShuffleDone { shard: reply.shard })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::map_tokens;
    use std::io::Write;

    fn map_key(shard: &str) -> TokenKey {
        TokenKey::Map {
            shard: shard.to_string(),
        }
    }

    fn one_map_state(shard: &str, skip_shuffle: bool) -> GenerationState {
        GenerationState::new(map_tokens(&[shard.to_string()]), skip_shuffle)
    }

    #[test]
    fn first_result_consumes_the_token() {
        let mut state = one_map_state("a.gz", false);
        let applied = state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: "a-out.gz".to_string(),
                prefixes: vec!["aa".to_string()],
            },
        );

        assert_eq!(applied, Applied::Accepted { remaining: 0 });
        assert_eq!(state.map_shards(), ["a-out.gz"]);
    }

    #[test]
    fn failed_result_keeps_the_token_active() {
        let mut state = one_map_state("a.gz", false);
        assert_eq!(
            state.apply_result(&map_key("a.gz"), WorkOutcome::Failed),
            Applied::Failed
        );
        assert_eq!(state.remaining(), 1);
        assert!(state.map_shards().is_empty());
    }

    #[test]
    fn duplicate_result_is_discarded_and_shard_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let dup = dir.path().join("dup-out.gz");
        std::fs::File::create(&dup)
            .unwrap()
            .write_all(b"stale")
            .unwrap();

        let mut state = one_map_state("a.gz", false);
        let accepted = state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: "a-out.gz".to_string(),
                prefixes: vec![],
            },
        );
        assert_eq!(accepted, Applied::Accepted { remaining: 0 });

        // A second successful result for the consumed token: no error, no
        // second shard reference, file removed.
        let duplicate = state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: dup.to_str().unwrap().to_string(),
                prefixes: vec!["zz".to_string()],
            },
        );
        assert_eq!(duplicate, Applied::Duplicate);
        assert_eq!(state.map_shards(), ["a-out.gz"]);
        assert!(!dup.exists());
    }

    #[test]
    fn advance_builds_shuffle_units_once() {
        let mut state = one_map_state("a.gz", false);
        assert_eq!(state.advance(5), Phase::Assign);

        state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: "a-out.gz".to_string(),
                prefixes: vec!["aa".to_string(), "ab".to_string(), "ba".to_string()],
            },
        );

        assert_eq!(state.advance(2), Phase::Assign);
        assert!(state.shuffled());
        assert_eq!(state.remaining(), 2);

        // Drain the shuffle units; the generation then finishes.
        let keys = vec![state.assign().unwrap(), state.assign().unwrap()];
        for key in keys {
            state.apply_result(
                &key,
                WorkOutcome::ShuffleDone {
                    shard: format!("{key}-out.gz"),
                },
            );
        }
        assert_eq!(state.advance(2), Phase::Done);
        assert_eq!(state.final_shards().len(), 2);
    }

    #[test]
    fn skip_shuffle_never_creates_shuffle_units() {
        let mut state = one_map_state("a.gz", true);
        state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: "a-out.gz".to_string(),
                prefixes: vec!["aa".to_string()],
            },
        );

        assert_eq!(state.advance(5), Phase::Done);
        assert!(!state.shuffled());
        assert_eq!(state.final_shards(), ["a-out.gz"]);
    }

    #[test]
    fn no_observed_prefixes_ends_the_generation() {
        let mut state = one_map_state("a.gz", false);
        state.apply_result(
            &map_key("a.gz"),
            WorkOutcome::MapDone {
                shard: "a-out.gz".to_string(),
                prefixes: vec![],
            },
        );

        assert_eq!(state.advance(5), Phase::Done);
        assert!(state.shuffled());
        assert!(state.final_shards().is_empty());
    }
}
