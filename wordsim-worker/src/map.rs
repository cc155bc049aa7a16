//! Map-unit execution.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tracing::info;

use common::codec::{self, ShardWriter};
use common::{Emitter, LineSink};

use crate::core::WorkerContext;

/// Execute one map unit: open a fresh output shard, run the application map
/// callback over the input shard, and report the output path plus the
/// partition prefixes observed in the emitted lines.
///
/// `None` means the callback signaled failure; the unit stays active on the
/// coordinator and will be retried.
pub fn perform_map(ctx: &WorkerContext, shard: &str) -> Result<Option<(String, Vec<String>)>> {
    info!("mapping token [{shard}]");

    let out_path = codec::map_shard_name(shard, &ctx.host, ctx.port);
    let mut emitter = Emitter::new(ShardWriter::create(&out_path)?);

    let ok = if ctx.load_previous && load_previous_result(shard, &out_path, &mut emitter) {
        true
    } else {
        (ctx.workload.map_fn)(Path::new(shard), &ctx.aux, &mut emitter)?
    };

    let (writer, prefixes) = emitter.into_inner();
    writer.finish()?;

    if ok {
        Ok(Some((out_path, prefixes.into_iter().collect())))
    } else {
        Ok(None)
    }
}

/// Look for a result shard a previous generation left behind for this token
/// and replay it through the emitter instead of re-mapping.
fn load_previous_result<W: Write>(
    shard: &str,
    out_path: &str,
    emitter: &mut Emitter<W>,
) -> bool {
    let token_path = Path::new(shard);
    let (Some(dir), Some(stem)) = (
        token_path.parent(),
        token_path.file_name().and_then(|name| name.to_str()),
    ) else {
        return false;
    };

    let Ok(entries) = fs::read_dir(dir) else {
        info!("couldn't load previous result");
        return false;
    };

    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(stem) || !name.contains(codec::RESULT_MARKER) {
            continue;
        }

        let candidate = entry.path();
        if candidate.to_str() == Some(out_path) {
            // The empty shard this very call just opened.
            continue;
        }

        info!("trying to reload from candidate [{}]", candidate.display());
        // Read fully before emitting anything, so a truncated candidate
        // doesn't leave half its lines in the fresh output shard.
        match codec::read_lines(&candidate) {
            Ok(lines) => {
                if lines.iter().try_for_each(|line| emitter.output(line)).is_ok() {
                    info!("loaded previous result from [{}]", candidate.display());
                    return true;
                }
                return false;
            }
            Err(e) => {
                info!("failed to reload [{}]: {e:#}", candidate.display());
                continue;
            }
        }
    }

    info!("couldn't load previous result");
    false
}
