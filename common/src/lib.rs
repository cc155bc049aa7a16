//! Shared pieces of the wordsim batch framework: the worker RPC stubs, the
//! compressed shard codec, the line-emission primitive, and the application
//! extension-point types.
//!
//! Corpus applications supply a map function and (optionally) a reduce
//! function; everything else — farming units to workers, the shuffle phase,
//! the final merge — is the framework's business.

use std::path::Path;

pub mod codec;
pub mod emit;

pub use emit::{Emitter, LineSink};

/// Generated gRPC stubs for the worker service.
pub mod rpc {
    tonic::include_proto!("worker");
}

/////////////////////////////////////////////////////////////////////////////
// Application extension points
/////////////////////////////////////////////////////////////////////////////

/// A map function receives the path of one input shard and the auxiliary
/// arguments the worker was started with, and writes zero or more output
/// lines through the sink.
///
/// Returning `Ok(false)` marks the unit as failed; the coordinator keeps the
/// unit active and retries it later. Errors propagate as RPC faults.
pub type MapFn = fn(shard: &Path, aux: &[String], out: &mut dyn LineSink) -> anyhow::Result<bool>;

/// A reduce function receives every line of its shuffle unit in total
/// lexicographic order, so records sharing a key arrive adjacent.
pub type ReduceFn = fn(lines: Vec<String>, aux: &[String], out: &mut dyn LineSink) -> anyhow::Result<()>;

/// A corpus application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

impl Workload {
    /// Build a workload with the default pass-through reducer.
    pub fn new(map_fn: MapFn) -> Self {
        Self {
            map_fn,
            reduce_fn: passthrough_reduce,
        }
    }

    pub fn with_reduce(map_fn: MapFn, reduce_fn: ReduceFn) -> Self {
        Self { map_fn, reduce_fn }
    }
}

/// The generic pass-through reducer: every sorted line goes out unchanged.
pub fn passthrough_reduce(
    lines: Vec<String>,
    _aux: &[String],
    out: &mut dyn LineSink,
) -> anyhow::Result<()> {
    for line in lines {
        out.output(&line)?;
    }
    Ok(())
}

/////////////////////////////////////////////////////////////////////////////
// Small helpers
/////////////////////////////////////////////////////////////////////////////

/// Chunk `items` into groups of at most `size`, preserving order.
pub fn group<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    assert!(size > 0, "group size must be positive");
    items.chunks(size).map(<[T]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_chunks_preserve_order() {
        let items = vec!["aa", "ab", "ba"];
        let groups = group(&items, 2);
        assert_eq!(groups, vec![vec!["aa", "ab"], vec!["ba"]]);
    }

    #[test]
    fn group_exact_multiple() {
        let groups = group(&[1, 2, 3, 4], 2);
        assert_eq!(groups, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn passthrough_reduce_copies_lines() {
        let mut sink = Emitter::new(Vec::new());
        passthrough_reduce(
            vec!["aa\tfoo".to_string(), "ab\tbar".to_string()],
            &[],
            &mut sink,
        )
        .unwrap();
        let (buf, _) = sink.into_inner();
        assert_eq!(String::from_utf8(buf).unwrap(), "aa\tfoo\nab\tbar\n");
    }
}
