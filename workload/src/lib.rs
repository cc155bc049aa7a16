//! Corpus applications pluggable into the worker runtime.
//!
//! Every workload is a pair of callbacks over line-oriented shards; the
//! runtime supplies the output sink and the shuffle phase guarantees the
//! reduce callback a sorted stream.

use common::Workload;

pub mod passthrough;
pub mod term_doc_frequency;

/// Look a workload up by its public name.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "passthrough" => Some(Workload::new(passthrough::map)),
        "term-doc-frequency" => Some(Workload::with_reduce(
            term_doc_frequency::map,
            term_doc_frequency::reduce,
        )),
        _ => None,
    }
}
