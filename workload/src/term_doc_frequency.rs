//! Term and document frequency counts over a plain corpus (one document per
//! line). The map side emits one `term \t tf \t df` record per distinct term
//! in its shard; the reduce side sums the counts and keeps terms seen in at
//! least the threshold number of documents.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use anyhow::{anyhow, Result};
use itertools::Itertools;
use tracing::{error, info};

use common::codec;
use common::LineSink;

/// Terms must appear in at least this many documents to survive the reduce.
const DOC_FREQUENCY_THRESHOLD: u64 = 5;

/// Documents shorter than this many terms are skipped entirely.
const MIN_DOC_LENGTH: usize = 100;

/// Aux arguments: `[min_doc_length] [doc_frequency_threshold]`.
fn params(aux: &[String]) -> (usize, u64) {
    let min_doc_length = aux
        .first()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(MIN_DOC_LENGTH);
    let threshold = aux
        .get(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DOC_FREQUENCY_THRESHOLD);
    (min_doc_length, threshold)
}

pub fn map(shard: &Path, aux: &[String], out: &mut dyn LineSink) -> Result<bool> {
    let (min_doc_length, _) = params(aux);

    let mut tf: HashMap<String, u64> = HashMap::new();
    let mut df: HashMap<String, u64> = HashMap::new();

    for (doc_count, line) in codec::shard_reader(shard)?.lines().enumerate() {
        let document = line?;
        let terms: Vec<&str> = document.split_whitespace().collect();

        if terms.len() > min_doc_length {
            for word in &terms {
                *tf.entry((*word).to_string()).or_default() += 1;
            }
            for word in terms.iter().copied().collect::<HashSet<&str>>() {
                *df.entry(word.to_string()).or_default() += 1;
            }
        }

        if doc_count % 100 == 0 {
            info!("processed {doc_count} documents");
        }
    }

    for (word, count) in &tf {
        let doc_count = df.get(word).copied().unwrap_or(0);
        out.output(&format!("{word}\t{count}\t{doc_count}"))?;
    }

    Ok(true)
}

/// Sum-reducer over the sorted record stream.
pub fn reduce(lines: Vec<String>, aux: &[String], out: &mut dyn LineSink) -> Result<()> {
    let (_, threshold) = params(aux);

    let records = lines.iter().filter_map(|line| match parse_record(line) {
        Ok(record) => Some(record),
        Err(_) => {
            error!("error on line [{line}]");
            None
        }
    });

    for (word, group) in &records.chunk_by(|(word, _, _)| word.clone()) {
        let (tf, df) = group.fold((0u64, 0u64), |(tf, df), (_, t, d)| (tf + t, df + d));
        if df >= threshold {
            out.output(&format!("{word}\t{tf}\t{df}"))?;
        }
    }

    Ok(())
}

fn parse_record(line: &str) -> Result<(String, u64, u64)> {
    let mut fields = line.split('\t');
    let word = fields
        .next()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| anyhow!("missing term"))?;
    let tf = fields
        .next()
        .ok_or_else(|| anyhow!("missing term frequency"))?
        .parse()?;
    let df = fields
        .next()
        .ok_or_else(|| anyhow!("missing document frequency"))?
        .parse()?;
    Ok((word.to_string(), tf, df))
}
