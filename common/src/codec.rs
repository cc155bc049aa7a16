//! Gzip line-oriented shard I/O and the shard naming scheme.
//!
//! Every intermediate and final artifact in the system is a gzip stream of
//! newline-terminated, tab-separated text records. Result shards carry a
//! `results` marker in their file name so input discovery can skip them.

use std::fs::File;
use std::hash::Hasher;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fnv::FnvHasher;

/// Marker present in every shard the framework itself produced.
pub const RESULT_MARKER: &str = "results";

const RESULT_SUFFIX: &str = "results.txt.gz";

/// Open a shard for buffered line reading.
pub fn shard_reader(path: impl AsRef<Path>) -> Result<BufReader<GzDecoder<File>>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening shard [{}]", path.display()))?;
    Ok(BufReader::new(GzDecoder::new(file)))
}

/// Read every line of a shard into memory.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    shard_reader(path)?
        .lines()
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("reading shard [{}]", path.display()))
}

/// A buffered gzip shard writer. Call [`ShardWriter::finish`] to flush the
/// stream trailer; dropping an unfinished writer truncates the shard.
pub struct ShardWriter {
    inner: BufWriter<GzEncoder<File>>,
}

impl ShardWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("creating shard [{}]", path.display()))?;
        Ok(Self {
            inner: BufWriter::new(GzEncoder::new(file, Compression::default())),
        })
    }

    pub fn finish(self) -> Result<()> {
        let encoder = self
            .inner
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?;
        encoder.finish()?;
        Ok(())
    }
}

impl Write for ShardWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Output shard name for a map unit: derived from the input shard path plus
/// the identity of the worker that produced it, so concurrent attempts by
/// different workers never collide.
pub fn map_shard_name(token: &str, host: &str, port: u16) -> String {
    format!("{token}-{host}-{port}-{RESULT_SUFFIX}")
}

/// Output shard name for a shuffle unit, keyed by a hash of its prefix group
/// plus the producing worker's identity.
pub fn shuffle_shard_name(base_path: &str, prefixes: &[String], host: &str, port: u16) -> String {
    let hash = prefix_group_hash(prefixes);
    format!("{base_path}/REDUCE-{hash:016x}-{host}-{port}-{RESULT_SUFFIX}")
}

fn prefix_group_hash(prefixes: &[String]) -> u64 {
    let mut hasher = FnvHasher::default();
    for prefix in prefixes {
        hasher.write(prefix.as_bytes());
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-000.txt.gz");

        let mut writer = ShardWriter::create(&path).unwrap();
        writer.write_all(b"aa\tfoo\nab\tbar\n").unwrap();
        writer.finish().unwrap();

        assert_eq!(read_lines(&path).unwrap(), vec!["aa\tfoo", "ab\tbar"]);
    }

    #[test]
    fn shard_names_carry_result_marker() {
        let map = map_shard_name("/data/part-000.txt.gz", "worker-a", 40123);
        assert_eq!(map, "/data/part-000.txt.gz-worker-a-40123-results.txt.gz");
        assert!(map.contains(RESULT_MARKER));

        let prefixes = vec!["aa".to_string(), "ab".to_string()];
        let shuffle = shuffle_shard_name("/data", &prefixes, "worker-b", 41000);
        assert!(shuffle.starts_with("/data/REDUCE-"));
        assert!(shuffle.ends_with("-worker-b-41000-results.txt.gz"));
        assert!(shuffle.contains(RESULT_MARKER));
    }

    #[test]
    fn shuffle_names_differ_by_prefix_group() {
        let a = shuffle_shard_name("/d", &["aa".to_string()], "h", 1);
        let b = shuffle_shard_name("/d", &["ab".to_string()], "h", 1);
        assert_ne!(a, b);
    }
}
