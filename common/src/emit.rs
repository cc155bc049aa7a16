//! The `output(line)` primitive handed to application callbacks.

use std::collections::BTreeSet;
use std::io::Write;

/// Sink for application-emitted lines.
pub trait LineSink {
    fn output(&mut self, line: &str) -> anyhow::Result<()>;
}

/// Writes newline-terminated lines to an underlying writer while recording
/// the partition prefix of every emitted line.
///
/// The recorded prefixes are the coordinator's only signal for how to bucket
/// the shuffle phase, so this bookkeeping lives here rather than with any
/// individual application.
pub struct Emitter<W: Write> {
    writer: W,
    prefixes: BTreeSet<String>,
}

impl<W: Write> Emitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            prefixes: BTreeSet::new(),
        }
    }

    pub fn prefixes(&self) -> &BTreeSet<String> {
        &self.prefixes
    }

    /// Hand back the writer and the observed prefixes, sorted.
    pub fn into_inner(self) -> (W, BTreeSet<String>) {
        (self.writer, self.prefixes)
    }
}

impl<W: Write> LineSink for Emitter<W> {
    fn output(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.writer, "{line}")?;
        if let Some(prefix) = line_prefix(line) {
            self.prefixes.insert(prefix.to_string());
        }
        Ok(())
    }
}

/// The partition prefix of a line: its first two characters, if both are
/// ASCII alphabetic. Anything else (digits, punctuation, short lines,
/// non-ASCII leaders) is not bucketed and never reaches the shuffle phase.
pub fn line_prefix(line: &str) -> Option<&str> {
    let mut chars = line.char_indices();
    let (_, a) = chars.next()?;
    let (_, b) = chars.next()?;
    let end = chars.next().map_or(line.len(), |(i, _)| i);
    if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() {
        Some(&line[..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_requires_two_alphabetic_leaders() {
        assert_eq!(line_prefix("aa\tfoo"), Some("aa"));
        assert_eq!(line_prefix("Zq"), Some("Zq"));
        assert_eq!(line_prefix("a"), None);
        assert_eq!(line_prefix(""), None);
        assert_eq!(line_prefix("1a\tfoo"), None);
        assert_eq!(line_prefix("a1\tfoo"), None);
        assert_eq!(line_prefix("\t\tfoo"), None);
    }

    #[test]
    fn prefix_ignores_non_ascii_leaders() {
        assert_eq!(line_prefix("éa\tfoo"), None);
        assert_eq!(line_prefix("aé\tfoo"), None);
    }

    #[test]
    fn emitter_terminates_lines_and_records_prefixes() {
        let mut emitter = Emitter::new(Vec::new());
        emitter.output("aa\tfoo").unwrap();
        emitter.output("ab\tbar").unwrap();
        emitter.output("aa\tbaz").unwrap();
        emitter.output("12\tskipped").unwrap();

        let (buf, prefixes) = emitter.into_inner();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "aa\tfoo\nab\tbar\naa\tbaz\n12\tskipped\n"
        );
        let prefixes: Vec<_> = prefixes.into_iter().collect();
        assert_eq!(prefixes, vec!["aa", "ab"]);
    }
}
