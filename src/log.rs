//! Line-delimited transaction log
//!
//! One canonically-encoded transaction per line. Appends write the whole
//! line with a single `write_all` and flush, so a crash leaves at most one
//! torn line at the end of the log. The reader treats a final line
//! without its newline as the end of the log.
//!
//! ```
//! use chainlog::log::{LogReader, LogWriter, TransactionSink};
//! use chainlog::{Snapshot, Transaction};
//!
//! let mut writer = LogWriter::new(Vec::new());
//! let t0 = Transaction::new(None, vec![]).unwrap();
//! writer.append(&t0).unwrap();
//!
//! let bytes = writer.into_inner();
//! let head = chainlog::log::replay(&Snapshot::new(), &mut LogReader::new(&bytes[..])).unwrap();
//! assert_eq!(head.tid(), Some(0));
//! ```

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::codec::ExtensionRegistry;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::transaction::Transaction;

/// Anything transactions can be read from, oldest first.
pub trait TransactionSource {
    /// Next verified transaction, or `None` at end of log.
    fn read_next(&mut self) -> Result<Option<Transaction>>;
}

/// Anything transactions can be durably appended to.
pub trait TransactionSink {
    fn append(&mut self, tx: &Transaction) -> Result<()>;
}

// ── Reader ─────────────────────────────────────────────────────────────

/// Reads a line-delimited log.
///
/// The first unreadable line ends the log: after reporting it the reader
/// yields nothing more.
pub struct LogReader<'r, R> {
    reader: R,
    registry: &'r ExtensionRegistry,
    line: String,
    line_no: u64,
    finished: bool,
}

impl<R: BufRead> LogReader<'static, R> {
    pub fn new(reader: R) -> Self {
        Self::with_registry(reader, ExtensionRegistry::builtin())
    }
}

impl<'r, R: BufRead> LogReader<'r, R> {
    /// Reader resolving extension tags through `registry`.
    pub fn with_registry(reader: R, registry: &'r ExtensionRegistry) -> Self {
        Self {
            reader,
            registry,
            line: String::new(),
            line_no: 0,
            finished: false,
        }
    }

    /// Lines consumed so far, including blank and torn ones.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}

impl<R: BufRead> TransactionSource for LogReader<'_, R> {
    fn read_next(&mut self) -> Result<Option<Transaction>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                self.finished = true;
                return Ok(None);
            }
            self.line_no += 1;

            if !self.line.ends_with('\n') {
                // torn write at the tail
                warn!(
                    line = self.line_no,
                    bytes = self.line.len(),
                    "ignoring unterminated final log line"
                );
                self.finished = true;
                return Ok(None);
            }

            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            let parsed = Transaction::from_json_with(text, self.registry);
            if let Err(err) = &parsed {
                warn!(line = self.line_no, error = %err, "unreadable log line");
                self.finished = true;
            }
            return parsed.map(Some);
        }
    }
}

impl<R: BufRead> Iterator for LogReader<'_, R> {
    type Item = Result<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

// ── Writer ─────────────────────────────────────────────────────────────

/// Appends transactions as lines.
pub struct LogWriter<W> {
    writer: W,
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TransactionSink for LogWriter<W> {
    fn append(&mut self, tx: &Transaction) -> Result<()> {
        let mut line = tx.to_json();
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        debug!(tid = tx.tid(), hash = %tx.hash(), "appended transaction");
        Ok(())
    }
}

// ── Replay ─────────────────────────────────────────────────────────────

/// Apply every transaction from `source` on top of `base`.
///
/// Stops at the first unreadable, tampered or inapplicable transaction.
pub fn replay<S: TransactionSource>(base: &Snapshot, source: &mut S) -> Result<Snapshot> {
    let mut snapshot = base.clone();
    let mut applied = 0usize;
    while let Some(tx) = source.read_next()? {
        snapshot = snapshot.apply(&tx)?;
        applied += 1;
    }
    debug!(applied, tid = ?snapshot.tid(), "replayed log");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApplyError, Error};
    use crate::value::{Action, Path, Value};
    use serde_json::json;

    fn chain() -> Vec<Transaction> {
        let t0 = Transaction::new(
            None,
            vec![Action::create(Path::root().key("foo"), Value::from(json!({"bar": 1})))],
        )
        .unwrap();
        let t1 = Transaction::new(
            Some(&t0),
            vec![Action::update(
                Path::root().key("foo").key("bar"),
                Value::from(1i64),
                Value::from(2i64),
            )],
        )
        .unwrap();
        vec![t0, t1]
    }

    fn write_all(txs: &[Transaction]) -> Vec<u8> {
        let mut writer = LogWriter::new(Vec::new());
        for tx in txs {
            writer.append(tx).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn test_one_line_per_transaction() {
        let txs = chain();
        let bytes = write_all(&txs);
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], txs[0].to_json());
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_read_back() {
        let txs = chain();
        let bytes = write_all(&txs);
        let read: Vec<Transaction> = LogReader::new(&bytes[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, txs);
    }

    #[test]
    fn test_replay() {
        let bytes = write_all(&chain());
        let head = replay(&Snapshot::new(), &mut LogReader::new(&bytes[..])).unwrap();
        assert_eq!(head.tid(), Some(1));
        assert_eq!(
            head.get(&Path::root().key("foo").key("bar")),
            Some(&Value::from(2i64))
        );
    }

    #[test]
    fn test_empty_log() {
        let mut reader = LogReader::new(&b""[..]);
        assert!(reader.read_next().unwrap().is_none());
        assert_eq!(replay(&Snapshot::new(), &mut reader).unwrap(), Snapshot::new());
    }

    #[test]
    fn test_blank_lines_skipped() {
        let txs = chain();
        let mut bytes = b"\n".to_vec();
        bytes.extend(write_all(&txs[..1]));
        bytes.extend(b"   \n");
        bytes.extend(write_all(&txs[1..]));
        let read: Vec<Transaction> = LogReader::new(&bytes[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, txs);
    }

    #[test]
    fn test_torn_tail_is_end_of_log() {
        let txs = chain();
        let mut bytes = write_all(&txs);
        let torn = txs[1].to_json();
        bytes.extend(&torn.as_bytes()[..torn.len() / 2]);

        let mut reader = LogReader::new(&bytes[..]);
        let read: Vec<Transaction> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(read, txs);
        assert_eq!(reader.lines_read(), 3);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_complete_line_without_newline_is_dropped() {
        let txs = chain();
        let mut bytes = write_all(&txs[..1]);
        bytes.extend(txs[1].to_json().as_bytes());
        let read: Vec<Transaction> = LogReader::new(&bytes[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, txs[..1]);
    }

    #[test]
    fn test_tampered_line_rejected() {
        let bytes = write_all(&chain());
        let text = String::from_utf8(bytes).unwrap().replace(r#"{"bar":1}"#, r#"{"bar":7}"#);
        let mut reader = LogReader::new(text.as_bytes());
        assert!(matches!(
            reader.read_next().unwrap_err(),
            Error::InvalidTransaction(_)
        ));
    }

    #[test]
    fn test_garbage_line_rejected() {
        let mut reader = LogReader::new(&b"not json\n"[..]);
        assert!(matches!(reader.next(), Some(Err(Error::Codec(_)))));
    }

    #[test]
    fn test_reader_stops_after_error() {
        let txs = chain();
        let mut bytes = b"not json\n".to_vec();
        bytes.extend(write_all(&txs));

        let mut reader = LogReader::new(&bytes[..]);
        assert!(matches!(reader.next(), Some(Err(Error::Codec(_)))));
        assert!(reader.next().is_none());
        assert!(reader.read_next().unwrap().is_none());
        assert_eq!(reader.lines_read(), 1);

        // collecting surfaces the error instead of looping on it
        let results: Vec<_> = LogReader::new(&bytes[..]).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_reader_with_registry() {
        let t0 = Transaction::new(
            None,
            vec![Action::create(Path::root().key("s"), Value::set([Value::from(1i64)]))],
        )
        .unwrap();
        let bytes = write_all(&[t0.clone()]);

        let read: Vec<Transaction> = LogReader::new(&bytes[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, vec![t0]);

        let empty = ExtensionRegistry::empty();
        let mut reader = LogReader::with_registry(&bytes[..], &empty);
        assert!(matches!(reader.next(), Some(Err(Error::Codec(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_replay_stops_on_gap() {
        let txs = chain();
        let bytes = write_all(&txs[1..]);
        let err = replay(&Snapshot::new(), &mut LogReader::new(&bytes[..])).unwrap_err();
        assert!(matches!(
            err,
            Error::Apply(ApplyError::TidMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_replay_from_checkpoint() {
        let txs = chain();
        let s0 = Snapshot::new().apply(&txs[0]).unwrap();
        let checkpoint = Snapshot::from_json(&s0.to_json()).unwrap();
        let bytes = write_all(&txs[1..]);
        let head = replay(&checkpoint, &mut LogReader::new(&bytes[..])).unwrap();
        assert_eq!(head.tid(), Some(1));
    }

    #[test]
    fn test_writer_propagates_io_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut writer = LogWriter::new(Broken);
        let err = writer.append(&chain()[0]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
