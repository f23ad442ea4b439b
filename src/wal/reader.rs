//! WAL replay reader.
//!
//! Scans a log in file order and sorts its transactions into committed and
//! discarded ones. A transaction commits only if its BEGIN, every OP and its
//! END were read intact; anything else is discarded whole, so a replayed
//! transaction is either fully visible or fully absent.

use std::collections::HashMap;
use std::path::Path;

use crate::error::WalError;

use super::frame::{DecodedLine, FrameKind, Operation, decode_line};
use super::WalResult;

/// A transaction whose END frame was read.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTx {
    pub label: String,
    pub begin_seq: u64,
    pub end_seq: u64,
    pub ops: Vec<Operation>,
}

/// Why a transaction was dropped during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No END frame before the end of the log (crash or abandoned).
    Unterminated,
    /// One of its frames was corrupted.
    Poisoned,
    /// A later BEGIN reused the label before this one ended.
    Superseded,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::Unterminated => write!(f, "unterminated"),
            DiscardReason::Poisoned => write!(f, "poisoned"),
            DiscardReason::Superseded => write!(f, "superseded"),
        }
    }
}

/// A transaction dropped during replay.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedTx {
    pub label: String,
    pub begin_seq: u64,
    pub reason: DiscardReason,
}

/// Result of scanning a WAL.
#[derive(Debug, Default)]
pub struct WalScan {
    /// Committed transactions in END order.
    pub committed: Vec<CommittedTx>,
    pub discarded: Vec<DiscardedTx>,
    /// `WalError::Corruption` entries, one per rejected line.
    pub warnings: Vec<WalError>,
    /// Highest sequence number read from a well-formed frame.
    pub last_seq: u64,
    /// Number of well-formed frames.
    pub frames: usize,
    /// The final line was not newline-terminated.
    pub torn_tail: bool,
}

#[derive(Debug)]
struct OpenTx {
    begin_seq: u64,
    ops: Vec<Operation>,
    poisoned: bool,
}

/// Scan a WAL file. A missing file is an empty log.
pub fn scan_file(path: &Path) -> WalResult<WalScan> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(scan_bytes(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WalScan::default()),
        Err(e) => Err(WalError::Io { source: e }),
    }
}

/// Scan raw WAL bytes.
pub fn scan_bytes(bytes: &[u8]) -> WalScan {
    let mut scan = WalScan {
        torn_tail: !bytes.is_empty() && !bytes.ends_with(b"\n"),
        ..Default::default()
    };
    let mut open: HashMap<String, OpenTx> = HashMap::new();

    for (index, raw) in bytes.split(|&b| b == b'\n').enumerate() {
        let line_no = index + 1;
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let decoded = match std::str::from_utf8(raw) {
            Ok(text) => decode_line(text),
            Err(e) => DecodedLine::Corrupt {
                label: None,
                message: format!("invalid UTF-8: {e}"),
            },
        };

        let frame = match decoded {
            DecodedLine::Frame(frame) => frame,
            DecodedLine::Corrupt { label, message } => {
                poison(&mut open, label.as_deref());
                warn(&mut scan, line_no, message);
                continue;
            }
        };

        if frame.seq <= scan.last_seq {
            poison(&mut open, Some(&frame.label));
            let message = format!("sequence {} does not follow {}", frame.seq, scan.last_seq);
            warn(&mut scan, line_no, message);
            continue;
        }
        scan.last_seq = frame.seq;
        scan.frames += 1;

        match frame.kind {
            FrameKind::Begin => {
                let previous = open.insert(
                    frame.label.clone(),
                    OpenTx {
                        begin_seq: frame.seq,
                        ops: Vec::new(),
                        poisoned: false,
                    },
                );
                if let Some(previous) = previous {
                    scan.discarded.push(DiscardedTx {
                        label: frame.label.clone(),
                        begin_seq: previous.begin_seq,
                        reason: DiscardReason::Superseded,
                    });
                    warn(
                        &mut scan,
                        line_no,
                        format!(
                            "BEGIN for \"{}\" while the transaction begun at {} is still open",
                            frame.label, previous.begin_seq
                        ),
                    );
                }
            }
            FrameKind::Op => match open.get_mut(&frame.label) {
                Some(tx) if !tx.poisoned => {
                    if let Some(op) = frame.payload {
                        tx.ops.push(op);
                    }
                }
                Some(_) => {}
                None => warn(
                    &mut scan,
                    line_no,
                    format!("OP for \"{}\" without a preceding BEGIN", frame.label),
                ),
            },
            FrameKind::End => match open.remove(&frame.label) {
                Some(tx) if tx.poisoned => scan.discarded.push(DiscardedTx {
                    label: frame.label,
                    begin_seq: tx.begin_seq,
                    reason: DiscardReason::Poisoned,
                }),
                Some(tx) => scan.committed.push(CommittedTx {
                    label: frame.label,
                    begin_seq: tx.begin_seq,
                    end_seq: frame.seq,
                    ops: tx.ops,
                }),
                None => warn(
                    &mut scan,
                    line_no,
                    format!("END for \"{}\" without a preceding BEGIN", frame.label),
                ),
            },
        }
    }

    let mut leftovers: Vec<(String, OpenTx)> = open.into_iter().collect();
    leftovers.sort_by_key(|(_, tx)| tx.begin_seq);
    for (label, tx) in leftovers {
        scan.discarded.push(DiscardedTx {
            label,
            begin_seq: tx.begin_seq,
            reason: if tx.poisoned {
                DiscardReason::Poisoned
            } else {
                DiscardReason::Unterminated
            },
        });
    }

    scan
}

/// Poison the named transaction, or every open one when the label is unknown.
fn poison(open: &mut HashMap<String, OpenTx>, label: Option<&str>) {
    match label {
        Some(label) => {
            if let Some(tx) = open.get_mut(label) {
                tx.poisoned = true;
            }
        }
        None => open.values_mut().for_each(|tx| tx.poisoned = true),
    }
}

fn warn(scan: &mut WalScan, line: usize, message: String) {
    scan.warnings.push(WalError::Corruption { line, message });
}
