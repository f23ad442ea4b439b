//! Write-ahead log.
//!
//! Frames are JSON lines appended to a single sink. Each label moves through
//! `NONE → OPEN → CLOSED`: [`TransactionLog::begin`] writes BEGIN,
//! [`TransactionLog::append`] writes OP frames and stages their payloads, and
//! [`TransactionLog::end`] writes END and hands the staged operations back so
//! the caller can apply them. Every frame is flushed (and `sync_data`'d when
//! `fsync` is on) before the call returns.
//!
//! A failed write leaves the log in an unknown state on disk (the frame may
//! or may not have landed), so the log refuses further writes until it is
//! reopened and the file is replayed.

pub mod frame;
pub mod reader;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::WalError;

pub use frame::{Frame, FrameKind, Operation};
pub use reader::{CommittedTx, DiscardReason, DiscardedTx, WalScan};

/// Result type for WAL operations.
pub type WalResult<T> = std::result::Result<T, WalError>;

/// Proof that a transaction was begun.
///
/// Carries the BEGIN sequence number so a handle from an earlier attempt on
/// the same label is rejected instead of writing into the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    label: String,
    begin_seq: u64,
}

impl TxHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn begin_seq(&self) -> u64 {
        self.begin_seq
    }
}

/// Counts from a WAL compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub kept: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct OpenTx {
    begin_seq: u64,
    ops: Vec<Operation>,
}

enum LogSink {
    File { path: PathBuf, file: File },
    Memory(Vec<u8>),
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSink::File { path, .. } => f.debug_struct("File").field("path", path).finish(),
            LogSink::Memory(buf) => f.debug_struct("Memory").field("bytes", &buf.len()).finish(),
        }
    }
}

/// The append side of the WAL plus live transaction state.
#[derive(Debug)]
pub struct TransactionLog {
    sink: LogSink,
    next_seq: u64,
    fsync: bool,
    open: HashMap<String, OpenTx>,
    /// A write failed; every later write is refused.
    failed: bool,
}

impl TransactionLog {
    /// Open (or create) a WAL file for appending.
    ///
    /// `after_seq` is the highest sequence number already in use (from the
    /// replay scan or the snapshot offset); new frames number from the next
    /// one. A torn trailing line is terminated so it cannot swallow the next
    /// frame.
    pub fn open_file(path: &Path, fsync: bool, after_seq: u64) -> WalResult<Self> {
        let mut file = open_append(path)?;
        let torn = match std::fs::read(path) {
            Ok(bytes) => !bytes.is_empty() && !bytes.ends_with(b"\n"),
            Err(e) => return Err(WalError::Io { source: e }),
        };
        if torn {
            tracing::warn!(path = %path.display(), "terminating torn WAL tail");
            file.write_all(b"\n")
                .and_then(|()| file.sync_data())
                .map_err(|e| WalError::Io { source: e })?;
        }
        tracing::debug!(path = %path.display(), next_seq = after_seq + 1, "WAL opened");
        Ok(Self {
            sink: LogSink::File {
                path: path.to_path_buf(),
                file,
            },
            next_seq: after_seq + 1,
            fsync,
            open: HashMap::new(),
            failed: false,
        })
    }

    /// A WAL that only lives in memory.
    pub fn in_memory() -> Self {
        Self {
            sink: LogSink::Memory(Vec::new()),
            next_seq: 1,
            fsync: false,
            open: HashMap::new(),
            failed: false,
        }
    }

    /// File path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            LogSink::File { path, .. } => Some(path),
            LogSink::Memory(_) => None,
        }
    }

    /// Highest sequence number written (0 for an empty log).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Labels of transactions open in this session, sorted.
    pub fn open_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.open.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn is_open(&self, label: &str) -> bool {
        self.open.contains_key(label)
    }

    /// Whether a write has failed in this session.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Operations staged so far under `handle`.
    pub fn staged(&self, handle: &TxHandle) -> WalResult<&[Operation]> {
        self.check_handle(handle).map(|tx| tx.ops.as_slice())
    }

    /// Start a transaction.
    pub fn begin(&mut self, label: &str) -> WalResult<TxHandle> {
        if self.open.contains_key(label) {
            return Err(WalError::LabelAlreadyOpen {
                label: label.to_string(),
            });
        }
        let seq = self.write_frame(|seq| Frame::begin(seq, label))?;
        self.open.insert(
            label.to_string(),
            OpenTx {
                begin_seq: seq,
                ops: Vec::new(),
            },
        );
        tracing::trace!(label, seq, "BEGIN");
        Ok(TxHandle {
            label: label.to_string(),
            begin_seq: seq,
        })
    }

    /// Record one operation in an open transaction.
    pub fn append(&mut self, handle: &TxHandle, op: Operation) -> WalResult<u64> {
        self.check_handle(handle)?;
        let label = handle.label.clone();
        let seq = self.write_frame(|seq| Frame::op(seq, label, op.clone()))?;
        if let Some(tx) = self.open.get_mut(&handle.label) {
            tx.ops.push(op);
        }
        Ok(seq)
    }

    /// Close a transaction, returning its operations for application.
    ///
    /// The transaction is closed even if the END frame cannot be written;
    /// its operations are then dropped and never applied in this session.
    pub fn end(&mut self, handle: TxHandle) -> WalResult<CommittedTx> {
        self.check_handle(&handle)?;
        let written = self.write_frame(|seq| Frame::end(seq, handle.label.as_str()));
        let tx = self
            .open
            .remove(&handle.label)
            .ok_or_else(|| WalError::TransactionNotOpen {
                label: handle.label.clone(),
            })?;
        let end_seq = match written {
            Ok(seq) => seq,
            Err(e) => {
                tracing::error!(label = %handle.label, error = %e, "END not written; transaction dropped");
                return Err(e);
            }
        };
        tracing::trace!(label = %handle.label, end_seq, ops = tx.ops.len(), "END");
        Ok(CommittedTx {
            label: handle.label,
            begin_seq: tx.begin_seq,
            end_seq,
            ops: tx.ops,
        })
    }

    /// Drop a transaction without writing END.
    ///
    /// Its frames stay in the log; replay discards them as unterminated.
    pub fn abandon(&mut self, handle: TxHandle) -> WalResult<Vec<Operation>> {
        self.check_handle(&handle)?;
        let tx = self
            .open
            .remove(&handle.label)
            .map(|tx| tx.ops)
            .unwrap_or_default();
        tracing::debug!(label = %handle.label, staged = tx.len(), "transaction abandoned");
        Ok(tx)
    }

    /// Full log contents.
    pub fn contents(&self) -> WalResult<Vec<u8>> {
        match &self.sink {
            LogSink::File { path, .. } => std::fs::read(path).map_err(|e| WalError::Io { source: e }),
            LogSink::Memory(buf) => Ok(buf.clone()),
        }
    }

    /// Rewrite the log without the prefix covered by a snapshot.
    ///
    /// Keeps every frame with `seq > offset`, plus all frames of transactions
    /// still open in this session (their BEGIN may predate the offset).
    /// Unparseable lines are dropped. The file is replaced by atomic rename.
    pub fn compact(&mut self, offset: u64) -> WalResult<CompactStats> {
        if self.failed {
            return Err(WalError::LogFailed);
        }
        let bytes = self.contents()?;
        let mut kept_bytes = Vec::with_capacity(bytes.len());
        let mut stats = CompactStats::default();

        for raw in bytes.split(|&b| b == b'\n') {
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let keep = match std::str::from_utf8(raw).map(frame::decode_line) {
                Ok(frame::DecodedLine::Frame(f)) => {
                    f.seq > offset
                        || self
                            .open
                            .get(&f.label)
                            .is_some_and(|tx| f.seq >= tx.begin_seq)
                }
                _ => false,
            };
            if keep {
                kept_bytes.extend_from_slice(raw);
                kept_bytes.push(b'\n');
                stats.kept += 1;
            } else {
                stats.dropped += 1;
            }
        }

        match &mut self.sink {
            LogSink::File { path, file } => {
                atomic_replace(path, &kept_bytes).map_err(|e| WalError::Io { source: e })?;
                *file = open_append(path)?;
            }
            LogSink::Memory(buf) => *buf = kept_bytes,
        }
        tracing::info!(offset, kept = stats.kept, dropped = stats.dropped, "WAL compacted");
        Ok(stats)
    }

    fn check_handle(&self, handle: &TxHandle) -> WalResult<&OpenTx> {
        match self.open.get(&handle.label) {
            None => Err(WalError::TransactionNotOpen {
                label: handle.label.clone(),
            }),
            Some(tx) if tx.begin_seq != handle.begin_seq => Err(WalError::StaleHandle {
                label: handle.label.clone(),
                handle_seq: handle.begin_seq,
                open_seq: tx.begin_seq,
            }),
            Some(tx) => Ok(tx),
        }
    }

    /// Encode and durably write one frame; the sequence number is consumed
    /// only if the write succeeds.
    fn write_frame(&mut self, build: impl FnOnce(u64) -> Frame) -> WalResult<u64> {
        if self.failed {
            return Err(WalError::LogFailed);
        }
        let seq = self.next_seq;
        let line = build(seq).encode_line()?;
        match &mut self.sink {
            LogSink::File { file, .. } => {
                let written = file.write_all(&line).and_then(|()| file.flush()).and_then(|()| {
                    if self.fsync {
                        file.sync_data()
                    } else {
                        Ok(())
                    }
                });
                if let Err(e) = written {
                    self.failed = true;
                    return Err(WalError::Io { source: e });
                }
            }
            LogSink::Memory(buf) => buf.extend_from_slice(&line),
        }
        self.next_seq += 1;
        Ok(seq)
    }
}

fn open_append(path: &Path) -> WalResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WalError::Io { source: e })
}

/// Replace `path` with `bytes`: write a uniquely named sibling temp file,
/// sync it, rename it over `path`, then sync the directory entry.
pub(crate) fn atomic_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_parent_dir(path)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
