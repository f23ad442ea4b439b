//! Snapshots, replay, and WAL compaction.
//!
//! A snapshot is a flat JSON image of every concept plus the WAL sequence
//! number it covers (`wal_offset`). Recovery loads the snapshot and replays
//! every committed transaction whose END frame lies beyond the offset, in END
//! order. A transaction that began before the offset but ended after it was
//! not yet applied when the snapshot was taken, so it is replayed too.
//!
//! Snapshots are written to a temporary sibling and renamed into place; an
//! existing snapshot is never modified.

use std::num::NonZeroUsize;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::concept::Concept;
use crate::error::{SnapshotError, WalError};
use crate::store::ConceptStore;
use crate::vsa::{Dimension, Encoding};
use crate::wal::reader::{self, DiscardedTx, WalScan};
use crate::wal::{CompactStats, TransactionLog};

/// Current on-disk snapshot format.
pub const FORMAT_VERSION: u32 = 1;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

/// A point-in-time image of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub dimension: Dimension,
    pub encoding: Encoding,
    /// Highest WAL sequence number reflected in `concepts`.
    pub wal_offset: u64,
    /// All concepts, ordered by id.
    pub concepts: Vec<Concept>,
}

impl Snapshot {
    /// Capture the current store contents.
    pub fn capture(store: &ConceptStore, encoding: Encoding, wal_offset: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            dimension: store.dim(),
            encoding,
            wal_offset,
            concepts: store.dump(),
        }
    }

    /// Atomically write the snapshot to `path`.
    pub fn write(&self, path: &Path) -> SnapshotResult<()> {
        let bytes = serde_json::to_vec(self).map_err(|e| SnapshotError::Serialization {
            message: e.to_string(),
        })?;
        crate::wal::atomic_replace(path, &bytes).map_err(|e| SnapshotError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        tracing::info!(
            path = %path.display(),
            concepts = self.concepts.len(),
            wal_offset = self.wal_offset,
            "snapshot written"
        );
        Ok(())
    }

    /// Read and validate a snapshot file.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| SnapshotError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Serialization {
                message: format!("{}: {e}", path.display()),
            })?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(SnapshotError::Incompatible {
                message: format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    snapshot.format_version
                ),
            });
        }
        Ok(snapshot)
    }

    /// Check the snapshot matches an engine's fixed parameters.
    pub fn check_compatible(&self, dim: Dimension, encoding: Encoding) -> SnapshotResult<()> {
        if self.dimension != dim {
            return Err(SnapshotError::Incompatible {
                message: format!("snapshot dimension {} but engine uses {dim}", self.dimension),
            });
        }
        if self.encoding != encoding {
            return Err(SnapshotError::Incompatible {
                message: format!("snapshot encoding {} but engine uses {encoding}", self.encoding),
            });
        }
        Ok(())
    }
}

/// What replay did with the WAL.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Committed transactions applied on top of the snapshot.
    pub applied: usize,
    /// Committed transactions already covered by the snapshot.
    pub covered: usize,
    /// Transactions dropped as incomplete or corrupt.
    pub discarded: Vec<DiscardedTx>,
    /// One entry per rejected frame or unappliable transaction.
    pub warnings: Vec<WalError>,
    /// The WAL ended in a partial line.
    pub torn_tail: bool,
}

impl std::fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "applied {}, covered by snapshot {}, discarded {}, warnings {}",
            self.applied,
            self.covered,
            self.discarded.len(),
            self.warnings.len()
        )
    }
}

/// A store rebuilt from disk.
#[derive(Debug)]
pub struct Recovered {
    pub store: ConceptStore,
    /// Highest sequence number seen in the WAL or covered by the snapshot.
    pub last_seq: u64,
    pub wal_offset: u64,
    pub report: ReplayReport,
}

/// Rebuild a store from an optional snapshot plus a WAL file.
///
/// A missing WAL file is treated as empty.
pub fn replay(
    dim: Dimension,
    encoding: Encoding,
    hot_capacity: NonZeroUsize,
    snapshot_path: Option<&Path>,
    wal_path: &Path,
) -> SnapshotResult<Recovered> {
    let snapshot = snapshot_path.map(Snapshot::load).transpose()?;
    let scan = reader::scan_file(wal_path)?;
    replay_scan(dim, encoding, hot_capacity, snapshot, scan)
}

/// Rebuild a store from an optional snapshot plus an already scanned WAL.
pub fn replay_scan(
    dim: Dimension,
    encoding: Encoding,
    hot_capacity: NonZeroUsize,
    snapshot: Option<Snapshot>,
    scan: WalScan,
) -> SnapshotResult<Recovered> {
    let (store, wal_offset) = match snapshot {
        Some(snapshot) => {
            snapshot.check_compatible(dim, encoding)?;
            let store = ConceptStore::from_concepts(dim, hot_capacity, snapshot.concepts)
                .map_err(|e| SnapshotError::Incompatible {
                    message: e.to_string(),
                })?;
            (store, snapshot.wal_offset)
        }
        None => (ConceptStore::new(dim, hot_capacity), 0),
    };

    let mut report = ReplayReport {
        discarded: scan.discarded,
        warnings: scan.warnings,
        torn_tail: scan.torn_tail,
        ..Default::default()
    };

    for tx in scan.committed {
        if tx.end_seq <= wal_offset {
            report.covered += 1;
            continue;
        }
        match store.apply(&tx.ops, tx.end_seq) {
            Ok(_) => report.applied += 1,
            Err(e) => {
                report.discarded.push(DiscardedTx {
                    label: tx.label,
                    begin_seq: tx.begin_seq,
                    reason: reader::DiscardReason::Poisoned,
                });
                report.warnings.push(WalError::Store(e));
            }
        }
    }

    for warning in &report.warnings {
        tracing::warn!(%warning, "WAL replay");
    }
    for tx in &report.discarded {
        tracing::debug!(label = %tx.label, begin_seq = tx.begin_seq, reason = %tx.reason, "transaction discarded");
    }
    tracing::info!(
        concepts = store.len(),
        wal_offset,
        %report,
        "replay complete"
    );

    Ok(Recovered {
        store,
        last_seq: scan.last_seq.max(wal_offset),
        wal_offset,
        report,
    })
}

/// Drop the WAL prefix covered by a snapshot at `offset`.
pub fn compact(wal: &mut TransactionLog, offset: u64) -> SnapshotResult<CompactStats> {
    Ok(wal.compact(offset)?)
}
