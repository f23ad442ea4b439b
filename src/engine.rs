//! Engine facade: the top-level API for mnemos.
//!
//! An [`Engine`] is an explicit context. [`Engine::open`] recovers the store
//! from the data directory (snapshot plus WAL replay) and [`Engine::close`]
//! releases it. Nothing is global; two engines on different directories are
//! fully independent.
//!
//! All mutations funnel through one write lock that owns the WAL: frames are
//! appended and committed transactions applied to the store while it is held.
//! Snapshots are captured and written under the same lock, so each one sees a
//! transaction entirely or not at all, and snapshots land on disk in offset
//! order. Reads never take it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::cleanup::{CleanupEngine, CleanupMatch};
use crate::concept::{Concept, Metadata};
use crate::config::EngineConfig;
use crate::error::{EngineError, MnemosResult, SnapshotError, StoreError};
use crate::query::{ConceptResolver, QueryPlanner};
use crate::simd;
use crate::snapshot::{self, Recovered, ReplayReport, Snapshot};
use crate::store::{Change, ConceptStore, Concepts};
use crate::vsa::encode;
use crate::vsa::ops::VsaOps;
use crate::vsa::HyperVec;
use crate::wal::{CompactStats, Operation, TransactionLog, TxHandle};

const INTERNAL_LABEL_PREFIX: &str = "mnemos:";

/// Counter part of a label minted by [`Engine::internal_label`].
fn internal_label_number(label: &str) -> Option<u64> {
    let rest = label.strip_prefix(INTERNAL_LABEL_PREFIX)?;
    let (_, number) = rest.rsplit_once(':')?;
    number.parse().ok()
}

/// A committed transaction as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub label: String,
    /// Sequence number of the END frame; becomes each concept's revision.
    pub end_seq: u64,
    pub changes: Vec<Change>,
}

/// Where and what a snapshot captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub wal_offset: u64,
    pub concepts: usize,
}

/// State guarded by the write lock.
#[derive(Debug)]
struct WriteState {
    wal: TransactionLog,
    /// Offset of the last snapshot that recovery would load.
    snapshot_offset: Option<u64>,
    commits_since_snapshot: u64,
}

/// The mnemos engine.
///
/// Owns the VSA operations, the concept store, the cleanup index and the WAL.
pub struct Engine {
    config: EngineConfig,
    ops: VsaOps,
    store: ConceptStore,
    cleanup: CleanupEngine,
    write: Mutex<WriteState>,
    recovery: ReplayReport,
    next_label: AtomicU64,
}

impl Engine {
    /// Open an engine, recovering any state in `config.data_dir`.
    pub fn open(config: EngineConfig) -> MnemosResult<Self> {
        config.validate()?;
        let hot_capacity = config.hot_capacity()?;

        let kernel = simd::best_kernel();
        tracing::info!(
            isa = %kernel.isa_level(),
            dim = config.dimension.0,
            encoding = %config.encoding,
            data_dir = ?config.data_dir,
            "opening mnemos engine"
        );
        let ops = VsaOps::new(kernel, config.dimension, config.encoding);

        let (store, wal, recovery) = match (&config.data_dir, config.wal_path(), config.snapshot_path()) {
            (Some(dir), Some(wal_path), Some(snapshot_path)) => {
                std::fs::create_dir_all(dir).map_err(|e| EngineError::DataDir {
                    path: dir.display().to_string(),
                    source: e,
                })?;
                let snapshot_path = snapshot_path.exists().then_some(snapshot_path);
                let recovered = snapshot::replay(
                    config.dimension,
                    config.encoding,
                    hot_capacity,
                    snapshot_path.as_deref(),
                    &wal_path,
                )?;
                let wal = TransactionLog::open_file(&wal_path, config.fsync, recovered.last_seq)?;
                (recovered.store, wal, recovered.report)
            }
            _ => (
                ConceptStore::new(config.dimension, hot_capacity),
                TransactionLog::in_memory(),
                ReplayReport::default(),
            ),
        };

        let cleanup = CleanupEngine::for_backend(
            config.cleanup_backend,
            config.dimension,
            config.max_concepts,
            config.min_similarity,
        );
        cleanup.rebuild(&store);

        tracing::info!(
            concepts = store.len(),
            last_seq = wal.last_seq(),
            backend = cleanup.backend_name(),
            "engine ready"
        );

        // Internal labels must not reuse one left open in the log, or replay
        // would read the new BEGIN as superseding the old attempt.
        let highest_open = recovery
            .discarded
            .iter()
            .filter_map(|tx| internal_label_number(&tx.label))
            .max()
            .unwrap_or(0);
        let next_label = AtomicU64::new(wal.last_seq().max(highest_open) + 1);
        Ok(Self {
            config,
            ops,
            store,
            cleanup,
            write: Mutex::new(WriteState {
                wal,
                snapshot_offset: None,
                commits_since_snapshot: 0,
            }),
            recovery,
            next_label,
        })
    }

    /// Close the engine. Transactions still open are not committed; replay
    /// will discard them.
    pub fn close(self) -> MnemosResult<()> {
        let state = self.lock()?;
        let open = state.wal.open_labels();
        if !open.is_empty() {
            tracing::warn!(?open, "closing with open transactions; they will be discarded");
        }
        tracing::info!(
            concepts = self.store.len(),
            last_seq = state.wal.last_seq(),
            "engine closed"
        );
        Ok(())
    }

    // -------------------------------------------------------------------
    // Concepts
    // -------------------------------------------------------------------

    /// Insert or update a concept. Returns once the write is durable and
    /// visible.
    pub fn store(&self, id: &str, vector: HyperVec, metadata: Metadata) -> MnemosResult<Concept> {
        self.ops.check_dim(&vector)?;
        let label = self.internal_label("put");
        let commit = self.commit(&label, vec![Operation::put(id, vector, metadata)])?;
        commit
            .changes
            .into_iter()
            .find_map(|change| match change {
                Change::Put(concept) => Some(concept),
                Change::Delete(_) => None,
            })
            .ok_or_else(|| StoreError::UnknownConcept { id: id.to_string() }.into())
    }

    /// Fetch a concept.
    pub fn get(&self, id: &str) -> MnemosResult<Concept> {
        Ok(self.store.get(id)?)
    }

    /// Remove a concept.
    pub fn delete(&self, id: &str) -> MnemosResult<()> {
        let mut state = self.lock()?;
        if !self.store.contains(id) {
            return Err(StoreError::UnknownConcept { id: id.to_string() }.into());
        }
        let label = self.internal_label("delete");
        self.commit_locked(&mut state, &label, vec![Operation::delete(id)])?;
        Ok(())
    }

    /// Lazy iterator over all concepts, ordered by id.
    pub fn all(&self) -> Concepts<'_> {
        self.store.all()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // -------------------------------------------------------------------
    // Algebra
    // -------------------------------------------------------------------

    pub fn bind(&self, a: &HyperVec, b: &HyperVec) -> MnemosResult<HyperVec> {
        Ok(self.ops.bind(a, b)?)
    }

    pub fn unbind(&self, bound: &HyperVec, key: &HyperVec) -> MnemosResult<HyperVec> {
        Ok(self.ops.unbind(bound, key)?)
    }

    pub fn bundle(&self, vectors: &[&HyperVec]) -> MnemosResult<HyperVec> {
        Ok(self.ops.bundle(vectors)?)
    }

    pub fn similarity(&self, a: &HyperVec, b: &HyperVec) -> MnemosResult<f32> {
        Ok(self.ops.similarity(a, b)?)
    }

    pub fn permute(&self, v: &HyperVec, shift: usize) -> MnemosResult<HyperVec> {
        self.ops.check_dim(v)?;
        Ok(self.ops.permute(v, shift))
    }

    /// Deterministic random vector for `seed`.
    pub fn random_vector(&self, seed: u64) -> HyperVec {
        self.ops.random_from_seed(seed)
    }

    /// Deterministic vector for a text token.
    pub fn encode_token(&self, text: &str) -> HyperVec {
        encode::encode_token(&self.ops, text)
    }

    /// Bundle of the label's whitespace-separated tokens.
    pub fn encode_label(&self, label: &str) -> MnemosResult<HyperVec> {
        Ok(encode::encode_label(&self.ops, label)?)
    }

    /// Bundle of `bind(role, filler)` over the pairs.
    pub fn encode_record(&self, pairs: &[(&HyperVec, &HyperVec)]) -> MnemosResult<HyperVec> {
        for (role, filler) in pairs {
            self.ops.check_dim(role)?;
            self.ops.check_dim(filler)?;
        }
        Ok(encode::encode_record(&self.ops, pairs)?)
    }

    /// Order-sensitive bundle: each item is rotated by its distance from
    /// the end.
    pub fn encode_sequence(&self, items: &[&HyperVec]) -> MnemosResult<HyperVec> {
        for item in items {
            self.ops.check_dim(item)?;
        }
        Ok(encode::encode_sequence(&self.ops, items)?)
    }

    // -------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------

    /// Up to `k` stored concepts nearest `vector`, best first. Empty when
    /// nothing clears `min_similarity`.
    pub fn cleanup(&self, vector: &HyperVec, k: usize) -> MnemosResult<Vec<CleanupMatch>> {
        Ok(self.cleanup.cleanup(&self.store, &self.ops, vector, k)?)
    }

    /// The single nearest concept, if any clears `min_similarity`.
    pub fn cleanup_best(&self, vector: &HyperVec) -> MnemosResult<Option<CleanupMatch>> {
        Ok(self.cleanup.best(&self.store, &self.ops, vector)?)
    }

    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    /// Open a labelled transaction.
    pub fn wal_begin(&self, label: &str) -> MnemosResult<TxHandle> {
        Ok(self.lock()?.wal.begin(label)?)
    }

    /// Record an operation. It becomes visible only when the transaction ends.
    pub fn wal_append(&self, handle: &TxHandle, op: Operation) -> MnemosResult<u64> {
        let mut state = self.lock()?;
        self.check_operation(&state.wal, handle, &op)?;
        Ok(state.wal.append(handle, op)?)
    }

    /// Close a transaction and apply its operations.
    pub fn wal_end(&self, handle: TxHandle) -> MnemosResult<Commit> {
        let mut state = self.lock()?;
        self.end_locked(&mut state, handle)
    }

    /// Give up on a transaction. Nothing it staged becomes visible.
    pub fn wal_abandon(&self, handle: TxHandle) -> MnemosResult<()> {
        self.lock()?.wal.abandon(handle)?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------

    /// Write a snapshot to `path`.
    ///
    /// Writers wait while the file is written. Only a snapshot at the data
    /// directory's snapshot path (or any snapshot in memory-only mode)
    /// enables [`compact`](Self::compact).
    pub fn snapshot(&self, path: &Path) -> MnemosResult<SnapshotInfo> {
        let mut state = self.lock()?;
        self.snapshot_locked(&mut state, path)
    }

    /// Snapshot into the data directory, then compact the WAL up to it.
    pub fn checkpoint(&self) -> MnemosResult<(SnapshotInfo, CompactStats)> {
        let path = self.config.snapshot_path().ok_or_else(|| EngineError::InvalidConfig {
            message: "checkpoint needs a data_dir".into(),
        })?;
        let mut state = self.lock()?;
        self.checkpoint_locked(&mut state, &path)
    }

    /// Drop the WAL prefix covered by this session's latest snapshot.
    pub fn compact(&self) -> MnemosResult<CompactStats> {
        let mut state = self.lock()?;
        let offset = state.snapshot_offset.ok_or(SnapshotError::NoSnapshot)?;
        Ok(snapshot::compact(&mut state.wal, offset)?)
    }

    /// Rebuild a store from the given files without touching this engine.
    pub fn replay(&self, snapshot_path: Option<&Path>, wal_path: &Path) -> MnemosResult<Recovered> {
        Ok(snapshot::replay(
            self.config.dimension,
            self.config.encoding,
            self.config.hot_capacity()?,
            snapshot_path,
            wal_path,
        )?)
    }

    /// Every concept, ordered by id.
    pub fn dump(&self) -> Vec<Concept> {
        self.store.dump()
    }

    /// Canonical JSON of [`dump`](Self::dump).
    pub fn dump_bytes(&self) -> MnemosResult<Vec<u8>> {
        Ok(self.store.dump_bytes()?)
    }

    // -------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------

    /// Query planner resolving unknown names to token vectors.
    pub fn planner(&self) -> QueryPlanner<'_> {
        QueryPlanner::new(self)
    }

    /// Query planner with a custom resolver.
    pub fn planner_with<'e>(&'e self, resolver: &'e dyn ConceptResolver) -> QueryPlanner<'e> {
        QueryPlanner::with_resolver(self, resolver)
    }

    pub fn ops(&self) -> &VsaOps {
        &self.ops
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// What recovery did when the engine was opened.
    pub fn recovery_report(&self) -> &ReplayReport {
        &self.recovery
    }

    /// Fresh label for engine-internal transactions.
    pub(crate) fn internal_label(&self, kind: &str) -> String {
        format!(
            "{INTERNAL_LABEL_PREFIX}{kind}:{}",
            self.next_label.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Summary of engine state.
    pub fn info(&self) -> MnemosResult<EngineInfo> {
        let state = self.lock()?;
        Ok(EngineInfo {
            dimension: self.config.dimension.0,
            encoding: self.config.encoding.to_string(),
            isa_level: self.ops.isa_level().to_string(),
            concepts: self.store.len(),
            hot_entries: self.store.hot_len(),
            hot_capacity: self.store.hot_capacity(),
            cleanup_backend: self.cleanup.backend_name().to_string(),
            min_similarity: self.cleanup.min_similarity(),
            data_dir: self.config.data_dir.clone(),
            last_seq: state.wal.last_seq(),
            open_transactions: state.wal.open_labels(),
            snapshot_offset: state.snapshot_offset,
        })
    }

    // -------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, WriteState>, EngineError> {
        self.write.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Begin, append, end and apply in one critical section.
    fn commit(&self, label: &str, ops: Vec<Operation>) -> MnemosResult<Commit> {
        let mut state = self.lock()?;
        self.commit_locked(&mut state, label, ops)
    }

    fn commit_locked(
        &self,
        state: &mut WriteState,
        label: &str,
        ops: Vec<Operation>,
    ) -> MnemosResult<Commit> {
        let handle = state.wal.begin(label)?;
        for op in ops {
            if let Err(e) = state.wal.append(&handle, op) {
                if let Err(abandon) = state.wal.abandon(handle) {
                    tracing::warn!(%abandon, "failed to abandon transaction");
                }
                return Err(e.into());
            }
        }
        self.end_locked(state, handle)
    }

    fn end_locked(&self, state: &mut WriteState, handle: TxHandle) -> MnemosResult<Commit> {
        let committed = state.wal.end(handle)?;
        let changes = self.store.apply(&committed.ops, committed.end_seq)?;
        self.cleanup.observe(&changes);
        tracing::debug!(
            label = %committed.label,
            end_seq = committed.end_seq,
            ops = committed.ops.len(),
            "committed"
        );

        state.commits_since_snapshot += 1;
        if let Some(every) = self.config.snapshot_every
            && state.commits_since_snapshot >= every
        {
            self.auto_checkpoint(state);
        }

        Ok(Commit {
            label: committed.label,
            end_seq: committed.end_seq,
            changes,
        })
    }

    /// Capture and write a snapshot. The offset is only recorded once the
    /// file is in place.
    fn snapshot_locked(&self, state: &mut WriteState, path: &Path) -> MnemosResult<SnapshotInfo> {
        let snap = Snapshot::capture(&self.store, self.config.encoding, state.wal.last_seq());
        snap.write(path)?;

        let counts_for_recovery = match self.config.snapshot_path() {
            Some(own) => own == path,
            None => true,
        };
        if counts_for_recovery {
            state.snapshot_offset = Some(snap.wal_offset);
            state.commits_since_snapshot = 0;
        }
        Ok(SnapshotInfo {
            path: path.to_path_buf(),
            wal_offset: snap.wal_offset,
            concepts: snap.concepts.len(),
        })
    }

    fn checkpoint_locked(
        &self,
        state: &mut WriteState,
        path: &Path,
    ) -> MnemosResult<(SnapshotInfo, CompactStats)> {
        let info = self.snapshot_locked(state, path)?;
        let stats = snapshot::compact(&mut state.wal, info.wal_offset)?;
        Ok((info, stats))
    }

    /// Checkpoint from inside the write lock. Failures are logged; the
    /// commit that triggered it is already durable.
    fn auto_checkpoint(&self, state: &mut WriteState) {
        let Some(path) = self.config.snapshot_path() else {
            return;
        };
        match self.checkpoint_locked(state, &path) {
            Ok((info, stats)) => {
                tracing::info!(offset = info.wal_offset, kept = stats.kept, "automatic checkpoint")
            }
            Err(e) => tracing::warn!(error = %e, "automatic checkpoint failed"),
        }
    }

    /// Reject operations that could not be applied at END.
    fn check_operation(
        &self,
        wal: &TransactionLog,
        handle: &TxHandle,
        op: &Operation,
    ) -> MnemosResult<()> {
        match op {
            Operation::Put { vector, .. } => self.ops.check_dim(vector).map_err(Into::into),
            Operation::Delete { id, .. } => {
                let staged = wal.staged(handle)?;
                let exists = staged
                    .iter()
                    .rev()
                    .find(|o| o.concept_id() == id)
                    .map_or_else(
                        || self.store.contains(id),
                        |o| matches!(o, Operation::Put { .. }),
                    );
                if exists {
                    Ok(())
                } else {
                    Err(StoreError::UnknownConcept { id: id.clone() }.into())
                }
            }
        }
    }
}

/// Summary information about the engine.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub dimension: usize,
    pub encoding: String,
    pub isa_level: String,
    pub concepts: usize,
    pub hot_entries: usize,
    pub hot_capacity: usize,
    pub cleanup_backend: String,
    pub min_similarity: f32,
    pub data_dir: Option<PathBuf>,
    pub last_seq: u64,
    pub open_transactions: Vec<String>,
    pub snapshot_offset: Option<u64>,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mnemos engine info")?;
        writeln!(f, "  dimension:    {}", self.dimension)?;
        writeln!(f, "  encoding:     {}", self.encoding)?;
        writeln!(f, "  isa:          {}", self.isa_level)?;
        writeln!(f, "  concepts:     {}", self.concepts)?;
        writeln!(f, "  hot entries:  {}/{}", self.hot_entries, self.hot_capacity)?;
        writeln!(
            f,
            "  cleanup:      {} (min similarity {:.2})",
            self.cleanup_backend, self.min_similarity
        )?;
        match &self.data_dir {
            Some(dir) => writeln!(f, "  data dir:     {}", dir.display())?,
            None => writeln!(f, "  data dir:     (memory only)")?,
        }
        writeln!(f, "  last seq:     {}", self.last_seq)?;
        if !self.open_transactions.is_empty() {
            writeln!(f, "  open tx:      {}", self.open_transactions.join(", "))?;
        }
        if let Some(offset) = self.snapshot_offset {
            writeln!(f, "  snapshot at:  {offset}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("ops", &self.ops)
            .field("concepts", &self.store.len())
            .field("cleanup", &self.cleanup)
            .finish()
    }
}
