//! Rich diagnostic error types for the mnemos engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the mnemos engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source chains) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum MnemosError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Vsa(#[from] VsaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// VSA errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum VsaError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(mnemos::vsa::dim_mismatch),
        help(
            "All hypervectors in an operation must share the same dimension. \
             Vectors are never truncated or padded; re-create the mismatched \
             vector with the store's dimension."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("empty bundle: cannot bundle zero hypervectors")]
    #[diagnostic(
        code(mnemos::vsa::empty_bundle),
        help("Provide at least one hypervector to the bundle operation.")
    )]
    EmptyBundle,

    #[error("hypervector dimension must be greater than zero")]
    #[diagnostic(
        code(mnemos::vsa::zero_dimension),
        help("Configure a positive dimension; 512 is enough for tests, 2048 for real use.")
    )]
    ZeroDimension,

    #[error("HNSW index error: {message}")]
    #[diagnostic(
        code(mnemos::vsa::hnsw_error),
        help("The HNSW approximate nearest-neighbor index encountered an internal error.")
    )]
    Hnsw { message: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("unknown concept: \"{id}\"")]
    #[diagnostic(
        code(mnemos::store::unknown_concept),
        help("No concept with this id exists. Store it first, or check the id for typos.")
    )]
    UnknownConcept { id: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(mnemos::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(mnemos::store::serde),
        help("Failed to serialize or deserialize concept data.")
    )]
    Serialization { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vsa(#[from] VsaError),
}

// ---------------------------------------------------------------------------
// WAL errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum WalError {
    #[error("transaction \"{label}\" is already open")]
    #[diagnostic(
        code(mnemos::wal::label_open),
        help("End or abandon the open transaction first, or pick a different label.")
    )]
    LabelAlreadyOpen { label: String },

    #[error("transaction \"{label}\" is not open")]
    #[diagnostic(
        code(mnemos::wal::not_open),
        help("Only transactions opened with `wal_begin` and not yet ended accept operations.")
    )]
    TransactionNotOpen { label: String },

    #[error("stale handle for transaction \"{label}\": begun at {handle_seq}, open at {open_seq}")]
    #[diagnostic(
        code(mnemos::wal::stale_handle),
        help("The label was closed and re-opened since this handle was issued. Use the new handle.")
    )]
    StaleHandle {
        label: String,
        handle_seq: u64,
        open_seq: u64,
    },

    #[error("corrupted WAL frame at line {line}: {message}")]
    #[diagnostic(
        code(mnemos::wal::corruption),
        help(
            "The frame is malformed or truncated, usually from a crash mid-write. \
             Its transaction is discarded; all fully closed transactions before it \
             are preserved."
        )
    )]
    Corruption { line: usize, message: String },

    #[error("WAL I/O error: {source}")]
    #[diagnostic(
        code(mnemos::wal::io),
        help("Appending to or reading the write-ahead log failed. Check disk space and permissions.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("WAL refuses writes after a failed write")]
    #[diagnostic(
        code(mnemos::wal::failed),
        help(
            "An earlier frame could not be written, so the log's tail is uncertain. \
             Fix the underlying I/O problem and reopen the engine; replay restores \
             a consistent state."
        )
    )]
    LogFailed,

    #[error("WAL serialization error: {message}")]
    #[diagnostic(code(mnemos::wal::serde), help("A WAL frame could not be encoded."))]
    Serialization { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vsa(#[from] VsaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("snapshot I/O error at {path}: {source}")]
    #[diagnostic(
        code(mnemos::snapshot::io),
        help("Check that the snapshot directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization error: {message}")]
    #[diagnostic(
        code(mnemos::snapshot::serde),
        help("The snapshot file is not a valid mnemos snapshot. It may be truncated or from another tool.")
    )]
    Serialization { message: String },

    #[error("incompatible snapshot: {message}")]
    #[diagnostic(
        code(mnemos::snapshot::incompatible),
        help(
            "Dimension and encoding are fixed per store. Open the store with the \
             configuration it was created with."
        )
    )]
    Incompatible { message: String },

    #[error("no snapshot has been taken in this session")]
    #[diagnostic(
        code(mnemos::snapshot::none),
        help("Take a snapshot (or checkpoint) before compacting the WAL.")
    )]
    NoSnapshot,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wal(#[from] WalError),
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("unknown query step: \"{name}\"")]
    #[diagnostic(
        code(mnemos::query::unknown_step),
        help("Valid steps are: load, resolve, bind, unbind, bundle, permute, cleanup, store.")
    )]
    UnknownStep { name: String },

    #[error("invalid argument for step \"{step}\": {message}")]
    #[diagnostic(
        code(mnemos::query::invalid_argument),
        help("Check the step syntax, e.g. `load red; load apple; bind; store red_apple`.")
    )]
    InvalidArgument { step: String, message: String },

    #[error("step {index} (\"{step}\") needs {needed} vector(s) but the stack holds {available}")]
    #[diagnostic(
        code(mnemos::query::stack_underflow),
        help("Push operands with `load` or `resolve` before combining them.")
    )]
    StackUnderflow {
        index: usize,
        step: String,
        needed: usize,
        available: usize,
    },

    #[error("cleanup at step {index} found no concept above similarity {threshold:.4}")]
    #[diagnostic(
        code(mnemos::query::no_match),
        help(
            "A later step needs the cleaned-up vector, but nothing cleared the \
             threshold. Lower `min_similarity` or check the plan's operands."
        )
    )]
    NoMatch { index: usize, threshold: f32 },

    #[error("cannot resolve \"{name}\": not stored and no resolver supplied it")]
    #[diagnostic(
        code(mnemos::query::unresolved),
        help("Store the concept first, or supply a `ConceptResolver` that can mint it.")
    )]
    Unresolved { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vsa(#[from] VsaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(mnemos::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(mnemos::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(mnemos::engine::config_read),
        help("Ensure the config file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}: {message}")]
    #[diagnostic(
        code(mnemos::engine::config_parse),
        help("Check the TOML syntax and field names in the config file.")
    )]
    ConfigParse { path: String, message: String },

    #[error("write lock poisoned: a writer panicked mid-operation")]
    #[diagnostic(
        code(mnemos::engine::lock_poisoned),
        help("Reopen the engine; replay restores the last committed state.")
    )]
    LockPoisoned,
}

/// Convenience alias for functions returning mnemos results.
pub type MnemosResult<T> = std::result::Result<T, MnemosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsa_error_converts_to_mnemos_error() {
        let err = VsaError::DimensionMismatch {
            expected: 2048,
            actual: 512,
        };
        let top: MnemosError = err.into();
        assert!(matches!(
            top,
            MnemosError::Vsa(VsaError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn store_error_converts_to_mnemos_error() {
        let err = StoreError::UnknownConcept { id: "red".into() };
        let top: MnemosError = err.into();
        assert!(matches!(
            top,
            MnemosError::Store(StoreError::UnknownConcept { .. })
        ));
    }

    #[test]
    fn query_error_wraps_vsa_error() {
        let query_err: QueryError = VsaError::EmptyBundle.into();
        assert!(matches!(query_err, QueryError::Vsa(VsaError::EmptyBundle)));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = VsaError::DimensionMismatch {
            expected: 2048,
            actual: 512,
        };
        let msg = format!("{err}");
        assert!(msg.contains("2048"));
        assert!(msg.contains("512"));

        let err = WalError::Corruption {
            line: 7,
            message: "truncated".into(),
        };
        assert!(format!("{err}").contains("line 7"));
    }
}
