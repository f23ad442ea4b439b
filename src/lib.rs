// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # mnemos
//!
//! A hyperdimensional (vector-symbolic) memory with transactional persistence.
//!
//! ## Architecture
//!
//! - **VSA core** (`vsa`): FHRR phase hypervectors with bind, unbind, bundle,
//!   permute and similarity
//! - **SIMD acceleration** (`simd`): Runtime-dispatched AVX2/generic kernels
//! - **Tiered storage** (`store`): Hot LRU tier over a complete concurrent index
//! - **Cleanup** (`cleanup`): Ranked nearest-concept lookup, exhaustive or HNSW
//! - **Write-ahead log** (`wal`): Labelled BEGIN/OP/END transactions as JSON lines
//! - **Snapshots** (`snapshot`): Atomic store images, replay and WAL compaction
//! - **Queries** (`query`): Stack plans composing algebra, cleanup and writes
//!
//! ## Library usage
//!
//! ```no_run
//! use mnemos::concept::Metadata;
//! use mnemos::config::EngineConfig;
//! use mnemos::engine::Engine;
//! use mnemos::vsa::Dimension;
//!
//! let engine = Engine::open(EngineConfig::persistent(Dimension::DEFAULT, "./data")).unwrap();
//! let red = engine.random_vector(1);
//! let apple = engine.random_vector(2);
//! engine.store("red", red.clone(), Metadata::new()).unwrap();
//! engine.store("apple", apple.clone(), Metadata::new()).unwrap();
//!
//! let red_apple = engine.bind(&red, &apple).unwrap();
//! let recovered = engine.unbind(&red_apple, &apple).unwrap();
//! let best = engine.cleanup(&recovered, 1).unwrap();
//! assert_eq!(best[0].concept.id, "red");
//! engine.close().unwrap();
//! ```

pub mod cleanup;
pub mod concept;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod simd;
pub mod snapshot;
pub mod store;
pub mod vsa;
pub mod wal;
