//! Cleanup memory: resolve a noisy vector to the stored concepts nearest it.
//!
//! A [`CandidateIndex`] proposes candidates with exact similarities; the
//! [`CleanupEngine`] ranks them, applies the similarity floor and truncates
//! to `k`.
//!
//! Ranking is total: similarity descending, then most recently updated
//! (`updated_at`, then `revision`), then id ascending.

pub mod hnsw;

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::concept::Concept;
use crate::store::{Change, ConceptStore};
use crate::vsa::ops::{VsaOps, VsaResult};
use crate::vsa::{Dimension, HyperVec};

/// Default similarity floor for cleanup results.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.15;

/// A ranked cleanup result.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupMatch {
    pub concept: Concept,
    /// Exact similarity to the query, in `[-1, 1]`.
    pub similarity: f32,
}

/// Which candidate index backs cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupBackend {
    /// Score every stored concept.
    #[default]
    Exhaustive,
    /// Approximate nearest neighbours via HNSW, re-scored exactly.
    Hnsw,
}

impl std::fmt::Display for CleanupBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupBackend::Exhaustive => write!(f, "exhaustive"),
            CleanupBackend::Hnsw => write!(f, "hnsw"),
        }
    }
}

impl std::str::FromStr for CleanupBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exhaustive" => Ok(CleanupBackend::Exhaustive),
            "hnsw" => Ok(CleanupBackend::Hnsw),
            other => Err(format!("unknown cleanup backend \"{other}\"")),
        }
    }
}

/// Source of cleanup candidates.
///
/// Implementations return concepts with their *exact* similarity to the
/// query; approximate indexes must re-score what they find.
pub trait CandidateIndex: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Candidates for the `k` best matches. May return more than `k`.
    fn candidates(
        &self,
        store: &ConceptStore,
        ops: &VsaOps,
        query: &HyperVec,
        k: usize,
    ) -> VsaResult<Vec<CleanupMatch>>;

    /// Follow committed store changes.
    fn observe(&self, _changes: &[Change]) {}

    /// Re-index everything in `store`.
    fn rebuild(&self, _store: &ConceptStore) {}
}

/// Scores every stored concept, in parallel.
#[derive(Debug, Default)]
pub struct ExhaustiveIndex;

impl CandidateIndex for ExhaustiveIndex {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn candidates(
        &self,
        store: &ConceptStore,
        ops: &VsaOps,
        query: &HyperVec,
        _k: usize,
    ) -> VsaResult<Vec<CleanupMatch>> {
        store
            .ids()
            .par_iter()
            .filter_map(|id| store.peek(id))
            .map(|concept| {
                let similarity = ops.similarity(query, &concept.vector)?;
                Ok(CleanupMatch {
                    concept,
                    similarity,
                })
            })
            .collect()
    }
}

/// Ranks candidates from a [`CandidateIndex`].
#[derive(Debug)]
pub struct CleanupEngine {
    index: Box<dyn CandidateIndex>,
    min_similarity: f32,
}

impl CleanupEngine {
    pub fn new(index: Box<dyn CandidateIndex>, min_similarity: f32) -> Self {
        Self {
            index,
            min_similarity,
        }
    }

    /// Engine for the configured backend.
    pub fn for_backend(
        backend: CleanupBackend,
        dim: Dimension,
        capacity: usize,
        min_similarity: f32,
    ) -> Self {
        let index: Box<dyn CandidateIndex> = match backend {
            CleanupBackend::Exhaustive => Box::new(ExhaustiveIndex),
            CleanupBackend::Hnsw => Box::new(hnsw::HnswIndex::new(dim, capacity)),
        };
        Self::new(index, min_similarity)
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.name()
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Up to `k` stored concepts most similar to `query`, best first.
    ///
    /// Matches below the similarity floor are dropped; an empty result means
    /// nothing cleared it. The store is only read.
    pub fn cleanup(
        &self,
        store: &ConceptStore,
        ops: &VsaOps,
        query: &HyperVec,
        k: usize,
    ) -> VsaResult<Vec<CleanupMatch>> {
        ops.check_dim(query)?;
        if k == 0 || store.is_empty() {
            return Ok(Vec::new());
        }
        let mut matches: Vec<CleanupMatch> = self
            .index
            .candidates(store, ops, query, k)?
            .into_iter()
            .filter(|m| m.similarity >= self.min_similarity)
            .collect();
        matches.sort_by(rank);
        matches.truncate(k);
        Ok(matches)
    }

    /// The single best match, if any clears the floor.
    pub fn best(
        &self,
        store: &ConceptStore,
        ops: &VsaOps,
        query: &HyperVec,
    ) -> VsaResult<Option<CleanupMatch>> {
        Ok(self.cleanup(store, ops, query, 1)?.into_iter().next())
    }

    pub fn observe(&self, changes: &[Change]) {
        self.index.observe(changes);
    }

    pub fn rebuild(&self, store: &ConceptStore) {
        self.index.rebuild(store);
    }
}

fn rank(a: &CleanupMatch, b: &CleanupMatch) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| b.concept.recency().cmp(&a.concept.recency()))
        .then_with(|| a.concept.id.cmp(&b.concept.id))
}
