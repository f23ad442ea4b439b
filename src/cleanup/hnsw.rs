//! HNSW candidate index.
//!
//! FHRR vectors are indexed through their real embedding
//! `[cos θ₀ … cos θₙ, sin θ₀ … sin θₙ]`: the cosine between two embeddings is
//! exactly the FHRR similarity, so cosine distance ranks the same way.
//!
//! HNSW points cannot be deleted. Every put inserts a fresh point and records
//! it as the live point for its id; deletes forget the id. Points that are no
//! longer live are filtered out at query time.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anndists::dist::DistCosine;
use dashmap::DashMap;
use hnsw_rs::hnsw::Hnsw;

use crate::concept::Concept;
use crate::error::VsaError;
use crate::store::{Change, ConceptStore};
use crate::vsa::ops::{VsaOps, VsaResult};
use crate::vsa::{Dimension, HyperVec};

use super::{CandidateIndex, CleanupMatch};

pub struct HnswIndex {
    hnsw: RwLock<Hnsw<'static, f32, DistCosine>>,
    /// HNSW point → concept id.
    points: DashMap<usize, String>,
    /// Concept id → its live point.
    live: DashMap<String, usize>,
    next_point: AtomicUsize,
    /// Points still in the graph that no longer belong to a live concept.
    retired: AtomicUsize,
    dim: Dimension,
}

// Safety: Hnsw uses internal synchronization via atomics/locks.
// The RwLock wrapper provides the outer synchronization needed.
unsafe impl Send for HnswIndex {}
unsafe impl Sync for HnswIndex {}

impl HnswIndex {
    /// `max_elements` is a capacity hint.
    pub fn new(dim: Dimension, max_elements: usize) -> Self {
        let max_elements = max_elements.max(1);
        let max_layer = ((max_elements as f64).log2().ceil() as usize).clamp(4, 16);
        let hnsw = Hnsw::new(16, max_elements, max_layer, 200, DistCosine {});
        Self {
            hnsw: RwLock::new(hnsw),
            points: DashMap::new(),
            live: DashMap::new(),
            next_point: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
            dim,
        }
    }

    /// Number of live concepts indexed.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn insert(&self, concept: &Concept) {
        let embedding = concept.vector.to_real_embedding();
        let point = self.next_point.fetch_add(1, Ordering::Relaxed);
        if let Ok(hnsw) = self.hnsw.read() {
            hnsw.insert((embedding.as_slice(), point));
        }
        self.points.insert(point, concept.id.clone());
        if let Some(previous) = self.live.insert(concept.id.clone(), point) {
            self.points.remove(&previous);
            self.retired.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn remove(&self, id: &str) {
        if let Some((_, point)) = self.live.remove(id) {
            self.points.remove(&point);
            self.retired.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl CandidateIndex for HnswIndex {
    fn name(&self) -> &'static str {
        "hnsw"
    }

    fn candidates(
        &self,
        store: &ConceptStore,
        ops: &VsaOps,
        query: &HyperVec,
        k: usize,
    ) -> VsaResult<Vec<CleanupMatch>> {
        if query.dim() != self.dim {
            return Err(VsaError::DimensionMismatch {
                expected: self.dim.0,
                actual: query.dim().0,
            });
        }

        // Superseded points still occupy neighbour slots; over-fetch.
        let stale = self.retired.load(Ordering::Relaxed);
        let want = (k * 2).max(k + 8) + stale.min(k * 4);
        let ef_search = (want * 2).max(64);
        let embedding = query.to_real_embedding();

        let neighbours = {
            let hnsw = self.hnsw.read().map_err(|_| VsaError::Hnsw {
                message: "HNSW lock poisoned".into(),
            })?;
            hnsw.search(&embedding, want, ef_search)
        };

        let mut matches = Vec::with_capacity(neighbours.len());
        for n in neighbours {
            let Some(id) = self.points.get(&n.d_id).map(|e| e.value().clone()) else {
                continue;
            };
            if self.live.get(&id).map(|p| *p.value()) != Some(n.d_id) {
                continue;
            }
            let Some(concept) = store.peek(&id) else {
                continue;
            };
            let similarity = ops.similarity(query, &concept.vector)?;
            matches.push(CleanupMatch {
                concept,
                similarity,
            });
        }
        Ok(matches)
    }

    fn observe(&self, changes: &[Change]) {
        for change in changes {
            match change {
                Change::Put(concept) => self.insert(concept),
                Change::Delete(id) => self.remove(id),
            }
        }
    }

    fn rebuild(&self, store: &ConceptStore) {
        for concept in store.all() {
            self.insert(&concept);
        }
        tracing::debug!(indexed = self.live.len(), "HNSW index rebuilt");
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dim", &self.dim)
            .field("live", &self.live.len())
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish()
    }
}
