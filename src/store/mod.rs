//! Tiered concept storage.
//!
//! Two tiers serve different access patterns:
//!
//! - [`HotCache`](hot::HotCache): recently used concepts in a bounded LRU
//! - [`ConceptIndex`](index::ConceptIndex): every live concept in a concurrent map
//!
//! [`ConceptStore`] composes them. Writes update both tiers; reads check the
//! hot tier first and promote on a miss. A read that finds the hot tier busy
//! goes straight to the index instead of waiting. Eviction from the hot tier
//! never loses a concept.
//!
//! The store itself is not durable. The engine records each mutation in the
//! WAL before handing it to [`ConceptStore::apply`].

pub mod hot;
pub mod index;

use std::num::NonZeroUsize;

use crate::concept::Concept;
use crate::error::{StoreError, VsaError};
use crate::vsa::Dimension;
use crate::wal::Operation;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A mutation that reached the store, reported back so secondary indexes
/// can follow.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put(Concept),
    Delete(String),
}

/// Hot LRU tier over a complete concept index.
#[derive(Debug)]
pub struct ConceptStore {
    dim: Dimension,
    hot: hot::HotCache,
    index: index::ConceptIndex,
}

impl ConceptStore {
    /// Create an empty store.
    pub fn new(dim: Dimension, hot_capacity: NonZeroUsize) -> Self {
        Self {
            dim,
            hot: hot::HotCache::new(hot_capacity),
            index: index::ConceptIndex::new(),
        }
    }

    /// Build a store from previously persisted concepts (e.g. a snapshot).
    /// The hot tier starts cold.
    pub fn from_concepts(
        dim: Dimension,
        hot_capacity: NonZeroUsize,
        concepts: impl IntoIterator<Item = Concept>,
    ) -> StoreResult<Self> {
        let store = Self::new(dim, hot_capacity);
        for concept in concepts {
            store.check_dim(&concept)?;
            store.index.insert(concept);
        }
        Ok(store)
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    /// Fetch a concept, promoting it into the hot tier when the tier is free.
    pub fn get(&self, id: &str) -> StoreResult<Concept> {
        let promoted = self.hot.try_with_lock(|cache| {
            if let Some(concept) = cache.get(id) {
                return Some(concept.clone());
            }
            let concept = self.index.get(id)?;
            cache.put(id.to_string(), concept.clone());
            Some(concept)
        });
        promoted
            .unwrap_or_else(|| self.index.get(id))
            .ok_or_else(|| StoreError::UnknownConcept { id: id.to_string() })
    }

    /// Fetch a concept without touching the hot tier.
    pub fn peek(&self, id: &str) -> Option<Concept> {
        self.index.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Number of stored concepts.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of concepts currently in the hot tier.
    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn hot_capacity(&self) -> usize {
        self.hot.capacity()
    }

    /// Apply the operations of one committed transaction.
    ///
    /// Every operation is validated before any is applied. The batch runs under
    /// the hot-tier lock, so a cached copy is never older than the index.
    /// `revision` is the END sequence number; a put keeps the
    /// `created_at` of the concept it replaces. Deletes of ids that are no
    /// longer present are skipped.
    pub fn apply(&self, ops: &[Operation], revision: u64) -> StoreResult<Vec<Change>> {
        for op in ops {
            if let Operation::Put { vector, .. } = op
                && vector.dim() != self.dim
            {
                return Err(VsaError::DimensionMismatch {
                    expected: self.dim.0,
                    actual: vector.dim().0,
                }
                .into());
            }
        }

        Ok(self.hot.with_lock(|cache| {
            let mut changes = Vec::with_capacity(ops.len());
            for op in ops {
                match op {
                    Operation::Put {
                        id,
                        vector,
                        metadata,
                        at,
                    } => {
                        let created_at = self
                            .index
                            .get(id)
                            .map_or(*at, |previous| previous.created_at);
                        let concept = Concept::builder(id.as_str(), vector.clone())
                            .metadata(metadata.clone())
                            .created_at(created_at)
                            .updated_at(*at)
                            .revision(revision)
                            .build();
                        self.index.insert(concept.clone());
                        cache.put(id.clone(), concept.clone());
                        changes.push(Change::Put(concept));
                    }
                    Operation::Delete { id, .. } => {
                        cache.pop(id);
                        if self.index.remove(id).is_some() {
                            changes.push(Change::Delete(id.clone()));
                        } else {
                            tracing::warn!(id = %id, revision, "delete of absent concept skipped");
                        }
                    }
                }
            }
            changes
        }))
    }

    /// Lazy iterator over all concepts in id order. Does not promote.
    pub fn all(&self) -> Concepts<'_> {
        Concepts {
            store: self,
            ids: self.index.sorted_ids(),
            pos: 0,
        }
    }

    /// Ids of all stored concepts, ascending.
    pub fn ids(&self) -> Vec<String> {
        self.index.sorted_ids()
    }

    /// Every concept, ordered by id.
    pub fn dump(&self) -> Vec<Concept> {
        self.all().collect()
    }

    /// Canonical JSON of [`dump`](Self::dump); equal stores give equal bytes.
    pub fn dump_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(&self.dump()).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })
    }

    fn check_dim(&self, concept: &Concept) -> StoreResult<()> {
        if concept.vector.dim() != self.dim {
            return Err(VsaError::DimensionMismatch {
                expected: self.dim.0,
                actual: concept.vector.dim().0,
            }
            .into());
        }
        Ok(())
    }
}

/// Iterator returned by [`ConceptStore::all`].
///
/// Walks the ids present when it was created; concepts deleted since are
/// skipped, concepts added since are not visited. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Concepts<'a> {
    store: &'a ConceptStore,
    ids: Vec<String>,
    pos: usize,
}

impl Concepts<'_> {
    /// Rewind to the first id.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for Concepts<'_> {
    type Item = Concept;

    fn next(&mut self) -> Option<Concept> {
        while let Some(id) = self.ids.get(self.pos) {
            self.pos += 1;
            if let Some(concept) = self.store.peek(id) {
                return Some(concept);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len().saturating_sub(self.pos)))
    }
}
