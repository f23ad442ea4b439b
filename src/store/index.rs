//! Complete concept index backed by DashMap.
//!
//! Holds every live concept. It is the authoritative in-memory tier; its
//! durability comes from the WAL and snapshots, not from this structure.

use dashmap::DashMap;

use crate::concept::Concept;

/// Concurrent id → concept map of all stored concepts.
#[derive(Debug, Default)]
pub struct ConceptIndex {
    data: DashMap<String, Concept>,
}

impl ConceptIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Insert or replace a concept, returning the previous value.
    pub fn insert(&self, concept: Concept) -> Option<Concept> {
        self.data.insert(concept.id.clone(), concept)
    }

    /// Get a clone of the stored concept.
    pub fn get(&self, id: &str) -> Option<Concept> {
        self.data.get(id).map(|c| c.value().clone())
    }

    /// Remove a concept and return it.
    pub fn remove(&self, id: &str) -> Option<Concept> {
        self.data.remove(id).map(|(_, c)| c)
    }

    /// Check if an id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }

    /// Number of concepts.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All ids in ascending order (point-in-time, not a consistent view under
    /// concurrent writes).
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.data.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
