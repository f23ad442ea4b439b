//! Concept value types.
//!
//! A [`Concept`] is a named hypervector with ordered metadata and timestamps.
//! Concepts are plain values: the store owns the canonical copy and hands out
//! clones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vsa::HyperVec;

/// Ordered key → value metadata attached to a concept.
pub type Metadata = BTreeMap<String, String>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A stored concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Unique id within a store.
    pub id: String,
    /// The concept's hypervector.
    pub vector: HyperVec,
    /// Caller-supplied metadata, ordered by key.
    #[serde(default)]
    pub metadata: Metadata,
    /// When the concept was first stored (ms since epoch).
    pub created_at: u64,
    /// When the concept was last written (ms since epoch).
    pub updated_at: u64,
    /// WAL sequence number of the END frame that committed the latest write.
    pub revision: u64,
}

impl Concept {
    /// Start building a concept.
    pub fn builder(id: impl Into<String>, vector: HyperVec) -> ConceptBuilder {
        ConceptBuilder::new(id, vector)
    }

    /// Ordering key for "written more recently": `updated_at`, then `revision`.
    pub fn recency(&self) -> (u64, u64) {
        (self.updated_at, self.revision)
    }
}

/// Builder for [`Concept`] values.
#[derive(Debug, Clone)]
pub struct ConceptBuilder {
    id: String,
    vector: HyperVec,
    metadata: Metadata,
    created_at: Option<u64>,
    updated_at: Option<u64>,
    revision: u64,
}

impl ConceptBuilder {
    /// New builder with empty metadata.
    pub fn new(id: impl Into<String>, vector: HyperVec) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: Metadata::new(),
            created_at: None,
            updated_at: None,
            revision: 0,
        }
    }

    /// Replace all metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn created_at(mut self, millis: u64) -> Self {
        self.created_at = Some(millis);
        self
    }

    pub fn updated_at(mut self, millis: u64) -> Self {
        self.updated_at = Some(millis);
        self
    }

    pub fn revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Finish the concept. Missing timestamps default to now; a missing
    /// `updated_at` defaults to `created_at`.
    pub fn build(self) -> Concept {
        let created_at = self.created_at.unwrap_or_else(now_millis);
        Concept {
            id: self.id,
            vector: self.vector,
            metadata: self.metadata,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            revision: self.revision,
        }
    }
}
