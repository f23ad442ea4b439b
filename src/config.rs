//! Engine configuration.
//!
//! [`EngineConfig`] can be built in code or loaded from a TOML file. Every
//! field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! dimension = 4096
//! data_dir = "/var/lib/mnemos"
//! cleanup_backend = "hnsw"
//! snapshot_every = 500
//! ```

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cleanup::{CleanupBackend, DEFAULT_MIN_SIMILARITY};
use crate::error::EngineError;
use crate::vsa::{Dimension, Encoding};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hypervector dimension (default: 2,048).
    pub dimension: Dimension,
    /// Encoding scheme.
    pub encoding: Encoding,
    /// Directory for `wal.log` and `snapshot.json`. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Concepts kept in the hot LRU tier.
    pub hot_capacity: usize,
    /// Cleanup results below this similarity are dropped.
    pub min_similarity: f32,
    /// Candidate index used by cleanup.
    pub cleanup_backend: CleanupBackend,
    /// Expected number of concepts (capacity hint for the ANN index).
    pub max_concepts: usize,
    /// `sync_data` after every WAL frame.
    pub fsync: bool,
    /// Checkpoint automatically after this many commits.
    pub snapshot_every: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: Dimension::DEFAULT,
            encoding: Encoding::Fhrr,
            data_dir: None,
            hot_capacity: 1024,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            cleanup_backend: CleanupBackend::Exhaustive,
            max_concepts: 100_000,
            fsync: true,
            snapshot_every: None,
        }
    }
}

impl EngineConfig {
    /// Memory-only configuration with the given dimension.
    pub fn in_memory(dimension: Dimension) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Persistent configuration rooted at `data_dir`.
    pub fn persistent(dimension: Dimension, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dimension.0 == 0 {
            return Err(EngineError::InvalidConfig {
                message: "dimension must be > 0".into(),
            });
        }
        if self.hot_capacity == 0 {
            return Err(EngineError::InvalidConfig {
                message: "hot_capacity must be > 0".into(),
            });
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(EngineError::InvalidConfig {
                message: format!(
                    "min_similarity must be within [-1, 1], got {}",
                    self.min_similarity
                ),
            });
        }
        if self.snapshot_every == Some(0) {
            return Err(EngineError::InvalidConfig {
                message: "snapshot_every must be > 0 when set".into(),
            });
        }
        Ok(())
    }

    /// Hot-tier capacity as a non-zero count.
    pub fn hot_capacity(&self) -> Result<NonZeroUsize, EngineError> {
        NonZeroUsize::new(self.hot_capacity).ok_or_else(|| EngineError::InvalidConfig {
            message: "hot_capacity must be > 0".into(),
        })
    }

    /// Path of the WAL file, if persistent.
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("wal.log"))
    }

    /// Path of the snapshot file, if persistent.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("snapshot.json"))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::ConfigParse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::DataDir {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| EngineError::DataDir {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dimension, Dimension(2048));
        assert_eq!(config.min_similarity, DEFAULT_MIN_SIMILARITY);
        assert!(config.wal_path().is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_dim = EngineConfig::in_memory(Dimension(0));
        assert!(matches!(
            zero_dim.validate(),
            Err(EngineError::InvalidConfig { .. })
        ));

        let zero_hot = EngineConfig {
            hot_capacity: 0,
            ..Default::default()
        };
        assert!(zero_hot.validate().is_err());

        let bad_threshold = EngineConfig {
            min_similarity: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            "dimension = 512\ncleanup_backend = \"hnsw\"\nsnapshot_every = 10\n",
        )
        .unwrap();
        assert_eq!(config.dimension, Dimension(512));
        assert_eq!(config.cleanup_backend, CleanupBackend::Hnsw);
        assert_eq!(config.snapshot_every, Some(10));
        assert_eq!(config.hot_capacity, 1024);
        assert!(config.fsync);
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("cleanup_backend = \"flat\""),
            Err(EngineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn config_roundtrip_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("mnemos.toml");
        let config = EngineConfig::persistent(Dimension::TEST, tmp.path().join("data"));
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::from_toml_file(&path).unwrap(), config);
    }
}
