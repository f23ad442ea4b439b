//! Vector Symbolic Architecture (VSA) core.
//!
//! This module implements hyperdimensional computing with Fourier holographic
//! reduced representations (FHRR). It provides:
//!
//! - [`HyperVec`]: the fundamental hypervector type
//! - [`VsaOps`](ops::VsaOps): bind, unbind, bundle, permute, similarity
//! - Deterministic encoders from seeds, tokens, and role/filler structures

pub mod encode;
pub mod ops;

use serde::{Deserialize, Serialize};

/// Configurable hypervector dimensionality.
///
/// Typical values: 2,048 for good capacity, 512 for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimension(pub usize);

impl Dimension {
    /// Standard capacity dimension.
    pub const DEFAULT: Self = Self(2_048);

    /// Smaller dimension for fast testing.
    pub const TEST: Self = Self(512);
}

impl Default for Dimension {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoding scheme for hypervectors.
///
/// Fixed once per store; recorded in snapshots so a store is never reopened
/// under a different numeric domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Fourier holographic reduced representation: every component is a unit
    /// complex number stored as its phase. Bind = phase addition, unbind =
    /// phase subtraction, bundle = normalised phasor sum, similarity = mean
    /// cosine of the phase difference.
    #[default]
    Fhrr,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Fhrr => write!(f, "FHRR"),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fhrr" => Ok(Encoding::Fhrr),
            other => Err(format!("unknown encoding \"{other}\" (expected \"fhrr\")")),
        }
    }
}

/// A hypervector, stored as one phase per component.
///
/// Component `i` is the unit phasor `e^{i·phases[i]}`, with every phase in
/// `[-π, π]`. Serialised as a plain array of phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperVec {
    phases: Vec<f32>,
}

impl HyperVec {
    /// Create a hypervector from raw phases.
    ///
    /// Phases outside `[-π, π]` are wrapped.
    pub fn from_phases(phases: Vec<f32>) -> Self {
        let phases = phases.into_iter().map(crate::simd::wrap_phase).collect();
        Self { phases }
    }

    /// The identity for bind: every phase zero.
    pub fn identity(dim: Dimension) -> Self {
        Self {
            phases: vec![0.0; dim.0],
        }
    }

    /// Raw phase data of this hypervector.
    pub fn phases(&self) -> &[f32] {
        &self.phases
    }

    /// The dimension of this hypervector.
    pub fn dim(&self) -> Dimension {
        Dimension(self.phases.len())
    }

    /// Real embedding `[cos θ₀…, sin θ₀…]` whose cosine similarity equals
    /// the FHRR similarity.
    pub fn to_real_embedding(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.phases.len() * 2);
        out.extend(self.phases.iter().map(|p| p.cos()));
        out.extend(self.phases.iter().map(|p| p.sin()));
        out
    }
}
