//! VSA operations: bind, unbind, bundle, permute, similarity.
//!
//! These are the core algebraic operations of the Vector Symbolic Architecture.
//! Each operation is dispatched through the SIMD kernel for maximum performance.

use std::f32::consts::PI;

use rand::{Rng, SeedableRng};

use crate::error::VsaError;
use crate::simd::VsaKernel;

use super::{Dimension, Encoding, HyperVec};

/// Result type for VSA operations.
pub type VsaResult<T> = std::result::Result<T, VsaError>;

/// Ensure two hypervectors have matching dimensions.
fn check_compatible(a: &HyperVec, b: &HyperVec) -> VsaResult<()> {
    if a.dim() != b.dim() {
        return Err(VsaError::DimensionMismatch {
            expected: a.dim().0,
            actual: b.dim().0,
        });
    }
    Ok(())
}

/// VSA operations backed by a SIMD kernel.
pub struct VsaOps {
    kernel: Box<dyn VsaKernel>,
    dim: Dimension,
    encoding: Encoding,
}

impl VsaOps {
    /// Create VSA operations with the given kernel, dimension, and encoding.
    pub fn new(kernel: Box<dyn VsaKernel>, dim: Dimension, encoding: Encoding) -> Self {
        Self {
            kernel,
            dim,
            encoding,
        }
    }

    /// The dimension these ops work with.
    pub fn dim(&self) -> Dimension {
        self.dim
    }

    /// The encoding these ops work with.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The SIMD instruction set level this kernel uses.
    pub fn isa_level(&self) -> crate::simd::IsaLevel {
        self.kernel.isa_level()
    }

    /// Check that a vector has this instance's dimension.
    pub fn check_dim(&self, v: &HyperVec) -> VsaResult<()> {
        if v.dim() != self.dim {
            return Err(VsaError::DimensionMismatch {
                expected: self.dim.0,
                actual: v.dim().0,
            });
        }
        Ok(())
    }

    /// Generate a random hypervector using the given RNG.
    ///
    /// Phases are uniform on `[-π, π)`, so distinct draws are quasi-orthogonal:
    /// their similarity concentrates around 0 with deviation `1/√(2D)`.
    pub fn random(&self, rng: &mut impl Rng) -> HyperVec {
        let phases = (0..self.dim.0).map(|_| rng.gen_range(-PI..PI)).collect();
        HyperVec::from_phases(phases)
    }

    /// Deterministic random hypervector for a seed.
    pub fn random_from_seed(&self, seed: u64) -> HyperVec {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        self.random(&mut rng)
    }

    /// Bind two hypervectors (elementwise complex multiplication).
    ///
    /// The result is dissimilar to both inputs. Used for role/filler pairs.
    pub fn bind(&self, a: &HyperVec, b: &HyperVec) -> VsaResult<HyperVec> {
        check_compatible(a, b)?;
        let mut out = vec![0.0f32; a.dim().0];
        self.kernel.phase_add(a.phases(), b.phases(), &mut out);
        Ok(HyperVec { phases: out })
    }

    /// Unbind: multiply by the conjugate of `key`.
    ///
    /// Exact for a clean bound pair; when `bound` is a superposition the result
    /// is a noisy approximation that needs cleanup.
    pub fn unbind(&self, bound: &HyperVec, key: &HyperVec) -> VsaResult<HyperVec> {
        check_compatible(bound, key)?;
        let mut out = vec![0.0f32; bound.dim().0];
        self.kernel.phase_sub(bound.phases(), key.phases(), &mut out);
        Ok(HyperVec { phases: out })
    }

    /// The conjugate (inverse under bind) of a hypervector.
    pub fn inverse(&self, v: &HyperVec) -> HyperVec {
        HyperVec::from_phases(v.phases().iter().map(|p| -p).collect())
    }

    /// Bundle multiple hypervectors (normalised phasor sum).
    ///
    /// The result stays similar to every input.
    /// Where the phasors cancel exactly the component falls back to phase 0.
    pub fn bundle(&self, vectors: &[&HyperVec]) -> VsaResult<HyperVec> {
        if vectors.is_empty() {
            return Err(VsaError::EmptyBundle);
        }
        let dim = vectors[0].dim();
        for v in &vectors[1..] {
            if v.dim() != dim {
                return Err(VsaError::DimensionMismatch {
                    expected: dim.0,
                    actual: v.dim().0,
                });
            }
        }

        let mut re = vec![0.0f32; dim.0];
        let mut im = vec![0.0f32; dim.0];
        for &v in vectors {
            self.kernel.accumulate_phasors(&mut re, &mut im, v.phases());
        }

        let phases = re
            .iter()
            .zip(im.iter())
            .map(|(&r, &i)| if r == 0.0 && i == 0.0 { 0.0 } else { i.atan2(r) })
            .collect();
        Ok(HyperVec { phases })
    }

    /// Permute a hypervector by a cyclic shift.
    ///
    /// The result is dissimilar to the input; sequences use it to tag position.
    pub fn permute(&self, v: &HyperVec, shift: usize) -> HyperVec {
        let mut out = vec![0.0f32; v.dim().0];
        self.kernel.rotate(v.phases(), shift, &mut out);
        HyperVec { phases: out }
    }

    /// Compute similarity between two hypervectors.
    ///
    /// Returns the mean cosine of the phase differences in `[-1.0, 1.0]`:
    /// 1.0 means identical, ~0.0 means unrelated, -1.0 means opposite.
    pub fn similarity(&self, a: &HyperVec, b: &HyperVec) -> VsaResult<f32> {
        check_compatible(a, b)?;
        let n = a.dim().0;
        if n == 0 {
            return Err(VsaError::ZeroDimension);
        }
        let sum = self.kernel.cos_sum(a.phases(), b.phases());
        Ok(((sum / n as f64) as f32).clamp(-1.0, 1.0))
    }
}

impl std::fmt::Debug for VsaOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsaOps")
            .field("dim", &self.dim)
            .field("encoding", &self.encoding)
            .field("isa", &self.kernel.isa_level())
            .finish()
    }
}
