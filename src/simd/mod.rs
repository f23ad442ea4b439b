//! SIMD-accelerated kernels for FHRR phase arithmetic.
//!
//! This module provides a `VsaKernel` trait with CPU-specific implementations.
//! At runtime, [`detect_isa`] determines the best available instruction set and
//! [`best_kernel`] returns the fastest implementation for the current CPU.
//!
//! Hypervector components are unit complex numbers stored as phase angles, so
//! complex multiplication reduces to phase addition and conjugation to phase
//! negation. Every kernel wraps results back into `[-π, π]` with the same
//! formula, which keeps the generic and AVX2 paths bit-identical.
//!
//! # Supported ISA levels
//!
//! - **Generic**: Pure-Rust scalar fallback, works everywhere
//! - **AVX2**: 256-bit SIMD for x86_64 systems with AVX2 support

pub mod avx2;
pub mod generic;

use std::f32::consts::TAU;

/// Instruction set architecture level detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsaLevel {
    /// Pure-Rust scalar operations, no SIMD.
    Generic,
    /// x86_64 AVX2 (256-bit vectors).
    Avx2,
}

impl std::fmt::Display for IsaLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsaLevel::Generic => write!(f, "Generic (scalar)"),
            IsaLevel::Avx2 => write!(f, "AVX2 (256-bit)"),
        }
    }
}

/// Detect the best ISA level available on the current CPU.
pub fn detect_isa() -> IsaLevel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return IsaLevel::Avx2;
        }
    }
    IsaLevel::Generic
}

/// Wrap an angle into `[-π, π]` (to within one ulp at the boundary).
///
/// Uses round-half-to-even so the scalar path matches `_mm256_round_ps`.
#[inline]
pub fn wrap_phase(x: f32) -> f32 {
    x - TAU * (x / TAU).round_ties_even()
}

/// Trait for SIMD-accelerated FHRR kernels.
///
/// Each method operates on phase slices representing hypervectors.
/// Implementations must handle alignment and length requirements internally.
pub trait VsaKernel: Send + Sync {
    /// The ISA level this kernel targets.
    fn isa_level(&self) -> IsaLevel;

    /// Complex multiplication of two phasor vectors: `out[i] = wrap(a[i] + b[i])`.
    ///
    /// `a`, `b` and `out` must have the same length.
    fn phase_add(&self, a: &[f32], b: &[f32], out: &mut [f32]);

    /// Multiplication by the conjugate: `out[i] = wrap(a[i] - b[i])`.
    fn phase_sub(&self, a: &[f32], b: &[f32], out: &mut [f32]);

    /// Sum of `cos(a[i] - b[i])`, i.e. the real part of the Hermitian inner product.
    fn cos_sum(&self, a: &[f32], b: &[f32]) -> f64;

    /// Add the unit phasors of `phases` into the `re`/`im` accumulators.
    fn accumulate_phasors(&self, re: &mut [f32], im: &mut [f32], phases: &[f32]);

    /// Cyclic rotation of components: `out[(i + shift) % n] = data[i]`.
    fn rotate(&self, data: &[f32], shift: usize, out: &mut [f32]);
}

/// Return the best available kernel for the current CPU.
pub fn best_kernel() -> Box<dyn VsaKernel> {
    match detect_isa() {
        #[cfg(target_arch = "x86_64")]
        IsaLevel::Avx2 => Box::new(avx2::Avx2Kernel),
        _ => Box::new(generic::GenericKernel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn detect_isa_returns_valid_level() {
        let level = detect_isa();
        assert!(level >= IsaLevel::Generic);
    }

    #[test]
    fn best_kernel_returns_working_kernel() {
        let kernel = best_kernel();
        assert!(kernel.isa_level() >= IsaLevel::Generic);
    }

    #[test]
    fn wrap_phase_stays_in_range() {
        for &x in &[0.0f32, 1.0, -1.0, 3.5, -3.5, 7.0, -7.0, 100.0, -100.0] {
            let w = wrap_phase(x);
            assert!(w.abs() <= PI + 1e-5, "wrap({x}) = {w}");
            assert!(((w - x) / TAU - ((w - x) / TAU).round()).abs() < 1e-4);
        }
    }

    /// Run the full kernel test suite against any implementation.
    pub fn kernel_conformance_tests(kernel: &dyn VsaKernel) {
        // 37 components: exercises both the vector body and the scalar tail.
        let n = 37;
        let a: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin() * 3.0).collect();
        let b: Vec<f32> = (0..n).map(|i| (i as f32 * 0.91).cos() * 3.0).collect();

        let mut sum = vec![0.0f32; n];
        kernel.phase_add(&a, &b, &mut sum);
        let mut back = vec![0.0f32; n];
        kernel.phase_sub(&sum, &b, &mut back);
        for i in 0..n {
            assert!(sum[i].abs() <= PI + 1e-5);
            let diff = wrap_phase(back[i] - a[i]).abs();
            assert!(diff < 1e-4, "component {i}: {} vs {}", back[i], a[i]);
        }

        // Bit-identical with the generic reference.
        let mut reference = vec![0.0f32; n];
        generic::GenericKernel.phase_add(&a, &b, &mut reference);
        assert_eq!(sum, reference);

        // cos_sum of self is n.
        let self_sum = kernel.cos_sum(&a, &a);
        assert!((self_sum - n as f64).abs() < 1e-3);

        // Opposite phases: cos(π) = -1.
        let zeros = vec![0.0f32; n];
        let pis = vec![PI; n];
        assert!((kernel.cos_sum(&zeros, &pis) + n as f64).abs() < 1e-3);

        // Phasor accumulation.
        let mut re = vec![0.0f32; n];
        let mut im = vec![0.0f32; n];
        kernel.accumulate_phasors(&mut re, &mut im, &zeros);
        kernel.accumulate_phasors(&mut re, &mut im, &zeros);
        assert!(re.iter().all(|&r| (r - 2.0).abs() < 1e-6));
        assert!(im.iter().all(|&v| v.abs() < 1e-6));

        // Rotation.
        let data: Vec<f32> = (0..n).map(|i| i as f32 / 100.0).collect();
        let mut out = vec![0.0f32; n];
        kernel.rotate(&data, 1, &mut out);
        assert_eq!(out[1], data[0]);
        assert_eq!(out[0], data[n - 1]);
        kernel.rotate(&data, n, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn generic_kernel_conformance() {
        kernel_conformance_tests(&generic::GenericKernel);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_kernel_conformance() {
        if detect_isa() >= IsaLevel::Avx2 {
            kernel_conformance_tests(&avx2::Avx2Kernel);
        }
    }
}
