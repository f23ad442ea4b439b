//! AVX2 (256-bit) SIMD kernel for x86_64 FHRR operations.
//!
//! Phase addition and subtraction run eight lanes at a time. Trigonometric
//! work (similarity, bundling) has no AVX2 instruction and falls through to
//! the generic kernel.

use super::{IsaLevel, VsaKernel};

/// AVX2-accelerated FHRR kernel.
///
/// Uses 256-bit SIMD for bulk operations and scalar fallback for tails.
#[derive(Debug, Clone, Copy)]
pub struct Avx2Kernel;

#[cfg(target_arch = "x86_64")]
impl VsaKernel for Avx2Kernel {
    fn isa_level(&self) -> IsaLevel {
        IsaLevel::Avx2
    }

    fn phase_add(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len(), out.len());

        if is_x86_feature_detected!("avx2") {
            // Safety: we've confirmed AVX2 support at runtime.
            unsafe { self.phase_combine_avx2::<false>(a, b, out) }
        } else {
            super::generic::GenericKernel.phase_add(a, b, out);
        }
    }

    fn phase_sub(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len(), out.len());

        if is_x86_feature_detected!("avx2") {
            unsafe { self.phase_combine_avx2::<true>(a, b, out) }
        } else {
            super::generic::GenericKernel.phase_sub(a, b, out);
        }
    }

    fn cos_sum(&self, a: &[f32], b: &[f32]) -> f64 {
        // No vector cosine in AVX2.
        super::generic::GenericKernel.cos_sum(a, b)
    }

    fn accumulate_phasors(&self, re: &mut [f32], im: &mut [f32], phases: &[f32]) {
        super::generic::GenericKernel.accumulate_phasors(re, im, phases);
    }

    fn rotate(&self, data: &[f32], shift: usize, out: &mut [f32]) {
        // Two memcpys already; nothing for SIMD to add.
        super::generic::GenericKernel.rotate(data, shift, out);
    }
}

#[cfg(target_arch = "x86_64")]
impl Avx2Kernel {
    /// `out = wrap(a ± b)` with the same operation order as [`super::wrap_phase`].
    #[target_feature(enable = "avx2")]
    unsafe fn phase_combine_avx2<const SUBTRACT: bool>(
        &self,
        a: &[f32],
        b: &[f32],
        out: &mut [f32],
    ) {
        use std::arch::x86_64::*;
        use std::f32::consts::TAU;

        let len = a.len();
        let chunks = len / 8;
        let remainder = len % 8;

        unsafe {
            let tau = _mm256_set1_ps(TAU);
            for i in 0..chunks {
                let offset = i * 8;
                let va = _mm256_loadu_ps(a.as_ptr().add(offset));
                let vb = _mm256_loadu_ps(b.as_ptr().add(offset));
                let x = if SUBTRACT {
                    _mm256_sub_ps(va, vb)
                } else {
                    _mm256_add_ps(va, vb)
                };
                let turns = _mm256_round_ps::<{ _MM_FROUND_TO_NEAREST_INT | _MM_FROUND_NO_EXC }>(
                    _mm256_div_ps(x, tau),
                );
                let wrapped = _mm256_sub_ps(x, _mm256_mul_ps(tau, turns));
                _mm256_storeu_ps(out.as_mut_ptr().add(offset), wrapped);
            }
        }

        // Scalar tail
        let tail_start = chunks * 8;
        for i in tail_start..tail_start + remainder {
            let x = if SUBTRACT { a[i] - b[i] } else { a[i] + b[i] };
            out[i] = super::wrap_phase(x);
        }
    }
}

// Provide a stub for non-x86_64 targets so the module compiles.
#[cfg(not(target_arch = "x86_64"))]
impl VsaKernel for Avx2Kernel {
    fn isa_level(&self) -> IsaLevel {
        IsaLevel::Generic
    }
    fn phase_add(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        super::generic::GenericKernel.phase_add(a, b, out);
    }
    fn phase_sub(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        super::generic::GenericKernel.phase_sub(a, b, out);
    }
    fn cos_sum(&self, a: &[f32], b: &[f32]) -> f64 {
        super::generic::GenericKernel.cos_sum(a, b)
    }
    fn accumulate_phasors(&self, re: &mut [f32], im: &mut [f32], phases: &[f32]) {
        super::generic::GenericKernel.accumulate_phasors(re, im, phases);
    }
    fn rotate(&self, data: &[f32], shift: usize, out: &mut [f32]) {
        super::generic::GenericKernel.rotate(data, shift, out);
    }
}
