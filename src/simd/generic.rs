//! Pure-Rust scalar fallback for FHRR kernel operations.
//!
//! This implementation works on all platforms and serves as the reference
//! implementation for correctness testing.

use super::{IsaLevel, VsaKernel, wrap_phase};

/// Pure-Rust scalar FHRR kernel without SIMD intrinsics.
#[derive(Debug, Clone, Copy)]
pub struct GenericKernel;

impl VsaKernel for GenericKernel {
    fn isa_level(&self) -> IsaLevel {
        IsaLevel::Generic
    }

    fn phase_add(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len(), out.len());
        for ((o, &av), &bv) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
            *o = wrap_phase(av + bv);
        }
    }

    fn phase_sub(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len(), out.len());
        for ((o, &av), &bv) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
            *o = wrap_phase(av - bv);
        }
    }

    fn cos_sum(&self, a: &[f32], b: &[f32]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b.iter())
            .map(|(&av, &bv)| ((av - bv) as f64).cos())
            .sum()
    }

    fn accumulate_phasors(&self, re: &mut [f32], im: &mut [f32], phases: &[f32]) {
        debug_assert_eq!(re.len(), phases.len());
        debug_assert_eq!(im.len(), phases.len());
        for ((r, i), &p) in re.iter_mut().zip(im.iter_mut()).zip(phases.iter()) {
            let (s, c) = p.sin_cos();
            *r += c;
            *i += s;
        }
    }

    fn rotate(&self, data: &[f32], shift: usize, out: &mut [f32]) {
        debug_assert_eq!(data.len(), out.len());
        let n = data.len();
        if n == 0 {
            return;
        }
        let shift = shift % n;
        // out[shift..] = data[..n - shift], out[..shift] = data[n - shift..]
        out[shift..].copy_from_slice(&data[..n - shift]);
        out[..shift].copy_from_slice(&data[n - shift..]);
    }
}
