//! Seed-, token- and structure-to-vector encoding.
//!
//! Maps names and structures into hypervector space using deterministic seeded
//! random generation, ensuring the same input always maps to the same vector.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::HyperVec;
use super::ops::{VsaOps, VsaResult};

/// High bit marks token-derived seeds so they never collide with small
/// caller-chosen numeric seeds.
const TOKEN_SEED_BIT: u64 = 1 << 63;

/// Encode a numeric seed into a hypervector.
///
/// The same seed always produces the same `HyperVec` for a given dimension.
pub fn encode_seed(ops: &VsaOps, seed: u64) -> HyperVec {
    ops.random_from_seed(seed)
}

/// Derive the seed used for a text token.
pub fn token_seed(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish() | TOKEN_SEED_BIT
}

/// Encode a single token into a hypervector.
///
/// Hashes the token into a seed and encodes it deterministically.
pub fn encode_token(ops: &VsaOps, token: &str) -> HyperVec {
    encode_seed(ops, token_seed(token))
}

/// Encode a multi-word label into a hypervector.
///
/// Splits the label on whitespace, encodes each word via [`encode_token`],
/// and bundles them. Single-word labels fall through to `encode_token`.
///
/// Returns an error if the label is empty (no words to encode).
pub fn encode_label(ops: &VsaOps, label: &str) -> VsaResult<HyperVec> {
    let words: Vec<&str> = label.split_whitespace().collect();

    if words.is_empty() {
        return Err(crate::error::VsaError::EmptyBundle);
    }

    if words.len() == 1 {
        return Ok(encode_token(ops, words[0]));
    }

    let vecs: Vec<HyperVec> = words.iter().map(|w| encode_token(ops, w)).collect();
    let refs: Vec<&HyperVec> = vecs.iter().collect();
    ops.bundle(&refs)
}

/// Encode a role-filler pair: `bind(role, filler)`.
///
/// "color" ⊗ "red" reads as "the color is red".
pub fn encode_role_filler(ops: &VsaOps, role: &HyperVec, filler: &HyperVec) -> VsaResult<HyperVec> {
    ops.bind(role, filler)
}

/// Encode a record as the bundle of its role-filler bindings.
///
/// Unbinding any role from the result yields a noisy copy of its filler.
pub fn encode_record(ops: &VsaOps, pairs: &[(&HyperVec, &HyperVec)]) -> VsaResult<HyperVec> {
    let bound: Vec<HyperVec> = pairs
        .iter()
        .map(|(role, filler)| encode_role_filler(ops, role, filler))
        .collect::<VsaResult<_>>()?;
    let refs: Vec<&HyperVec> = bound.iter().collect();
    ops.bundle(&refs)
}

/// Encode a sequence as a permutation-tagged bundle.
///
/// `encode_sequence([A, B, C])` produces `bundle(permute(A, 2), permute(B, 1), C)`:
/// each element is rotated by its distance from the end of the sequence.
pub fn encode_sequence(ops: &VsaOps, items: &[&HyperVec]) -> VsaResult<HyperVec> {
    let n = items.len();
    let vecs: Vec<HyperVec> = items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let shift = n - 1 - i;
            if shift > 0 {
                ops.permute(v, shift)
            } else {
                (*v).clone()
            }
        })
        .collect();

    let refs: Vec<&HyperVec> = vecs.iter().collect();
    ops.bundle(&refs)
}
