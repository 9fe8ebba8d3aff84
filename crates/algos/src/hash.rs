//! Integer-universal hash family used by every randomized round in the
//! engine (connected components, tree contraction, reconstruction).
//!
//! Ported directly from the reference engine's `IntegerHash`: a
//! multiply-add-shift hash drawn fresh each round from a splittable uniform
//! generator. The reference uses PCG; the spec explicitly allows any
//! splittable uniform generator, so this workspace uses `nanorand::WyRand`,
//! matching the teacher's own choice of RNG crate (`wcc.rs` uses the same
//! generator for sampling).

use nanorand::{Rng, WyRand};

/// `h(i) = (a*(i+1) + b) >> (bits - n_bits)`, with `a` odd and `b`'s top bit
/// cleared, reseeded every round so each contraction round behaves as an
/// independent 2-universal hash.
#[derive(Clone, Copy, Debug)]
pub struct IntegerHash {
    a: u64,
    b: u64,
}

impl IntegerHash {
    /// Draw fresh `a`/`b` coefficients from `rng`.
    pub fn generate(rng: &mut WyRand) -> Self {
        let a = rng.generate::<u64>() | 1;
        let b = rng.generate::<u64>() & (u64::MAX >> 1);
        IntegerHash { a, b }
    }

    /// Hash `i` down to `n_bits` bits. `i` must not be `u64::MAX`.
    #[inline]
    pub fn hash(&self, i: u64, n_bits: u32) -> u64 {
        debug_assert_ne!(i, u64::MAX);
        self.a.wrapping_mul(i + 1).wrapping_add(self.b) >> (64 - n_bits)
    }

    /// Single-bit hash, used by the tree-contraction and reconstruction
    /// rounds to decide "merge away this round" / "stay".
    #[inline]
    pub fn bit(&self, i: u64) -> bool {
        self.hash(i, 1) != 0
    }
}

/// Per-thread splittable RNG stream, seeded once per pool construction and
/// reseeded deterministically per contraction round from a fixed seed so
/// runs are reproducible given the same seed (randomization is part of the
/// semantics, not of any particular outcome — see design notes).
pub fn seeded_rng(seed: u64) -> WyRand {
    WyRand::new_seed(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_given_coefficients() {
        let h = IntegerHash { a: 3, b: 5 };
        assert_eq!(h.hash(10, 8), h.hash(10, 8));
    }

    #[test]
    fn generate_produces_odd_a() {
        let mut rng = seeded_rng(42);
        for _ in 0..16 {
            let h = IntegerHash::generate(&mut rng);
            assert_eq!(h.a & 1, 1);
            assert_eq!(h.b >> 63, 0);
        }
    }
}
