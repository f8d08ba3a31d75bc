//! Filepath: src/hashing.rs
//!
//! Hash functions and batched candidate computation for the cuckoo table.
//!
//! Every `(index_len, prefix)` pair owns exactly two candidate slots,
//! derived from two independent hash functions `H1`/`H2` over the prefix
//! bytes. An 18-bit secondary fingerprint (taken from high `H1` bits that
//! do not feed the slot index) is stored in the node's packed `hash` word
//! so probes can reject mismatches without touching `min_key`.
//!
//! The longest-common-prefix query needs all six candidate pairs for
//! prefix lengths 3..=8 at once so their cache lines can be prefetched
//! together. [`compute_candidates`] produces that batch; the scalar
//! routine is the reference, and an AVX2 path (runtime-detected, same
//! output bit for bit) covers four of the six lanes with SIMD 64-bit
//! multiplies synthesised from 32-bit ones.

use crate::key;
use crate::node;

/// Seeds separating the two hash functions. Arbitrary odd constants.
const SEED_H1: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_H2: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Multipliers of the 64-bit finaliser (Murmur3 fmix64).
const MIX_MUL_1: u64 = 0xFF51_AFD7_ED55_8CCD;
const MIX_MUL_2: u64 = 0xC4CE_B9FE_1A85_EC53;

/// Murmur3 64-bit finaliser. Full-avalanche, invertible.
#[inline]
#[must_use]
const fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(MIX_MUL_1);
    x ^= x >> 33;
    x = x.wrapping_mul(MIX_MUL_2);
    x ^= x >> 33;
    x
}

/// Hash input for a `(index_len, prefix)` pair.
///
/// The prefix arrives with its low bytes already zeroed, so folding the
/// length in keeps `(3, 0x0102_03..)` and `(4, 0x0102_0300..)` apart.
#[inline]
#[must_use]
const fn hash_input(index_len: usize, prefix: u64) -> u64 {
    prefix ^ index_len as u64
}

/// The two candidate hashes for a `(index_len, prefix)` pair.
#[inline]
#[must_use]
pub fn hash_pair(index_len: usize, prefix: u64) -> (u64, u64) {
    let z: u64 = hash_input(index_len, prefix);
    (mix64(z ^ SEED_H1), mix64(z ^ SEED_H2))
}

/// 18-bit stored fingerprint, taken from `H1` bits above the slot index.
#[inline]
#[must_use]
pub const fn fingerprint18(h1: u64) -> u32 {
    ((h1 >> 40) as u32) & node::FP_MASK
}

/// Candidate slots and comparator words for prefix lengths 3..=8.
///
/// Index `i` corresponds to length `i + 3`. `expected[i]` is the packed
/// word an occupied node must match under [`node::CMP_MASK`]: occupancy,
/// index length and fingerprint in one 32-bit compare.
#[derive(Clone, Copy, Debug)]
pub struct Candidates {
    pub pos1: [u32; 6],
    pub pos2: [u32; 6],
    pub expected: [u32; 6],
}

/// Number of probed prefix lengths (3..=8).
pub const CANDIDATE_LENS: usize = 6;

/// Compute the full candidate batch for `key`.
///
/// `mask` is the table capacity minus one (capacity is a power of two).
#[inline]
#[must_use]
pub fn compute_candidates(key: u64, mask: u32) -> Candidates {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support was just verified at runtime.
            return unsafe { avx2::compute_candidates_avx2(key, mask) };
        }
    }
    compute_candidates_scalar(key, mask)
}

/// Scalar reference implementation of the candidate batch.
#[inline]
#[must_use]
pub fn compute_candidates_scalar(key: u64, mask: u32) -> Candidates {
    let mut out = Candidates {
        pos1: [0; 6],
        pos2: [0; 6],
        expected: [0; 6],
    };
    for (i, len) in (3..=key::KEY_BYTES).enumerate() {
        let (h1, h2) = hash_pair(len, key::prefix(key, len));
        out.pos1[i] = (h1 as u32) & mask;
        out.pos2[i] = (h2 as u32) & mask;
        out.expected[i] = node::expected_cmp_word(len, fingerprint18(h1));
    }
    out
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    //! AVX2 lane-parallel finaliser.
    //!
    //! AVX2 has no 64-bit multiply, so `lo64(a * b)` is assembled from
    //! `_mm256_mul_epu32` partial products:
    //! `lo(a)*lo(b) + ((lo(a)*hi(b) + hi(a)*lo(b)) << 32)`.
    //! Lengths 3..=6 run as one 4-lane batch; 7 and 8 stay scalar.

    use super::{
        fingerprint18, hash_input, hash_pair, Candidates, MIX_MUL_1, MIX_MUL_2, SEED_H1, SEED_H2,
    };
    use crate::{key, node};
    use std::arch::x86_64::{
        __m256i, _mm256_add_epi64, _mm256_mul_epu32, _mm256_set1_epi64x, _mm256_setr_epi64x,
        _mm256_slli_epi64, _mm256_srli_epi64, _mm256_storeu_si256, _mm256_xor_si256,
    };

    /// Low 64 bits of a lane-wise 64x64 multiply.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn mul64_lo(a: __m256i, b: __m256i) -> __m256i {
        let a_hi: __m256i = _mm256_srli_epi64(a, 32);
        let b_hi: __m256i = _mm256_srli_epi64(b, 32);
        let lo_lo: __m256i = _mm256_mul_epu32(a, b);
        let cross: __m256i =
            _mm256_add_epi64(_mm256_mul_epu32(a, b_hi), _mm256_mul_epu32(a_hi, b));
        _mm256_add_epi64(lo_lo, _mm256_slli_epi64(cross, 32))
    }

    /// Four lanes of the Murmur3 finaliser.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn mix64x4(mut x: __m256i) -> __m256i {
        x = _mm256_xor_si256(x, _mm256_srli_epi64(x, 33));
        x = mul64_lo(x, _mm256_set1_epi64x(MIX_MUL_1 as i64));
        x = _mm256_xor_si256(x, _mm256_srli_epi64(x, 33));
        x = mul64_lo(x, _mm256_set1_epi64x(MIX_MUL_2 as i64));
        _mm256_xor_si256(x, _mm256_srli_epi64(x, 33))
    }

    /// # Safety
    /// Caller must have verified AVX2 support.
    #[target_feature(enable = "avx2")]
    pub unsafe fn compute_candidates_avx2(k: u64, mask: u32) -> Candidates {
        let z: [u64; 4] = [
            hash_input(3, key::prefix(k, 3)),
            hash_input(4, key::prefix(k, 4)),
            hash_input(5, key::prefix(k, 5)),
            hash_input(6, key::prefix(k, 6)),
        ];
        let zv: __m256i =
            _mm256_setr_epi64x(z[0] as i64, z[1] as i64, z[2] as i64, z[3] as i64);
        let h1v: __m256i = mix64x4(_mm256_xor_si256(zv, _mm256_set1_epi64x(SEED_H1 as i64)));
        let h2v: __m256i = mix64x4(_mm256_xor_si256(zv, _mm256_set1_epi64x(SEED_H2 as i64)));

        let mut h1: [u64; 4] = [0; 4];
        let mut h2: [u64; 4] = [0; 4];
        _mm256_storeu_si256(h1.as_mut_ptr().cast(), h1v);
        _mm256_storeu_si256(h2.as_mut_ptr().cast(), h2v);

        let mut out = Candidates {
            pos1: [0; 6],
            pos2: [0; 6],
            expected: [0; 6],
        };
        for i in 0..4 {
            out.pos1[i] = (h1[i] as u32) & mask;
            out.pos2[i] = (h2[i] as u32) & mask;
            out.expected[i] = node::expected_cmp_word(i + 3, fingerprint18(h1[i]));
        }
        for (i, len) in [(4usize, 7usize), (5, 8)] {
            let (a, b) = hash_pair(len, key::prefix(k, len));
            out.pos1[i] = (a as u32) & mask;
            out.pos2[i] = (b as u32) & mask;
            out.expected[i] = node::expected_cmp_word(len, fingerprint18(a));
        }
        out
    }
}
