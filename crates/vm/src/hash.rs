//! Hash values of the builtin hashable types.
//!
//! Numeric hashes reduce modulo the Mersenne prime `2**61 - 1`, so `hash(1) == hash(1.0) ==
//! hash(True)` and numerically equal keys land in the same dictionary slot.

use core::hash::{Hash, Hasher};
use malachite_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use std::collections::hash_map::DefaultHasher;

pub type PyHash = i64;
pub type PyUHash = u64;

/// Numeric hashes are based on reduction modulo the prime 2**_BITS - 1
pub const BITS: usize = 61;
pub const MODULUS: PyUHash = (1 << BITS) - 1;
pub const INF: PyHash = 314_159;
pub const NAN: PyHash = 0;
/// Prime multiplier used when combining the hashes of a tuple's items.
pub const MULTIPLIER: PyHash = 1_000_003;

/// `-1` is reserved as an error marker, so it never escapes as a hash value.
#[inline]
pub fn fix_sentinel(x: PyHash) -> PyHash {
    if x == -1 { -2 } else { x }
}

/// Mantissa in `[0.5, 1)` and exponent of a positive finite float.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 {
        return (0.0, 0);
    }
    let bits = value.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    if exponent == 0 {
        // subnormal: scale into the normal range first
        let (m, e) = frexp(value * f64::from_bits(0x4350_0000_0000_0000));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, exponent - 1022)
}

pub fn hash_float(value: f64) -> PyHash {
    if !value.is_finite() {
        return if value.is_infinite() {
            if value > 0.0 { INF } else { -INF }
        } else {
            NAN
        };
    }

    let (mut m, mut e) = frexp(value.abs());

    // process 28 bits at a time
    let mut x: PyUHash = 0;
    while m != 0.0 {
        x = ((x << 28) & MODULUS) | (x >> (BITS - 28));
        m *= 268_435_456.0; // 2**28
        e -= 28;
        let y = m as PyUHash;
        m -= y as f64;
        x += y;
        if x >= MODULUS {
            x -= MODULUS;
        }
    }

    const BITS32: i32 = BITS as i32;
    e = if e >= 0 {
        e % BITS32
    } else {
        BITS32 - 1 - ((-1 - e) % BITS32)
    };
    x = ((x << e) & MODULUS) | (x >> (BITS32 - e));

    let signed = x as PyHash;
    fix_sentinel(if value < 0.0 { -signed } else { signed })
}

pub fn hash_bigint(value: &BigInt) -> PyHash {
    let reduced = (value.abs() % BigInt::from(MODULUS))
        .to_i64()
        .unwrap_or_default();
    fix_sentinel(if value.is_negative() { -reduced } else { reduced })
}

pub fn hash_value<T: Hash + ?Sized>(data: &T) -> PyHash {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    fix_sentinel(hasher.finish() as PyHash)
}

/// Hash of a `str` object with this content.
#[inline]
pub fn hash_str(value: &str) -> PyHash {
    hash_value(value)
}

/// Combines already computed item hashes the way tuples do.
pub fn hash_iter(hashes: impl IntoIterator<Item = PyHash>) -> PyHash {
    let mut acc: PyHash = 0x345678;
    let mut mult = MULTIPLIER;
    let mut len: PyHash = 0;
    for h in hashes {
        acc = (acc ^ h).wrapping_mul(mult);
        mult = mult.wrapping_add(82520 + len + len);
        len += 1;
    }
    fix_sentinel(acc.wrapping_add(97531))
}

/// Order-independent combination for frozensets.
pub fn hash_unordered(hashes: impl IntoIterator<Item = PyHash>) -> PyHash {
    let mut acc: PyHash = 0;
    let mut len: PyHash = 0;
    for h in hashes {
        acc ^= h.wrapping_mul(0x5bd1_e995).rotate_left(13);
        len += 1;
    }
    fix_sentinel(acc.wrapping_add(len.wrapping_mul(0x27d4_eb2d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Num;

    #[test]
    fn equal_numbers_hash_equal() {
        assert_eq!(hash_float(1.0), hash_bigint(&BigInt::from(1)));
        assert_eq!(hash_float(-7.0), hash_bigint(&BigInt::from(-7)));
        assert_eq!(hash_float(1e20), hash_bigint(&BigInt::from_str_radix("100000000000000000000", 10).unwrap()));
        assert_eq!(hash_float(0.5), 1 << 60);
    }

    #[test]
    fn minus_one_is_never_a_hash() {
        assert_eq!(hash_bigint(&BigInt::from(-1)), -2);
        assert_eq!(hash_float(-1.0), -2);
    }

    #[test]
    fn unordered_hash_ignores_order() {
        assert_eq!(hash_unordered([1, 2, 3]), hash_unordered([3, 1, 2]));
        assert_ne!(hash_iter([1, 2]), hash_iter([2, 1]));
    }
}
