use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::ID_LENGTH;

/// A `B`-bit node/key identifier (`B = ID_LENGTH * 8` bits, 160 by default).
///
/// Equality and ordering are lexicographic on the big-endian byte
/// representation, as required by the routing table's sorted-by-distance
/// operations.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Identifier(pub [u8; ID_LENGTH]);

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let hex: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}", hex.join(""))
    }
}

impl Identifier {
    pub fn new(data: [u8; ID_LENGTH]) -> Self {
        Identifier(data)
    }

    /// Derives an identifier from an arbitrary seed by hashing it with
    /// SHA3-256 and truncating the digest to `ID_LENGTH` bytes.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(seed);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_LENGTH];
        bytes.copy_from_slice(&digest[..ID_LENGTH]);
        Identifier(bytes)
    }

    /// Generates a uniformly random identifier.
    pub fn rand() -> Self {
        let mut ret = Identifier([0; ID_LENGTH]);
        for byte in &mut ret.0 {
            *byte = rand::random::<u8>();
        }
        ret
    }

    /// Generates a random identifier within the range a bucket at
    /// `bucket_index` is responsible for, i.e. with exactly `bucket_index`
    /// leading zero bits relative to an all-zero prefix:
    /// `[2^(B - index - 1), 2^(B - index))`.
    pub fn rand_in_bucket_range(bucket_index: usize) -> Self {
        let mut ret = Identifier::rand();
        let bytes = bucket_index / 8;
        let bit = bucket_index % 8;
        for byte in ret.0.iter_mut().take(bytes) {
            *byte = 0;
        }
        ret.0[bytes] &= 0xFF >> bit;
        ret.0[bytes] |= 1 << (8 - bit - 1);
        ret
    }

    /// Bitwise XOR distance between `self` and `other`.
    pub fn distance(&self, other: &Identifier) -> Identifier {
        let mut ret = [0; ID_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Identifier(ret)
    }

    /// Number of leading zero bits in the big-endian representation.
    ///
    /// For an identifier used as an XOR distance, this is the bucket
    /// index: `B - 1 - floor(log2(distance))`.
    pub fn leading_zeros(&self) -> usize {
        let mut ret = 0;
        for byte in &self.0 {
            if *byte == 0 {
                ret += 8;
            } else {
                return ret + byte.leading_zeros() as usize;
            }
        }
        ret
    }

    /// The bucket index of `other` relative to `self`, or `None` when the
    /// two identifiers are equal (self has no bucket).
    pub fn bucket_index(&self, other: &Identifier) -> Option<usize> {
        let distance = self.distance(other);
        if distance == Identifier::new([0; ID_LENGTH]) {
            None
        } else {
            Some(distance.leading_zeros())
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate num_bigint;
    use self::num_bigint::BigUint;

    use super::Identifier;
    use crate::ID_LENGTH;

    #[test]
    fn rand_in_bucket_range_has_expected_leading_zeros() {
        for i in 0..ID_LENGTH * 8 {
            let id = BigUint::from_bytes_be(&Identifier::rand_in_bucket_range(i).0);
            let mut lower = vec![0u8; ID_LENGTH];
            lower[i / 8] = 1 << ((ID_LENGTH * 8 - i - 1) % 8);
            let lower = BigUint::from_bytes_be(&lower);
            assert!(lower <= id);
            assert!(id < lower << 1);
        }
    }

    #[test]
    fn leading_zeros_matches_construction() {
        for i in 0..ID_LENGTH * 8 {
            assert_eq!(Identifier::rand_in_bucket_range(i).leading_zeros(), i);
        }
    }

    #[test]
    fn distance_is_symmetric_and_self_distance_is_zero() {
        let a = Identifier::rand();
        let b = Identifier::rand();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), Identifier::new([0; ID_LENGTH]));
    }

    #[test]
    fn distance_xor_triangle_identity() {
        // XOR metric identity: distance(a,c) == distance(a,b) XOR distance(b,c).
        let a = Identifier::rand();
        let b = Identifier::rand();
        let c = Identifier::rand();
        let ac = a.distance(&c);
        let ab_then_bc = a.distance(&b).distance(&b.distance(&c));
        assert_eq!(ac, ab_then_bc);
    }

    #[test]
    fn bucket_index_none_for_self() {
        let a = Identifier::rand();
        assert_eq!(a.bucket_index(&a), None);
    }
}
