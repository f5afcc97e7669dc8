//! Domain-separated leaf/node hashing with a runtime-selected algorithm.
//!
//! Unlike a compile-time-generic hasher, [`HashAlgorithm`] is picked at
//! runtime so a store's on-disk metadata (algorithm, security flag) can
//! drive which digest implementation is used, rather than requiring it be
//! fixed in the binary's type signature.

use std::fmt;
use std::str::FromStr;

use digest::Digest as _;
use once_cell::sync::Lazy;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};

use crate::error::MerkleError;

/// A digest produced by a [`Hasher`]. Fixed width for a given
/// [`HashAlgorithm`]; carried as raw bytes everywhere except at the JSON
/// proof boundary, where it is hex-encoded (see [`crate::proof`]).
pub type Digest = Vec<u8>;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// One of the eight hash functions this crate supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-224, 28-byte digest.
    Sha224,
    /// SHA-256, 32-byte digest.
    Sha256,
    /// SHA-384, 48-byte digest.
    Sha384,
    /// SHA-512, 64-byte digest.
    Sha512,
    /// SHA3-224, 28-byte digest.
    Sha3_224,
    /// SHA3-256, 32-byte digest.
    Sha3_256,
    /// SHA3-384, 48-byte digest.
    Sha3_384,
    /// SHA3-512, 64-byte digest.
    Sha3_512,
}

impl HashAlgorithm {
    /// Digest width in bytes for this algorithm.
    pub fn width(&self) -> usize {
        match self {
            HashAlgorithm::Sha224 | HashAlgorithm::Sha3_224 => 28,
            HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha3_384 => 48,
            HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 => 64,
        }
    }

    fn digest_concat(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha224 => digest_with::<Sha224>(parts),
            HashAlgorithm::Sha256 => digest_with::<Sha256>(parts),
            HashAlgorithm::Sha384 => digest_with::<Sha384>(parts),
            HashAlgorithm::Sha512 => digest_with::<Sha512>(parts),
            HashAlgorithm::Sha3_224 => digest_with::<Sha3_224>(parts),
            HashAlgorithm::Sha3_256 => digest_with::<Sha3_256>(parts),
            HashAlgorithm::Sha3_384 => digest_with::<Sha3_384>(parts),
            HashAlgorithm::Sha3_512 => digest_with::<Sha3_512>(parts),
        }
    }
}

fn digest_with<D: digest::Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha3_224 => "sha3_224",
            HashAlgorithm::Sha3_256 => "sha3_256",
            HashAlgorithm::Sha3_384 => "sha3_384",
            HashAlgorithm::Sha3_512 => "sha3_512",
        };
        write!(f, "{name}")
    }
}

impl FromStr for HashAlgorithm {
    type Err = MerkleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha224" => Ok(HashAlgorithm::Sha224),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha3_224" => Ok(HashAlgorithm::Sha3_224),
            "sha3_256" => Ok(HashAlgorithm::Sha3_256),
            "sha3_384" => Ok(HashAlgorithm::Sha3_384),
            "sha3_512" => Ok(HashAlgorithm::Sha3_512),
            other => Err(MerkleError::Configuration(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

/// Computes the empty-tree digest for each algorithm exactly once.
static EMPTY_DIGESTS: Lazy<[Digest; 8]> = Lazy::new(|| {
    [
        HashAlgorithm::Sha224.digest_concat(&[]),
        HashAlgorithm::Sha256.digest_concat(&[]),
        HashAlgorithm::Sha384.digest_concat(&[]),
        HashAlgorithm::Sha512.digest_concat(&[]),
        HashAlgorithm::Sha3_224.digest_concat(&[]),
        HashAlgorithm::Sha3_256.digest_concat(&[]),
        HashAlgorithm::Sha3_384.digest_concat(&[]),
        HashAlgorithm::Sha3_512.digest_concat(&[]),
    ]
});

fn empty_digest(algorithm: HashAlgorithm) -> Digest {
    let index = match algorithm {
        HashAlgorithm::Sha224 => 0,
        HashAlgorithm::Sha256 => 1,
        HashAlgorithm::Sha384 => 2,
        HashAlgorithm::Sha512 => 3,
        HashAlgorithm::Sha3_224 => 4,
        HashAlgorithm::Sha3_256 => 5,
        HashAlgorithm::Sha3_384 => 6,
        HashAlgorithm::Sha3_512 => 7,
    };
    EMPTY_DIGESTS[index].clone()
}

/// Domain-separated leaf/node hasher for a fixed algorithm and security
/// setting.
///
/// `hash_entry` and `hash_pair` prefix their input with `0x00`/`0x01`
/// respectively when `security` is enabled, which defeats the classic
/// second-preimage attack where a forged entry is the concatenation of two
/// leaf digests (see the crate-level tests for a worked example).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    security: bool,
}

impl Hasher {
    /// Builds a hasher for the given algorithm and security setting.
    pub fn new(algorithm: HashAlgorithm, security: bool) -> Self {
        Hasher {
            algorithm,
            security,
        }
    }

    /// The algorithm this hasher was built with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Whether domain separation is enabled.
    pub fn security(&self) -> bool {
        self.security
    }

    /// `H("")`, independent of the security setting (RFC 6962 defines the
    /// empty tree's state as the hash of the empty string, with no prefix).
    pub fn hash_empty(&self) -> Digest {
        empty_digest(self.algorithm)
    }

    /// Leaf digest: `H(0x00 || entry)` under security mode, `H(entry)`
    /// otherwise.
    pub fn hash_entry(&self, entry: &[u8]) -> Digest {
        if self.security {
            self.algorithm.digest_concat(&[&[LEAF_PREFIX], entry])
        } else {
            self.algorithm.digest_concat(&[entry])
        }
    }

    /// Internal-node digest: `H(0x01 || left || right)` under security
    /// mode, `H(left || right)` otherwise.
    pub fn hash_pair(&self, left: &[u8], right: &[u8]) -> Digest {
        if self.security {
            self.algorithm
                .digest_concat(&[&[NODE_PREFIX], left, right])
        } else {
            self.algorithm.digest_concat(&[left, right])
        }
    }
}
