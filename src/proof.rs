//! Structured proof objects: resolution, prior-state retrieval, and
//! canonical JSON (de)serialisation.

use serde::{Deserialize, Serialize};

use crate::error::MerkleError;
use crate::hash::{Digest, HashAlgorithm, Hasher};

/// A self-contained inclusion or consistency proof.
///
/// Carries its own `algorithm`/`security`, so [`Self::resolve`] and
/// [`Self::retrieve_prior_state`] need no external hasher — mirroring how
/// the reference implementation's proof object builds its own hasher from
/// its own metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    algorithm: HashAlgorithm,
    security: bool,
    size: usize,
    rule: Vec<u8>,
    subset: Vec<u8>,
    path: Vec<Digest>,
}

impl MerkleProof {
    /// Builds a proof, checking the shape invariants from the data model:
    /// `rule`, `subset`, and `path` have equal length, and every digest in
    /// `path` has the width implied by `algorithm`.
    pub fn new(
        algorithm: HashAlgorithm,
        security: bool,
        size: usize,
        rule: Vec<u8>,
        subset: Vec<u8>,
        path: Vec<Digest>,
    ) -> Result<Self, MerkleError> {
        if rule.len() != path.len() || subset.len() != path.len() {
            return Err(MerkleError::MalformedProof(format!(
                "rule ({}), subset ({}), and path ({}) must have equal length",
                rule.len(),
                subset.len(),
                path.len()
            )));
        }
        let width = algorithm.width();
        if path.iter().any(|digest| digest.len() != width) {
            return Err(MerkleError::MalformedProof(format!(
                "every path digest must be {width} bytes for {algorithm}"
            )));
        }
        if rule.iter().chain(subset.iter()).any(|bit| *bit > 1) {
            return Err(MerkleError::MalformedProof(
                "rule and subset bits must be 0 or 1".to_string(),
            ));
        }
        Ok(MerkleProof {
            algorithm,
            security,
            size,
            rule,
            subset,
            path,
        })
    }

    /// The hash algorithm this proof was anchored with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Whether domain separation was enabled when this proof was built.
    pub fn security(&self) -> bool {
        self.security
    }

    /// The tree size this proof is anchored to.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The rule bits.
    pub fn rule(&self) -> &[u8] {
        &self.rule
    }

    /// The subset bits.
    pub fn subset(&self) -> &[u8] {
        &self.subset
    }

    /// The path digests.
    pub fn path(&self) -> &[Digest] {
        &self.path
    }

    fn hasher(&self) -> Hasher {
        Hasher::new(self.algorithm, self.security)
    }

    /// Folds `path` under `rule`, resolving to the claimed root (inclusion
    /// proofs) or later state (consistency proofs). Empty path resolves to
    /// `H(∅)`.
    pub fn resolve(&self) -> Result<Digest, MerkleError> {
        if self.path.is_empty() {
            return Ok(self.hasher().hash_empty());
        }
        let hasher = self.hasher();
        let mut bit = self.rule[0];
        let mut acc = self.path[0].clone();
        for (next_bit, digest) in self.rule[1..].iter().zip(self.path[1..].iter()) {
            acc = match bit {
                0 => hasher.hash_pair(&acc, digest),
                1 => hasher.hash_pair(digest, &acc),
                other => {
                    return Err(MerkleError::MalformedProof(format!(
                        "rule bit must be 0 or 1, got {other}"
                    )))
                }
            };
            bit = *next_bit;
        }
        Ok(acc)
    }

    /// Folds the subsequence of `path` where `subset[i] == 1`,
    /// right-associatively, resolving to the claimed prior state
    /// (consistency proofs only). Empty subsequence resolves to `H(∅)`.
    pub fn retrieve_prior_state(&self) -> Result<Digest, MerkleError> {
        let hasher = self.hasher();
        let subpath: Vec<&Digest> = self
            .path
            .iter()
            .zip(self.subset.iter())
            .filter(|(_, bit)| **bit == 1)
            .map(|(digest, _)| digest)
            .collect();

        let Some((&first, rest)) = subpath.split_first() else {
            return Ok(hasher.hash_empty());
        };
        let mut acc = first.clone();
        for digest in rest {
            acc = hasher.hash_pair(digest, &acc);
        }
        Ok(acc)
    }
}

/// The on-wire representation of a [`MerkleProof`]: `path` digests are
/// hex-encoded, everything else is a direct field copy. Digests are kept
/// as raw bytes everywhere except at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofWire {
    metadata: ProofMetadata,
    rule: Vec<u8>,
    subset: Vec<u8>,
    path: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProofMetadata {
    algorithm: String,
    security: bool,
    size: usize,
}

impl From<&MerkleProof> for ProofWire {
    fn from(proof: &MerkleProof) -> Self {
        ProofWire {
            metadata: ProofMetadata {
                algorithm: proof.algorithm.to_string(),
                security: proof.security,
                size: proof.size,
            },
            rule: proof.rule.clone(),
            subset: proof.subset.clone(),
            path: proof.path.iter().map(hex::encode).collect(),
        }
    }
}

impl TryFrom<ProofWire> for MerkleProof {
    type Error = MerkleError;

    fn try_from(wire: ProofWire) -> Result<Self, Self::Error> {
        let algorithm: HashAlgorithm = wire.metadata.algorithm.parse()?;
        let path = wire
            .path
            .iter()
            .map(|hex_digest| {
                hex::decode(hex_digest).map_err(|err| {
                    MerkleError::MalformedProof(format!("invalid hex in path: {err}"))
                })
            })
            .collect::<Result<Vec<Digest>, MerkleError>>()?;
        MerkleProof::new(
            algorithm,
            wire.metadata.security,
            wire.metadata.size,
            wire.rule,
            wire.subset,
            path,
        )
    }
}

impl MerkleProof {
    /// Serialises to the canonical JSON wire format (§6).
    pub fn to_json(&self) -> Result<String, MerkleError> {
        let wire = ProofWire::from(self);
        serde_json::to_string(&wire)
            .map_err(|err| MerkleError::MalformedProof(format!("failed to serialise proof: {err}")))
    }

    /// Parses the canonical JSON wire format (§6), rejecting structurally
    /// invalid input with `MalformedProof`.
    pub fn from_json(json: &str) -> Result<Self, MerkleError> {
        let wire: ProofWire = serde_json::from_str(json)
            .map_err(|err| MerkleError::MalformedProof(format!("invalid proof JSON: {err}")))?;
        MerkleProof::try_from(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Digest {
        vec![byte; 32]
    }

    #[test]
    fn resolve_of_empty_path_is_hash_empty() {
        let proof = MerkleProof::new(HashAlgorithm::Sha256, true, 0, vec![], vec![], vec![]).unwrap();
        assert_eq!(proof.resolve().unwrap(), Hasher::new(HashAlgorithm::Sha256, true).hash_empty());
    }

    #[test]
    fn rule_subset_path_length_mismatch_is_malformed() {
        let result = MerkleProof::new(
            HashAlgorithm::Sha256,
            true,
            1,
            vec![0, 0],
            vec![0],
            vec![leaf(1)],
        );
        assert!(matches!(result, Err(MerkleError::MalformedProof(_))));
    }

    #[test]
    fn wrong_digest_width_is_malformed() {
        let result = MerkleProof::new(
            HashAlgorithm::Sha256,
            true,
            1,
            vec![0],
            vec![0],
            vec![vec![1, 2, 3]],
        );
        assert!(matches!(result, Err(MerkleError::MalformedProof(_))));
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let proof = MerkleProof::new(
            HashAlgorithm::Sha256,
            true,
            5,
            vec![0, 1],
            vec![0, 1],
            vec![leaf(1), leaf(2)],
        )
        .unwrap();
        let json = proof.to_json().unwrap();
        let round_tripped = MerkleProof::from_json(&json).unwrap();
        assert_eq!(proof, round_tripped);
    }

    #[test]
    fn from_json_rejects_bad_hex() {
        let json = r#"{"metadata":{"algorithm":"sha256","security":true,"size":1},"rule":[0],"subset":[0],"path":["zz"]}"#;
        assert!(matches!(
            MerkleProof::from_json(json),
            Err(MerkleError::MalformedProof(_))
        ));
    }

    #[test]
    fn from_json_rejects_unknown_algorithm() {
        let json = r#"{"metadata":{"algorithm":"md5","security":true,"size":1},"rule":[],"subset":[],"path":[]}"#;
        assert!(MerkleProof::from_json(json).is_err());
    }
}
