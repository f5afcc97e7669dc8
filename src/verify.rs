//! Standalone verification of inclusion and consistency proofs.
//!
//! These functions take only a [`MerkleProof`] and the values a verifier
//! already trusts (a leaf digest and a root, or two roots) — they never
//! touch a [`crate::store::LeafStore`] or [`crate::engine::MerkleEngine`],
//! so a verifier never needs the full log to check a proof it was handed.

use crate::error::MerkleError;
use crate::hash::Digest;
use crate::proof::MerkleProof;

/// Checks that `proof` demonstrates `base` is included in `root`.
///
/// Fails with [`MerkleError::InvalidProof`] if the proof's first path
/// element does not equal `base`, or if [`MerkleProof::resolve`] does not
/// equal `root`.
pub fn verify_inclusion(base: &Digest, root: &Digest, proof: &MerkleProof) -> Result<(), MerkleError> {
    match proof.path().first() {
        Some(leaf) if leaf == base => {}
        Some(_) => {
            return Err(MerkleError::InvalidProof(
                "proof's leaf digest does not match the claimed base".to_string(),
            ))
        }
        None => {
            return Err(MerkleError::InvalidProof(
                "inclusion proof must carry at least the leaf digest".to_string(),
            ))
        }
    }

    let resolved = proof.resolve()?;
    if &resolved != root {
        return Err(MerkleError::InvalidProof(
            "proof did not resolve to the claimed root".to_string(),
        ));
    }
    Ok(())
}

/// Checks that `proof` demonstrates the tree at `state2` is an append-only
/// extension of the tree at `state1`.
///
/// Fails with [`MerkleError::InvalidProof`] if
/// [`MerkleProof::retrieve_prior_state`] does not equal `state1`, or if
/// [`MerkleProof::resolve`] does not equal `state2`.
pub fn verify_consistency(state1: &Digest, state2: &Digest, proof: &MerkleProof) -> Result<(), MerkleError> {
    let prior = proof.retrieve_prior_state()?;
    if &prior != state1 {
        return Err(MerkleError::InvalidProof(
            "proof did not resolve to the claimed prior state".to_string(),
        ));
    }

    let later = proof.resolve()?;
    if &later != state2 {
        return Err(MerkleError::InvalidProof(
            "proof did not resolve to the claimed later state".to_string(),
        ));
    }
    Ok(())
}
