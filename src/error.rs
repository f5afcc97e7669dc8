//! Error taxonomy shared by every fallible operation in this crate.

use thiserror::Error;

/// Errors raised by [`crate::store::LeafStore`] implementations.
///
/// Kept distinct from [`MerkleError`] so the store trait does not need to
/// depend on the engine's error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A read was requested for an index outside `[1, size()]`, or a range
    /// with inverted or out-of-bounds bounds.
    #[error("leaf index out of range: {0}")]
    OutOfRange(String),

    /// The store's on-disk header did not match the algorithm/security the
    /// caller configured.
    #[error("store configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Propagated I/O failure from a file-backed store.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`crate::engine::MerkleEngine`], [`crate::proof`], and
/// [`crate::verify`].
#[derive(Error, Debug)]
pub enum MerkleError {
    /// Unknown hash algorithm name, `capacity == 0`, or a store opened with
    /// a mismatched configuration. Raised at construction, unrecoverable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Leaf index or range outside the bounds the store can honour.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A proof was requested for a size or prior state the tree cannot
    /// honour (`size > current`, `lsize > rsize`, `lsize < 1`).
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    /// A serialised proof failed a structural check (length mismatch,
    /// non-boolean bit, bad hex, wrong digest width, unknown algorithm).
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    /// A structurally well-formed proof did not resolve to the claimed
    /// base, root, prior state, or later state.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// Propagated I/O failure from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for MerkleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OutOfRange(msg) => MerkleError::OutOfRange(msg),
            StoreError::ConfigurationMismatch(msg) => MerkleError::Configuration(msg),
            StoreError::Io(err) => MerkleError::Io(err),
        }
    }
}
