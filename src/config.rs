//! Options recognised at [`crate::engine::MerkleEngine`] construction.

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_THRESHOLD};
use crate::error::MerkleError;
use crate::hash::HashAlgorithm;

/// Engine construction options. Validated once, in
/// [`MerkleEngine::new`](crate::engine::MerkleEngine::new).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) algorithm: HashAlgorithm,
    pub(crate) disable_security: bool,
    pub(crate) threshold: usize,
    pub(crate) capacity: usize,
    pub(crate) disable_optimizations: bool,
}

impl EngineConfig {
    /// Starts a config with the given algorithm and every other option at
    /// its default.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        EngineConfig {
            algorithm,
            disable_security: false,
            threshold: DEFAULT_THRESHOLD,
            capacity: DEFAULT_CAPACITY,
            disable_optimizations: false,
        }
    }

    /// Omits the `0x00`/`0x01` domain-separation prefixes when set.
    pub fn with_disable_security(mut self, disable_security: bool) -> Self {
        self.disable_security = disable_security;
        self
    }

    /// Minimum range width (in leaves) admitted to the subroot cache.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Subroot cache soft byte budget.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Bypasses the subroot cache entirely when set.
    pub fn with_disable_optimizations(mut self, disable_optimizations: bool) -> Self {
        self.disable_optimizations = disable_optimizations;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), MerkleError> {
        if self.capacity == 0 {
            return Err(MerkleError::Configuration(
                "capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(HashAlgorithm::Sha256)
    }
}
