//! Error types for corpus sealing and storage

use ecrvp_artifact::PassportId;

/// Corpus errors
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// Malformed input, rejected before anything is sealed
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Attempt to overwrite an already sealed passport
    #[error("immutability violation: passport {passport_id} is already sealed")]
    ImmutabilityViolation { passport_id: PassportId },

    /// Stored content no longer matches its passport
    #[error("integrity mismatch for passport {passport_id}: {check}")]
    IntegrityMismatch { passport_id: PassportId, check: String },

    /// Passport not present in the vault
    #[error("passport not found: {0}")]
    NotFound(PassportId),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Passport record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CorpusError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}
