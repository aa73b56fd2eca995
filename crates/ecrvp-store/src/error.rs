//! Error types for artifact storage

use ecrvp_artifact::{HashError, RunId, SessionId};

/// Artifact store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A second write to an already-written (session, run) key
    #[error("immutability violation: artifact for run {run_id} in session {session_id} already exists")]
    ImmutabilityViolation { session_id: SessionId, run_id: RunId },

    /// Recomputed fingerprint disagrees with the stored value
    #[error("integrity mismatch in session {session_id}{}: {check}", run_suffix(*.run_id))]
    IntegrityMismatch {
        session_id: SessionId,
        run_id: Option<RunId>,
        check: String,
    },

    /// No artifact stored under this key
    #[error("artifact not found for run {run_id} in session {session_id}")]
    NotFound { session_id: SessionId, run_id: RunId },

    /// Stored files are incomplete or unreadable as an artifact
    #[error("malformed artifact for run {run_id}: {reason}")]
    Malformed { run_id: RunId, reason: String },

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fingerprint computation failure
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
}

fn run_suffix(run_id: Option<RunId>) -> String {
    run_id.map(|id| format!(" (run {id})")).unwrap_or_default()
}

impl StoreError {
    /// Whether this error reports tampering or corruption
    #[inline]
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::IntegrityMismatch { .. })
    }
}
