//! Error types for ECR-VP Core
//!
//! Session-level errors reject a request as a whole. Run-level provider
//! errors never appear here: they end the owning run and are recorded in
//! its artifact.

use crate::types::{SessionState, SessionType};
use ecrvp_artifact::{PassportId, RunId, SessionId};
use ecrvp_corpus::CorpusError;
use ecrvp_store::StoreError;

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed request, rejected before any run exists or any channel opens
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Referenced passport is neither registered nor in the vault
    #[error("passport not found: {0}")]
    UnknownPassport(PassportId),

    /// Referenced session does not exist
    #[error("session not found: {0}")]
    UnknownSession(SessionId),

    /// Referenced run is not part of the session
    #[error("run {run_id} not found in session {session_id}")]
    UnknownRun { session_id: SessionId, run_id: RunId },

    /// State change not permitted by the session state machine
    #[error("illegal session transition for {session_id}: {from} -> {to}")]
    IllegalTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    /// License collaborator refused execution
    #[error("license check failed: {reason}")]
    License { reason: String },

    /// Sealed content no longer matches its passport
    #[error("integrity mismatch for passport {passport_id}: {check}")]
    IntegrityMismatch { passport_id: PassportId, check: String },

    /// Corpus sealing or vault failure
    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),

    /// Artifact store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Session snapshot I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Session snapshot (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn source_not_ready(source: SessionId, state: SessionState, kind: SessionType) -> Self {
        Self::validation(format!(
            "source session {source} is {state}; {kind} needs a completed or awaiting_synthesis source"
        ))
    }

    /// Whether the caller can fix this by correcting the request
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::UnknownPassport(_) | Self::UnknownSession(_)
        )
    }
}

/// Export and bundle verification errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Session cannot be exported in its current state
    #[error("session {session_id} is {state}; only finished sessions can be exported")]
    NotFinished {
        session_id: SessionId,
        state: SessionState,
    },

    /// Recomputation disagrees with a stored or bundled value
    #[error("integrity mismatch in session {session_id}: {check}")]
    IntegrityMismatch { session_id: SessionId, check: String },

    /// Bundle is not a well-formed export document
    #[error("malformed bundle: {0}")]
    Malformed(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
