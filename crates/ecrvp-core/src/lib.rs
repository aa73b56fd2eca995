//! ECR-VP Core - Session Orchestrator
//!
//! Runs a sealed corpus past several independent interpreters and keeps
//! tamper-evident evidence of what each one was shown and what it said:
//! - Validates session requests against the passport and the gateway catalog
//! - Drives one isolated run per interpreter, in parallel or sequentially
//! - Writes exactly one chained artifact per run
//! - Exports finished sessions as self-verifying bundles
//!
//! # Example
//!
//! ```rust,ignore
//! use ecrvp_core::prelude::*;
//!
//! # async fn example(corpus: SealedCorpus, interpreters: Vec<InterpreterConfig>) -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::new(), Gateway::empty())?;
//! let passport_id = orchestrator.register_corpus(corpus).await?;
//!
//! let session = orchestrator
//!     .create_session(SessionRequest::new(passport_id, SessionType::StrictVerifier, interpreters))
//!     .await?;
//! let finished = orchestrator.execute(session.session_id, ExecuteOptions::new()).await?;
//!
//! let bundle = orchestrator.export(finished.session_id).await?;
//! assert!(verify_bundle(&bundle).valid);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod export;
pub mod license;
pub mod modes;
pub mod orchestrator;
pub mod prompts;
pub mod state_machine;
pub mod types;

// Re-exports for convenience
pub use config::OrchestratorConfig;
pub use error::{ExportError, OrchestratorError};
pub use export::{
    build_bundle, verify_bundle, BundleDivergence, BundleRun, BundleVerification, ExportBundle,
    MerkleProof, BUNDLE_FORMAT,
};
pub use license::{AllowAll, LicenseGate, LicenseStatus};
pub use modes::{markers_for, MarkerHit, ModeDetector, ModeReport};
pub use orchestrator::{ExecuteOptions, Orchestrator};
pub use state_machine::resolve_session;
pub use types::{
    ExecutionMode, RunError, RunRecord, RunState, SessionRecord, SessionRequest, SessionState,
    SessionType, StateChange,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running sessions
    pub use crate::{
        verify_bundle, ExecuteOptions, ExecutionMode, ExportBundle, Orchestrator,
        OrchestratorConfig, RunState, SessionRequest, SessionState, SessionType,
    };
    pub use ecrvp_corpus::SealedCorpus;
    pub use ecrvp_gateway::{Gateway, InterpreterConfig};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
