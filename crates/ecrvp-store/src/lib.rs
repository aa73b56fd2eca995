//! ECR-VP Artifact Store
//!
//! Durable, append-only persistence of run outputs. Every artifact is
//! written exactly once under its (session, run) key and linked to its
//! predecessor in the session by a chain fingerprint.
//!
//! # Core Concepts
//!
//! - [`ArtifactStore`]: write-once store interface (no update, no delete)
//! - [`Artifact`]: payload, metadata and fingerprints of one run
//! - [`verify_chain`]: recompute a session's chain and find the first break
//! - [`MemoryArtifactStore`], [`FsArtifactStore`]: back ends
//!
//! Derived views (such as detected section markers) are stored next to an
//! artifact with [`ArtifactStore::write_view`]. They are not part of the
//! chain and may be recomputed at any time.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod error;
mod fs;
/// Per-run file names and (de)composition
pub mod layout;
mod memory;

pub use artifact::{
    chain_fingerprint, chain_seed, verify_chain, Artifact, ArtifactMetadata, ArtifactOutcome,
    ArtifactRecord,
};
pub use error::StoreError;
pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use ecrvp_artifact::{RunId, SessionId};

/// Write-once artifact storage
///
/// Implementations serialise writes per session so the chain has a single
/// head. Writes to different sessions never contend.
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Append the artifact for `run_id` to the session chain
    ///
    /// # Errors
    /// `ImmutabilityViolation` if this key already holds an artifact; the
    /// stored artifact is left unchanged.
    async fn write(
        &self,
        session_id: SessionId,
        run_id: RunId,
        payload: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, StoreError>;

    /// Read one artifact
    ///
    /// # Errors
    /// `NotFound` if nothing was written under this key
    async fn read(&self, session_id: SessionId, run_id: RunId) -> Result<Artifact, StoreError>;

    /// Every artifact of a session in chain order
    async fn list_session(&self, session_id: SessionId) -> Result<Vec<Artifact>, StoreError>;

    /// Store a derived, unchained view next to an artifact
    ///
    /// # Errors
    /// `NotFound` if the artifact does not exist
    async fn write_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Read a derived view, if one was stored
    async fn read_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
