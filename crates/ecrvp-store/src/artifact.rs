//! Artifact records and the per-session hash chain
//!
//! Each artifact carries three fingerprints:
//!
//! - `payload_fingerprint`: SHA-256 of the raw captured bytes
//! - `metadata_fingerprint`: binds the (session, run) key to the metadata
//! - `chain_fingerprint`: H(payload, metadata, previous chain or seed)
//!
//! Substituting, reordering or editing any artifact breaks every chain
//! fingerprint from that point on.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use ecrvp_artifact::{ContentHash, FingerprintBuilder, HashError, RunId, SessionId};
use ecrvp_corpus::CorpusManifest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const METADATA_DOMAIN: &str = "ecrvp.artifact.metadata.v1";
const CHAIN_DOMAIN: &str = "ecrvp.artifact.chain.v1";

/// Previous-chain value of the first artifact in a session
#[inline]
#[must_use]
pub fn chain_seed() -> ContentHash {
    ContentHash::default()
}

/// How the run behind an artifact ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOutcome {
    /// Payload is the interpreter's response text
    Captured,
    /// Payload is the raw error text
    Errored,
}

/// Structured metadata stored with every payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub provider: String,
    pub model: String,
    pub display_name: String,
    pub outcome: ArtifactOutcome,
    /// Stable error tag (`transport_error`, ...) for errored runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Exact text transmitted, in transmission order
    pub prompt: String,
    /// Segment manifest transmitted; `None` if the run never transmitted
    pub corpus_manifest: Option<CorpusManifest>,
}

impl ArtifactMetadata {
    /// Fingerprint binding this metadata to its (session, run) key
    ///
    /// # Errors
    /// Propagates serialization failure
    pub fn fingerprint(&self, session_id: SessionId, run_id: RunId) -> Result<ContentHash, HashError> {
        let body = ContentHash::compute_serializable(self)?;
        Ok(FingerprintBuilder::new(METADATA_DOMAIN)
            .text(&session_id.to_string())
            .text(&run_id.to_string())
            .hash(&body)
            .finish())
    }
}

/// Chain fingerprint over payload, metadata and predecessor
#[must_use]
pub fn chain_fingerprint(
    payload: &ContentHash,
    metadata: &ContentHash,
    previous: &ContentHash,
) -> ContentHash {
    FingerprintBuilder::new(CHAIN_DOMAIN)
        .hash(payload)
        .hash(metadata)
        .hash(previous)
        .finish()
}

/// Fingerprint part of an artifact (`artifact.json`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub session_id: SessionId,
    pub run_id: RunId,
    /// Position in the session chain, from 0
    pub sequence: u64,
    pub payload_fingerprint: ContentHash,
    pub metadata_fingerprint: ContentHash,
    pub previous_chain: ContentHash,
    pub chain_fingerprint: ContentHash,
}

/// Write-once record of one run's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    record: ArtifactRecord,
    metadata: ArtifactMetadata,
    payload: Arc<[u8]>,
}

impl Artifact {
    /// Seal a new artifact onto a chain head
    pub(crate) fn seal(
        session_id: SessionId,
        run_id: RunId,
        sequence: u64,
        previous_chain: ContentHash,
        payload: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<Self, StoreError> {
        let payload_fingerprint = ContentHash::compute(&payload);
        let metadata_fingerprint = metadata.fingerprint(session_id, run_id)?;
        let record = ArtifactRecord {
            session_id,
            run_id,
            sequence,
            payload_fingerprint,
            metadata_fingerprint,
            previous_chain,
            chain_fingerprint: chain_fingerprint(
                &payload_fingerprint,
                &metadata_fingerprint,
                &previous_chain,
            ),
        };
        Ok(Self {
            record,
            metadata,
            payload: Arc::from(payload),
        })
    }

    /// Reassemble a stored artifact without re-verifying it
    #[must_use]
    pub fn from_parts(record: ArtifactRecord, metadata: ArtifactMetadata, payload: Vec<u8>) -> Self {
        Self {
            record,
            metadata,
            payload: Arc::from(payload),
        }
    }

    #[inline]
    #[must_use]
    pub fn record(&self) -> &ArtifactRecord {
        &self.record
    }

    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text; invalid UTF-8 is replaced, never rejected
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.record.session_id
    }

    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.record.run_id
    }

    #[inline]
    #[must_use]
    pub fn chain_fingerprint(&self) -> ContentHash {
        self.record.chain_fingerprint
    }

    /// Recompute all three fingerprints from payload and metadata
    ///
    /// # Errors
    /// `IntegrityMismatch` naming the first fingerprint that disagrees
    pub fn verify(&self) -> Result<(), StoreError> {
        let record = &self.record;
        let mismatch = |check: &str| StoreError::IntegrityMismatch {
            session_id: record.session_id,
            run_id: Some(record.run_id),
            check: check.to_string(),
        };

        if ContentHash::compute(&self.payload) != record.payload_fingerprint {
            return Err(mismatch("payload fingerprint differs"));
        }
        if self.metadata.fingerprint(record.session_id, record.run_id)? != record.metadata_fingerprint {
            return Err(mismatch("metadata fingerprint differs"));
        }
        let chain = chain_fingerprint(
            &record.payload_fingerprint,
            &record.metadata_fingerprint,
            &record.previous_chain,
        );
        if chain != record.chain_fingerprint {
            return Err(mismatch("chain fingerprint differs"));
        }
        Ok(())
    }
}

/// Verify a session's artifacts as one chain, in sequence order
///
/// # Errors
/// `IntegrityMismatch` at the first artifact that does not verify or does
/// not link to its predecessor.
pub fn verify_chain(session_id: SessionId, artifacts: &[Artifact]) -> Result<(), StoreError> {
    let mut previous = chain_seed();
    for (position, artifact) in artifacts.iter().enumerate() {
        let record = artifact.record();
        let mismatch = |check: String| StoreError::IntegrityMismatch {
            session_id,
            run_id: Some(record.run_id),
            check,
        };
        if record.session_id != session_id {
            return Err(mismatch(format!(
                "artifact belongs to session {}",
                record.session_id
            )));
        }
        if record.sequence != position as u64 {
            return Err(mismatch(format!(
                "sequence {} found at chain position {position}",
                record.sequence
            )));
        }
        if record.previous_chain != previous {
            return Err(mismatch(format!(
                "previous chain fingerprint at position {position} does not link"
            )));
        }
        artifact.verify()?;
        previous = record.chain_fingerprint;
    }
    Ok(())
}
