//! Integrity/Export Engine
//!
//! An export bundle is one JSON document holding the passport, the session
//! record, every run's files (base64) and a Merkle proof over the runs'
//! chain fingerprints in run creation order. [`verify_bundle`] needs
//! nothing but the bundle itself.
//!
//! `response_modes.json` travels with its run but is a derived view: it is
//! outside the chain and the proof.
//!
//! The bundle is the single export archive of a session: plain JSON with
//! base64 file bodies rather than a tar or zip container.

use crate::error::ExportError;
use crate::orchestrator::Orchestrator;
use crate::state_machine::resolve_session;
use crate::types::{RunRecord, RunState, SessionRecord};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ecrvp_artifact::{ContentHash, InclusionPath, RunId, SessionId, SessionMerkleTree};
use ecrvp_corpus::{CorpusManifest, Passport};
use ecrvp_store::layout::{self, RunFiles, MODES_FILE};
use ecrvp_store::{chain_seed, verify_chain, Artifact, ArtifactOutcome, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Format tag of bundles produced by this version
pub const BUNDLE_FORMAT: &str = "ecrvp-export/1";

/// Merkle proof file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub merkle_root: ContentHash,
    /// Chain fingerprints in run creation order
    pub leaves: Vec<ContentHash>,
    pub paths: Vec<InclusionPath>,
}

/// Files of one run, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRun {
    pub run_id: RunId,
    pub files: BTreeMap<String, String>,
}

impl BundleRun {
    fn encode(run_id: RunId, files: &RunFiles) -> Self {
        Self {
            run_id,
            files: files
                .iter()
                .map(|(name, bytes)| (name.clone(), STANDARD.encode(bytes)))
                .collect(),
        }
    }

    /// Decoded file contents
    ///
    /// # Errors
    /// The name of the first file that is not valid base64
    pub fn decode(&self) -> Result<RunFiles, String> {
        self.files
            .iter()
            .map(|(name, data)| {
                STANDARD
                    .decode(data)
                    .map(|bytes| (name.clone(), bytes))
                    .map_err(|e| format!("{name} is not valid base64: {e}"))
            })
            .collect()
    }
}

/// Self-contained export of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub format: String,
    pub exported_at: DateTime<Utc>,
    pub passport: Passport,
    pub session: SessionRecord,
    /// Runs in creation order, aligned with the proof leaves
    pub runs: Vec<BundleRun>,
    pub merkle_proof: MerkleProof,
}

impl ExportBundle {
    /// # Errors
    /// Propagates serialization failure
    pub fn to_json(&self) -> Result<Vec<u8>, ExportError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// # Errors
    /// `Malformed` if the bytes are not a bundle document
    pub fn from_json(bytes: &[u8]) -> Result<Self, ExportError> {
        serde_json::from_slice(bytes).map_err(|e| ExportError::Malformed(e.to_string()))
    }
}

/// Assemble a bundle from a finished session and its stored artifacts
///
/// `views` holds the stored mode report per run, where there is one.
///
/// # Errors
/// - `NotFinished` unless the session is terminal
/// - `Store(IntegrityMismatch)` if the stored chain does not verify
/// - `IntegrityMismatch` if runs and artifacts do not correspond one to one
pub fn build_bundle(
    passport: Passport,
    session: SessionRecord,
    artifacts: &[Artifact],
    views: &BTreeMap<RunId, Vec<u8>>,
) -> Result<ExportBundle, ExportError> {
    let session_id = session.session_id;
    if !session.state.is_terminal() {
        return Err(ExportError::NotFinished {
            session_id,
            state: session.state,
        });
    }
    verify_chain(session_id, artifacts)?;

    if artifacts.len() != session.runs.len() {
        return Err(ExportError::IntegrityMismatch {
            session_id,
            check: format!(
                "{} artifacts stored for {} runs",
                artifacts.len(),
                session.runs.len()
            ),
        });
    }

    let mut leaves = Vec::with_capacity(session.runs.len());
    let mut runs = Vec::with_capacity(session.runs.len());
    for run in &session.runs {
        let artifact = artifacts
            .iter()
            .find(|a| a.run_id() == run.run_id)
            .ok_or_else(|| ExportError::IntegrityMismatch {
                session_id,
                check: format!("run {} has no artifact", run.run_id),
            })?;
        let mut files = layout::to_files(artifact)?;
        if let Some(view) = views.get(&run.run_id) {
            files.insert(MODES_FILE.to_string(), view.clone());
        }
        leaves.push(artifact.chain_fingerprint());
        runs.push(BundleRun::encode(run.run_id, &files));
    }

    let tree = SessionMerkleTree::from_leaves(&leaves);
    tracing::info!(
        session_id = %session_id,
        runs = runs.len(),
        merkle_root = %tree.root(),
        "session exported"
    );
    Ok(ExportBundle {
        format: BUNDLE_FORMAT.to_string(),
        exported_at: Utc::now(),
        passport,
        session,
        runs,
        merkle_proof: MerkleProof {
            merkle_root: tree.root(),
            paths: tree.paths(),
            leaves,
        },
    })
}

/// First point where a bundle stops proving itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BundleDivergence {
    Format { found: String },
    Passport { check: String },
    LeafCount { runs: usize, leaves: usize, paths: usize },
    /// Session record disagrees with its own runs
    Session { check: String },
    Run {
        leaf_index: usize,
        run_id: RunId,
        check: String,
    },
    Root {
        expected: ContentHash,
        actual: ContentHash,
    },
}

impl BundleDivergence {
    /// Index of the divergent leaf, if the divergence is run-level
    #[must_use]
    pub fn leaf_index(&self) -> Option<usize> {
        match self {
            Self::Run { leaf_index, .. } => Some(*leaf_index),
            _ => None,
        }
    }
}

impl fmt::Display for BundleDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { found } => write!(f, "unsupported bundle format {found:?}"),
            Self::Passport { check } => write!(f, "passport: {check}"),
            Self::LeafCount {
                runs,
                leaves,
                paths,
            } => write!(f, "{runs} runs, {leaves} Merkle leaves, {paths} paths"),
            Self::Session { check } => write!(f, "session record: {check}"),
            Self::Run {
                leaf_index,
                run_id,
                check,
            } => write!(f, "leaf {leaf_index} (run {run_id}): {check}"),
            Self::Root { .. } => write!(f, "recomputed Merkle root differs"),
        }
    }
}

/// Outcome of [`verify_bundle`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleVerification {
    pub valid: bool,
    pub first_divergence: Option<BundleDivergence>,
}

impl BundleVerification {
    /// Turn a failed verification into a hard error
    ///
    /// # Errors
    /// `IntegrityMismatch` describing the first divergence
    pub fn into_result(self, session_id: SessionId) -> Result<(), ExportError> {
        match self.first_divergence {
            None => Ok(()),
            Some(divergence) => Err(ExportError::IntegrityMismatch {
                session_id,
                check: divergence.to_string(),
            }),
        }
    }
}

/// Recompute every fingerprint and the Merkle root of a bundle
#[must_use]
pub fn verify_bundle(bundle: &ExportBundle) -> BundleVerification {
    let divergence = first_divergence(bundle);
    if let Some(d) = &divergence {
        tracing::warn!(session_id = %bundle.session.session_id, divergence = %d, "bundle does not verify");
    }
    BundleVerification {
        valid: divergence.is_none(),
        first_divergence: divergence,
    }
}

fn first_divergence(bundle: &ExportBundle) -> Option<BundleDivergence> {
    if bundle.format != BUNDLE_FORMAT {
        return Some(BundleDivergence::Format {
            found: bundle.format.clone(),
        });
    }

    let passport = &bundle.passport;
    let session = &bundle.session;
    let passport_check = |check: &str| {
        Some(BundleDivergence::Passport {
            check: check.to_string(),
        })
    };
    if passport.recompute_fingerprint() != passport.fingerprint() {
        return passport_check("fingerprint does not match passport content");
    }
    if session.passport_id != passport.id() || session.passport_fingerprint != passport.fingerprint() {
        return passport_check("session was not run against this passport");
    }

    let proof = &bundle.merkle_proof;
    let count = bundle.runs.len();
    if session.runs.len() != count || proof.leaves.len() != count || proof.paths.len() != count {
        return Some(BundleDivergence::LeafCount {
            runs: count,
            leaves: proof.leaves.len(),
            paths: proof.paths.len(),
        });
    }

    let mut artifacts = Vec::with_capacity(count);
    let mut first_manifest: Option<CorpusManifest> = None;
    for (leaf_index, run) in bundle.runs.iter().enumerate() {
        let diverge = |check: String| {
            Some(BundleDivergence::Run {
                leaf_index,
                run_id: run.run_id,
                check,
            })
        };
        if session.runs[leaf_index].run_id != run.run_id {
            return diverge("run order differs from the session record".to_string());
        }
        let files = match run.decode() {
            Ok(files) => files,
            Err(e) => return diverge(e),
        };
        let artifact = match layout::from_files(run.run_id, &files) {
            Ok(artifact) => artifact,
            Err(e) => return diverge(e.to_string()),
        };
        if artifact.session_id() != session.session_id || artifact.run_id() != run.run_id {
            return diverge("artifact is keyed to a different session or run".to_string());
        }
        if let Err(e) = artifact
            .verify()
            .and_then(|()| layout::check_exact(&artifact, &files))
        {
            return diverge(check_of(&e));
        }
        if let Some(check) = record_divergence(&session.runs[leaf_index], &artifact) {
            return diverge(check);
        }

        if let Some(manifest) = &artifact.metadata().corpus_manifest {
            if !manifest.matches_passport(passport) {
                return diverge("corpus manifest does not match the passport".to_string());
            }
            let first = first_manifest.get_or_insert_with(|| manifest.clone());
            if first != manifest {
                return diverge("corpus manifest differs from an earlier run".to_string());
            }
        }

        let leaf = artifact.chain_fingerprint();
        if proof.leaves[leaf_index] != leaf {
            return diverge("chain fingerprint differs from the Merkle leaf".to_string());
        }
        let path = &proof.paths[leaf_index];
        if path.leaf_index != leaf_index || !path.verify(leaf, proof.merkle_root) {
            return diverge("inclusion path does not reach the Merkle root".to_string());
        }
        artifacts.push(artifact);
    }

    if let Some(check) = session_divergence(session) {
        return Some(BundleDivergence::Session { check });
    }

    // chain links follow write order, not run order
    let at = |leaf_index: usize, check: String| {
        Some(BundleDivergence::Run {
            leaf_index,
            run_id: artifacts[leaf_index].run_id(),
            check,
        })
    };
    let mut linked: Vec<usize> = Vec::with_capacity(count);
    let mut previous = chain_seed();
    while linked.len() < count {
        let next = (0..count)
            .find(|i| !linked.contains(i) && artifacts[*i].record().previous_chain == previous);
        let Some(next) = next else {
            let stray = (0..count).find(|i| !linked.contains(i)).unwrap_or(0);
            return at(stray, "artifact does not link into the session chain".to_string());
        };
        let sequence = artifacts[next].record().sequence;
        if sequence != linked.len() as u64 {
            return at(
                next,
                format!("sequence {sequence} found at chain position {}", linked.len()),
            );
        }
        previous = artifacts[next].chain_fingerprint();
        linked.push(next);
    }

    let leaves: Vec<ContentHash> = artifacts.iter().map(Artifact::chain_fingerprint).collect();
    let actual = SessionMerkleTree::from_leaves(&leaves).root();
    if actual != proof.merkle_root {
        return Some(BundleDivergence::Root {
            expected: proof.merkle_root,
            actual,
        });
    }
    None
}

/// What the session record claims about a run, against its artifact
fn record_divergence(run: &RunRecord, artifact: &Artifact) -> Option<String> {
    let metadata = artifact.metadata();
    let record = artifact.record();

    let outcome_state = match metadata.outcome {
        ArtifactOutcome::Captured => RunState::Captured,
        ArtifactOutcome::Errored => RunState::Errored,
    };
    if run.state != outcome_state {
        return Some(format!(
            "recorded state {} but the artifact outcome is {}",
            run.state, outcome_state
        ));
    }
    if run.history.last().map(|c| c.state) != Some(run.state) {
        return Some("run history does not end in the recorded state".to_string());
    }
    match (&run.error, &metadata.error_kind) {
        (None, None) => {}
        (Some(error), Some(kind)) if error.kind == *kind => {
            if error.message.as_bytes() != artifact.payload() {
                return Some("recorded error message differs from the stored payload".to_string());
            }
        }
        _ => return Some("recorded error differs from the artifact's error kind".to_string()),
    }

    // a run cancelled before loading transmitted nothing
    let transmitted = (!metadata.prompt.is_empty()).then_some(metadata.prompt.as_str());
    if run.prompt.as_deref() != transmitted {
        return Some("recorded prompt differs from the transmitted prompt".to_string());
    }
    if run.corpus_manifest != metadata.corpus_manifest {
        return Some("recorded corpus manifest differs from the artifact's".to_string());
    }
    if run.artifact != Some(record.chain_fingerprint) {
        return Some("recorded artifact fingerprint differs from the chain fingerprint".to_string());
    }
    if run.output_fingerprint != Some(record.payload_fingerprint) {
        return Some("recorded output fingerprint differs from the payload".to_string());
    }
    if run.interpreter.provider != metadata.provider
        || run.interpreter.display_name != metadata.display_name
    {
        return Some("recorded interpreter differs from the artifact's".to_string());
    }
    if run.started_at != metadata.started_at || run.finished_at != metadata.finished_at {
        return Some("recorded timestamps differ from the artifact's".to_string());
    }
    if run.input_tokens != metadata.input_tokens || run.output_tokens != metadata.output_tokens {
        return Some("recorded token counts differ from the artifact's".to_string());
    }
    None
}

fn session_divergence(session: &SessionRecord) -> Option<String> {
    let states: Vec<RunState> = session.runs.iter().map(|r| r.state).collect();
    let resolved = resolve_session(session.session_type, &states);
    if resolved != Some(session.state) {
        return Some(match resolved {
            Some(resolved) => format!("state {} but its runs resolve to {resolved}", session.state),
            None => format!("state {} with runs still in flight", session.state),
        });
    }
    if session.history.last().map(|c| c.state) != Some(session.state) {
        return Some("session history does not end in the recorded state".to_string());
    }
    if session.isolation_exempt != session.session_type.is_isolation_exempt() {
        return Some("isolation exemption does not match the session type".to_string());
    }
    None
}

fn check_of(error: &StoreError) -> String {
    match error {
        StoreError::IntegrityMismatch { check, .. } => check.clone(),
        other => other.to_string(),
    }
}

impl Orchestrator {
    /// Export a finished session as a self-verifying bundle
    ///
    /// # Errors
    /// - `NotFinished` while the session is still running
    /// - `IntegrityMismatch` / `Store` if stored artifacts do not verify
    pub async fn export(&self, session_id: SessionId) -> Result<ExportBundle, ExportError> {
        let session = self.session(session_id)?;
        if !session.state.is_terminal() {
            return Err(ExportError::NotFinished {
                session_id,
                state: session.state,
            });
        }
        let passport = self.passport(session.passport_id).await?;
        let artifacts = self.artifacts(session_id).await?;

        let mut views = BTreeMap::new();
        for artifact in &artifacts {
            if let Some(view) = self
                .store()
                .read_view(session_id, artifact.run_id(), MODES_FILE)
                .await?
            {
                views.insert(artifact.run_id(), view);
            }
        }
        build_bundle(passport, session, &artifacts, &views)
    }
}
