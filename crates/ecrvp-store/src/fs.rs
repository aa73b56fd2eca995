//! Filesystem artifact store
//!
//! ```text
//! sessions/<session_id>/runs/<run_id>/artifact.json
//!                                     metadata.json
//!                                     prompt.txt
//!                                     corpus_manifest.json
//!                                     response_raw.txt
//!                                     response_modes.json
//! ```
//!
//! Every chained file is opened with `create_new`, and `artifact.json` is
//! written last. A run directory without `artifact.json` is an interrupted
//! write; it is skipped when listing and still blocks a second write.

use crate::artifact::{chain_seed, Artifact, ArtifactMetadata};
use crate::error::StoreError;
use crate::layout::{self, RunFiles, ARTIFACT_FILE};
use crate::ArtifactStore;
use dashmap::DashMap;
use ecrvp_artifact::{ContentHash, RunId, SessionId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const SESSIONS_DIR: &str = "sessions";
const RUNS_DIR: &str = "runs";

#[derive(Debug, Clone, Copy)]
struct ChainHead {
    head: ContentHash,
    next_sequence: u64,
}

/// Durable store rooted at a data directory
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    heads: DashMap<SessionId, Arc<Mutex<Option<ChainHead>>>>,
}

impl FsArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            heads: DashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything stored for a session
    #[must_use]
    pub fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(session_id.to_string())
    }

    fn run_dir(&self, session_id: SessionId, run_id: RunId) -> PathBuf {
        self.session_dir(session_id)
            .join(RUNS_DIR)
            .join(run_id.to_string())
    }

    async fn load_head(&self, session_id: SessionId) -> Result<ChainHead, StoreError> {
        let artifacts = self.list_session(session_id).await?;
        Ok(ChainHead {
            head: artifacts
                .last()
                .map_or_else(chain_seed, Artifact::chain_fingerprint),
            next_sequence: artifacts.len() as u64,
        })
    }

    async fn read_run(&self, session_id: SessionId, run_id: RunId) -> Result<Artifact, StoreError> {
        let dir = self.run_dir(session_id, run_id);
        if !tokio::fs::try_exists(dir.join(ARTIFACT_FILE)).await? {
            return Err(StoreError::NotFound { session_id, run_id });
        }

        let mut files = RunFiles::new();
        for name in [
            layout::ARTIFACT_FILE,
            layout::METADATA_FILE,
            layout::PROMPT_FILE,
            layout::MANIFEST_FILE,
            layout::RESPONSE_FILE,
        ] {
            match tokio::fs::read(dir.join(name)).await {
                Ok(bytes) => {
                    files.insert(name.to_string(), bytes);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let artifact = layout::from_files(run_id, &files)?;
        layout::check_exact(&artifact, &files)?;
        Ok(artifact)
    }
}

#[async_trait::async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(
        &self,
        session_id: SessionId,
        run_id: RunId,
        payload: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, StoreError> {
        let slot = self.heads.entry(session_id).or_default().clone();
        let mut slot = slot.lock().await;
        let head = match *slot {
            Some(head) => head,
            None => self.load_head(session_id).await?,
        };

        let dir = self.run_dir(session_id, run_id);
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::ImmutabilityViolation { session_id, run_id });
            }
            Err(e) => return Err(e.into()),
        }

        let artifact = Artifact::seal(
            session_id,
            run_id,
            head.next_sequence,
            head.head,
            payload,
            metadata,
        )?;
        let mut files = layout::to_files(&artifact)?;
        let record = files.remove(ARTIFACT_FILE).unwrap_or_default();
        for (name, bytes) in &files {
            write_new(&dir.join(name), bytes).await?;
        }
        write_new(&dir.join(ARTIFACT_FILE), &record).await?;

        *slot = Some(ChainHead {
            head: artifact.chain_fingerprint(),
            next_sequence: head.next_sequence + 1,
        });

        tracing::info!(
            session_id = %session_id,
            run_id = %run_id,
            sequence = head.next_sequence,
            chain = %artifact.chain_fingerprint().short(),
            path = %dir.display(),
            "artifact written"
        );
        Ok(artifact)
    }

    async fn read(&self, session_id: SessionId, run_id: RunId) -> Result<Artifact, StoreError> {
        self.read_run(session_id, run_id).await
    }

    async fn list_session(&self, session_id: SessionId) -> Result<Vec<Artifact>, StoreError> {
        let runs_dir = self.session_dir(session_id).join(RUNS_DIR);
        let mut entries = match tokio::fs::read_dir(&runs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<RunId>().ok())
            else {
                continue;
            };
            match self.read_run(session_id, run_id).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(StoreError::NotFound { .. }) => {
                    tracing::warn!(%session_id, %run_id, "skipping incomplete artifact directory");
                }
                Err(e) => return Err(e),
            }
        }
        artifacts.sort_by_key(|a| a.record().sequence);
        Ok(artifacts)
    }

    async fn write_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        check_view_name(run_id, name)?;
        let dir = self.run_dir(session_id, run_id);
        if !tokio::fs::try_exists(dir.join(ARTIFACT_FILE)).await? {
            return Err(StoreError::NotFound { session_id, run_id });
        }
        tokio::fs::write(dir.join(name), bytes).await?;
        Ok(())
    }

    async fn read_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        check_view_name(run_id, name)?;
        match tokio::fs::read(self.run_dir(session_id, run_id).join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Views live next to the chained files and must never replace one
fn check_view_name(run_id: RunId, name: &str) -> Result<(), StoreError> {
    let chained = [
        layout::ARTIFACT_FILE,
        layout::METADATA_FILE,
        layout::PROMPT_FILE,
        layout::MANIFEST_FILE,
        layout::RESPONSE_FILE,
    ];
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') || chained.contains(&name) {
        return Err(StoreError::Malformed {
            run_id,
            reason: format!("{name:?} is not a valid view name"),
        });
    }
    Ok(())
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
