//! In-memory artifact store

use crate::artifact::{chain_seed, Artifact, ArtifactMetadata};
use crate::error::StoreError;
use crate::ArtifactStore;
use dashmap::DashMap;
use ecrvp_artifact::{ContentHash, RunId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct SessionLedger {
    artifacts: Vec<Artifact>,
    index: HashMap<RunId, usize>,
    views: HashMap<(RunId, String), Vec<u8>>,
}

impl SessionLedger {
    fn head(&self) -> ContentHash {
        self.artifacts
            .last()
            .map_or_else(chain_seed, Artifact::chain_fingerprint)
    }
}

/// Process-local store, one chain ledger per session
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    sessions: DashMap<SessionId, Arc<Mutex<SessionLedger>>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, session_id: SessionId) -> Arc<Mutex<SessionLedger>> {
        self.sessions.entry(session_id).or_default().clone()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(
        &self,
        session_id: SessionId,
        run_id: RunId,
        payload: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<Artifact, StoreError> {
        let ledger = self.ledger(session_id);
        let mut ledger = ledger.lock().await;
        if ledger.index.contains_key(&run_id) {
            return Err(StoreError::ImmutabilityViolation { session_id, run_id });
        }

        let position = ledger.artifacts.len();
        let sequence = position as u64;
        let artifact = Artifact::seal(session_id, run_id, sequence, ledger.head(), payload, metadata)?;
        ledger.index.insert(run_id, position);
        ledger.artifacts.push(artifact.clone());

        tracing::info!(
            session_id = %session_id,
            run_id = %run_id,
            sequence,
            chain = %artifact.chain_fingerprint().short(),
            "artifact written"
        );
        Ok(artifact)
    }

    async fn read(&self, session_id: SessionId, run_id: RunId) -> Result<Artifact, StoreError> {
        let not_found = || StoreError::NotFound { session_id, run_id };
        let ledger = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(not_found)?;
        let ledger = ledger.lock().await;
        ledger
            .index
            .get(&run_id)
            .map(|&i| ledger.artifacts[i].clone())
            .ok_or_else(not_found)
    }

    async fn list_session(&self, session_id: SessionId) -> Result<Vec<Artifact>, StoreError> {
        let Some(ledger) = self.sessions.get(&session_id).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let ledger = ledger.lock().await;
        Ok(ledger.artifacts.clone())
    }

    async fn write_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let ledger = self.ledger(session_id);
        let mut ledger = ledger.lock().await;
        if !ledger.index.contains_key(&run_id) {
            return Err(StoreError::NotFound { session_id, run_id });
        }
        ledger.views.insert((run_id, name.to_string()), bytes);
        Ok(())
    }

    async fn read_view(
        &self,
        session_id: SessionId,
        run_id: RunId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(ledger) = self.sessions.get(&session_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let ledger = ledger.lock().await;
        Ok(ledger.views.get(&(run_id, name.to_string())).cloned())
    }
}
