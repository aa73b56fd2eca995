//! Session Orchestrator
//!
//! Drives one isolated run per interpreter of a session:
//!
//! 1. `preparing`: the request is validated and every run is queued
//! 2. `loading`: the shared transcript (passport block, reference prompt,
//!    corpus segments, completion instruction) is built once and queued on
//!    each run's own channel
//! 3. `executing`: responses are awaited, in parallel or one run at a time
//! 4. terminal: a pure reduction over the run states
//!
//! Every run ends with exactly one artifact, whether it was captured,
//! errored or cancelled. A run error never touches sibling runs.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::license::{AllowAll, LicenseGate};
use crate::modes::{ModeDetector, ModeReport};
use crate::prompts;
use crate::state_machine::{resolve_session, validate_run_transition, validate_session_transition};
use crate::types::{
    ExecutionMode, RunError, RunRecord, RunState, SessionRecord, SessionRequest, SessionState,
    SessionType, StateChange,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ecrvp_artifact::{PassportId, RunId, SessionId};
use ecrvp_corpus::{
    passport_to_text, CorpusError, CorpusManifest, CorpusVault, Passport, SealedCorpus,
};
use ecrvp_gateway::{Channel, Gateway, GatewayError, InterpreterConfig, RunResult, Turn};
use ecrvp_store::layout::MODES_FILE;
use ecrvp_store::{
    verify_chain, Artifact, ArtifactMetadata, ArtifactOutcome, ArtifactStore, FsArtifactStore,
    MemoryArtifactStore,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const SESSIONS_DIR: &str = "sessions";
const SESSION_FILE: &str = "session.json";
const CANCELLED: &str = "cancelled";
const STORE_FAILURE: &str = "store_error";

/// Per-request execution choices
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the configured execution mode
    pub mode: Option<ExecutionMode>,
    /// Stops runs whose channel is not open yet
    pub cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Transcript shared read-only by every run of one execution
#[derive(Debug)]
struct RunInput {
    turns: Vec<Turn>,
    manifest: Option<CorpusManifest>,
}

/// Terminal error of a run before it is stored
#[derive(Debug, Clone)]
struct RunFailure {
    kind: String,
    message: String,
}

impl From<GatewayError> for RunFailure {
    fn from(e: GatewayError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl RunFailure {
    fn cancelled() -> Self {
        Self {
            kind: CANCELLED.to_string(),
            message: "execution cancelled before the channel was opened".to_string(),
        }
    }

    fn cancelled_waiting() -> Self {
        Self {
            kind: CANCELLED.to_string(),
            message: "execution cancelled while waiting for a run slot".to_string(),
        }
    }
}

type SessionHandle = Arc<Mutex<SessionRecord>>;

/// The session orchestrator
///
/// Owns the passport registry and the session table; artifacts go to the
/// configured [`ArtifactStore`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    gateway: Gateway,
    store: Arc<dyn ArtifactStore>,
    vault: Option<CorpusVault>,
    corpora: DashMap<PassportId, SealedCorpus>,
    sessions: DashMap<SessionId, SessionHandle>,
    license: Arc<dyn LicenseGate>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("gateway", &self.gateway)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator over `gateway`
    ///
    /// With a `data_dir`, corpora, artifacts and session snapshots are kept
    /// on disk under it; otherwise everything lives in memory.
    ///
    /// # Errors
    /// `Config` if the configuration is unusable
    pub fn new(config: OrchestratorConfig, gateway: Gateway) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let (store, vault): (Arc<dyn ArtifactStore>, _) = match &config.data_dir {
            Some(dir) => (
                Arc::new(FsArtifactStore::new(dir.clone())),
                Some(CorpusVault::new(dir.clone())),
            ),
            None => (Arc::new(MemoryArtifactStore::new()), None),
        };
        Ok(Self {
            config,
            gateway,
            store,
            vault,
            corpora: DashMap::new(),
            sessions: DashMap::new(),
            license: Arc::new(AllowAll),
        })
    }

    /// Replace the artifact store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the license collaborator (allow-all by default)
    #[must_use]
    pub fn with_license_gate(mut self, gate: Arc<dyn LicenseGate>) -> Self {
        self.license = gate;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// Make a sealed corpus available to sessions
    ///
    /// # Errors
    /// `Corpus(ImmutabilityViolation)` if the passport is already registered
    pub async fn register_corpus(&self, corpus: SealedCorpus) -> Result<PassportId, OrchestratorError> {
        let id = corpus.passport().id();
        if self.corpora.contains_key(&id) {
            return Err(CorpusError::ImmutabilityViolation { passport_id: id }.into());
        }
        if let Some(vault) = &self.vault {
            vault.store(&corpus).await?;
        }
        self.corpora.insert(id, corpus);
        tracing::info!(passport_id = %id, "corpus registered");
        Ok(id)
    }

    /// Sealed corpus for a passport, loading it from the vault if needed
    ///
    /// # Errors
    /// `UnknownPassport` if it is neither registered nor stored
    pub async fn corpus(&self, id: PassportId) -> Result<SealedCorpus, OrchestratorError> {
        if let Some(corpus) = self.corpora.get(&id) {
            return Ok(corpus.value().clone());
        }
        let Some(vault) = &self.vault else {
            return Err(OrchestratorError::UnknownPassport(id));
        };
        match vault.load(id).await {
            Ok(corpus) => {
                self.corpora.insert(id, corpus.clone());
                Ok(corpus)
            }
            Err(CorpusError::NotFound(_)) => Err(OrchestratorError::UnknownPassport(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    /// `UnknownPassport` if it is neither registered nor stored
    pub async fn passport(&self, id: PassportId) -> Result<Passport, OrchestratorError> {
        Ok(self.corpus(id).await?.passport().clone())
    }

    /// Validate a request and create its session with every run queued
    ///
    /// # Errors
    /// - `Validation` for an empty or malformed interpreter list, or an
    ///   aggregator request without a usable source session
    /// - `UnknownPassport` / `UnknownSession` for dangling references
    pub async fn create_session(&self, request: SessionRequest) -> Result<SessionRecord, OrchestratorError> {
        if request.interpreters.is_empty() {
            return Err(OrchestratorError::validation("session has no interpreters"));
        }
        let passport = self.passport(request.passport_id).await?;

        for (index, interpreter) in request.interpreters.iter().enumerate() {
            self.gateway.validate(interpreter).map_err(|e| {
                OrchestratorError::validation(format!(
                    "interpreter {index} ({}): {e}",
                    interpreter.display_name
                ))
            })?;
        }

        match (request.session_type, request.source_session_id) {
            (SessionType::PositionAggregator, None) => {
                return Err(OrchestratorError::validation(
                    "position_aggregator requires source_session_id",
                ));
            }
            (SessionType::PositionAggregator, Some(source_id)) => {
                if request.interpreters.len() != 1 {
                    return Err(OrchestratorError::validation(format!(
                        "position_aggregator takes exactly one interpreter, got {}",
                        request.interpreters.len()
                    )));
                }
                let source = self.session(source_id)?;
                if !source.state.has_results() {
                    return Err(OrchestratorError::source_not_ready(
                        source_id,
                        source.state,
                        request.session_type,
                    ));
                }
                if source.passport_id != request.passport_id {
                    return Err(OrchestratorError::validation(format!(
                        "source session {source_id} was run against passport {}",
                        source.passport_id
                    )));
                }
            }
            (other, Some(_)) => {
                return Err(OrchestratorError::validation(format!(
                    "source_session_id is only accepted for position_aggregator, not {other}"
                )));
            }
            (_, None) => {}
        }

        if request.session_type == SessionType::StrictVerifier
            && request.interpreters.len() < self.config.recommended_min_verifiers
        {
            tracing::warn!(
                interpreters = request.interpreters.len(),
                recommended = self.config.recommended_min_verifiers,
                "strict_verifier session with fewer interpreters than recommended"
            );
        }

        let record = SessionRecord {
            session_id: SessionId::new(),
            passport_id: request.passport_id,
            passport_fingerprint: passport.fingerprint(),
            session_type: request.session_type,
            source_session_id: request.source_session_id,
            isolation_exempt: request.session_type.is_isolation_exempt(),
            created_at: Utc::now(),
            state: SessionState::Preparing,
            history: vec![StateChange::now(SessionState::Preparing)],
            runs: request
                .interpreters
                .into_iter()
                .map(RunRecord::queued)
                .collect(),
        };

        self.sessions
            .insert(record.session_id, Arc::new(Mutex::new(record.clone())));
        self.snapshot(&record).await?;
        tracing::info!(
            session_id = %record.session_id,
            session_type = %record.session_type,
            runs = record.runs.len(),
            "session created"
        );
        Ok(record)
    }

    /// Execute a prepared session to a terminal state
    ///
    /// Returns the terminal session record. Run failures are recorded on
    /// their runs, never returned here.
    ///
    /// # Errors
    /// - `IllegalTransition` if the session is not `preparing`
    /// - `License`, `Validation`, `IntegrityMismatch` before any channel opens
    /// - `Store` if an artifact could not be written; all runs still finish
    pub async fn execute(
        &self,
        session_id: SessionId,
        options: ExecuteOptions,
    ) -> Result<SessionRecord, OrchestratorError> {
        let span = tracing::info_span!("session", session_id = %session_id);
        self.execute_inner(session_id, options).instrument(span).await
    }

    async fn execute_inner(
        &self,
        session_id: SessionId,
        options: ExecuteOptions,
    ) -> Result<SessionRecord, OrchestratorError> {
        let handle = self.handle(session_id)?;
        let session = handle.lock().clone();
        if session.state != SessionState::Preparing {
            return Err(OrchestratorError::IllegalTransition {
                session_id,
                from: session.state,
                to: SessionState::Loading,
            });
        }

        let license = self.license.check().await;
        if !license.valid {
            return Err(OrchestratorError::License {
                reason: license
                    .metadata
                    .get("reason")
                    .cloned()
                    .unwrap_or_else(|| "license is not valid".to_string()),
            });
        }

        let corpus = self.corpus(session.passport_id).await?;
        let check = corpus.verify();
        if let Some(divergence) = check.first_divergence {
            return Err(OrchestratorError::IntegrityMismatch {
                passport_id: session.passport_id,
                check: divergence.to_string(),
            });
        }
        if corpus.passport().fingerprint() != session.passport_fingerprint {
            return Err(OrchestratorError::IntegrityMismatch {
                passport_id: session.passport_id,
                check: "passport fingerprint differs from the one fixed at session creation"
                    .to_string(),
            });
        }

        let configs: Vec<InterpreterConfig> =
            session.runs.iter().map(|r| r.interpreter.clone()).collect();
        for config in &configs {
            self.gateway
                .validate(config)
                .map_err(|e| OrchestratorError::validation(e.to_string()))?;
        }

        let input = self.build_input(&session, &corpus, &configs).await?;
        self.transition(&handle, SessionState::Loading).await?;

        let mode = options.mode.unwrap_or(self.config.execution_mode);
        let cancel = options.cancel.unwrap_or_default();
        let results = match mode {
            ExecutionMode::Parallel => self.run_parallel(&handle, &session, &input, &cancel).await?,
            ExecutionMode::Sequential => {
                self.run_sequential(&handle, &session, &input, &cancel).await?
            }
        };

        let (session_type, states) = {
            let record = handle.lock();
            (record.session_type, record.run_states())
        };
        let terminal = resolve_session(session_type, &states).unwrap_or(SessionState::Failed);
        let record = self.transition(&handle, terminal).await?;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }
        Ok(record)
    }

    async fn run_parallel(
        &self,
        handle: &SessionHandle,
        session: &SessionRecord,
        input: &RunInput,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<(), OrchestratorError>>, OrchestratorError> {
        // Every channel is opened and queued before anything is awaited
        let loaded: Vec<_> = session
            .runs
            .iter()
            .map(|run| {
                let channel = if cancel.is_cancelled() {
                    Err(RunFailure::cancelled())
                } else {
                    self.load_run(handle, run.run_id, &run.interpreter, input)
                };
                (run.run_id, channel)
            })
            .collect();

        self.transition(handle, SessionState::Executing).await?;

        let slots = Semaphore::new(self.config.max_concurrent_runs);
        let work = loaded.into_iter().map(|(run_id, channel)| {
            let span = tracing::info_span!("run", run_id = %run_id);
            self.drive(handle, session.session_id, run_id, channel, Some(&slots), cancel)
                .instrument(span)
        });
        Ok(join_all(work).await)
    }

    async fn run_sequential(
        &self,
        handle: &SessionHandle,
        session: &SessionRecord,
        input: &RunInput,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<(), OrchestratorError>>, OrchestratorError> {
        self.transition(handle, SessionState::Executing).await?;

        let mut results = Vec::with_capacity(session.runs.len());
        for run in &session.runs {
            let span = tracing::info_span!("run", run_id = %run.run_id);
            let channel = if cancel.is_cancelled() {
                Err(RunFailure::cancelled())
            } else {
                self.load_run(handle, run.run_id, &run.interpreter, input)
            };
            results.push(
                self.drive(handle, session.session_id, run.run_id, channel, None, cancel)
                    .instrument(span)
                    .await,
            );
        }
        Ok(results)
    }

    /// Open the run's channel and queue the shared transcript on it
    fn load_run(
        &self,
        handle: &SessionHandle,
        run_id: RunId,
        config: &InterpreterConfig,
        input: &RunInput,
    ) -> Result<Channel, RunFailure> {
        let mut channel = self.gateway.open_channel(config)?;
        for turn in &input.turns {
            channel.transmit(turn.text.clone(), turn.segment.clone())?;
        }
        channel.finalize()?;

        let prompt = channel.prompt_text();
        let mut record = handle.lock();
        if let Some(run) = record.run_mut(run_id) {
            run.started_at = Some(Utc::now());
            run.prompt = Some(prompt);
            run.corpus_manifest.clone_from(&input.manifest);
            advance_run(run, RunState::Sent);
        }
        tracing::debug!(run_id = %run_id, channel = %channel.id(), "transcript queued");
        Ok(channel)
    }

    /// Await one run's response and store its artifact
    async fn drive(
        &self,
        handle: &SessionHandle,
        session_id: SessionId,
        run_id: RunId,
        channel: Result<Channel, RunFailure>,
        slots: Option<&Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let outcome = match channel {
            Ok(channel) => {
                let _permit = match slots {
                    Some(slots) => slots.acquire().await.ok(),
                    None => None,
                };
                // queued transcripts are dropped unsent
                if cancel.is_cancelled() {
                    Err(RunFailure::cancelled_waiting())
                } else {
                    self.update_run(handle, run_id, |run| {
                        advance_run(run, RunState::AwaitingResponse);
                    });
                    self.await_response(channel).await.map_err(RunFailure::from)
                }
            }
            Err(failure) => Err(failure),
        };
        self.finish_run(handle, session_id, run_id, outcome).await
    }

    async fn await_response(&self, channel: Channel) -> Result<RunResult, GatewayError> {
        let Some(limit) = self.config.run_timeout() else {
            return channel.await_result().await;
        };
        let provider = channel.config().provider.clone();
        match tokio::time::timeout(limit, channel.await_result()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transport {
                provider,
                message: format!("no response within {}s", limit.as_secs()),
            }),
        }
    }

    async fn finish_run(
        &self,
        handle: &SessionHandle,
        session_id: SessionId,
        run_id: RunId,
        outcome: Result<RunResult, RunFailure>,
    ) -> Result<(), OrchestratorError> {
        let (session_type, run) = {
            let record = handle.lock();
            let run = record
                .run(run_id)
                .cloned()
                .ok_or(OrchestratorError::UnknownRun { session_id, run_id })?;
            (record.session_type, run)
        };

        let (payload, metadata) = artifact_parts(&run, &outcome, Utc::now());
        let artifact = match self.store.write(session_id, run_id, payload, metadata).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "artifact write failed");
                let failure = RunFailure {
                    kind: STORE_FAILURE.to_string(),
                    message: e.to_string(),
                };
                self.update_run(handle, run_id, |run| {
                    run.finished_at = Some(Utc::now());
                    run.error = Some(RunError {
                        kind: failure.kind,
                        message: failure.message,
                    });
                    advance_run(run, RunState::Errored);
                });
                return Err(e.into());
            }
        };

        let captured = outcome.is_ok();
        self.update_run(handle, run_id, |run| {
            run.finished_at = artifact.metadata().finished_at;
            run.output_fingerprint = Some(artifact.record().payload_fingerprint);
            run.artifact = Some(artifact.chain_fingerprint());
            run.input_tokens = artifact.metadata().input_tokens;
            run.output_tokens = artifact.metadata().output_tokens;
            match &outcome {
                Ok(_) => advance_run(run, RunState::Captured),
                Err(failure) => {
                    run.error = Some(RunError {
                        kind: failure.kind.clone(),
                        message: failure.message.clone(),
                    });
                    advance_run(run, RunState::Errored);
                }
            }
        });

        match &outcome {
            Ok(_) => tracing::info!(
                run_id = %run_id,
                chain = %artifact.chain_fingerprint().short(),
                "run captured"
            ),
            Err(failure) => tracing::warn!(
                run_id = %run_id,
                kind = %failure.kind,
                error = %failure.message,
                "run errored"
            ),
        }

        if captured {
            self.write_modes(session_type, &artifact).await;
        }
        Ok(())
    }

    /// Derived marker view; failures are logged, never fatal
    async fn write_modes(&self, session_type: SessionType, artifact: &Artifact) {
        let report = match ModeDetector::for_session(session_type) {
            Ok(detector) => detector.detect(&artifact.payload_text()),
            Err(e) => {
                tracing::warn!(error = %e, "mode detector unavailable");
                return;
            }
        };
        let bytes = match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "mode report not serializable");
                return;
            }
        };
        if let Err(e) = self
            .store
            .write_view(artifact.session_id(), artifact.run_id(), MODES_FILE, bytes)
            .await
        {
            tracing::warn!(run_id = %artifact.run_id(), error = %e, "mode report not stored");
        }
    }

    async fn build_input(
        &self,
        session: &SessionRecord,
        corpus: &SealedCorpus,
        configs: &[InterpreterConfig],
    ) -> Result<RunInput, OrchestratorError> {
        let mut turns = vec![
            text_turn(passport_to_text(corpus.passport())),
            text_turn(prompts::reference_turn(session.session_type)),
        ];

        let manifest = if session.session_type.is_isolation_exempt() {
            let source = session.source_session_id.ok_or_else(|| {
                OrchestratorError::validation("position_aggregator requires source_session_id")
            })?;
            turns.push(text_turn(self.source_outputs(source).await?));
            None
        } else {
            let plan = self
                .gateway
                .plan(corpus, configs)
                .map_err(|e| OrchestratorError::validation(e.to_string()))?;
            if !plan.manifest().matches_passport(corpus.passport()) {
                return Err(OrchestratorError::IntegrityMismatch {
                    passport_id: session.passport_id,
                    check: "segment plan does not cover the passport file list".to_string(),
                });
            }
            let total = plan.len();
            for (index, segment) in plan.segments().iter().enumerate() {
                let d = &segment.descriptor;
                let label = if d.parts > 1 {
                    format!("{} (part {}/{})", d.filename, d.part, d.parts)
                } else {
                    d.filename.clone()
                };
                turns.push(Turn {
                    text: prompts::segment_preamble(index, total, &label),
                    segment: Some(segment.clone()),
                });
            }
            Some(plan.manifest().clone())
        };

        // the completion instruction rides on the final input turn
        if let Some(last) = turns.last_mut() {
            last.text.push_str("\n\n");
            last.text.push_str(prompts::completion_phrase(session.session_type));
        }
        Ok(RunInput { turns, manifest })
    }

    /// Captured outputs of a finished session, in run creation order
    async fn source_outputs(&self, source_id: SessionId) -> Result<String, OrchestratorError> {
        let source = self.session(source_id)?;
        let artifacts = self.store.list_session(source_id).await?;
        verify_chain(source_id, &artifacts)?;

        let mut out = String::new();
        let _ = writeln!(out, "=== INTERPRETER OUTPUTS FROM SOURCE SESSION ===");
        let _ = writeln!(out, "Source session: {source_id}");
        let _ = writeln!(out, "Session type: {}", source.session_type);
        let _ = writeln!(out, "Number of interpreters: {}", source.runs.len());
        for (index, run) in source.runs.iter().enumerate() {
            let config = &run.interpreter;
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "--- Interpreter {}: {} ({}/{}) [{}] ---",
                index + 1,
                config.display_name,
                config.provider,
                config.model,
                run.state
            );
            match artifacts.iter().find(|a| a.run_id() == run.run_id) {
                Some(a) if a.metadata().outcome == ArtifactOutcome::Captured => {
                    let _ = writeln!(out, "{}", a.payload_text());
                }
                Some(a) => {
                    let kind = a.metadata().error_kind.as_deref().unwrap_or("error");
                    let _ = writeln!(out, "[FAILED: {kind}] {}", a.payload_text());
                }
                None => {
                    let _ = writeln!(out, "[No response captured]");
                }
            }
        }
        out.push_str("=== END OF INTERPRETER OUTPUTS ===");
        Ok(out)
    }

    fn handle(&self, session_id: SessionId) -> Result<SessionHandle, OrchestratorError> {
        self.sessions
            .get(&session_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(OrchestratorError::UnknownSession(session_id))
    }

    fn update_run(&self, handle: &SessionHandle, run_id: RunId, f: impl FnOnce(&mut RunRecord)) {
        let mut record = handle.lock();
        if let Some(run) = record.run_mut(run_id) {
            f(run);
        }
    }

    async fn transition(
        &self,
        handle: &SessionHandle,
        to: SessionState,
    ) -> Result<SessionRecord, OrchestratorError> {
        let record = {
            let mut record = handle.lock();
            if !validate_session_transition(record.state, to) {
                return Err(OrchestratorError::IllegalTransition {
                    session_id: record.session_id,
                    from: record.state,
                    to,
                });
            }
            record.state = to;
            record.history.push(StateChange::now(to));
            record.clone()
        };
        tracing::info!(session_id = %record.session_id, state = %to, "session transition");
        self.snapshot(&record).await?;
        Ok(record)
    }

    fn sessions_dir(&self) -> Option<PathBuf> {
        self.config.data_dir.as_ref().map(|d| d.join(SESSIONS_DIR))
    }

    /// Write `session.json`; no-op without a data directory
    async fn snapshot(&self, record: &SessionRecord) -> Result<(), OrchestratorError> {
        let Some(root) = self.sessions_dir() else {
            return Ok(());
        };
        let dir = root.join(record.session_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        let staging = dir.join(format!("{SESSION_FILE}.tmp"));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, dir.join(SESSION_FILE)).await?;
        Ok(())
    }

    /// Load persisted sessions from the data directory
    ///
    /// Sessions already known in memory are kept. Returns how many were
    /// restored.
    ///
    /// # Errors
    /// `Io` or `Serialization` for unreadable snapshots
    pub async fn restore(&self) -> Result<usize, OrchestratorError> {
        let Some(root) = self.sessions_dir() else {
            return Ok(0);
        };
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut restored = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(SESSION_FILE);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let record: SessionRecord = serde_json::from_slice(&bytes)?;
            if !self.sessions.contains_key(&record.session_id) {
                if !record.state.is_terminal() && record.state != SessionState::Preparing {
                    tracing::warn!(
                        session_id = %record.session_id,
                        state = %record.state,
                        "restored session was interrupted mid-execution"
                    );
                }
                self.sessions
                    .insert(record.session_id, Arc::new(Mutex::new(record)));
                restored += 1;
            }
        }
        tracing::info!(restored, "sessions restored");
        Ok(restored)
    }

    /// Every known session, oldest first
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect();
        sessions.sort_by_key(|s| s.session_id);
        sessions
    }

    /// # Errors
    /// `UnknownSession`
    pub fn session(&self, session_id: SessionId) -> Result<SessionRecord, OrchestratorError> {
        Ok(self.handle(session_id)?.lock().clone())
    }

    /// Runs of a session in creation order
    ///
    /// # Errors
    /// `UnknownSession`
    pub fn runs(&self, session_id: SessionId) -> Result<Vec<RunRecord>, OrchestratorError> {
        Ok(self.session(session_id)?.runs)
    }

    /// Stored artifacts of a session in chain order
    ///
    /// # Errors
    /// `UnknownSession`, or `Store` on read failure
    pub async fn artifacts(&self, session_id: SessionId) -> Result<Vec<Artifact>, OrchestratorError> {
        self.handle(session_id)?;
        Ok(self.store.list_session(session_id).await?)
    }

    /// # Errors
    /// `Store(NotFound)` if the run has no artifact yet
    pub async fn artifact(&self, session_id: SessionId, run_id: RunId) -> Result<Artifact, OrchestratorError> {
        Ok(self.store.read(session_id, run_id).await?)
    }

    /// Stored marker report of a captured run
    ///
    /// # Errors
    /// `Store` on read failure, `Serialization` for a corrupt view
    pub async fn modes(
        &self,
        session_id: SessionId,
        run_id: RunId,
    ) -> Result<Option<ModeReport>, OrchestratorError> {
        match self.store.read_view(session_id, run_id, MODES_FILE).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn text_turn(text: String) -> Turn {
    Turn {
        text,
        segment: None,
    }
}

fn advance_run(run: &mut RunRecord, to: RunState) {
    if !validate_run_transition(run.state, to) {
        tracing::error!(run_id = %run.run_id, from = %run.state, to = %to, "illegal run transition");
        return;
    }
    run.state = to;
    run.history.push(StateChange::now(to));
}

fn artifact_parts(
    run: &RunRecord,
    outcome: &Result<RunResult, RunFailure>,
    now: DateTime<Utc>,
) -> (Vec<u8>, ArtifactMetadata) {
    let config = &run.interpreter;
    let mut metadata = ArtifactMetadata {
        provider: config.provider.clone(),
        model: config.model.clone(),
        display_name: config.display_name.clone(),
        outcome: ArtifactOutcome::Captured,
        error_kind: None,
        started_at: run.started_at,
        finished_at: Some(now),
        captured_at: now,
        input_tokens: None,
        output_tokens: None,
        prompt: run.prompt.clone().unwrap_or_default(),
        corpus_manifest: run.corpus_manifest.clone(),
    };
    match outcome {
        Ok(result) => {
            if !result.model_used.is_empty() {
                metadata.model.clone_from(&result.model_used);
            }
            metadata.input_tokens = result.input_tokens;
            metadata.output_tokens = result.output_tokens;
            (result.text.clone().into_bytes(), metadata)
        }
        Err(failure) => {
            metadata.outcome = ArtifactOutcome::Errored;
            metadata.error_kind = Some(failure.kind.clone());
            (failure.message.clone().into_bytes(), metadata)
        }
    }
}
