//! Core types for ECR-VP sessions and runs

use chrono::{DateTime, Utc};
use ecrvp_artifact::{ContentHash, PassportId, RunId, SessionId};
use ecrvp_corpus::CorpusManifest;
use ecrvp_gateway::InterpreterConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Independent interpreters, one isolated run each
    StrictVerifier,
    /// One interpreter reading the captured outputs of a finished session
    PositionAggregator,
    /// Independent interpreters translating the corpus to formal structures
    Formalization,
}

impl SessionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrictVerifier => "strict_verifier",
            Self::PositionAggregator => "position_aggregator",
            Self::Formalization => "formalization",
        }
    }

    /// Whether runs of this type deliberately read other runs' outputs
    #[inline]
    #[must_use]
    pub fn is_isolation_exempt(self) -> bool {
        matches!(self, Self::PositionAggregator)
    }

    /// Whether a finished session waits for a human synthesis pass
    #[inline]
    #[must_use]
    pub fn expects_synthesis(self) -> bool {
        !self.is_isolation_exempt()
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict_verifier" => Ok(Self::StrictVerifier),
            "position_aggregator" => Ok(Self::PositionAggregator),
            "formalization" => Ok(Self::Formalization),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

/// Coarse session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Preparing,
    Loading,
    Executing,
    Completed,
    AwaitingSynthesis,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Loading => "loading",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::AwaitingSynthesis => "awaiting_synthesis",
            Self::Failed => "failed",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::AwaitingSynthesis | Self::Failed)
    }

    /// Terminal with at least one captured run
    #[inline]
    #[must_use]
    pub fn has_results(self) -> bool {
        matches!(self, Self::Completed | Self::AwaitingSynthesis)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Sent,
    AwaitingResponse,
    Captured,
    Errored,
}

impl RunState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::AwaitingResponse => "awaiting_response",
            Self::Captured => "captured",
            Self::Errored => "errored",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Captured | Self::Errored)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parallel fan-out or one run after another
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

/// A state entered at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange<S> {
    pub state: S,
    pub at: DateTime<Utc>,
}

impl<S> StateChange<S> {
    pub(crate) fn now(state: S) -> Self {
        Self {
            state,
            at: Utc::now(),
        }
    }
}

/// Terminal error of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Stable tag (`transport_error`, `cancelled`, ...)
    pub kind: String,
    pub message: String,
}

/// Session creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRequest {
    pub passport_id: PassportId,
    pub session_type: SessionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<SessionId>,
    pub interpreters: Vec<InterpreterConfig>,
}

impl SessionRequest {
    #[must_use]
    pub fn new(
        passport_id: PassportId,
        session_type: SessionType,
        interpreters: Vec<InterpreterConfig>,
    ) -> Self {
        Self {
            passport_id,
            session_type,
            source_session_id: None,
            interpreters,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: SessionId) -> Self {
        self.source_session_id = Some(source);
        self
    }
}

/// One run of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub interpreter: InterpreterConfig,
    pub state: RunState,
    pub history: Vec<StateChange<RunState>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Exact transmitted text; `None` until the transcript is queued
    pub prompt: Option<String>,
    pub corpus_manifest: Option<CorpusManifest>,
    pub output_fingerprint: Option<ContentHash>,
    /// Chain fingerprint of this run's artifact
    pub artifact: Option<ContentHash>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub error: Option<RunError>,
}

impl RunRecord {
    pub(crate) fn queued(interpreter: InterpreterConfig) -> Self {
        Self {
            run_id: RunId::new(),
            interpreter,
            state: RunState::Queued,
            history: vec![StateChange::now(RunState::Queued)],
            started_at: None,
            finished_at: None,
            prompt: None,
            corpus_manifest: None,
            output_fingerprint: None,
            artifact: None,
            input_tokens: None,
            output_tokens: None,
            error: None,
        }
    }

    /// States entered so far, oldest first
    #[must_use]
    pub fn progression(&self) -> Vec<RunState> {
        self.history.iter().map(|c| c.state).collect()
    }
}

/// One verification session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub passport_id: PassportId,
    pub passport_fingerprint: ContentHash,
    pub session_type: SessionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<SessionId>,
    /// Runs read other runs' outputs (position aggregation only)
    pub isolation_exempt: bool,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub history: Vec<StateChange<SessionState>>,
    /// Runs in creation order
    pub runs: Vec<RunRecord>,
}

impl SessionRecord {
    /// Run identifiers in creation order
    #[must_use]
    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.iter().map(|r| r.run_id).collect()
    }

    #[must_use]
    pub fn run(&self, run_id: RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }

    pub(crate) fn run_mut(&mut self, run_id: RunId) -> Option<&mut RunRecord> {
        self.runs.iter_mut().find(|r| r.run_id == run_id)
    }

    /// Run states in creation order
    #[must_use]
    pub fn run_states(&self) -> Vec<RunState> {
        self.runs.iter().map(|r| r.state).collect()
    }

    #[must_use]
    pub fn count(&self, state: RunState) -> usize {
        self.runs.iter().filter(|r| r.state == state).count()
    }

    /// States entered so far, oldest first
    #[must_use]
    pub fn progression(&self) -> Vec<SessionState> {
        self.history.iter().map(|c| c.state).collect()
    }
}
