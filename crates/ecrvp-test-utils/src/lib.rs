//! Testing utilities for the ECR-VP workspace
//!
//! Shared fixtures and a scripted interpreter provider that records every
//! transcript it is given.

#![allow(missing_docs)]

use ecrvp_corpus::{
    seal, ArchitecturalStatus, CorpusEntry, PassportMetadata, SealedCorpus, SegmentDescriptor,
};
use ecrvp_gateway::{
    Capabilities, ChannelRequest, GatewayError, InterpreterConfig, InterpreterProvider, RunResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Provider id used by [`ScriptedProvider::new`]
pub const SCRIPTED: &str = "scripted";

/// What a scripted model does when asked
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail(GatewayError),
    /// Reply after a delay (for timeout and ordering tests)
    Slow(Duration, String),
}

/// One completed call as the provider saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub model: String,
    pub texts: Vec<String>,
    pub segments: Vec<SegmentDescriptor>,
}

/// In-process provider driven by per-model scripts
#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    capabilities: Capabilities,
    scripts: HashMap<String, Script>,
    default: Script,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(SCRIPTED)
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: Capabilities {
                native_files: false,
                context_tokens: 1_000_000,
                max_segment_bytes: 64 * 1024,
            },
            scripts: HashMap::new(),
            default: Script::Reply("## Verdict\nNo findings.".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Script the behaviour of one model
    #[must_use]
    pub fn script(mut self, model: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(model.into(), script);
        self
    }

    /// Every call received so far, in completion order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl InterpreterProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self, _model: &str) -> Capabilities {
        self.capabilities
    }

    async fn complete(&self, request: ChannelRequest<'_>) -> Result<RunResult, GatewayError> {
        let model = request.config.model.clone();
        self.calls.lock().push(RecordedCall {
            model: model.clone(),
            texts: request.turns.iter().map(|t| t.text.clone()).collect(),
            segments: request
                .turns
                .iter()
                .filter_map(|t| t.segment.as_ref().map(|s| s.descriptor.clone()))
                .collect(),
        });

        let script = self.scripts.get(&model).unwrap_or(&self.default).clone();
        let text = match script {
            Script::Reply(text) => text,
            Script::Fail(error) => return Err(error),
            Script::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
        };
        Ok(RunResult {
            output_tokens: Some(text.len() as u64),
            input_tokens: Some(request.turns.len() as u64),
            text,
            model_used: model,
        })
    }
}

/// Transport failure as a scripted outcome
#[must_use]
pub fn transport_failure(provider: &str) -> Script {
    Script::Fail(GatewayError::Transport {
        provider: provider.to_string(),
        message: "connection reset by peer".to_string(),
    })
}

/// Two-file corpus `[A.md (0), B.pdf (1)]`
#[must_use]
pub fn sample_corpus() -> SealedCorpus {
    seal(
        PassportMetadata::new("Verify the sample architecture", ArchitecturalStatus::Open, "v1.0")
            .with_constraint("no runtime claims"),
        CorpusEntry::in_order(vec![
            ("A.md", b"# Architecture\n\nThe core seals a corpus.\n".to_vec()),
            ("B.pdf", b"%PDF-1.7\n% sample\n".to_vec()),
        ]),
    )
    .unwrap_or_else(|e| panic!("sample corpus must seal: {e}"))
}

/// `count` interpreters on the scripted provider, models `model-0..`
#[must_use]
pub fn scripted_interpreters(count: usize) -> Vec<InterpreterConfig> {
    (0..count)
        .map(|i| InterpreterConfig::new(SCRIPTED, format!("model-{i}"), format!("Interpreter {i}")))
        .collect()
}
