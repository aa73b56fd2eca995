//! Isolated channels
//!
//! A [`Channel`] owns its transcript outright. Providers are stateless with
//! respect to channels: every call receives the complete transcript of the
//! one channel it serves, so no state is shared between open channels.

use crate::catalog::Capabilities;
use crate::config::InterpreterConfig;
use crate::error::GatewayError;
use ecrvp_corpus::FileSegment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One user turn: text plus an optional file segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub text: String,
    pub segment: Option<FileSegment>,
}

impl Turn {
    /// Provider-independent rendering used for the recorded prompt
    #[must_use]
    pub fn canonical_text(&self) -> String {
        match &self.segment {
            None => self.text.clone(),
            Some(seg) => {
                let d = &seg.descriptor;
                format!(
                    "[segment {}: {} part {}/{} bytes {}..{} sha256 {}]\n{}",
                    d.index + 1,
                    d.filename,
                    d.part,
                    d.parts,
                    d.byte_start,
                    d.byte_end,
                    d.sha256,
                    self.text
                )
            }
        }
    }
}

/// Everything a provider needs to serve one channel
#[derive(Debug, Clone, Copy)]
pub struct ChannelRequest<'a> {
    pub config: &'a InterpreterConfig,
    pub credential: Option<&'a str>,
    pub turns: &'a [Turn],
}

/// Captured response of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub text: String,
    pub model_used: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Adapter for one provider
#[async_trait::async_trait]
pub trait InterpreterProvider: Send + Sync {
    /// Provider identifier (`anthropic`, `openai`, ...)
    fn id(&self) -> &str;

    /// Declared limits for a model
    fn capabilities(&self, model: &str) -> Capabilities;

    /// Send a finalized transcript and wait for the single response
    async fn complete(&self, request: ChannelRequest<'_>) -> Result<RunResult, GatewayError>;
}

/// Opaque channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Finalized,
}

/// Exclusive handle to one isolated conversation
///
/// Methods take `&mut self` or `self`, so transmission within a channel is
/// strictly ordered.
pub struct Channel {
    id: ChannelId,
    config: InterpreterConfig,
    capabilities: Capabilities,
    provider: Arc<dyn InterpreterProvider>,
    credential: Option<String>,
    turns: Vec<Turn>,
    transmitted_bytes: u64,
    state: ChannelState,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("turns", &self.turns.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        config: InterpreterConfig,
        capabilities: Capabilities,
        provider: Arc<dyn InterpreterProvider>,
        credential: Option<String>,
    ) -> Self {
        Self {
            id: ChannelId::new(),
            config,
            capabilities,
            provider,
            credential,
            turns: Vec::new(),
            transmitted_bytes: 0,
            state: ChannelState::Open,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Queue the next turn
    ///
    /// # Errors
    /// - `Validation` after `finalize`
    /// - `CapacityExceeded` if the segment exceeds the per-call limit
    pub fn transmit(
        &mut self,
        text: impl Into<String>,
        segment: Option<FileSegment>,
    ) -> Result<(), GatewayError> {
        if self.state != ChannelState::Open {
            return Err(GatewayError::validation(format!(
                "channel {} is finalized",
                self.id
            )));
        }
        if let Some(seg) = &segment {
            if seg.content.len() > self.capabilities.max_segment_bytes {
                return Err(self.capacity_error(format!(
                    "segment {} is {} bytes, per-call limit is {}",
                    seg.descriptor.index,
                    seg.content.len(),
                    self.capabilities.max_segment_bytes
                )));
            }
        }

        let text = text.into();
        self.transmitted_bytes += text.len() as u64
            + segment.as_ref().map_or(0, |s| s.content.len() as u64);
        self.turns.push(Turn { text, segment });
        Ok(())
    }

    /// Close the transcript and check it fits the context window
    ///
    /// # Errors
    /// `CapacityExceeded` if the transcript plus the output budget cannot
    /// fit the model's context window
    pub fn finalize(&mut self) -> Result<(), GatewayError> {
        self.state = ChannelState::Finalized;
        let required = Capabilities::estimate_tokens(self.transmitted_bytes)
            + u64::from(self.config.max_tokens);
        if required > self.capabilities.context_tokens {
            return Err(self.capacity_error(format!(
                "needs about {required} tokens, context window is {}",
                self.capabilities.context_tokens
            )));
        }
        Ok(())
    }

    /// Provider-independent text of every queued turn, in order
    #[must_use]
    pub fn prompt_text(&self) -> String {
        self.turns
            .iter()
            .map(Turn::canonical_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Deliver the transcript and wait for the response
    ///
    /// # Errors
    /// `Validation` if the channel was not finalized, else whatever the
    /// provider reports
    pub async fn await_result(self) -> Result<RunResult, GatewayError> {
        if self.state != ChannelState::Finalized {
            return Err(GatewayError::validation(format!(
                "channel {} awaited before finalize",
                self.id
            )));
        }
        tracing::debug!(
            channel = %self.id,
            provider = %self.config.provider,
            model = %self.config.model,
            turns = self.turns.len(),
            "awaiting interpreter response"
        );
        self.provider
            .complete(ChannelRequest {
                config: &self.config,
                credential: self.credential.as_deref(),
                turns: &self.turns,
            })
            .await
    }

    fn capacity_error(&self, reason: String) -> GatewayError {
        GatewayError::CapacityExceeded {
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            reason,
        }
    }
}
