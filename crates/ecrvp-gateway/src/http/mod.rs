//! HTTP adapters for the built-in providers
//!
//! One [`HttpProvider`] per catalog entry. The wire format decides how the
//! transcript is rendered; status handling is shared.

mod anthropic;
mod content;
mod ollama;
mod openai;

use crate::catalog::{Capabilities, ProviderDescriptor, WireFormat};
use crate::channel::{ChannelRequest, InterpreterProvider, RunResult};
use crate::error::GatewayError;
use reqwest::StatusCode;
use serde_json::Value;

/// Adapter speaking one provider's HTTP API
#[derive(Debug, Clone)]
pub struct HttpProvider {
    descriptor: &'static ProviderDescriptor,
    client: reqwest::Client,
    base_url: String,
    max_segment_bytes: usize,
}

impl HttpProvider {
    #[must_use]
    pub fn new(descriptor: &'static ProviderDescriptor, client: reqwest::Client) -> Self {
        Self {
            descriptor,
            client,
            base_url: descriptor.default_base_url.to_string(),
            max_segment_bytes: descriptor.max_segment_bytes,
        }
    }

    /// Replace the default endpoint (self-hosted or proxied deployments)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_max_segment_bytes(mut self, bytes: usize) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    fn url(&self, request: &ChannelRequest<'_>) -> String {
        let base = request
            .config
            .base_url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        match self.descriptor.wire {
            WireFormat::AnthropicMessages => format!("{base}/v1/messages"),
            WireFormat::OpenAiChat => format!("{base}/chat/completions"),
            WireFormat::OllamaChat => format!("{base}/api/chat"),
        }
    }

    fn transport(&self, message: impl Into<String>) -> GatewayError {
        GatewayError::Transport {
            provider: self.descriptor.id.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl InterpreterProvider for HttpProvider {
    fn id(&self) -> &str {
        self.descriptor.id
    }

    fn capabilities(&self, model: &str) -> Capabilities {
        Capabilities {
            max_segment_bytes: self.max_segment_bytes,
            ..self.descriptor.capabilities(model)
        }
    }

    async fn complete(&self, request: ChannelRequest<'_>) -> Result<RunResult, GatewayError> {
        let provider = self.descriptor.id;
        let native_files = self.descriptor.native_files;
        let body = match self.descriptor.wire {
            WireFormat::AnthropicMessages => anthropic::request_body(&request, native_files),
            WireFormat::OpenAiChat => openai::request_body(&request, native_files),
            WireFormat::OllamaChat => ollama::request_body(&request),
        };

        let mut builder = self.client.post(self.url(&request)).json(&body);
        builder = match (self.descriptor.wire, request.credential) {
            (WireFormat::AnthropicMessages, Some(key)) => builder
                .header("x-api-key", key)
                .header("anthropic-version", anthropic::API_VERSION),
            (_, Some(key)) => builder.bearer_auth(key),
            (_, None) => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport(describe_reqwest(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let error = classify_status(provider, &request.config.model, status, &text, retry_after_secs);
            tracing::warn!(
                provider,
                model = %request.config.model,
                status = status.as_u16(),
                kind = error.kind(),
                "interpreter request failed"
            );
            return Err(error);
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.transport(describe_reqwest(&e)))?;
        let value: Value = serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse {
            provider: provider.to_string(),
            message: format!("invalid JSON body: {e}"),
        })?;

        let mut result = match self.descriptor.wire {
            WireFormat::AnthropicMessages => anthropic::parse_response(provider, &value),
            WireFormat::OpenAiChat => openai::parse_response(provider, &value),
            WireFormat::OllamaChat => ollama::parse_response(provider, &request.config.model, &value),
        }?;
        if result.model_used.is_empty() {
            result.model_used.clone_from(&request.config.model);
        }
        Ok(result)
    }
}

fn describe_reqwest(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

/// Extract a readable message from an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json["error"]["message"]
                .as_str()
                .or_else(|| json["error"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Map a non-success status to the gateway taxonomy
pub(crate) fn classify_status(
    provider: &str,
    model: &str,
    status: StatusCode,
    body: &str,
    retry_after_secs: Option<u64>,
) -> GatewayError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Authentication {
            provider: provider.to_string(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimit {
            provider: provider.to_string(),
            message,
            retry_after_secs,
        },
        StatusCode::PAYLOAD_TOO_LARGE => GatewayError::CapacityExceeded {
            provider: provider.to_string(),
            model: model.to_string(),
            reason: message,
        },
        _ => GatewayError::Transport {
            provider: provider.to_string(),
            message: format!("HTTP {}: {message}", status.as_u16()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let body = r#"{"error":{"message":"bad key"}}"#;
        let err = classify_status("openai", "gpt-4o", StatusCode::UNAUTHORIZED, body, None);
        assert_eq!(err.kind(), "authentication_error");
        assert!(err.to_string().contains("bad key"));

        let err = classify_status("openai", "gpt-4o", StatusCode::TOO_MANY_REQUESTS, "slow down", Some(30));
        assert_eq!(
            err,
            GatewayError::RateLimit {
                provider: "openai".into(),
                message: "slow down".into(),
                retry_after_secs: Some(30),
            }
        );

        let err = classify_status("xai", "grok-4", StatusCode::BAD_GATEWAY, "", None);
        assert_eq!(err.kind(), "transport_error");
    }
}
