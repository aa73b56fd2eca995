//! Interpreter and gateway configuration

use crate::catalog::{descriptor, ProviderDescriptor};
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const fn default_max_tokens() -> u32 {
    16_384
}

/// One interpreter of a session
///
/// Unknown fields are rejected: a configuration can choose a provider and
/// model, never alter what is transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpreterConfig {
    pub provider: String,
    pub model: String,
    pub display_name: String,
    /// Name of the environment variable holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
}

impl InterpreterConfig {
    /// Configuration with default generation parameters
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            display_name: display_name.into(),
            api_key_env: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }

    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Credential variable: explicit, else the provider default
    #[must_use]
    pub fn credential_var(&self) -> Option<String> {
        self.api_key_env.clone().or_else(|| {
            descriptor(&self.provider)
                .and_then(|d| d.api_key_env)
                .map(str::to_string)
        })
    }

    /// Structural checks that need no network access
    ///
    /// Returns the catalog entry for the provider, if it has one. Providers
    /// outside the catalog are accepted here; the gateway rejects them if
    /// no adapter is registered.
    ///
    /// # Errors
    /// `Validation` naming the offending field
    pub fn validate(&self) -> Result<Option<&'static ProviderDescriptor>, GatewayError> {
        if self.provider.trim().is_empty() {
            return Err(GatewayError::validation("interpreter provider is empty"));
        }
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation(format!(
                "interpreter model is empty for provider {}",
                self.provider
            )));
        }
        if self.max_tokens == 0 {
            return Err(GatewayError::validation(format!(
                "max_tokens must be positive for {}",
                self.display_name
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::validation(format!(
                "temperature {} out of range for {}",
                self.temperature, self.display_name
            )));
        }
        if self.api_key_env.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(GatewayError::validation(format!(
                "api_key_env is blank for {}",
                self.display_name
            )));
        }
        Ok(descriptor(&self.provider))
    }
}

const fn default_request_timeout_secs() -> u64 {
    600
}

/// Gateway-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Endpoint overrides keyed by provider id
    pub endpoints: HashMap<String, String>,
    /// Per-call segment limit overrides keyed by provider id
    pub segment_bytes: HashMap<String, usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            endpoints: HashMap::new(),
            segment_bytes: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn with_endpoint(mut self, provider: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(provider.into(), url.into());
        self
    }

    #[must_use]
    pub fn with_segment_bytes(mut self, provider: impl Into<String>, bytes: usize) -> Self {
        self.segment_bytes.insert(provider.into(), bytes);
        self
    }
}
