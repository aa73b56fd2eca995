//! Gateway: provider registry, segmentation and channel opening

use crate::catalog::{catalog, Capabilities};
use crate::channel::{Channel, InterpreterProvider};
use crate::config::{GatewayConfig, InterpreterConfig};
use crate::error::GatewayError;
use crate::http::HttpProvider;
use ecrvp_corpus::{SealedCorpus, SegmentPlan};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Uniform entry point over every registered provider
#[derive(Clone)]
pub struct Gateway {
    providers: HashMap<String, Arc<dyn InterpreterProvider>>,
    credentials: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.providers.keys().collect();
        ids.sort();
        f.debug_struct("Gateway").field("providers", &ids).finish_non_exhaustive()
    }
}

impl Gateway {
    /// Gateway with an HTTP adapter for every catalog provider
    ///
    /// # Errors
    /// `Transport` if the HTTP client cannot be built
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport {
                provider: "gateway".to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut gateway = Self::empty();
        for descriptor in catalog() {
            let mut provider = HttpProvider::new(descriptor, client.clone());
            if let Some(url) = config.endpoints.get(descriptor.id) {
                provider = provider.with_base_url(url.clone());
            }
            if let Some(bytes) = config.segment_bytes.get(descriptor.id) {
                provider = provider.with_max_segment_bytes(*bytes);
            }
            gateway = gateway.with_provider(Arc::new(provider));
        }
        Ok(gateway)
    }

    /// Gateway with no providers; register them with [`Self::with_provider`]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            credentials: Arc::new(|var| std::env::var(var).ok()),
        }
    }

    /// Register or replace the adapter for `provider.id()`
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn InterpreterProvider>) -> Self {
        self.providers.insert(provider.id().to_string(), provider);
        self
    }

    /// Replace credential lookup (environment variables by default)
    #[must_use]
    pub fn with_credentials(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.credentials = Arc::new(lookup);
        self
    }

    fn provider(&self, config: &InterpreterConfig) -> Result<&Arc<dyn InterpreterProvider>, GatewayError> {
        self.providers.get(&config.provider).ok_or_else(|| {
            GatewayError::validation(format!("no adapter registered for provider {:?}", config.provider))
        })
    }

    /// Validate a configuration without opening anything
    ///
    /// # Errors
    /// `Validation` for malformed fields or an unregistered provider
    pub fn validate(&self, config: &InterpreterConfig) -> Result<(), GatewayError> {
        config.validate()?;
        self.provider(config)?;
        Ok(())
    }

    /// Declared capabilities for a configuration
    ///
    /// # Errors
    /// `Validation` if the provider is not registered
    pub fn capabilities(&self, config: &InterpreterConfig) -> Result<Capabilities, GatewayError> {
        Ok(self.provider(config)?.capabilities(&config.model))
    }

    /// Segment bound shared by every interpreter of a session: the smallest
    /// declared per-call limit
    ///
    /// # Errors
    /// `Validation` if the list is empty or a provider is unknown
    pub fn segment_bound(&self, configs: &[InterpreterConfig]) -> Result<usize, GatewayError> {
        let mut bound: Option<usize> = None;
        for config in configs {
            let limit = self.capabilities(config)?.max_segment_bytes;
            bound = Some(bound.map_or(limit, |b| b.min(limit)));
        }
        bound.ok_or_else(|| GatewayError::validation("no interpreters configured"))
    }

    /// One segment plan for the whole session
    ///
    /// # Errors
    /// `Validation` if no bound can be derived or the bound is zero
    pub fn plan(
        &self,
        corpus: &SealedCorpus,
        configs: &[InterpreterConfig],
    ) -> Result<SegmentPlan, GatewayError> {
        let bound = self.segment_bound(configs)?;
        SegmentPlan::build(corpus, bound).map_err(|e| GatewayError::validation(e.to_string()))
    }

    /// Open an isolated channel
    ///
    /// # Errors
    /// - `Validation` for a malformed configuration
    /// - `Authentication` if a required credential is not set
    pub fn open_channel(&self, config: &InterpreterConfig) -> Result<Channel, GatewayError> {
        let descriptor = config.validate()?;
        let provider = Arc::clone(self.provider(config)?);
        let required = descriptor.is_some_and(|d| d.requires_credential());

        let credential = match config.credential_var() {
            Some(var) => {
                let value = (self.credentials)(&var).filter(|v| !v.trim().is_empty());
                if value.is_none() && required {
                    return Err(GatewayError::Authentication {
                        provider: config.provider.clone(),
                        message: format!("credential variable {var} is not set"),
                    });
                }
                value
            }
            None => None,
        };

        let capabilities = provider.capabilities(&config.model);
        let channel = Channel::new(config.clone(), capabilities, provider, credential);
        tracing::debug!(
            channel = %channel.id(),
            provider = %config.provider,
            model = %config.model,
            "channel opened"
        );
        Ok(channel)
    }
}
