//! Orchestrator configuration
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! execution_mode = "sequential"
//! max_concurrent_runs = 4
//! run_timeout_secs = 900
//! data_dir = "/var/lib/ecrvp"
//!
//! [gateway]
//! request_timeout_secs = 600
//! endpoints = { ollama = "http://gpu-box:11434" }
//! ```

use crate::error::OrchestratorError;
use crate::types::ExecutionMode;
use ecrvp_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default scheduling when a request does not choose one
    pub execution_mode: ExecutionMode,
    /// Upper bound on runs awaiting a response at once (parallel mode)
    pub max_concurrent_runs: usize,
    /// Per-run response timeout; unset waits for the HTTP timeout
    pub run_timeout_secs: Option<u64>,
    /// Fewer strict verifiers than this logs a warning
    pub recommended_min_verifiers: usize,
    /// Root for the corpus vault, artifacts and session snapshots;
    /// unset keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub gateway: GatewayConfig,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// `Config` with the parser message
    pub fn from_toml_str(content: &str) -> Result<Self, OrchestratorError> {
        toml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    #[inline]
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// # Errors
    /// `Config` for values that would stall execution
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_concurrent_runs == 0 {
            return Err(OrchestratorError::Config(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(OrchestratorError::Config(
                "run_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Parallel,
            max_concurrent_runs: 8,
            run_timeout_secs: None,
            recommended_min_verifiers: 3,
            data_dir: None,
            gateway: GatewayConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.recommended_min_verifiers, 3);
    }

    #[test]
    fn parses_nested_gateway_table() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            execution_mode = "sequential"
            run_timeout_secs = 30

            [gateway]
            endpoints = { ollama = "http://gpu-box:11434" }
            "#,
        )
        .unwrap();
        assert_eq!(config.execution_mode, ExecutionMode::Sequential);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.gateway.endpoints["ollama"], "http://gpu-box:11434");
        assert_eq!(config.gateway.request_timeout_secs, 600);
    }

    #[test]
    fn unknown_mode_is_config_error() {
        let err = OrchestratorConfig::from_toml_str("execution_mode = \"burst\"").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = OrchestratorConfig::new().with_max_concurrent_runs(0);
        assert!(config.validate().is_err());
    }
}
