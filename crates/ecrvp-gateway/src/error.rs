//! Gateway error taxonomy
//!
//! Every variant except `Validation` is a per-run failure: it ends the
//! owning run and nothing else. The gateway never retries.

/// Gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Malformed interpreter configuration, rejected before any network call
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Missing, invalid or rejected credential
    #[error("authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    /// Provider refused the request for rate reasons
    #[error("rate limited by {provider}: {message}")]
    RateLimit {
        provider: String,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Content too large for the provider even after segmentation
    #[error("capacity exceeded for {provider}/{model}: {reason}")]
    CapacityExceeded {
        provider: String,
        model: String,
        reason: String,
    },

    /// Network failure, timeout or unexpected HTTP status
    #[error("transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    /// Response body could not be interpreted
    #[error("malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}

impl GatewayError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Stable tag recorded in artifact metadata
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Authentication { .. } => "authentication_error",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::CapacityExceeded { .. } => "capacity_exceeded_error",
            Self::Transport { .. } => "transport_error",
            Self::MalformedResponse { .. } => "malformed_response_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = GatewayError::Transport {
            provider: "openai".into(),
            message: "connection reset".into(),
        };
        assert_eq!(err.kind(), "transport_error");
        assert_eq!(
            err.to_string(),
            "transport error from openai: connection reset"
        );
    }
}
