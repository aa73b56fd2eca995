//! License collaborator seam

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque answer from a license collaborator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LicenseStatus {
    pub valid: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LicenseStatus {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("reason".to_string(), reason.into());
        Self {
            valid: false,
            metadata,
        }
    }
}

/// Consulted once before a session executes
#[async_trait::async_trait]
pub trait LicenseGate: Send + Sync {
    async fn check(&self) -> LicenseStatus;
}

/// Gate that always allows execution
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl LicenseGate for AllowAll {
    async fn check(&self) -> LicenseStatus {
        LicenseStatus::valid()
    }
}
