//! Passport and corpus file records
//!
//! A [`Passport`] can only be produced by [`crate::seal`]. Its fields are
//! private and exposed read-only; any change means sealing a new passport
//! with a new identifier and fingerprint.

use chrono::{DateTime, Utc};
use ecrvp_artifact::{ContentHash, FingerprintBuilder, PassportId};
use serde::{Deserialize, Serialize};
use std::fmt;

const PASSPORT_DOMAIN: &str = "ecrvp.passport.v1";

/// Whether the described architecture is still evolving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitecturalStatus {
    Open,
    Closed,
}

impl ArchitecturalStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ArchitecturalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sealed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFile {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: ContentHash,
    pub canonical_order: u32,
}

impl CorpusFile {
    /// Storage name, unique within a passport (`007_name.md`)
    #[must_use]
    pub fn storage_name(&self) -> String {
        format!("{:03}_{}", self.canonical_order, self.filename)
    }
}

/// Caller-supplied passport metadata, covered by the passport fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportMetadata {
    pub purpose: String,
    pub architectural_status: ArchitecturalStatus,
    pub canon_version: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl PassportMetadata {
    /// Metadata without constraints
    #[must_use]
    pub fn new(
        purpose: impl Into<String>,
        architectural_status: ArchitecturalStatus,
        canon_version: impl Into<String>,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            architectural_status,
            canon_version: canon_version.into(),
            constraints: Vec::new(),
        }
    }

    /// Append a scope constraint
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

/// Immutable, fingerprinted manifest of an ordered document set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passport {
    passport_id: PassportId,
    created_at: DateTime<Utc>,
    purpose: String,
    architectural_status: ArchitecturalStatus,
    canon_version: String,
    constraints: Vec<String>,
    files: Vec<CorpusFile>,
    passport_fingerprint: ContentHash,
}

impl Passport {
    /// Files must already be sorted by canonical order.
    pub(crate) fn new(metadata: PassportMetadata, files: Vec<CorpusFile>) -> Self {
        let passport_fingerprint = fingerprint(&metadata, &files);
        Self {
            passport_id: PassportId::new(),
            created_at: Utc::now(),
            purpose: metadata.purpose,
            architectural_status: metadata.architectural_status,
            canon_version: metadata.canon_version,
            constraints: metadata.constraints,
            files,
            passport_fingerprint,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> PassportId {
        self.passport_id
    }

    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    #[must_use]
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    #[inline]
    #[must_use]
    pub fn architectural_status(&self) -> ArchitecturalStatus {
        self.architectural_status
    }

    #[inline]
    #[must_use]
    pub fn canon_version(&self) -> &str {
        &self.canon_version
    }

    #[inline]
    #[must_use]
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    /// Files in canonical order
    #[inline]
    #[must_use]
    pub fn files(&self) -> &[CorpusFile] {
        &self.files
    }

    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        self.passport_fingerprint
    }

    /// Total corpus size in bytes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Metadata as supplied at sealing time
    #[must_use]
    pub fn metadata(&self) -> PassportMetadata {
        PassportMetadata {
            purpose: self.purpose.clone(),
            architectural_status: self.architectural_status,
            canon_version: self.canon_version.clone(),
            constraints: self.constraints.clone(),
        }
    }

    /// Recompute the fingerprint from the recorded files and metadata
    #[must_use]
    pub fn recompute_fingerprint(&self) -> ContentHash {
        fingerprint(&self.metadata(), &self.files)
    }

    /// Whether the stored fingerprint still matches the record
    #[inline]
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.recompute_fingerprint() == self.passport_fingerprint
    }
}

/// Passport fingerprint: every file fingerprint and filename in canonical
/// order, the file count, then the metadata fields.
pub(crate) fn fingerprint(metadata: &PassportMetadata, files: &[CorpusFile]) -> ContentHash {
    let mut builder = FingerprintBuilder::new(PASSPORT_DOMAIN);
    for file in files {
        builder = builder.hash(&file.sha256).text(&file.filename);
    }
    builder = builder
        .number(files.len() as u64)
        .text(&metadata.purpose)
        .text(metadata.architectural_status.as_str())
        .text(&metadata.canon_version)
        .number(metadata.constraints.len() as u64);
    for constraint in &metadata.constraints {
        builder = builder.text(constraint);
    }
    builder.finish()
}
