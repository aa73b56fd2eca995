//! Corpus sealing and integrity re-verification
//!
//! [`seal`] is pure: it fingerprints every file, orders them canonically and
//! produces a [`SealedCorpus`]. Persisting the result is the caller's job
//! (see [`crate::CorpusVault`]).

use crate::error::CorpusError;
use crate::passport::{CorpusFile, Passport, PassportMetadata};
use ecrvp_artifact::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One file offered for sealing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub filename: String,
    pub canonical_order: u32,
    pub bytes: Vec<u8>,
}

impl CorpusEntry {
    #[must_use]
    pub fn new(filename: impl Into<String>, canonical_order: u32, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            canonical_order,
            bytes,
        }
    }

    /// Assign canonical order from list position (0-based)
    #[must_use]
    pub fn in_order<N: Into<String>>(files: Vec<(N, Vec<u8>)>) -> Vec<Self> {
        files
            .into_iter()
            .zip(0u32..)
            .map(|((name, bytes), order)| Self::new(name, order, bytes))
            .collect()
    }
}

/// A passport together with the exact bytes it seals
///
/// `contents[i]` belongs to `passport.files()[i]`.
#[derive(Debug, Clone)]
pub struct SealedCorpus {
    passport: Passport,
    contents: Vec<Arc<[u8]>>,
}

impl SealedCorpus {
    /// Pair a passport with previously stored bytes, re-verifying both
    ///
    /// # Errors
    /// `IntegrityMismatch` if the bytes or the passport record diverge
    pub fn from_parts(passport: Passport, contents: Vec<Vec<u8>>) -> Result<Self, CorpusError> {
        let check = verify_integrity(&passport, &contents);
        if let Some(divergence) = check.first_divergence {
            return Err(CorpusError::IntegrityMismatch {
                passport_id: passport.id(),
                check: divergence.to_string(),
            });
        }
        Ok(Self {
            passport,
            contents: contents.into_iter().map(Arc::from).collect(),
        })
    }

    #[inline]
    #[must_use]
    pub fn passport(&self) -> &Passport {
        &self.passport
    }

    /// Raw bytes in canonical order
    #[inline]
    #[must_use]
    pub fn contents(&self) -> &[Arc<[u8]>] {
        &self.contents
    }

    /// Files paired with their bytes, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (&CorpusFile, &Arc<[u8]>)> {
        self.passport.files().iter().zip(self.contents.iter())
    }

    /// Re-check the held bytes against the passport
    #[must_use]
    pub fn verify(&self) -> IntegrityCheck {
        verify_integrity(&self.passport, &self.contents)
    }
}

/// Seal an ordered file set into a passport
///
/// # Errors
/// `Validation` if the list is empty, a filename is blank or contains a path
/// separator, or two entries share a canonical order position.
pub fn seal(
    metadata: PassportMetadata,
    mut entries: Vec<CorpusEntry>,
) -> Result<SealedCorpus, CorpusError> {
    if entries.is_empty() {
        return Err(CorpusError::validation("corpus file list is empty"));
    }

    let mut seen = BTreeSet::new();
    for entry in &entries {
        if entry.filename.trim().is_empty() {
            return Err(CorpusError::validation(format!(
                "file at canonical order {} has an empty filename",
                entry.canonical_order
            )));
        }
        if entry.filename.contains(['/', '\\']) || entry.filename == ".." {
            return Err(CorpusError::validation(format!(
                "filename {:?} must not contain a path separator",
                entry.filename
            )));
        }
        if !seen.insert(entry.canonical_order) {
            return Err(CorpusError::validation(format!(
                "duplicate canonical order position {}",
                entry.canonical_order
            )));
        }
    }

    entries.sort_by_key(|e| e.canonical_order);

    let files = entries
        .iter()
        .map(|e| CorpusFile {
            filename: e.filename.clone(),
            size_bytes: e.bytes.len() as u64,
            sha256: ContentHash::compute(&e.bytes),
            canonical_order: e.canonical_order,
        })
        .collect();
    let passport = Passport::new(metadata, files);

    tracing::info!(
        passport_id = %passport.id(),
        files = passport.files().len(),
        fingerprint = %passport.fingerprint().short(),
        "corpus sealed"
    );

    Ok(SealedCorpus {
        passport,
        contents: entries.into_iter().map(|e| Arc::from(e.bytes)).collect(),
    })
}

/// First point where presented content diverges from a passport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// Different number of files than sealed
    FileCount { expected: usize, actual: usize },
    /// File at this canonical position has different bytes
    File {
        index: usize,
        filename: String,
        expected: ContentHash,
        actual: ContentHash,
    },
    /// Passport record no longer matches its own fingerprint
    PassportFingerprint {
        expected: ContentHash,
        actual: ContentHash,
    },
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileCount { expected, actual } => {
                write!(f, "file count {actual} differs from sealed count {expected}")
            }
            Self::File {
                index, filename, ..
            } => write!(f, "file {index} ({filename}) fingerprint differs"),
            Self::PassportFingerprint { .. } => write!(f, "passport fingerprint differs"),
        }
    }
}

/// Result of re-verifying content against a passport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub intact: bool,
    pub first_divergence: Option<Divergence>,
}

impl IntegrityCheck {
    /// Index of the first divergent file, if the divergence is file-level
    #[must_use]
    pub fn first_divergent_file(&self) -> Option<usize> {
        match &self.first_divergence {
            Some(Divergence::File { index, .. }) => Some(*index),
            Some(Divergence::FileCount { expected, actual }) => Some((*expected).min(*actual)),
            _ => None,
        }
    }
}

/// Recompute every fingerprint and compare against the passport
///
/// `files` must be in canonical order. The passport record itself is
/// checked first, then each file in order.
#[must_use]
pub fn verify_integrity<B: AsRef<[u8]>>(passport: &Passport, files: &[B]) -> IntegrityCheck {
    let divergence = first_divergence(passport, files);
    IntegrityCheck {
        intact: divergence.is_none(),
        first_divergence: divergence,
    }
}

fn first_divergence<B: AsRef<[u8]>>(passport: &Passport, files: &[B]) -> Option<Divergence> {
    let recomputed = passport.recompute_fingerprint();
    if recomputed != passport.fingerprint() {
        return Some(Divergence::PassportFingerprint {
            expected: passport.fingerprint(),
            actual: recomputed,
        });
    }

    for (index, (sealed, bytes)) in passport.files().iter().zip(files).enumerate() {
        let actual = ContentHash::compute(bytes.as_ref());
        if actual != sealed.sha256 {
            return Some(Divergence::File {
                index,
                filename: sealed.filename.clone(),
                expected: sealed.sha256,
                actual,
            });
        }
    }

    if files.len() != passport.files().len() {
        return Some(Divergence::FileCount {
            expected: passport.files().len(),
            actual: files.len(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passport::ArchitecturalStatus;
    use proptest::prelude::*;

    fn metadata() -> PassportMetadata {
        PassportMetadata::new("audit", ArchitecturalStatus::Open, "v1")
    }

    fn two_files() -> Vec<CorpusEntry> {
        CorpusEntry::in_order(vec![
            ("A.md", b"# alpha".to_vec()),
            ("B.pdf", b"%PDF-beta".to_vec()),
        ])
    }

    #[test]
    fn seal_rejects_empty() {
        let result = seal(metadata(), Vec::new());
        assert!(matches!(result, Err(CorpusError::Validation { .. })));
    }

    #[test]
    fn seal_rejects_duplicate_order() {
        let entries = vec![
            CorpusEntry::new("a", 1, b"a".to_vec()),
            CorpusEntry::new("b", 1, b"b".to_vec()),
        ];
        let err = seal(metadata(), entries).unwrap_err();
        assert!(err.to_string().contains("duplicate canonical order position 1"));
    }

    #[test]
    fn seal_rejects_path_like_filenames() {
        let entries = vec![CorpusEntry::new("../etc/passwd", 0, b"x".to_vec())];
        assert!(matches!(
            seal(metadata(), entries),
            Err(CorpusError::Validation { .. })
        ));
    }

    #[test]
    fn seal_sorts_by_canonical_order() {
        let entries = vec![
            CorpusEntry::new("second", 5, b"2".to_vec()),
            CorpusEntry::new("first", 2, b"1".to_vec()),
        ];
        let corpus = seal(metadata(), entries).unwrap();
        let names: Vec<_> = corpus.passport().files().iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(&*corpus.contents()[0], b"1");
    }

    #[test]
    fn verify_detects_first_tampered_file() {
        let corpus = seal(metadata(), two_files()).unwrap();
        let files = vec![b"# alpha".to_vec(), b"%PDF-BETA".to_vec()];
        let check = verify_integrity(corpus.passport(), &files);
        assert!(!check.intact);
        assert_eq!(check.first_divergent_file(), Some(1));
    }

    #[test]
    fn verify_detects_missing_file() {
        let corpus = seal(metadata(), two_files()).unwrap();
        let check = verify_integrity(corpus.passport(), &[b"# alpha".to_vec()]);
        assert_eq!(
            check.first_divergence,
            Some(Divergence::FileCount {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(check.first_divergent_file(), Some(1));
    }

    #[test]
    fn verify_intact_corpus() {
        let corpus = seal(metadata(), two_files()).unwrap();
        assert!(corpus.verify().intact);
    }

    #[test]
    fn from_parts_rejects_tampered_bytes() {
        let corpus = seal(metadata(), two_files()).unwrap();
        let result = SealedCorpus::from_parts(
            corpus.passport().clone(),
            vec![b"changed".to_vec(), b"%PDF-beta".to_vec()],
        );
        assert!(matches!(result, Err(CorpusError::IntegrityMismatch { .. })));
    }

    proptest! {
        #[test]
        fn seal_is_deterministic(files in proptest::collection::vec(
            ("[a-z]{1,8}\\.md", proptest::collection::vec(any::<u8>(), 0..64)),
            1..6,
        )) {
            let a = seal(metadata(), CorpusEntry::in_order(files.clone())).unwrap();
            let b = seal(metadata(), CorpusEntry::in_order(files)).unwrap();
            prop_assert_eq!(a.passport().fingerprint(), b.passport().fingerprint());
            prop_assert_ne!(a.passport().id(), b.passport().id());
        }
    }
}
