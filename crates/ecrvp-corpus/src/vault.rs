//! On-disk passport store
//!
//! Layout under the vault root:
//!
//! ```text
//! corpora/<passport_id>/passport.json
//! corpora/<passport_id>/files/000_A.md
//! corpora/<passport_id>/files/001_B.pdf
//! ```
//!
//! A passport directory is written once. `passport.json` is created last, so
//! a directory without it is an interrupted seal and is never loaded.

use crate::error::CorpusError;
use crate::passport::Passport;
use crate::sealer::SealedCorpus;
use ecrvp_artifact::PassportId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const CORPORA_DIR: &str = "corpora";
const FILES_DIR: &str = "files";
const PASSPORT_FILE: &str = "passport.json";

/// Write-once filesystem store for sealed corpora
#[derive(Debug, Clone)]
pub struct CorpusVault {
    root: PathBuf,
}

impl CorpusVault {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn passport_dir(&self, id: PassportId) -> PathBuf {
        self.root.join(CORPORA_DIR).join(id.to_string())
    }

    /// Persist a sealed corpus
    ///
    /// # Errors
    /// - `ImmutabilityViolation` if this passport is already stored
    /// - `Io` on filesystem failure
    pub async fn store(&self, corpus: &SealedCorpus) -> Result<(), CorpusError> {
        let passport = corpus.passport();
        let dir = self.passport_dir(passport.id());
        tokio::fs::create_dir_all(self.root.join(CORPORA_DIR)).await?;

        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CorpusError::ImmutabilityViolation {
                    passport_id: passport.id(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let files_dir = dir.join(FILES_DIR);
        tokio::fs::create_dir(&files_dir).await?;
        for (file, bytes) in corpus.iter() {
            write_new(&files_dir.join(file.storage_name()), bytes).await?;
        }

        let record = serde_json::to_vec_pretty(passport)?;
        write_new(&dir.join(PASSPORT_FILE), &record).await?;

        tracing::info!(
            passport_id = %passport.id(),
            path = %dir.display(),
            "corpus stored"
        );
        Ok(())
    }

    /// Load a passport record without its content
    ///
    /// # Errors
    /// `NotFound` if absent, `Serialization` if the record is malformed
    pub async fn load_passport(&self, id: PassportId) -> Result<Passport, CorpusError> {
        let path = self.passport_dir(id).join(PASSPORT_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CorpusError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Load and re-verify a sealed corpus
    ///
    /// # Errors
    /// - `NotFound` if the passport is absent
    /// - `IntegrityMismatch` if any stored byte diverges from the passport
    pub async fn load(&self, id: PassportId) -> Result<SealedCorpus, CorpusError> {
        let passport = self.load_passport(id).await?;
        let files_dir = self.passport_dir(id).join(FILES_DIR);

        let mut contents = Vec::with_capacity(passport.files().len());
        for file in passport.files() {
            match tokio::fs::read(files_dir.join(file.storage_name())).await {
                Ok(bytes) => contents.push(bytes),
                // a missing file surfaces as a count divergence below
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }

        SealedCorpus::from_parts(passport, contents)
    }

    /// Identifiers of every fully stored passport
    ///
    /// # Errors
    /// `Io` on filesystem failure
    pub async fn list(&self) -> Result<Vec<PassportId>, CorpusError> {
        let mut entries = match tokio::fs::read_dir(self.root.join(CORPORA_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<PassportId>().ok())
            else {
                continue;
            };
            if tokio::fs::try_exists(entry.path().join(PASSPORT_FILE)).await? {
                ids.push(id);
            }
        }
        ids.sort_by_key(ToString::to_string);
        Ok(ids)
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), CorpusError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
