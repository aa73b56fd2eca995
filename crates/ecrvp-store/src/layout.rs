//! Per-run file set
//!
//! The same file names are used by the filesystem store and inside export
//! bundles:
//!
//! | file | content |
//! |---|---|
//! | `artifact.json` | fingerprints and chain position |
//! | `metadata.json` | provider, model, timestamps, outcome, tokens |
//! | `prompt.txt` | exact transmitted text |
//! | `corpus_manifest.json` | exact transmitted segment list |
//! | `response_raw.txt` | captured payload bytes |
//! | `response_modes.json` | derived view, outside the chain |
//!
//! `metadata.json`, `prompt.txt` and `corpus_manifest.json` together hold
//! exactly one [`ArtifactMetadata`].

use crate::artifact::{Artifact, ArtifactMetadata, ArtifactRecord};
use crate::error::StoreError;
use ecrvp_artifact::RunId;
use serde_json::Value;
use std::collections::BTreeMap;

pub const ARTIFACT_FILE: &str = "artifact.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const MANIFEST_FILE: &str = "corpus_manifest.json";
pub const RESPONSE_FILE: &str = "response_raw.txt";
pub const MODES_FILE: &str = "response_modes.json";

const PROMPT_KEY: &str = "prompt";
const MANIFEST_KEY: &str = "corpus_manifest";

/// Files of one run, keyed by file name
pub type RunFiles = BTreeMap<String, Vec<u8>>;

/// Split an artifact into its chained files
///
/// # Errors
/// Propagates serialization failure
pub fn to_files(artifact: &Artifact) -> Result<RunFiles, StoreError> {
    let mut metadata = serde_json::to_value(artifact.metadata())?;
    let mut manifest = Value::Null;
    if let Value::Object(map) = &mut metadata {
        map.remove(PROMPT_KEY);
        manifest = map.remove(MANIFEST_KEY).unwrap_or(Value::Null);
    }

    let mut files = RunFiles::new();
    files.insert(ARTIFACT_FILE.into(), serde_json::to_vec_pretty(artifact.record())?);
    files.insert(METADATA_FILE.into(), serde_json::to_vec_pretty(&metadata)?);
    files.insert(PROMPT_FILE.into(), artifact.metadata().prompt.clone().into_bytes());
    files.insert(MANIFEST_FILE.into(), serde_json::to_vec_pretty(&manifest)?);
    files.insert(RESPONSE_FILE.into(), artifact.payload().to_vec());
    Ok(files)
}

/// Reassemble an artifact from its chained files without verifying it
///
/// # Errors
/// `Malformed` if a file is missing or unreadable
pub fn from_files(run_id: RunId, files: &RunFiles) -> Result<Artifact, StoreError> {
    let malformed = |reason: String| StoreError::Malformed { run_id, reason };
    let file = |name: &str| {
        files
            .get(name)
            .ok_or_else(|| malformed(format!("missing {name}")))
    };

    let record: ArtifactRecord = serde_json::from_slice(file(ARTIFACT_FILE)?)
        .map_err(|e| malformed(format!("{ARTIFACT_FILE}: {e}")))?;
    let mut metadata: Value = serde_json::from_slice(file(METADATA_FILE)?)
        .map_err(|e| malformed(format!("{METADATA_FILE}: {e}")))?;
    let prompt = String::from_utf8(file(PROMPT_FILE)?.clone())
        .map_err(|e| malformed(format!("{PROMPT_FILE}: {e}")))?;
    let manifest: Value = serde_json::from_slice(file(MANIFEST_FILE)?)
        .map_err(|e| malformed(format!("{MANIFEST_FILE}: {e}")))?;

    let Value::Object(map) = &mut metadata else {
        return Err(malformed(format!("{METADATA_FILE} is not an object")));
    };
    map.insert(PROMPT_KEY.into(), Value::String(prompt));
    map.insert(MANIFEST_KEY.into(), manifest);
    let metadata: ArtifactMetadata = serde_json::from_value(metadata)
        .map_err(|e| malformed(format!("{METADATA_FILE}: {e}")))?;

    let payload = file(RESPONSE_FILE)?.clone();
    Ok(Artifact::from_parts(record, metadata, payload))
}

/// Require `files` to be exactly what [`to_files`] renders for `artifact`
///
/// [`from_files`] parses JSON, so whitespace or hex-case edits survive
/// reassembly and [`Artifact::verify`]. `response_modes.json` may sit
/// alongside and is not compared.
///
/// # Errors
/// `IntegrityMismatch` naming the first unexpected or differing file
pub fn check_exact(artifact: &Artifact, files: &RunFiles) -> Result<(), StoreError> {
    let record = artifact.record();
    let mismatch = |check: String| StoreError::IntegrityMismatch {
        session_id: record.session_id,
        run_id: Some(record.run_id),
        check,
    };

    let expected = to_files(artifact)?;
    if let Some(name) = files
        .keys()
        .find(|name| name.as_str() != MODES_FILE && !expected.contains_key(name.as_str()))
    {
        return Err(mismatch(format!("unexpected file {name}")));
    }
    for (name, bytes) in &expected {
        if files.get(name) != Some(bytes) {
            return Err(mismatch(format!("{name} differs from its recorded bytes")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{chain_seed, ArtifactOutcome};
    use chrono::Utc;
    use ecrvp_artifact::SessionId;

    fn artifact() -> Artifact {
        let metadata = ArtifactMetadata {
            provider: "openai".into(),
            model: "gpt".into(),
            display_name: "GPT".into(),
            outcome: ArtifactOutcome::Captured,
            error_kind: None,
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            captured_at: Utc::now(),
            input_tokens: None,
            output_tokens: Some(3),
            prompt: "=== CORPUS PASSPORT ===\nline two".into(),
            corpus_manifest: None,
        };
        Artifact::seal(SessionId::new(), RunId::new(), 0, chain_seed(), b"## Verdict".to_vec(), metadata)
            .unwrap()
    }

    #[test]
    fn files_reassemble_to_same_artifact() {
        let a = artifact();
        let files = to_files(&a).unwrap();
        let b = from_files(a.run_id(), &files).unwrap();
        assert_eq!(a, b);
        assert!(b.verify().is_ok());
    }

    #[test]
    fn metadata_file_excludes_prompt() {
        let files = to_files(&artifact()).unwrap();
        let metadata: Value = serde_json::from_slice(&files[METADATA_FILE]).unwrap();
        assert!(metadata.get("prompt").is_none());
        assert_eq!(metadata["provider"], "openai");
        assert_eq!(files[PROMPT_FILE], b"=== CORPUS PASSPORT ===\nline two");
    }

    #[test]
    fn missing_file_is_malformed() {
        let a = artifact();
        let mut files = to_files(&a).unwrap();
        files.remove(RESPONSE_FILE);
        assert!(matches!(
            from_files(a.run_id(), &files),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn edited_prompt_fails_verification() {
        let a = artifact();
        let mut files = to_files(&a).unwrap();
        files.insert(PROMPT_FILE.into(), b"something else".to_vec());
        let b = from_files(a.run_id(), &files).unwrap();
        assert!(b.verify().unwrap_err().is_integrity());
    }

    #[test]
    fn reformatted_metadata_is_not_exact() {
        let a = artifact();
        let mut files = to_files(&a).unwrap();
        assert!(check_exact(&a, &files).is_ok());

        let text = String::from_utf8(files[METADATA_FILE].clone()).unwrap();
        files.insert(METADATA_FILE.into(), text.replacen(' ', "\t", 1).into_bytes());
        let b = from_files(a.run_id(), &files).unwrap();
        assert!(b.verify().is_ok());
        let err = check_exact(&b, &files).unwrap_err();
        assert!(err.is_integrity());
        assert!(err.to_string().contains(METADATA_FILE));
    }

    #[test]
    fn upper_case_hex_is_not_exact() {
        let a = artifact();
        let mut files = to_files(&a).unwrap();
        let chain = a.chain_fingerprint().to_string();
        let text = String::from_utf8(files[ARTIFACT_FILE].clone()).unwrap();
        files.insert(
            ARTIFACT_FILE.into(),
            text.replace(&chain, &chain.to_uppercase()).into_bytes(),
        );
        let b = from_files(a.run_id(), &files).unwrap();
        assert!(b.verify().is_ok());
        assert!(check_exact(&b, &files).unwrap_err().is_integrity());
    }

    #[test]
    fn unknown_file_is_not_exact() {
        let a = artifact();
        let mut files = to_files(&a).unwrap();
        files.insert(MODES_FILE.into(), b"{}".to_vec());
        assert!(check_exact(&a, &files).is_ok());

        files.insert("notes.txt".into(), b"added later".to_vec());
        assert!(check_exact(&a, &files).unwrap_err().is_integrity());
    }
}
