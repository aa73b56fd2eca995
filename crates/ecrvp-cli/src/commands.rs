//! Subcommand implementations

use anyhow::{bail, Context, Result};
use ecrvp_artifact::{PassportId, RunId, SessionId};
use ecrvp_core::{
    ExecuteOptions, ExecutionMode, ExportBundle, Orchestrator, OrchestratorConfig, RunState,
    SessionRequest, SessionType,
};
use ecrvp_corpus::{
    passport_to_text, seal as seal_corpus, ArchitecturalStatus, CorpusEntry, CorpusError,
    CorpusVault, PassportMetadata,
};
use ecrvp_gateway::{Gateway, InterpreterConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

const DEFAULT_DATA_DIR: &str = "ecrvp-data";

/// Interpreter list file: `[[interpreters]]` tables or a JSON object
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InterpreterFile {
    interpreters: Vec<InterpreterConfig>,
}

/// Configuration file (if any), with the data directory always set
pub(crate) fn resolve_config(
    path: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<OrchestratorConfig> {
    let mut config = match path {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir);
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from(DEFAULT_DATA_DIR));
    }
    config.validate()?;
    Ok(config)
}

pub(crate) fn load_interpreters(path: &Path) -> Result<Vec<InterpreterConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading interpreter list {}", path.display()))?;
    let file: InterpreterFile = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };
    Ok(file.interpreters)
}

fn vault(config: &OrchestratorConfig) -> CorpusVault {
    CorpusVault::new(
        config
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
    )
}

async fn orchestrator(config: OrchestratorConfig) -> Result<Orchestrator> {
    let gateway = Gateway::new(&config.gateway)?;
    let orchestrator = Orchestrator::new(config, gateway)?;
    orchestrator.restore().await?;
    Ok(orchestrator)
}

pub(crate) async fn seal(
    config: &OrchestratorConfig,
    purpose: &str,
    status: ArchitecturalStatus,
    canon: &str,
    constraints: Vec<String>,
    files: &[PathBuf],
) -> Result<ExitCode> {
    let mut named = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        named.push((name, bytes));
    }

    let metadata = constraints
        .into_iter()
        .fold(PassportMetadata::new(purpose, status, canon), |m, c| {
            m.with_constraint(c)
        });
    let corpus = seal_corpus(metadata, CorpusEntry::in_order(named))?;
    vault(config).store(&corpus).await?;

    println!("{}", passport_to_text(corpus.passport()));
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn verify_corpus(config: &OrchestratorConfig, id: PassportId) -> Result<ExitCode> {
    match vault(config).load(id).await {
        Ok(corpus) => {
            println!(
                "corpus {id} intact: {} files, fingerprint {}",
                corpus.passport().files().len(),
                corpus.passport().fingerprint()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(CorpusError::IntegrityMismatch { check, .. }) => {
            println!("corpus {id} diverges: {check}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn run(
    config: OrchestratorConfig,
    passport_id: PassportId,
    session_type: SessionType,
    interpreters: Vec<InterpreterConfig>,
    source: Option<SessionId>,
    mode: Option<ExecutionMode>,
) -> Result<ExitCode> {
    let orchestrator = orchestrator(config).await?;

    let mut request = SessionRequest::new(passport_id, session_type, interpreters);
    if let Some(source) = source {
        request = request.with_source(source);
    }
    let session = orchestrator.create_session(request).await?;
    println!("session {} created", session.session_id);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, runs not yet sent will be cancelled");
            trigger.cancel();
        }
    });

    let mut options = ExecuteOptions::new().with_cancel(cancel);
    if let Some(mode) = mode {
        options = options.with_mode(mode);
    }
    let done = orchestrator.execute(session.session_id, options).await?;

    for run in &done.runs {
        let detail = match &run.error {
            Some(error) => format!("{}: {}", error.kind, error.message),
            None => run
                .output_tokens
                .map(|t| format!("{t} output tokens"))
                .unwrap_or_default(),
        };
        println!(
            "  {} {:<24} {:<10} {}",
            run.run_id, run.interpreter.display_name, run.state, detail
        );
    }
    println!(
        "session {} {} ({}/{} captured)",
        done.session_id,
        done.state,
        done.count(RunState::Captured),
        done.runs.len()
    );
    Ok(if done.count(RunState::Captured) > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) async fn export(
    config: OrchestratorConfig,
    session_id: SessionId,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let orchestrator = orchestrator(config).await?;
    let bundle = orchestrator.export(session_id).await?;
    let json = bundle.to_json()?;
    match output {
        Some(path) => {
            tokio::fs::write(path, &json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "exported {} runs, merkle root {}",
                bundle.runs.len(),
                bundle.merkle_proof.merkle_root
            );
        }
        None => println!("{}", String::from_utf8_lossy(&json)),
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn verify_bundle(path: &Path) -> Result<ExitCode> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let bundle = ExportBundle::from_json(&bytes)?;
    let verification = ecrvp_core::verify_bundle(&bundle);
    match &verification.first_divergence {
        None => {
            println!(
                "bundle valid: session {}, {} runs, merkle root {}",
                bundle.session.session_id,
                bundle.runs.len(),
                bundle.merkle_proof.merkle_root
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(divergence) => {
            println!("bundle INVALID: {divergence}");
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

pub(crate) async fn modes(
    config: OrchestratorConfig,
    session_id: SessionId,
    run: Option<RunId>,
) -> Result<ExitCode> {
    let orchestrator = orchestrator(config).await?;
    let session = orchestrator.session(session_id)?;
    let run_ids = match run {
        Some(run_id) if session.run(run_id).is_none() => {
            bail!("run {run_id} is not part of session {session_id}")
        }
        Some(run_id) => vec![run_id],
        None => session.run_ids(),
    };

    let mut reports = serde_json::Map::new();
    for run_id in run_ids {
        let report = orchestrator.modes(session_id, run_id).await?;
        reports.insert(run_id.to_string(), serde_json::to_value(report)?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_dir_defaults_and_overrides() {
        let config = resolve_config(None, None).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from(DEFAULT_DATA_DIR)));

        let config = resolve_config(None, Some(PathBuf::from("/tmp/elsewhere"))).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/elsewhere")));
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecrvp.toml");
        std::fs::write(&path, "execution_mode = \"sequential\"\ndata_dir = \"/srv/ecrvp\"\n").unwrap();

        let config = resolve_config(Some(&path), None).unwrap();
        assert_eq!(config.execution_mode, ExecutionMode::Sequential);
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/ecrvp")));
    }

    #[test]
    fn interpreters_load_from_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("panel.toml");
        std::fs::write(
            &toml_path,
            r#"
            [[interpreters]]
            provider = "anthropic"
            model = "claude-sonnet-4-5"
            display_name = "Claude"

            [[interpreters]]
            provider = "ollama"
            model = "llama3.1"
            display_name = "Local"
            base_url = "http://gpu-box:11434"
            "#,
        )
        .unwrap();
        let loaded = load_interpreters(&toml_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].base_url.as_deref(), Some("http://gpu-box:11434"));

        let json_path = dir.path().join("panel.json");
        std::fs::write(
            &json_path,
            r#"{"interpreters": [{"provider": "openai", "model": "gpt-4o", "display_name": "GPT"}]}"#,
        )
        .unwrap();
        let loaded = load_interpreters(&json_path).unwrap();
        assert_eq!(loaded[0].provider, "openai");
    }

    #[test]
    fn unknown_interpreter_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.toml");
        std::fs::write(
            &path,
            "[[interpreters]]\nprovider = \"openai\"\nmodel = \"m\"\ndisplay_name = \"d\"\napi_key = \"sk-\"\n",
        )
        .unwrap();
        assert!(load_interpreters(&path).is_err());
    }
}
