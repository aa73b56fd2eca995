use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ecrvp_artifact::{PassportId, RunId, SessionId};
use ecrvp_core::{ExecutionMode, SessionType};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(
    name = "ecrvp",
    version,
    about = "Sealed-corpus verification runs with tamper-evident artifacts"
)]
struct Cli {
    /// Orchestrator configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for corpora, artifacts and sessions (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Status {
    Open,
    Closed,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Parallel,
    Sequential,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Parallel => Self::Parallel,
            Mode::Sequential => Self::Sequential,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Seal files, in the order given, into a new passport.
    Seal {
        #[arg(long)]
        purpose: String,
        #[arg(long, value_enum, default_value = "open")]
        status: Status,
        #[arg(long, default_value = "v1.0")]
        canon: String,
        /// Repeatable
        #[arg(long = "constraint")]
        constraints: Vec<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Re-verify a stored corpus against its passport.
    VerifyCorpus { passport_id: PassportId },

    /// Create and execute a session.
    Run {
        #[arg(long)]
        passport: PassportId,
        /// strict_verifier, position_aggregator or formalization
        #[arg(long = "type")]
        session_type: SessionType,
        /// Interpreter list (TOML or JSON)
        #[arg(long)]
        interpreters: PathBuf,
        /// Source session (position_aggregator only)
        #[arg(long)]
        source: Option<SessionId>,
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Write a finished session as a self-verifying bundle.
    Export {
        session_id: SessionId,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Verify an exported bundle without any other input.
    VerifyBundle { bundle: PathBuf },

    /// Print detected section markers of captured runs.
    Modes {
        session_id: SessionId,
        #[arg(long)]
        run: Option<RunId>,
    },
}

fn init_logging(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // already-initialised is not an error for us
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let config = commands::resolve_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Command::Seal {
            purpose,
            status,
            canon,
            constraints,
            files,
        } => {
            let status = match status {
                Status::Open => ecrvp_corpus::ArchitecturalStatus::Open,
                Status::Closed => ecrvp_corpus::ArchitecturalStatus::Closed,
            };
            commands::seal(&config, &purpose, status, &canon, constraints, &files).await
        }
        Command::VerifyCorpus { passport_id } => commands::verify_corpus(&config, passport_id).await,
        Command::Run {
            passport,
            session_type,
            interpreters,
            source,
            mode,
        } => {
            let interpreters = commands::load_interpreters(&interpreters)?;
            commands::run(
                config,
                passport,
                session_type,
                interpreters,
                source,
                mode.map(Into::into),
            )
            .await
        }
        Command::Export { session_id, output } => {
            commands::export(config, session_id, output.as_deref()).await
        }
        Command::VerifyBundle { bundle } => commands::verify_bundle(&bundle).await,
        Command::Modes { session_id, run } => commands::modes(config, session_id, run).await,
    }
}
