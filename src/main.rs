#![forbid(unsafe_code)]

//! `docgen-stream`: drive one document generation session from the shell.
//!
//! Loads configuration, opens the generation stream, logs progress as it
//! arrives, and prints the final session snapshot as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use docgen_stream::config::GlobalConfig;
use docgen_stream::models::request::{GenerationMode, GenerationRequest, Pipeline};
use docgen_stream::models::session::SessionStatus;
use docgen_stream::session::controller::{ControllerSettings, SessionController, SessionSnapshot};
use docgen_stream::stream::http::HttpEventSource;
use docgen_stream::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Draft,
    Detailed,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Draft => Self::Draft,
            ModeArg::Detailed => Self::Detailed,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "docgen-stream", about = "Consume a document generation stream", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Retry this many times after a session-level failure.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a document for a project.
    Generate {
        /// Project identifier.
        #[arg(long)]
        project: String,

        /// Generation depth.
        #[arg(long, value_enum, default_value_t = ModeArg::Draft)]
        mode: ModeArg,

        /// Use the staged pipeline instead of a single pass.
        #[arg(long)]
        staged: bool,
    },

    /// Regenerate one section of an existing artifact.
    Regenerate {
        /// Artifact identifier.
        #[arg(long)]
        artifact: String,

        /// Section identifier.
        #[arg(long)]
        section: String,

        /// Extra guidance for the regeneration.
        #[arg(long)]
        instructions: Option<String>,
    },
}

impl Command {
    fn into_request(self) -> GenerationRequest {
        match self {
            Self::Generate {
                project,
                mode,
                staged,
            } => GenerationRequest::Document {
                project_id: project,
                mode: mode.into(),
                pipeline: if staged {
                    Pipeline::Staged
                } else {
                    Pipeline::SinglePass
                },
            },
            Self::Regenerate {
                artifact,
                section,
                instructions,
            } => GenerationRequest::RegenerateSection {
                artifact_id: artifact,
                section_id: section,
                instructions,
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let snapshot = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))?;

    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|err| AppError::Protocol(format!("failed to encode snapshot: {err}")))?;
    println!("{json}");

    if snapshot.status == SessionStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Cli) -> Result<SessionSnapshot> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!("configuration loaded");

    let source = Arc::new(HttpEventSource::from_config(&config)?);
    let mut controller =
        SessionController::new(source, ControllerSettings::from_config(&config.stream));

    // ── Progress logging ────────────────────────────────
    let mut updates = controller.subscribe();
    let progress_handle = tokio::spawn(async move {
        let mut last = (SessionStatus::Idle, 0usize, 0usize);
        while updates.changed().await.is_ok() {
            let snap = updates.borrow_and_update().clone();
            let current = (snap.status, snap.completed_count, snap.failed_count);
            if current != last {
                info!(
                    status = ?snap.status,
                    stage = ?snap.current_stage,
                    completed = snap.completed_count,
                    failed = snap.failed_count,
                    total = snap.sections.len(),
                    "generation progress"
                );
                last = current;
            }
        }
    });

    // ── Drive the session ───────────────────────────────
    controller.connect(args.command.into_request())?;
    let mut retries_left = args.retries;

    let snapshot = loop {
        let settled = tokio::select! {
            snapshot = controller.run_until_settled() => Ok(snapshot),
            signal = shutdown_signal() => Err(signal),
        };

        let snapshot = match settled {
            Ok(snapshot) => snapshot,
            Err(signal) => {
                info!(signal, "cancelling generation");
                controller.cancel();
                break controller.snapshot();
            }
        };

        if snapshot.status == SessionStatus::Error && retries_left > 0 {
            retries_left -= 1;
            warn!(
                error = snapshot.error_message().unwrap_or_default(),
                retries_left, "generation failed, retrying"
            );
            controller.retry().await?;
            continue;
        }

        if let Some(message) = snapshot.error_message() {
            error!(error = message, "generation failed");
        }
        break snapshot;
    };

    drop(controller);
    let _ = progress_handle.await;
    Ok(snapshot)
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable, listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return "ctrl-c";
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "ctrl-c",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "ctrl-c handler failed");
        }
        "ctrl-c"
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
