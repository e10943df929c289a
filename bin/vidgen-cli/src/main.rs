//! vidgen – command-line front end for the generation orchestrator.
//!
//! Startup order:
//! 1. Parse configuration from environment variables, then CLI flags.
//! 2. Initialise structured tracing (JSON or human-readable).
//! 3. Run the requested subcommand.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use vidgen_core::{
    AspectRatio, CredentialStatus, Narrator, Orchestrator, OrchestratorConfig, ReferenceImage,
    Resolution, Session, SessionError, TaskOutcome, TaskRequest, TaskState, VeoConfig,
    VeoProvider,
};

use crate::config::Config;

const EXIT_FAILED: u8 = 1;
const EXIT_REJECTED: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "vidgen", version, about = "Generate short videos from a text prompt")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a video and wait for the result. Ctrl-C cancels.
    Generate(GenerateArgs),
    /// Check that an image is usable as a reference frame.
    InspectImage {
        path: PathBuf,
    },
    /// Show how an API key would be classified.
    KeyStatus {
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// What the video should show.
    #[arg(long, short)]
    prompt: String,

    /// Optional still image to start from (PNG, JPEG, WEBP or GIF).
    #[arg(long)]
    image: Option<PathBuf>,

    #[arg(long, default_value = "16:9")]
    aspect_ratio: AspectRatio,

    #[arg(long, default_value = "1080p")]
    resolution: Resolution,

    #[arg(long)]
    no_sound: bool,

    /// Overrides VIDGEN_API_KEY / GEMINI_API_KEY.
    #[arg(long)]
    api_key: Option<String>,

    /// Overrides VIDGEN_OUTPUT_DIR.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Overrides VIDGEN_DEADLINE_SECS.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print the final state as JSON instead of progress lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);

    // ── 3. Command ─────────────────────────────────────────────────────────────
    match cli.command {
        Command::Generate(args) => generate(cfg, args).await,
        Command::InspectImage { path } => inspect_image(path).await,
        Command::KeyStatus { api_key } => {
            let key = api_key.or(cfg.api_key).unwrap_or_default();
            let status = CredentialStatus::classify(&key);
            let hint = match status {
                CredentialStatus::Required => "no API key provided",
                CredentialStatus::Check => "key looks too short, double-check it",
                CredentialStatus::Valid => "key looks plausible",
            };
            println!("{status}: {hint}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(cfg: &Config) {
    // Log to stderr so --json output on stdout stays machine-readable.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: VIDGEN_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn generate(cfg: Config, args: GenerateArgs) -> anyhow::Result<ExitCode> {
    let credential = args.api_key.or(cfg.api_key).unwrap_or_default();
    if CredentialStatus::classify(&credential) == CredentialStatus::Check {
        warn!("API key looks too short; the provider will likely reject it");
    }

    let mut request = TaskRequest::new(args.prompt, credential)
        .with_aspect_ratio(args.aspect_ratio)
        .with_resolution(args.resolution)
        .with_sound(!args.no_sound);

    if let Some(path) = &args.image {
        match ReferenceImage::load(path).await {
            Ok(image) => request = request.with_reference_image(image),
            Err(e) => {
                eprintln!("Error: {e}");
                return Ok(ExitCode::from(EXIT_REJECTED));
            }
        }
    }

    let provider = VeoProvider::new(VeoConfig {
        base_url: cfg.api_base,
        model: cfg.model,
        poll_interval: cfg.poll_interval,
        output_dir: Some(args.output_dir.unwrap_or(cfg.output_dir)),
    })?;
    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        OrchestratorConfig {
            deadline: args.deadline_secs.map(std::time::Duration::from_secs).or(cfg.deadline),
            narrator: Narrator::with_interval(cfg.narrator_interval),
            ..OrchestratorConfig::default()
        },
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        interrupt_signal().await;
        let _ = cancel_tx.send(true);
    });

    info!(version = env!("CARGO_PKG_VERSION"), "vidgen starting generation");

    let json = args.json;
    let mut session = Session::new();
    let result = session
        .run(&orchestrator, request, cancel_rx, |state| {
            if !json {
                render(state);
            }
        })
        .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(SessionError::Rejected(e)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(session.state())?);
            } else {
                eprintln!("Error: {e}");
            }
            return Ok(ExitCode::from(EXIT_REJECTED));
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(session.state())?);
    }

    Ok(match outcome {
        TaskOutcome::Success { .. } => ExitCode::SUCCESS,
        TaskOutcome::Failure { .. } => ExitCode::from(EXIT_FAILED),
        TaskOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    })
}

fn render(state: &TaskState) {
    match state {
        TaskState::Idle | TaskState::Rejected { .. } => {}
        TaskState::InFlight {
            task_id,
            progress: None,
        } => println!("Generating video (task {task_id})..."),
        TaskState::InFlight {
            progress: Some(message),
            ..
        } => println!("  {message}"),
        TaskState::Succeeded {
            artifact_location, ..
        } => println!("Video ready: {artifact_location}"),
        TaskState::Failed { message, .. } => eprintln!("Generation failed: {message}"),
        TaskState::Cancelled { .. } => eprintln!("Generation cancelled."),
    }
}

async fn inspect_image(path: PathBuf) -> anyhow::Result<ExitCode> {
    match ReferenceImage::load(&path).await {
        Ok(image) => {
            println!("path:       {}", path.display());
            println!("media type: {}", image.media_type());
            println!("size:       {} bytes", image.decoded_len());
            println!("encoded:    {} bytes", image.encoded_bytes().len());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(ExitCode::from(EXIT_REJECTED))
        }
    }
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("interrupt received; cancelling generation");
}
