//! Godseye CLI - face indexing of surveillance video and missing-person search
//!
//! Command-line interface over the frame pipeline and the search service.

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod backends;
mod commands;
mod config;

use commands::detect::DetectCommand;
use commands::frame::FrameCommand;
use commands::ingest::IngestCommand;
use commands::register::{RefreshCommand, RegisterCommand};
use commands::OutputFormat;

#[derive(Parser)]
#[command(
    name = "godseye",
    version,
    about = "Face indexing for surveillance video and missing-person search",
    long_about = "Sample frames from surveillance video, index every detected face, and\n\
                  find where a missing person appears on each camera.\n\n\
                  Services:\n  \
                  - detection service (vectorize_faces / bounding_boxes) at [detector] base_url\n  \
                  - Qdrant for face and query vectors\n  \
                  - PostgreSQL for per-camera match sequences\n  \
                  - local directory or S3/MinIO for frames with faces",
    after_help = "EXAMPLES:\n  \
                  # Index a video, keeping every 5th frame\n  \
                  godseye ingest --skip 5 lobby.mp4\n\n  \
                  # Index a directory of extracted frames at 10 fps under a fixed camera id\n  \
                  godseye ingest --fps 10 --camera-id gate-2 ./frames/gate-2\n\n  \
                  # Register a missing person from a photo and list matches as JSON lines\n  \
                  godseye --format jsonl register --person-id p-17 --photo photo.jpg\n\n  \
                  # Recompute matches after more footage was ingested\n  \
                  godseye refresh p-17\n\n  \
                  # Show the third appearance on a camera and save the frame\n  \
                  godseye frame p-17 --camera-id gate-2 --index 2 -o match.jpg"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Config file (default: $GODSEYE_CONFIG, then ./godseye.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the faces in one or more videos
    Ingest(IngestCommand),

    /// Register a missing person and compute their matches
    Register(RegisterCommand),

    /// Recompute a registered person's matches
    Refresh(RefreshCommand),

    /// Look up one of a person's matched frames
    Frame(FrameCommand),

    /// Run face detection on a single image
    Detect(DetectCommand),
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("godseye=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("godseye=info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|e| anyhow!("Failed to set tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest(cmd) => cmd.execute(config, cli.format).await,
        Commands::Register(cmd) => cmd.execute(config, cli.format).await,
        Commands::Refresh(cmd) => cmd.execute(config, cli.format).await,
        Commands::Frame(cmd) => cmd.execute(config, cli.format).await,
        Commands::Detect(cmd) => cmd.execute(config, cli.format).await,
    }
}
