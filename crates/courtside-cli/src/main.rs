//! Courtside CLI - Playback Core Diagnostics
//!
//! Features:
//! - Engine configuration preview for a source
//! - Audio variant selection against a format set
//! - Quality label rendering
//! - Full session simulation against an in-process engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::OutputFormat;

/// Courtside CLI - Playback core toolkit
#[derive(Parser)]
#[command(name = "courtside")]
#[command(author = "Courtside Media")]
#[command(version)]
#[command(about = "Playback core diagnostics for Courtside TV", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the engine configuration a source would load with
    Inspect {
        /// Path to a media source JSON file
        source: PathBuf,

        /// Player settings JSON file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Playback policy JSON file
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Pick the audio variant for a set of supported sample formats
    Select {
        /// Path to a variant list JSON file
        variants: PathBuf,

        /// Supported formats, comma separated (pcm16, pcm24, pcm32, pcm_float, pcm8)
        #[arg(long, default_value = "pcm16")]
        formats: String,

        /// Playback policy JSON file
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Render the quality label for a resolution
    Label {
        width: u32,
        height: u32,

        /// Frame rate
        #[arg(long)]
        fps: Option<f32>,
    },

    /// Run a complete playback session against the simulated engine
    Simulate {
        /// Path to a media source JSON file
        source: PathBuf,

        /// Path to a variant list JSON file
        variants: PathBuf,

        /// Formats the simulated audio device reports
        #[arg(long, default_value = "pcm16")]
        formats: String,

        /// Seed a saved position before the session starts (seconds)
        #[arg(long)]
        resume: Option<f64>,

        /// Media duration the simulated engine reports (seconds)
        #[arg(long)]
        duration: Option<f64>,

        /// Relative seek after playback starts, clamped to the media (seconds)
        #[arg(long, allow_hyphen_values = true)]
        skip: Option<f64>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);
    courtside_core::init();

    match cli.command {
        Commands::Inspect { source, settings, policy } => {
            commands::inspect(&source, settings.as_deref(), policy.as_deref(), cli.format)?;
        }
        Commands::Select { variants, formats, policy } => {
            commands::select(&variants, &formats, policy.as_deref(), cli.format)?;
        }
        Commands::Label { width, height, fps } => {
            commands::label(width, height, fps, cli.format)?;
        }
        Commands::Simulate {
            source,
            variants,
            formats,
            resume,
            duration,
            skip,
        } => {
            let timing = commands::Timing { resume, duration, skip };
            commands::simulate(&source, &variants, &formats, timing, cli.format).await?;
        }
    }

    Ok(())
}
