//! AudioGym CLI - fine-tune audio generation models from the terminal
//!
//! Provides the `gym` command: pre-encode a folder of audio with a base
//! model's autoencoder, then train on the pre-encoded dataset.

mod commands;
mod config;

use anyhow::Context;
use audiogym_training::LaunchMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{ListCommand, PreEncodeCommand, TrainCommand};
use commands::{jobs, models, pre_encode, train, GlobalOptions, Session};

/// AudioGym - fine-tuning control plane for audio diffusion models
#[derive(Parser, Debug)]
#[command(name = "gym", author, version, about = "AudioGym - fine-tune audio generation models")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Install directory holding models/ and outputs/ (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Model registry file (defaults to <root>/models.yaml)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// How stages are launched (direct, script)
    #[arg(long, global = true)]
    launch: Option<LaunchMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pre-encode a raw audio dataset
    ///
    /// Downloads the base model's autoencoder if needed, writes the dataset
    /// config and the pre-encode script, then runs it.
    PreEncode(PreEncodeCommand),

    /// Fine-tune a base model on a pre-encoded dataset
    ///
    /// Requires a completed pre-encode for the same job name.
    Train(TrainCommand),

    /// List base models in the registry
    Models(ListCommand),

    /// List jobs found under outputs/
    Jobs(ListCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::GymConfig::discover_and_load().context("Failed to load configuration")?;

    // Initialize tracing
    let level = match args.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let global = GlobalOptions { root: args.root, registry: args.registry, launch: args.launch };

    match args.command {
        Command::PreEncode(command) => {
            let session = Session::open(&global, config)?;
            pre_encode::execute(&session, command).await
        }
        Command::Train(command) => {
            let session = Session::open(&global, config)?;
            train::execute(&session, command).await
        }
        Command::Models(command) => {
            let session = Session::open(&global, config)?;
            models::execute(&session, &command)
        }
        Command::Jobs(command) => {
            let layout = commands::open_layout(&global, &config)?;
            jobs::execute(&layout, &command)
        }
    }
}
