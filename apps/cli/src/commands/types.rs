//! Command type definitions shared between main.rs and the command modules.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct PreEncodeCommand {
    /// Job name; its slug names the output folder
    #[arg(long)]
    pub name: String,

    /// Directory of raw audio files to encode
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Base model id from the registry (defaults to the first entry)
    #[arg(long)]
    pub base_model: Option<String>,

    /// Caption strategy (paths)
    #[arg(long)]
    pub caption: Option<String>,

    /// Write configs and the script without launching
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    /// Job name; must match the pre-encoded job
    #[arg(long)]
    pub name: String,

    /// Base model id from the registry (defaults to the first entry)
    #[arg(long)]
    pub base_model: Option<String>,

    /// Caption strategy (paths)
    #[arg(long)]
    pub caption: Option<String>,

    /// Data loader workers
    #[arg(long)]
    pub workers: Option<u32>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Checkpoint interval in steps
    #[arg(long)]
    pub save_every: Option<u64>,

    /// Demo sample interval in steps
    #[arg(long)]
    pub sample_every: Option<u64>,

    /// Learning rate, e.g. 1e-4
    #[arg(long)]
    pub learning_rate: Option<String>,

    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Write configs and the script without launching
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
