//! Command implementations for the gym CLI.

pub mod event_renderer;
pub mod jobs;
pub mod models;
pub mod pre_encode;
pub mod train;
pub mod types;

use crate::config::GymConfig;
use anyhow::{Context, Result};
use audiogym_training::{
    HfHubFetcher, LaunchMode, ModelRegistry, Pipeline, PipelineOptions, PreparedStage, StageOutcome,
    TrainingLayout,
};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Flags that apply to every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub root: Option<PathBuf>,
    pub registry: Option<PathBuf>,
    pub launch: Option<LaunchMode>,
}

/// Everything a command needs: merged configuration and a ready pipeline.
pub struct Session {
    pub config: GymConfig,
    pub pipeline: Pipeline,
}

impl Session {
    pub fn open(global: &GlobalOptions, config: GymConfig) -> Result<Self> {
        let layout = open_layout(global, &config)?;

        let registry_path = match (&global.registry, &config.registry) {
            (Some(path), _) => path.clone(),
            (None, Some(path)) => layout.resolve(path),
            (None, None) => layout.registry_path(),
        };
        let registry = ModelRegistry::load(&registry_path)
            .with_context(|| format!("Failed to load model registry {}", registry_path.display()))?;

        let mut options = PipelineOptions { toolchain: config.toolchain(), ..Default::default() };
        if let Some(launch) = global.launch.or(config.launch) {
            options.launch = launch;
        }
        if let Some(capacity) = config.channel_capacity {
            options.channel_capacity = capacity;
        }

        let pipeline = Pipeline::new(layout, Arc::new(registry), Arc::new(HfHubFetcher), options);
        Ok(Self { config, pipeline })
    }

    /// Explicit flag, then the configured default, then the registry's first
    /// diffusion model.
    pub fn base_model(&self, flag: Option<String>) -> Result<String> {
        flag.or_else(|| self.config.defaults.base_model.clone())
            .or_else(|| self.pipeline.registry().default_diffusion_id().map(str::to_string))
            .context("No base model given and the registry is empty")
    }
}

pub fn open_layout(global: &GlobalOptions, config: &GymConfig) -> Result<TrainingLayout> {
    let root = global.root.clone().or_else(|| config.root.clone()).unwrap_or_else(|| PathBuf::from("."));
    TrainingLayout::discover(&root).with_context(|| format!("Failed to resolve install root {}", root.display()))
}

pub fn print_dry_run(prepared: &PreparedStage) {
    println!();
    println!("{}", format!("Dry run: {} not launched", prepared.stage).bold().yellow());
    println!("  Script: {}", prepared.script_path.display().to_string().dimmed());
    println!();
    print!("{}", prepared.command.render(prepared.platform));
}

/// A failed stage subprocess is reported through the exit status.
pub fn check_outcome(outcome: &StageOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    match outcome.exit_code {
        Some(code) => anyhow::bail!("{} for {} exited with code {}", outcome.stage, outcome.job, code),
        None => anyhow::bail!("{} for {} did not run to completion", outcome.stage, outcome.job),
    }
}
