//! Pre-encode command implementation.

use super::event_renderer::TerminalRenderer;
use super::types::PreEncodeCommand;
use super::{check_outcome, print_dry_run, Session};
use anyhow::{Context, Result};
use audiogym_training::PreEncodeRequest;

pub async fn execute(session: &Session, command: PreEncodeCommand) -> Result<()> {
    // The stage runs from the install root, so a relative data dir must be
    // pinned to the caller's working directory here.
    let data_root_dir = std::path::absolute(&command.data_dir)
        .with_context(|| format!("Failed to resolve data directory {}", command.data_dir.display()))?;

    let request = PreEncodeRequest {
        job_name: command.name,
        base_model: session.base_model(command.base_model)?,
        data_root_dir,
        caption: command.caption.unwrap_or_else(|| session.config.defaults.caption()),
    };

    let renderer = TerminalRenderer;
    if command.dry_run {
        let prepared = session.pipeline.prepare_pre_encode(&request, &renderer).await?;
        print_dry_run(&prepared);
        return Ok(());
    }

    let outcome = session.pipeline.pre_encode_dataset(&request, &renderer).await?;
    check_outcome(&outcome)
}
