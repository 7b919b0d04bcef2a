//! Training command implementation.

use super::event_renderer::TerminalRenderer;
use super::types::TrainCommand;
use super::{check_outcome, print_dry_run, Session};
use anyhow::Result;
use audiogym_training::TrainRequest;

pub async fn execute(session: &Session, command: TrainCommand) -> Result<()> {
    let defaults = &session.config.defaults;
    let mut hyperparams = defaults.hyperparams();
    if let Some(seed) = command.seed {
        hyperparams.seed = seed;
    }
    if let Some(workers) = command.workers {
        hyperparams.workers = workers;
    }
    if let Some(batch_size) = command.batch_size {
        hyperparams.batch_size = batch_size;
    }
    if let Some(learning_rate) = command.learning_rate {
        hyperparams.learning_rate = learning_rate;
    }
    if let Some(save_every) = command.save_every {
        hyperparams.checkpoint_every = save_every;
    }
    if let Some(sample_every) = command.sample_every {
        hyperparams.demo_every = sample_every;
    }

    let request = TrainRequest {
        job_name: command.name,
        base_model: session.base_model(command.base_model)?,
        caption: command.caption.unwrap_or_else(|| defaults.caption()),
        hyperparams,
    };

    let renderer = TerminalRenderer;
    if command.dry_run {
        let prepared = session.pipeline.prepare_training(&request, &renderer).await?;
        print_dry_run(&prepared);
        return Ok(());
    }

    let outcome = session.pipeline.start_training(&request, &renderer).await?;
    check_outcome(&outcome)
}
