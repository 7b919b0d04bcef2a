//! Stage coordination: pre-encode, then train.
//!
//! Each entry point runs strictly in order: validate input, ensure model
//! artifacts, write the stage's configs and script, launch the stage process
//! and relay every log record to the caller until the process exits. A call
//! replaces whatever configs and scripts a previous call wrote for the same
//! job.

use crate::artifacts::{ArtifactCache, ArtifactFetcher};
use crate::dataset::{require_pre_encoded, write_pre_encode_dataset_config, write_training_dataset_config};
use crate::error::{TrainingError, TrainingResult};
use crate::job::{Job, JobSlug, PreEncodeRequest, Stage, TrainRequest};
use crate::layout::TrainingLayout;
use crate::manifest::{load_manifest, write_manifest};
use crate::model_config::{write_training_config, TrainingOverlay};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::ModelRegistry;
use crate::runner::{JobRunner, LogRecord, ProcessSpec, DEFAULT_CHANNEL_CAPACITY};
use crate::script::{
    pre_encode_command, train_command, write_script, PreEncodeArgs, ScriptPlatform, StageCommand, Toolchain, TrainArgs,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// How a prepared stage is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Run the structured argument vector directly.
    #[default]
    Direct,
    /// Run the rendered script through the platform shell.
    Script,
}

impl std::str::FromStr for LaunchMode {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "script" => Ok(Self::Script),
            other => Err(TrainingError::invalid("launch", format!("{other:?} (expected direct or script)"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub toolchain: Toolchain,
    pub platform: ScriptPlatform,
    pub launch: LaunchMode,
    pub channel_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            platform: ScriptPlatform::host(),
            launch: LaunchMode::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A stage whose configs and script are on disk, ready to launch.
#[derive(Debug, Clone)]
pub struct PreparedStage {
    pub job: Job,
    pub stage: Stage,
    pub command: StageCommand,
    /// Platform the script at `script_path` was rendered for.
    pub platform: ScriptPlatform,
    pub script_path: PathBuf,
    pub process: ProcessSpec,
}

/// Terminal status of a stage run. A failed subprocess is a normal outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub job: JobSlug,
    pub stage: Stage,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub script_path: PathBuf,
    pub lines: usize,
}

pub struct Pipeline {
    layout: TrainingLayout,
    registry: Arc<ModelRegistry>,
    cache: ArtifactCache,
    options: PipelineOptions,
    runner: JobRunner,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        layout: TrainingLayout,
        registry: Arc<ModelRegistry>,
        fetcher: Arc<dyn ArtifactFetcher>,
        options: PipelineOptions,
    ) -> Self {
        let cache = ArtifactCache::new(layout.clone(), registry.clone(), fetcher);
        let runner = JobRunner::new(options.channel_capacity);
        Self { layout, registry, cache, options, runner }
    }

    #[must_use]
    pub fn layout(&self) -> &TrainingLayout {
        &self.layout
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Pre-encodes the job's raw dataset with its base model's autoencoder.
    pub async fn pre_encode_dataset(
        &self,
        request: &PreEncodeRequest,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<StageOutcome> {
        let prepared = self.prepare_pre_encode(request, progress).await?;
        self.run(&prepared, progress).await
    }

    /// Fine-tunes the base model on the job's pre-encoded dataset.
    pub async fn start_training(&self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<StageOutcome> {
        let prepared = self.prepare_training(request, progress).await?;
        self.run(&prepared, progress).await
    }

    /// Ensures artifacts and writes the pre-encode configs and script
    /// without launching anything.
    pub async fn prepare_pre_encode(
        &self,
        request: &PreEncodeRequest,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<PreparedStage> {
        let plan = request.plan()?;
        let (ae_id, _) = self.registry.autoencoder_for(&plan.job.base_model)?;
        let ae = self.cache.ensure_autoencoder(ae_id, progress).await?;

        let slug = &plan.job.slug;
        self.layout.ensure_job_dir(slug)?;
        self.check_collision(&plan.job, progress);

        let dataset_config = write_pre_encode_dataset_config(&self.layout, slug, &plan.data_root_dir, plan.caption)?;
        progress.on_event(ProgressEvent::info(format!(
            "Generated pre-encoding dataset config at {}",
            dataset_config.display()
        )));

        let command = pre_encode_command(
            &self.options.toolchain,
            &self.layout,
            &PreEncodeArgs {
                dataset_config: &dataset_config,
                model_config: &ae.config,
                checkpoint: &ae.checkpoint,
                output_dir: &self.layout.pre_encoded_dir(slug),
            },
        );
        self.finish_prepare(plan.job, Stage::PreEncode, command, progress)
    }

    /// Ensures artifacts and writes the training configs and script without
    /// launching anything. Fails before writing anything if the job has not
    /// been pre-encoded.
    pub async fn prepare_training(&self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<PreparedStage> {
        let plan = request.plan()?;
        self.registry.diffusion(&plan.job.base_model)?;

        let slug = &plan.job.slug;
        if let Err(e) = require_pre_encoded(&self.layout, slug) {
            progress.on_event(ProgressEvent::error(e.to_string()));
            return Err(e);
        }

        let dit = self.cache.ensure_diffusion_model(&plan.job.base_model, progress).await?;
        let job_dir = self.layout.ensure_job_dir(slug)?;
        self.check_collision(&plan.job, progress);

        let overlay = TrainingOverlay { demo_every: plan.hyperparams.demo_every, learning_rate: plan.learning_rate };
        let model_config = write_training_config(&self.layout, slug, &dit.config, &overlay)?;
        progress.on_event(ProgressEvent::info(format!("Modified training model config at {}", model_config.display())));

        let dataset_config = write_training_dataset_config(&self.layout, slug, plan.caption)?;
        progress.on_event(ProgressEvent::info(format!(
            "Generated training dataset config at {}",
            dataset_config.display()
        )));

        let params = &plan.hyperparams;
        let command = train_command(
            &self.options.toolchain,
            &self.layout,
            &TrainArgs {
                name: slug.as_str(),
                pretrained_checkpoint: &dit.checkpoint,
                model_config: &model_config,
                dataset_config: &dataset_config,
                save_dir: &job_dir,
                batch_size: params.batch_size,
                workers: params.workers,
                seed: params.seed,
                checkpoint_every: params.checkpoint_every,
            },
        );
        self.finish_prepare(plan.job, Stage::Train, command, progress)
    }

    fn finish_prepare(
        &self,
        job: Job,
        stage: Stage,
        command: StageCommand,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<PreparedStage> {
        let platform = self.options.platform;
        let script_path = self.layout.script_path(&job.slug, stage, platform.extension());
        write_script(&script_path, &command, platform)?;
        progress.on_event(ProgressEvent::info(format!("Generated {stage} script at {}", script_path.display())));

        let cwd = self.layout.root();
        let process = match self.options.launch {
            LaunchMode::Direct => command.to_process_spec(cwd),
            LaunchMode::Script => platform.launcher(&script_path, cwd),
        }
        .with_stage_env();

        Ok(PreparedStage { job, stage, command, platform, script_path, process })
    }

    /// Slugs are the job identity, so distinct display names can land in the
    /// same directory. The newer run wins; the caller is told.
    fn check_collision(&self, job: &Job, progress: &dyn ProgressSink) {
        if let Some(existing) = load_manifest(&self.layout, &job.slug) {
            if existing.name != job.name {
                warn!(job = %job.slug, previous = %existing.name, current = %job.name, "job name collision");
                progress.on_event(ProgressEvent::warn(format!(
                    "\"{}\" shares the output folder {} with \"{}\"; its files will be overwritten",
                    job.name, job.slug, existing.name
                )));
            }
        }
    }

    /// Launches a prepared stage and relays its log until the process exits.
    pub async fn run(&self, prepared: &PreparedStage, progress: &dyn ProgressSink) -> TrainingResult<StageOutcome> {
        let job = &prepared.job;
        let stage = prepared.stage;
        write_manifest(&self.layout, job, stage.running_state())?;

        info!(job = %job.slug, %stage, "stage started");
        progress.on_event(ProgressEvent::info(match stage {
            Stage::PreEncode => "Started pre-encoding dataset",
            Stage::Train => "Started training",
        }));

        let mut stream = self.runner.start(prepared.process.clone());
        let mut lines = 0;
        let mut exit = (None, false);
        while let Some(record) = stream.next().await {
            match &record {
                LogRecord::Line { .. } => lines += 1,
                LogRecord::Exited { code, success } => exit = (*code, *success),
            }
            progress.on_event(ProgressEvent::Log { job: job.slug.clone(), stage, record });
        }
        let (exit_code, success) = exit;

        write_manifest(&self.layout, job, stage.finished_state(success))?;
        info!(job = %job.slug, %stage, success, ?exit_code, lines, "stage finished");
        progress.on_event(ProgressEvent::Finished { job: job.slug.clone(), stage, success });
        progress.on_event(completion_notice(stage, success, exit_code));

        Ok(StageOutcome {
            job: job.slug.clone(),
            stage,
            success,
            exit_code,
            script_path: prepared.script_path.clone(),
            lines,
        })
    }
}

fn completion_notice(stage: Stage, success: bool, exit_code: Option<i32>) -> ProgressEvent {
    let code = exit_code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"));
    match (stage, success) {
        (Stage::PreEncode, true) => {
            ProgressEvent::info("Pre-encoding complete. Check the outputs folder for the pre-encoded dataset.")
        }
        (Stage::Train, true) => ProgressEvent::info("Training complete. Check the outputs folder for the LoRA files."),
        (Stage::PreEncode, false) => ProgressEvent::error(format!("Pre-encoding failed ({code}). See the log above.")),
        (Stage::Train, false) => ProgressEvent::error(format!("Training failed ({code}). See the log above.")),
    }
}
