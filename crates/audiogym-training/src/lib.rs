//! AudioGym Training
//!
//! Control plane for the two-stage audio fine-tuning pipeline:
//! - Resolving job and model locations (`TrainingLayout`)
//! - Caching model artifacts from the hub (`ArtifactCache`)
//! - Synthesizing dataset and model configs for each stage
//! - Rendering stage scripts and supervising stage processes (`JobRunner`)
//! - Sequencing pre-encode and training (`Pipeline`)

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod job;
mod json;
pub mod layout;
pub mod manifest;
pub mod model_config;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod script;

pub use artifacts::{ArtifactCache, ArtifactFetcher, HfHubFetcher, ModelFiles};
pub use dataset::{CaptionStrategy, DatasetConfig, DatasetEntry, DatasetType};
pub use error::{TrainingError, TrainingResult};
pub use job::{Job, JobSlug, PreEncodeRequest, Stage, StageState, TrainRequest, TrainingHyperParams};
pub use layout::TrainingLayout;
pub use manifest::{discover_jobs, JobManifest};
pub use model_config::TrainingOverlay;
pub use pipeline::{LaunchMode, Pipeline, PipelineOptions, PreparedStage, StageOutcome};
pub use progress::{CollectingProgressSink, NoticeLevel, ProgressEvent, ProgressSink};
pub use registry::{ArtifactSpec, AutoencoderModel, DiffusionModel, ModelCategory, ModelRegistry};
pub use runner::{JobRunner, LogRecord, LogSource, LogStream, ProcessSpec};
pub use script::{ScriptPlatform, StageCommand, Toolchain};
