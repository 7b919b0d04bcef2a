use crate::dataset::CaptionStrategy;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem-safe identity of a job, derived from its display name.
///
/// Two display names that slugify identically are the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSlug(String);

impl JobSlug {
    pub fn from_name(name: &str) -> TrainingResult<Self> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(TrainingError::invalid(
                "job name",
                format!("{name:?} must contain at least one letter or digit"),
            ));
        }
        Ok(Self(slug))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transliterates to ASCII, lowercases, maps every run of other characters
/// to a single hyphen and trims hyphens at both ends.
fn slugify(s: &str) -> String {
    deunicode::deunicode(s)
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// A named training run against a base diffusion model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub slug: JobSlug,
    pub base_model: String,
}

impl Job {
    pub fn new(name: &str, base_model: &str) -> TrainingResult<Self> {
        if base_model.trim().is_empty() {
            return Err(TrainingError::invalid("base model", "is required"));
        }
        Ok(Self {
            name: name.to_string(),
            slug: JobSlug::from_name(name)?,
            base_model: base_model.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreEncode,
    Train,
}

impl Stage {
    #[must_use]
    pub fn script_stem(self) -> &'static str {
        match self {
            Self::PreEncode => "pre-encode",
            Self::Train => "train",
        }
    }

    #[must_use]
    pub fn running_state(self) -> StageState {
        match self {
            Self::PreEncode => StageState::PreEncoding,
            Self::Train => StageState::Training,
        }
    }

    #[must_use]
    pub fn finished_state(self, success: bool) -> StageState {
        match (self, success) {
            (_, false) => StageState::Failed,
            (Self::PreEncode, true) => StageState::PreEncoded,
            (Self::Train, true) => StageState::Trained,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PreEncode => "pre-encode",
            Self::Train => "train",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Unstarted,
    PreEncoding,
    PreEncoded,
    Training,
    Trained,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unstarted => "unstarted",
            Self::PreEncoding => "pre_encoding",
            Self::PreEncoded => "pre_encoded",
            Self::Training => "training",
            Self::Trained => "trained",
            Self::Failed => "failed",
        })
    }
}

/// Input to the pre-encoding entry point.
#[derive(Debug, Clone)]
pub struct PreEncodeRequest {
    pub job_name: String,
    pub base_model: String,
    pub data_root_dir: PathBuf,
    pub caption: String,
}

/// Input to the training entry point.
#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub job_name: String,
    pub base_model: String,
    pub caption: String,
    pub hyperparams: TrainingHyperParams,
}

/// User-tunable training parameters.
///
/// `learning_rate` stays textual until validation so that malformed input is
/// rejected explicitly instead of being coerced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHyperParams {
    pub seed: u64,
    pub workers: u32,
    pub batch_size: u32,
    pub learning_rate: String,
    pub checkpoint_every: u64,
    pub demo_every: u64,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self {
            seed: 42,
            workers: 2,
            batch_size: 16,
            learning_rate: "1e-4".to_string(),
            checkpoint_every: 1000,
            demo_every: 250,
        }
    }
}

impl TrainingHyperParams {
    pub fn parsed_learning_rate(&self) -> TrainingResult<f64> {
        let raw = self.learning_rate.trim();
        let lr: f64 = raw
            .parse()
            .map_err(|_| TrainingError::invalid("learning_rate", format!("{raw:?} is not a number")))?;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(TrainingError::invalid("learning_rate", format!("{raw:?} must be a finite value > 0")));
        }
        Ok(lr)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.parsed_learning_rate()?;
        if self.batch_size == 0 {
            return Err(TrainingError::invalid("batch_size", "must be >= 1"));
        }
        if self.checkpoint_every == 0 {
            return Err(TrainingError::invalid("checkpoint_every", "must be >= 1"));
        }
        if self.demo_every == 0 {
            return Err(TrainingError::invalid("demo_every", "must be >= 1"));
        }
        Ok(())
    }
}

/// Validated pre-encode input.
#[derive(Debug, Clone)]
pub(crate) struct PreEncodePlan {
    pub job: Job,
    pub data_root_dir: PathBuf,
    pub caption: CaptionStrategy,
}

impl PreEncodeRequest {
    pub(crate) fn plan(&self) -> TrainingResult<PreEncodePlan> {
        let caption: CaptionStrategy = self.caption.parse()?;
        let job = Job::new(&self.job_name, &self.base_model)?;
        if self.data_root_dir.as_os_str().is_empty() {
            return Err(TrainingError::invalid("data root directory", "is required"));
        }
        Ok(PreEncodePlan { job, data_root_dir: self.data_root_dir.clone(), caption })
    }
}

/// Validated training input.
#[derive(Debug, Clone)]
pub(crate) struct TrainPlan {
    pub job: Job,
    pub caption: CaptionStrategy,
    pub learning_rate: f64,
    pub hyperparams: TrainingHyperParams,
}

impl TrainRequest {
    pub(crate) fn plan(&self) -> TrainingResult<TrainPlan> {
        let caption: CaptionStrategy = self.caption.parse()?;
        let job = Job::new(&self.job_name, &self.base_model)?;
        self.hyperparams.validate()?;
        Ok(TrainPlan {
            job,
            caption,
            learning_rate: self.hyperparams.parsed_learning_rate()?,
            hyperparams: self.hyperparams.clone(),
        })
    }
}
