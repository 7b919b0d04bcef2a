use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobSlug, Stage};
use crate::json::write_pretty;
use crate::layout::TrainingLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How per-file metadata (captions) is derived for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStrategy {
    /// Captions come from file names and folder structure.
    Paths,
}

impl CaptionStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paths => "paths",
        }
    }

    /// Metadata module file under `metadata_modules/` for the given stage.
    #[must_use]
    pub fn module_file(self, stage: Stage) -> &'static str {
        match (self, stage) {
            (Self::Paths, Stage::PreEncode) => "paths_md_pre_encode.py",
            (Self::Paths, Stage::Train) => "paths_md.py",
        }
    }
}

impl FromStr for CaptionStrategy {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paths" => Ok(Self::Paths),
            other => Err(TrainingError::UnsupportedCaptionStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    AudioDir,
    PreEncoded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub path: PathBuf,
    pub custom_metadata_module: PathBuf,
}

/// Dataset config document consumed by the external toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub dataset_type: DatasetType,
    pub datasets: Vec<DatasetEntry>,
}

impl DatasetConfig {
    /// Raw audio under `data_root_dir`, captioned for pre-encoding.
    #[must_use]
    pub fn for_pre_encode(layout: &TrainingLayout, data_root_dir: &Path, caption: CaptionStrategy) -> Self {
        Self {
            dataset_type: DatasetType::AudioDir,
            datasets: vec![DatasetEntry {
                id: "audio".to_string(),
                path: data_root_dir.to_path_buf(),
                custom_metadata_module: layout.metadata_module(caption.module_file(Stage::PreEncode)),
            }],
        }
    }

    /// The job's pre-encoded latents. Fails if pre-encoding has not produced
    /// its output directory yet.
    pub fn for_training(layout: &TrainingLayout, slug: &JobSlug, caption: CaptionStrategy) -> TrainingResult<Self> {
        let pre_encoded = require_pre_encoded(layout, slug)?;
        Ok(Self {
            dataset_type: DatasetType::PreEncoded,
            datasets: vec![DatasetEntry {
                id: "audio_pre_encoded".to_string(),
                path: pre_encoded,
                custom_metadata_module: layout.metadata_module(caption.module_file(Stage::Train)),
            }],
        })
    }
}

/// Returns the job's pre-encoded dataset directory if it exists.
pub fn require_pre_encoded(layout: &TrainingLayout, slug: &JobSlug) -> TrainingResult<PathBuf> {
    let dir = layout.pre_encoded_dir(slug);
    if dir.is_dir() { Ok(dir) } else { Err(TrainingError::PreconditionFailed(dir)) }
}

/// Writes `dataset/pe_dataset_config.json` for the job, replacing any
/// previous copy.
pub fn write_pre_encode_dataset_config(
    layout: &TrainingLayout,
    slug: &JobSlug,
    data_root_dir: &Path,
    caption: CaptionStrategy,
) -> TrainingResult<PathBuf> {
    let config = DatasetConfig::for_pre_encode(layout, data_root_dir, caption);
    let path = layout.pre_encode_dataset_config_path(slug);
    write_pretty(&path, &config)?;
    Ok(path)
}

/// Writes `dataset_config.json` for the job. Nothing is written when the
/// pre-encoded dataset is missing.
pub fn write_training_dataset_config(
    layout: &TrainingLayout,
    slug: &JobSlug,
    caption: CaptionStrategy,
) -> TrainingResult<PathBuf> {
    let config = DatasetConfig::for_training(layout, slug, caption)?;
    let path = layout.training_dataset_config_path(slug);
    write_pretty(&path, &config)?;
    Ok(path)
}
