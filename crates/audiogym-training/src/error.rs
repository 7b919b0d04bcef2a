use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("unsupported caption strategy: {0} (supported: paths)")]
    UnsupportedCaptionStrategy(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("pre-encoded dataset not found at {}; run the pre-encoding step first", .0.display())]
    PreconditionFailed(PathBuf),

    #[error("unknown {category} model: {id}")]
    UnknownModel { category: &'static str, id: String },

    #[error("model registry error: {0}")]
    Registry(String),

    #[error("failed to fetch {file} from {repo}: {reason}")]
    Fetch { repo: String, file: String, reason: String },

    #[error("model config error: {0}")]
    ModelConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { name, reason: reason.into() }
    }

    /// Configuration and precondition errors abort a stage before any
    /// subprocess is launched. Fetch and I/O failures come from the
    /// environment and are not counted, even when they happen before launch.
    #[must_use]
    pub fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedCaptionStrategy(_)
                | Self::InvalidParameter { .. }
                | Self::PreconditionFailed(_)
                | Self::UnknownModel { .. }
                | Self::Registry(_)
                | Self::ModelConfig(_)
        )
    }
}
