use crate::error::TrainingResult;
use crate::job::{JobSlug, Stage};
use std::path::{Component, Path, PathBuf};

/// Filesystem layout rooted at the application's install directory.
///
/// ```text
/// <root>/models.yaml
/// <root>/models/{dit,autoencoder}/...
/// <root>/metadata_modules/*.py
/// <root>/outputs/<slug>/
///     job.json
///     training_model_config.json
///     dataset_config.json
///     pre-encode.sh | train.sh
///     dataset/pe_dataset_config.json
///     dataset/pre_encoded/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: normalize(&root.into()) }
    }

    /// Layout rooted at an absolute form of `root`, resolving relative roots
    /// against the current directory.
    pub fn discover(root: &Path) -> TrainingResult<Self> {
        Ok(Self::new(std::path::absolute(root)?))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins `relative` onto the root and normalizes the result lexically.
    /// Absolute inputs replace the root, as with `Path::join`.
    #[must_use]
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        normalize(&self.root.join(relative))
    }

    /// Same as [`resolve`](Self::resolve), wrapped in double quotes for
    /// interpolation into a shell command line.
    #[must_use]
    pub fn resolve_quoted(&self, relative: impl AsRef<Path>) -> String {
        format!("\"{}\"", self.resolve(relative).display())
    }

    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.resolve("models.yaml")
    }

    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.resolve("models")
    }

    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.resolve("outputs")
    }

    #[must_use]
    pub fn metadata_module(&self, file_name: &str) -> PathBuf {
        self.resolve(Path::new("metadata_modules").join(file_name))
    }

    #[must_use]
    pub fn job_dir(&self, slug: &JobSlug) -> PathBuf {
        self.outputs_dir().join(slug.as_str())
    }

    #[must_use]
    pub fn job_manifest_path(&self, slug: &JobSlug) -> PathBuf {
        self.job_dir(slug).join("job.json")
    }

    #[must_use]
    pub fn dataset_dir(&self, slug: &JobSlug) -> PathBuf {
        self.job_dir(slug).join("dataset")
    }

    #[must_use]
    pub fn pre_encode_dataset_config_path(&self, slug: &JobSlug) -> PathBuf {
        self.dataset_dir(slug).join("pe_dataset_config.json")
    }

    #[must_use]
    pub fn pre_encoded_dir(&self, slug: &JobSlug) -> PathBuf {
        self.dataset_dir(slug).join("pre_encoded")
    }

    #[must_use]
    pub fn training_config_path(&self, slug: &JobSlug) -> PathBuf {
        self.job_dir(slug).join("training_model_config.json")
    }

    #[must_use]
    pub fn training_dataset_config_path(&self, slug: &JobSlug) -> PathBuf {
        self.job_dir(slug).join("dataset_config.json")
    }

    #[must_use]
    pub fn script_path(&self, slug: &JobSlug, stage: Stage, extension: &str) -> PathBuf {
        self.job_dir(slug).join(format!("{}.{extension}", stage.script_stem()))
    }

    pub fn ensure_job_dir(&self, slug: &JobSlug) -> TrainingResult<PathBuf> {
        let dir = self.job_dir(slug);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Lexical normalization: drops `.` components and folds `..` into the
/// preceding component. Never touches the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
