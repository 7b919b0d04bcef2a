//! Local cache of model checkpoints and configs.
//!
//! A file is considered cached when its path exists; contents are never
//! verified and cached files are never refreshed. Missing files are fetched
//! from the remote artifact store by `(repository, filename)`.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrainingLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::{ArtifactSpec, ModelRegistry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Remote artifact store.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Downloads `file` from `repo` so that it exists at `dest`.
    async fn fetch(&self, repo: &str, file: &str, dest: &Path) -> TrainingResult<()>;
}

/// Fetches from the Hugging Face Hub. Files land in the hub's own cache
/// first and are then linked (or copied, across filesystems) to their
/// destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct HfHubFetcher;

#[async_trait]
impl ArtifactFetcher for HfHubFetcher {
    async fn fetch(&self, repo: &str, file: &str, dest: &Path) -> TrainingResult<()> {
        let (repo, file, dest) = (repo.to_string(), file.to_string(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || -> TrainingResult<()> {
            let fail = |reason: String| TrainingError::Fetch { repo: repo.clone(), file: file.clone(), reason };
            let api = hf_hub::api::sync::Api::new().map_err(|e| fail(format!("failed to initialize hub client: {e}")))?;
            let downloaded = api.model(repo.clone()).get(&file).map_err(|e| fail(e.to_string()))?;
            link_or_copy(&downloaded, &dest)?;
            Ok(())
        })
        .await
        .map_err(|e| TrainingError::Other(anyhow::anyhow!("download task failed: {e}")))?
    }
}

/// Places `src` at `dest` as a regular file, sharing storage when possible.
/// Hub cache entries are symlinks into a blob store, so the target is
/// resolved first.
fn link_or_copy(src: &Path, dest: &Path) -> std::io::Result<()> {
    let target = src.canonicalize()?;
    if std::fs::hard_link(&target, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(&target, dest).map(|_| ())
}

/// Absolute local paths of a model's checkpoint and config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub checkpoint: PathBuf,
    pub config: PathBuf,
}

#[derive(Clone)]
pub struct ArtifactCache {
    layout: TrainingLayout,
    registry: Arc<ModelRegistry>,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache").field("layout", &self.layout).finish_non_exhaustive()
    }
}

impl ArtifactCache {
    #[must_use]
    pub fn new(layout: TrainingLayout, registry: Arc<ModelRegistry>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self { layout, registry, fetcher }
    }

    #[must_use]
    pub fn locate(&self, spec: &ArtifactSpec) -> ModelFiles {
        let dir = spec.local_dir();
        ModelFiles {
            checkpoint: self.layout.resolve(dir.join(&spec.file)),
            config: self.layout.resolve(dir.join(&spec.config_file)),
        }
    }

    /// Ensures the autoencoder `model_id` is cached locally.
    pub async fn ensure_autoencoder(&self, model_id: &str, progress: &dyn ProgressSink) -> TrainingResult<ModelFiles> {
        let spec = self.registry.autoencoder(model_id)?.artifact();
        self.ensure(&spec, &format!("autoencoder {model_id}"), progress).await
    }

    /// Ensures the diffusion model `model_id` is cached locally.
    pub async fn ensure_diffusion_model(&self, model_id: &str, progress: &dyn ProgressSink) -> TrainingResult<ModelFiles> {
        let spec = self.registry.diffusion(model_id)?.artifact();
        self.ensure(&spec, &format!("base model {model_id}"), progress).await
    }

    async fn ensure(&self, spec: &ArtifactSpec, label: &str, progress: &dyn ProgressSink) -> TrainingResult<ModelFiles> {
        let files = self.locate(spec);
        if !files.checkpoint.exists() {
            progress.on_event(ProgressEvent::info(format!(
                "Downloading {label}. Please wait, this can take a while."
            )));
            self.fetch(spec, &spec.file, &files.checkpoint).await?;
        }
        if !files.config.exists() {
            self.fetch(spec, &spec.config_file, &files.config).await?;
        }
        Ok(files)
    }

    async fn fetch(&self, spec: &ArtifactSpec, file: &str, dest: &Path) -> TrainingResult<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(repo = %spec.repo, file, dest = %dest.display(), "fetching artifact");
        self.fetcher.fetch(&spec.repo, file, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CollectingProgressSink;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const REGISTRY: &str = "diffusion:\n  sao:\n    repo: org/sao\n    file: model.safetensors\n    config_file: model_config.json\n    autoencoder: vae\nautoencoder:\n  vae:\n    repo: org/vae\n    file: ckpt/vae.ckpt\n    config_file: vae_config.json\n    flat: true\n";

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ArtifactFetcher for RecordingFetcher {
        async fn fetch(&self, repo: &str, file: &str, dest: &Path) -> TrainingResult<()> {
            self.calls.lock().unwrap().push((repo.to_string(), file.to_string()));
            std::fs::write(dest, format!("{repo}/{file}"))?;
            Ok(())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ArtifactFetcher for FailingFetcher {
        async fn fetch(&self, repo: &str, file: &str, _dest: &Path) -> TrainingResult<()> {
            Err(TrainingError::Fetch { repo: repo.to_string(), file: file.to_string(), reason: "offline".to_string() })
        }
    }

    fn cache(temp: &TempDir, fetcher: Arc<dyn ArtifactFetcher>) -> ArtifactCache {
        let registry = Arc::new(ModelRegistry::from_yaml_str(REGISTRY).unwrap());
        ArtifactCache::new(TrainingLayout::new(temp.path()), registry, fetcher)
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_fetched_once() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let cache = cache(&temp, fetcher.clone());
        let sink = CollectingProgressSink::new();

        let files = cache.ensure_diffusion_model("sao", &sink).await.unwrap();
        assert!(files.checkpoint.ends_with("models/dit/org/sao/model.safetensors"));
        assert!(files.checkpoint.exists());
        assert!(files.config.exists());
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
        assert_eq!(sink.notices(crate::progress::NoticeLevel::Info).len(), 1);

        cache.ensure_diffusion_model("sao", &sink).await.unwrap();
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_checkpoint_skips_fetch_regardless_of_content() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let cache = cache(&temp, fetcher.clone());
        let spec = cache.registry.autoencoder("vae").unwrap().artifact();
        let files = cache.locate(&spec);
        std::fs::create_dir_all(files.checkpoint.parent().unwrap()).unwrap();
        std::fs::write(&files.checkpoint, b"").unwrap();
        std::fs::write(&files.config, b"not even json").unwrap();

        let sink = CollectingProgressSink::new();
        let ensured = cache.ensure_autoencoder("vae", &sink).await.unwrap();
        assert_eq!(ensured, files);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_flat_autoencoder_with_nested_filename() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let cache = cache(&temp, fetcher.clone());
        let files = cache.ensure_autoencoder("vae", &CollectingProgressSink::new()).await.unwrap();
        assert_eq!(files.checkpoint, temp.path().join("models/autoencoder/ckpt/vae.ckpt"));
        assert_eq!(
            fetcher.calls.lock().unwrap()[0],
            ("org/vae".to_string(), "ckpt/vae.ckpt".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp, Arc::new(FailingFetcher));
        let err = cache.ensure_diffusion_model("sao", &CollectingProgressSink::new()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Fetch { ref reason, .. } if reason == "offline"));
    }

    #[cfg(unix)]
    #[test]
    fn test_link_or_copy_shares_the_resolved_blob() {
        use std::os::unix::fs::MetadataExt;

        let temp = TempDir::new().unwrap();
        let blob = temp.path().join("blobs/abc123");
        std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
        std::fs::write(&blob, "weights").unwrap();
        let snapshot = temp.path().join("snapshot.ckpt");
        std::os::unix::fs::symlink(&blob, &snapshot).unwrap();

        let dest = temp.path().join("model.ckpt");
        link_or_copy(&snapshot, &dest).unwrap();

        assert!(std::fs::symlink_metadata(&dest).unwrap().is_file());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "weights");
        assert_eq!(std::fs::metadata(&dest).unwrap().ino(), std::fs::metadata(&blob).unwrap().ino());
    }

    #[test]
    fn test_link_or_copy_fails_when_source_is_missing() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("model.ckpt");
        assert!(link_or_copy(&temp.path().join("missing"), &dest).is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unknown_model_is_rejected_before_fetch() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let cache = cache(&temp, fetcher.clone());
        assert!(cache.ensure_diffusion_model("nope", &CollectingProgressSink::new()).await.is_err());
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }
}
