//! Declarative registry of supported base models.
//!
//! The registry is read once from `models.yaml` and validated in full before
//! any lookup: every record must carry its fields, and every diffusion model
//! must reference an autoencoder that exists.

use crate::error::{TrainingError, TrainingResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Diffusion,
    Autoencoder,
}

impl ModelCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diffusion => "diffusion",
            Self::Autoencoder => "autoencoder",
        }
    }

    /// Folder under `models/` where this category's artifacts are cached.
    #[must_use]
    pub fn folder(self) -> &'static str {
        match self {
            Self::Diffusion => "dit",
            Self::Autoencoder => "autoencoder",
        }
    }
}

/// A diffusion model record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffusionModel {
    pub repo: String,
    pub file: String,
    pub config_file: String,
    pub autoencoder: String,
    /// Cache files directly under `models/dit` instead of `models/dit/<repo>`.
    #[serde(default)]
    pub flat: bool,
}

/// An autoencoder model record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoencoderModel {
    pub repo: String,
    pub file: String,
    pub config_file: String,
    #[serde(default)]
    pub flat: bool,
}

/// The remote coordinates of a model's checkpoint and config, plus where
/// they land under `models/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub category: ModelCategory,
    pub repo: String,
    pub file: String,
    pub config_file: String,
    pub flat: bool,
}

impl ArtifactSpec {
    /// Directory, relative to the install root, the two files are stored in.
    #[must_use]
    pub fn local_dir(&self) -> PathBuf {
        let base = Path::new("models").join(self.category.folder());
        if self.flat { base } else { base.join(&self.repo) }
    }
}

impl DiffusionModel {
    #[must_use]
    pub fn artifact(&self) -> ArtifactSpec {
        ArtifactSpec {
            category: ModelCategory::Diffusion,
            repo: self.repo.clone(),
            file: self.file.clone(),
            config_file: self.config_file.clone(),
            flat: self.flat,
        }
    }
}

impl AutoencoderModel {
    #[must_use]
    pub fn artifact(&self) -> ArtifactSpec {
        ArtifactSpec {
            category: ModelCategory::Autoencoder,
            repo: self.repo.clone(),
            file: self.file.clone(),
            config_file: self.config_file.clone(),
            flat: self.flat,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    diffusion: serde_yaml::Mapping,
    #[serde(default)]
    autoencoder: serde_yaml::Mapping,
}

/// Immutable, validated model registry. Entries keep their file order; the
/// first diffusion model is the default base model.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    diffusion: Vec<(String, DiffusionModel)>,
    autoencoder: Vec<(String, AutoencoderModel)>,
}

impl ModelRegistry {
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::Registry(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> TrainingResult<Self> {
        let raw: RawRegistry = serde_yaml::from_str(contents)?;
        let registry = Self {
            diffusion: entries(ModelCategory::Diffusion, raw.diffusion)?,
            autoencoder: entries(ModelCategory::Autoencoder, raw.autoencoder)?,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> TrainingResult<()> {
        if self.diffusion.is_empty() {
            return Err(TrainingError::Registry("at least one diffusion model is required".to_string()));
        }
        for (id, model) in &self.diffusion {
            require_fields(id, &[&model.repo, &model.file, &model.config_file, &model.autoencoder])?;
            if self.autoencoder(&model.autoencoder).is_err() {
                return Err(TrainingError::Registry(format!(
                    "diffusion model {id} references unknown autoencoder {}",
                    model.autoencoder
                )));
            }
        }
        for (id, model) in &self.autoencoder {
            require_fields(id, &[&model.repo, &model.file, &model.config_file])?;
        }
        Ok(())
    }

    pub fn diffusion(&self, id: &str) -> TrainingResult<&DiffusionModel> {
        self.diffusion
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
            .ok_or_else(|| TrainingError::UnknownModel { category: "diffusion", id: id.to_string() })
    }

    pub fn autoencoder(&self, id: &str) -> TrainingResult<&AutoencoderModel> {
        self.autoencoder
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
            .ok_or_else(|| TrainingError::UnknownModel { category: "autoencoder", id: id.to_string() })
    }

    /// The autoencoder a diffusion model encodes its dataset with.
    pub fn autoencoder_for(&self, diffusion_id: &str) -> TrainingResult<(&str, &AutoencoderModel)> {
        let model = self.diffusion(diffusion_id)?;
        let ae = self.autoencoder(&model.autoencoder)?;
        Ok((model.autoencoder.as_str(), ae))
    }

    pub fn diffusion_models(&self) -> impl Iterator<Item = (&str, &DiffusionModel)> {
        self.diffusion.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn default_diffusion_id(&self) -> Option<&str> {
        self.diffusion.first().map(|(k, _)| k.as_str())
    }
}

fn entries<T: DeserializeOwned>(category: ModelCategory, mapping: serde_yaml::Mapping) -> TrainingResult<Vec<(String, T)>> {
    let mut out: Vec<(String, T)> = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let id = key.as_str().map(str::to_string).ok_or_else(|| {
            TrainingError::Registry(format!("{} model ids must be strings", category.as_str()))
        })?;
        if id.trim().is_empty() {
            return Err(TrainingError::Registry(format!("empty {} model id", category.as_str())));
        }
        let record = serde_yaml::from_value(value).map_err(|e| {
            TrainingError::Registry(format!("{} model {id}: {e}", category.as_str()))
        })?;
        out.push((id, record));
    }
    Ok(out)
}

fn require_fields(id: &str, fields: &[&String]) -> TrainingResult<()> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(TrainingError::Registry(format!("model {id} has an empty field")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r"
diffusion:
  stable-audio-open-1.0:
    repo: stabilityai/stable-audio-open-1.0
    file: model.safetensors
    config_file: model_config.json
    autoencoder: oobleck
  stable-audio-open-small:
    repo: stabilityai/stable-audio-open-small
    file: model.safetensors
    config_file: model_config.json
    autoencoder: oobleck-small
    flat: true
autoencoder:
  oobleck:
    repo: stabilityai/stable-audio-open-1.0
    file: vae_model.ckpt
    config_file: vae_model_config.json
  oobleck-small:
    repo: stabilityai/stable-audio-open-small
    file: vae_model.ckpt
    config_file: vae_model_config.json
    flat: true
";

    #[test]
    fn test_load_preserves_order_and_resolves_autoencoder() {
        let registry = ModelRegistry::from_yaml_str(REGISTRY).unwrap();
        let ids: Vec<_> = registry.diffusion_models().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["stable-audio-open-1.0", "stable-audio-open-small"]);
        assert_eq!(registry.default_diffusion_id(), Some("stable-audio-open-1.0"));

        let (ae_id, ae) = registry.autoencoder_for("stable-audio-open-small").unwrap();
        assert_eq!(ae_id, "oobleck-small");
        assert!(ae.flat);
    }

    #[test]
    fn test_local_dir_uses_repo_unless_flat() {
        let registry = ModelRegistry::from_yaml_str(REGISTRY).unwrap();
        let big = registry.diffusion("stable-audio-open-1.0").unwrap().artifact();
        let small = registry.diffusion("stable-audio-open-small").unwrap().artifact();
        assert_eq!(big.local_dir(), Path::new("models/dit/stabilityai/stable-audio-open-1.0"));
        assert_eq!(small.local_dir(), Path::new("models/dit"));
    }

    #[test]
    fn test_missing_field_fails_at_load() {
        let yaml = "diffusion:\n  m:\n    repo: r\n    file: f\n    autoencoder: a\nautoencoder:\n  a: {repo: r, file: f, config_file: c}\n";
        let err = ModelRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("config_file"), "{err}");
    }

    #[test]
    fn test_dangling_autoencoder_reference_fails_at_load() {
        let yaml = "diffusion:\n  m: {repo: r, file: f, config_file: c, autoencoder: nope}\n";
        let err = ModelRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown autoencoder nope"), "{err}");
    }

    #[test]
    fn test_unknown_model_lookup() {
        let registry = ModelRegistry::from_yaml_str(REGISTRY).unwrap();
        assert!(matches!(
            registry.diffusion("nope"),
            Err(TrainingError::UnknownModel { category: "diffusion", .. })
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "diffusion:\n  m: {repo: r, file: f, config_file: c, autoencoder: a, sha: x}\nautoencoder:\n  a: {repo: r, file: f, config_file: c}\n";
        assert!(ModelRegistry::from_yaml_str(yaml).is_err());
    }
}
