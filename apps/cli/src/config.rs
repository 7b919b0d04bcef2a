//! CLI configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by clap)
//! 2. Local config file (./.audiogymrc)
//! 3. Global config file (~/.audiogym/config.toml)
//! 4. Defaults

use audiogym_training::{LaunchMode, Toolchain, TrainingHyperParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GymConfig {
    /// Install directory holding `models/`, `outputs/` and the tools checkout.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Model registry; defaults to `<root>/models.yaml`.
    #[serde(default)]
    pub registry: Option<PathBuf>,

    /// Interpreter the stage tools run under.
    #[serde(default)]
    pub python: Option<String>,

    /// stable-audio-tools checkout, relative to the root unless absolute.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,

    #[serde(default)]
    pub launch: Option<LaunchMode>,

    #[serde(default)]
    pub log_level: Option<String>,

    /// Bound of the per-stage log channel.
    #[serde(default)]
    pub channel_capacity: Option<usize>,

    #[serde(default)]
    pub defaults: JobDefaults,
}

/// Fallback values for the `pre-encode` and `train` flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefaults {
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub learning_rate: Option<String>,
    #[serde(default)]
    pub save_every: Option<u64>,
    #[serde(default)]
    pub sample_every: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Error)]
pub enum GymConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

pub type GymConfigResult<T> = std::result::Result<T, GymConfigError>;

impl GymConfig {
    /// Load configuration from a TOML file. `Ok(None)` when the file does
    /// not exist.
    pub fn load_from_file(path: &Path) -> GymConfigResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| GymConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map(Some)
            .map_err(|e| GymConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".audiogym").join("config.toml"))
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".audiogymrc")
    }

    /// Loads the global config then the local one, local values winning.
    /// A config file that exists but cannot be parsed is an error.
    pub fn discover_and_load() -> GymConfigResult<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::default_global_path() {
            if let Some(global) = Self::load_from_file(&global_path)? {
                config.merge(global);
            }
        }

        if let Some(local) = Self::load_from_file(&Self::default_local_path())? {
            config.merge(local);
        }

        Ok(config)
    }

    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.root, other.root);
        take(&mut self.registry, other.registry);
        take(&mut self.python, other.python);
        take(&mut self.tools_dir, other.tools_dir);
        take(&mut self.launch, other.launch);
        take(&mut self.log_level, other.log_level);
        take(&mut self.channel_capacity, other.channel_capacity);

        let d = other.defaults;
        take(&mut self.defaults.base_model, d.base_model);
        take(&mut self.defaults.caption, d.caption);
        take(&mut self.defaults.seed, d.seed);
        take(&mut self.defaults.workers, d.workers);
        take(&mut self.defaults.learning_rate, d.learning_rate);
        take(&mut self.defaults.save_every, d.save_every);
        take(&mut self.defaults.sample_every, d.sample_every);
        take(&mut self.defaults.batch_size, d.batch_size);
    }

    pub fn toolchain(&self) -> Toolchain {
        let mut toolchain = Toolchain::default();
        if let Some(ref python) = self.python {
            toolchain.python.clone_from(python);
        }
        if let Some(ref tools_dir) = self.tools_dir {
            toolchain.tools_dir.clone_from(tools_dir);
        }
        toolchain
    }
}

impl JobDefaults {
    pub fn caption(&self) -> String {
        self.caption.clone().unwrap_or_else(|| "paths".to_string())
    }

    pub fn hyperparams(&self) -> TrainingHyperParams {
        let base = TrainingHyperParams::default();
        TrainingHyperParams {
            seed: self.seed.unwrap_or(base.seed),
            workers: self.workers.unwrap_or(base.workers),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            learning_rate: self.learning_rate.clone().unwrap_or(base.learning_rate),
            checkpoint_every: self.save_every.unwrap_or(base.checkpoint_every),
            demo_every: self.sample_every.unwrap_or(base.demo_every),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(GymConfig::load_from_file(&temp.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn test_parse_and_merge() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        let local = temp.path().join("local.toml");
        std::fs::write(&global, "python = \"python3\"\nlaunch = \"script\"\n[defaults]\nseed = 7\nworkers = 8\n").unwrap();
        std::fs::write(&local, "python = \"/venv/bin/python\"\n[defaults]\nseed = 9\n").unwrap();

        let mut config = GymConfig::default();
        config.merge(GymConfig::load_from_file(&global).unwrap().unwrap());
        config.merge(GymConfig::load_from_file(&local).unwrap().unwrap());

        assert_eq!(config.python.as_deref(), Some("/venv/bin/python"));
        assert_eq!(config.launch, Some(LaunchMode::Script));
        let params = config.defaults.hyperparams();
        assert_eq!(params.seed, 9);
        assert_eq!(params.workers, 8);
        assert_eq!(params.learning_rate, "1e-4");
        assert_eq!(params.demo_every, 250);
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "pythn = \"python3\"\n").unwrap();
        assert!(matches!(GymConfig::load_from_file(&path), Err(GymConfigError::ParseError(_))));
    }

    #[test]
    fn test_toolchain_overrides() {
        let config = GymConfig { python: Some("sh".to_string()), ..Default::default() };
        let toolchain = config.toolchain();
        assert_eq!(toolchain.python, "sh");
        assert_eq!(toolchain.tools_dir, Toolchain::default().tools_dir);
    }
}
