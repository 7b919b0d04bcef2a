//! Training model config synthesis.
//!
//! The base model's own config is used as a template. Only three fields are
//! overlaid; every other field passes through untouched, in its original
//! order.

use crate::error::{TrainingError, TrainingResult};
use crate::job::JobSlug;
use crate::json::write_pretty;
use crate::layout::TrainingLayout;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const PRE_ENCODED: [&str; 2] = ["training", "pre_encoded"];
const DEMO_EVERY: [&str; 3] = ["training", "demo", "demo_every"];
const LEARNING_RATE: [&str; 6] = ["training", "optimizer_configs", "diffusion", "optimizer", "config", "lr"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOverlay {
    pub demo_every: u64,
    pub learning_rate: f64,
}

/// Applies the overlay to `template`. Missing intermediate objects are
/// created; an intermediate that exists but is not an object is an error.
pub fn overlay_training_config(mut template: Value, overlay: &TrainingOverlay) -> TrainingResult<Value> {
    let lr = serde_json::Number::from_f64(overlay.learning_rate).ok_or_else(|| {
        TrainingError::invalid("learning_rate", format!("{} is not representable in JSON", overlay.learning_rate))
    })?;
    set_path(&mut template, &PRE_ENCODED, Value::Bool(true))?;
    set_path(&mut template, &DEMO_EVERY, Value::from(overlay.demo_every))?;
    set_path(&mut template, &LEARNING_RATE, Value::Number(lr))?;
    Ok(template)
}

fn set_path(root: &mut Value, path: &[&str], value: Value) -> TrainingResult<()> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };
    let mut node = root;
    for (depth, key) in parents.iter().enumerate() {
        let map = as_object(node, &path[..depth])?;
        node = map.entry((*key).to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(node, parents)?.insert((*last).to_string(), value);
    Ok(())
}

fn as_object<'a>(node: &'a mut Value, at: &[&str]) -> TrainingResult<&'a mut Map<String, Value>> {
    node.as_object_mut().ok_or_else(|| {
        let location = if at.is_empty() { "<root>".to_string() } else { at.join(".") };
        TrainingError::ModelConfig(format!("{location} is not an object"))
    })
}

pub fn load_template(path: &Path) -> TrainingResult<Value> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Reads the base model config at `template_path`, overlays it and writes
/// the job's `training_model_config.json`, always replacing the old one.
pub fn write_training_config(
    layout: &TrainingLayout,
    slug: &JobSlug,
    template_path: &Path,
    overlay: &TrainingOverlay,
) -> TrainingResult<PathBuf> {
    let merged = overlay_training_config(load_template(template_path)?, overlay)?;
    let path = layout.training_config_path(slug);
    write_pretty(&path, &merged)?;
    Ok(path)
}
