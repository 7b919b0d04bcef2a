use crate::error::TrainingResult;
use crate::job::{Job, JobSlug, StageState};
use crate::json::write_pretty;
use crate::layout::TrainingLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-job record of the last known stage state, kept in `outputs/<slug>/job.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub name: String,
    pub slug: JobSlug,
    pub base_model: String,
    pub state: StageState,
    pub updated_at: DateTime<Utc>,
}

impl JobManifest {
    #[must_use]
    pub fn new(job: &Job, state: StageState) -> Self {
        Self {
            name: job.name.clone(),
            slug: job.slug.clone(),
            base_model: job.base_model.clone(),
            state,
            updated_at: Utc::now(),
        }
    }
}

pub fn read_manifest(path: &Path) -> TrainingResult<JobManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<JobManifest>(&bytes)?)
}

/// Reads the job's manifest, `None` when the job has never run or the file
/// is unreadable.
#[must_use]
pub fn load_manifest(layout: &TrainingLayout, slug: &JobSlug) -> Option<JobManifest> {
    read_manifest(&layout.job_manifest_path(slug)).ok()
}

pub fn write_manifest(layout: &TrainingLayout, job: &Job, state: StageState) -> TrainingResult<JobManifest> {
    let manifest = JobManifest::new(job, state);
    write_pretty(&layout.job_manifest_path(&job.slug), &manifest)?;
    Ok(manifest)
}

/// Discover jobs by scanning `outputs/*/job.json`, most recently updated
/// first. The reserved `sample` folder is skipped.
pub fn discover_jobs(layout: &TrainingLayout) -> TrainingResult<Vec<JobManifest>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(layout.outputs_dir()) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let job_dir = entry.path();
        if !job_dir.is_dir() || entry.file_name() == "sample" {
            continue;
        }
        let manifest_path = job_dir.join("job.json");
        if !manifest_path.exists() {
            continue;
        }
        match read_manifest(&manifest_path) {
            Ok(manifest) => out.push(manifest),
            Err(e) => tracing::warn!(path = %manifest_path.display(), error = %e, "skipping unreadable job manifest"),
        }
    }

    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(out)
}
