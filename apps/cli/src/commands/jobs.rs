//! Jobs command implementation.

use super::types::ListCommand;
use anyhow::{Context, Result};
use audiogym_training::{discover_jobs, StageState, TrainingLayout};
use colored::Colorize;
use serde_json::json;

pub fn execute(layout: &TrainingLayout, command: &ListCommand) -> Result<()> {
    let jobs = discover_jobs(layout).context("Failed to discover jobs")?;

    if command.json {
        let out: Vec<_> = jobs
            .iter()
            .map(|job| {
                json!({
                    "name": job.name,
                    "slug": job.slug,
                    "base_model": job.base_model,
                    "state": job.state,
                    "updated_at": job.updated_at,
                    "output_dir": layout.job_dir(&job.slug),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Jobs ({})", jobs.len()).bold().cyan());
    println!();

    if jobs.is_empty() {
        println!("  {}", "No jobs found under outputs/.".dimmed());
        println!();
        println!("  {}", "Tip: start one with `gym pre-encode --name <NAME> --data-dir <DIR>`.".dimmed());
        return Ok(());
    }

    println!("{:<24} {:<24} {:<26} {:<13} {}", "Slug", "Name", "Base Model", "State", "Updated");
    println!("{}", "─".repeat(110));
    for job in &jobs {
        let state = job.state.to_string();
        let state_str = match job.state {
            StageState::Trained | StageState::PreEncoded => state.green(),
            StageState::Failed => state.red(),
            StageState::PreEncoding | StageState::Training => state.yellow(),
            StageState::Unstarted => state.dimmed(),
        };
        println!(
            "{:<24} {:<24} {:<26} {:<13} {}",
            job.slug.as_str().cyan(),
            job.name,
            job.base_model.dimmed(),
            state_str,
            job.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    println!();
    Ok(())
}
