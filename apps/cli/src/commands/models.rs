//! Models command implementation.

use super::types::ListCommand;
use super::Session;
use anyhow::Result;
use colored::Colorize;
use serde_json::json;

/// List the registry's base models with the autoencoder each one uses.
pub fn execute(session: &Session, command: &ListCommand) -> Result<()> {
    let registry = session.pipeline.registry();
    let cache = session.pipeline.cache();
    let default_id = registry.default_diffusion_id();

    if command.json {
        let models: Vec<_> = registry
            .diffusion_models()
            .map(|(id, model)| {
                json!({
                    "id": id,
                    "repo": model.repo,
                    "file": model.file,
                    "autoencoder": model.autoencoder,
                    "is_default": Some(id) == default_id,
                    "cached": cache.locate(&model.artifact()).checkpoint.exists(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    let count = registry.diffusion_models().count();
    println!();
    println!("{}", format!("Base Models ({})", count).bold().cyan());
    println!();

    println!("{:<28} {:<38} {:<30} {}", "ID", "Repository", "Autoencoder", "Status");
    println!("{}", "─".repeat(110));

    for (id, model) in registry.diffusion_models() {
        let default_str = if Some(id) == default_id { " (default)".green() } else { "".dimmed() };
        let status_str = if cache.locate(&model.artifact()).checkpoint.exists() {
            "✓ cached".green()
        } else {
            "not downloaded".dimmed()
        };
        println!(
            "{:<28} {:<38} {:<30} {}{}",
            id.cyan(),
            model.repo,
            model.autoencoder.dimmed(),
            status_str,
            default_str
        );
    }
    println!();
    Ok(())
}
