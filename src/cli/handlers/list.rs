// src/cli/handlers/list.rs

use anyhow::{Context, Result};
use colored::Colorize;

use crate::core::{config_loader, templates};

/// Prints every template found in the configured template directories.
pub fn handle() -> Result<()> {
    let config = config_loader::load_config().context("Failed to load configuration")?;
    let entries = templates::list_templates(&config.render)?;

    if entries.is_empty() {
        let dirs = templates::template_dirs(&config.render)?
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{} {}", "No templates found in:".yellow(), dirs.dimmed());
        return Ok(());
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in entries {
        let name = format!("{:<width$}", entry.name, width = width);
        println!("{}  {}", name.cyan().bold(), entry.path.display().to_string().dimmed());
    }
    Ok(())
}
