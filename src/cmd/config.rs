//! Configuration view and validation commands: `clonewright config`.

use anyhow::{Context, Result};
use clonewright::config::{CONFIG_FILE, CloneConfig, CloneToml, config_dir};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let dir = config_dir(project_dir);
    let config_path = dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using defaults. Run 'clonewright config init' to create one.");
            }
            println!();

            // Effective values include environment overrides.
            let config = CloneConfig::new(project_dir.to_path_buf())?;
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                CloneToml::load(&config_path)?
            } else {
                println!("No {} found. Checking defaults.", CONFIG_FILE);
                CloneToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            CloneToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [generation] backend, model, max_parallel");
            println!("  - [budget] total_tokens, screenshot_tokens");
            println!("  - [scraper] command and [sandbox] command");
            println!();
        }
    }

    Ok(())
}
