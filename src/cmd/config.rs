//! Configuration view and validation commands: `prepdesk config`.

use anyhow::Result;

use super::super::ConfigCommands;
use super::{config_path, load_config};
use crate::Cli;
use prepdesk::config::PrepdeskToml;

pub fn cmd_config(base_dir: &std::path::Path, cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config_path(base_dir, cli);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("prepdesk configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No prepdesk.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            let mut effective = load_config(base_dir, cli)?;
            if effective.upstream.access_token.is_some() {
                effective.upstream.access_token = Some("********".to_string());
            }
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&effective)?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No prepdesk.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = PrepdeskToml::load(&config_path)?;
            let warnings = config.validate();

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
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("prepdesk.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            PrepdeskToml::default().save(&config_path)?;

            println!("Created prepdesk.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [upstream] base_url, access_token, retry and paging limits");
            println!("  - [queue] and [eligibility] status lists");
            println!("  - [lifecycle.mirror.<status>] upstream targets and modes");
            println!();
        }
    }

    Ok(())
}
