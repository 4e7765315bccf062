//! Data directory setup: `prepdesk init`.

use anyhow::{Context, Result};

use super::{config_path, load_config, prepare_db_path};
use crate::Cli;
use prepdesk::config::PrepdeskToml;
use prepdesk::fulfillment::db::FulfillmentDb;

pub fn cmd_init(base_dir: &std::path::Path, cli: &Cli) -> Result<()> {
    let config_path = config_path(base_dir, cli);
    let created_config = !config_path.exists();
    if created_config {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        PrepdeskToml::default().save(&config_path)?;
    }

    let config = load_config(base_dir, cli)?;
    let db_path = prepare_db_path(base_dir, &config)?;
    FulfillmentDb::new(&db_path).context("Failed to initialize fulfillment database")?;
    tracing::debug!(config = %config_path.display(), db = %db_path.display(), "data directory ready");

    if created_config {
        println!("Initialized prepdesk at {}", base_dir.display());
        println!();
        println!("  config:   {}", config_path.display());
        println!("  database: {}", db_path.display());
        println!();
        println!("Next steps:");
        println!("  1. Set [upstream].base_url (or PREPDESK_UPSTREAM_URL) and the access token");
        println!("  2. Run `prepdesk worker add --name <name> --merchant <id>`");
        println!("  3. Run `prepdesk serve`");
    } else {
        println!("prepdesk already initialized ({})", config_path.display());
        println!("Database verified at {}", db_path.display());
    }

    Ok(())
}
