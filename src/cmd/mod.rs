//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`                                             |
//! | `serve`         | `Serve`                                            |
//! | `worker`        | `Worker`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod project;
pub mod serve;
pub mod worker;

pub use config::cmd_config;
pub use project::cmd_init;
pub use serve::cmd_serve;
pub use worker::cmd_worker;

use std::path::{Path, PathBuf};

use anyhow::Result;
use prepdesk::config::{PrepdeskToml, default_config_path};

use super::Cli;

/// Config file the command line points at.
pub(crate) fn config_path(base_dir: &Path, cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| default_config_path(base_dir))
}

/// Effective configuration: file, then environment, then CLI flags.
pub(crate) fn load_config(base_dir: &Path, cli: &Cli) -> Result<PrepdeskToml> {
    let mut config = PrepdeskToml::load_or_default(&config_path(base_dir, cli))?;
    config.apply_env();
    if let Some(db_path) = &cli.db_path {
        config.server.db_path = db_path.to_string_lossy().to_string();
    }
    Ok(config)
}

/// Resolve the database path against `base_dir` and make sure its parent exists.
pub(crate) fn prepare_db_path(base_dir: &Path, config: &PrepdeskToml) -> Result<PathBuf> {
    let path = base_dir.join(&config.server.db_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path)
}
