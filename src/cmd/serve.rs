//! HTTP API server command: `prepdesk serve`.

use anyhow::Result;

use super::{load_config, prepare_db_path};
use crate::Cli;
use prepdesk::fulfillment::server::start_server;

pub async fn cmd_serve(base_dir: &std::path::Path, cli: &Cli, port: Option<u16>, dev: bool) -> Result<()> {
    let config = load_config(base_dir, cli)?;
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    let mut server = config.server_config();
    server.db_path = prepare_db_path(base_dir, &config)?;
    if let Some(port) = port {
        server.port = port;
    }
    server.dev_mode |= dev;

    start_server(server).await
}
