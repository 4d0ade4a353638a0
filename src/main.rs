mod ai;
mod app;
mod config;
mod console;
mod db;
mod domain;
mod feed;
mod infrastructure;
mod stats;
mod tasks;

use anyhow::Result;
use infrastructure::{directories, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config)?;
    let debug = logging::init_tracing(&config, &paths)?;

    let shutdown = shutdown::Shutdown::new();
    shutdown.listen_for_signals();

    let app = app::MuteTheWebApp::initialize(config, paths, debug, shutdown.clone()).await?;
    app.run().await
}
