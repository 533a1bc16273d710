use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use livechat::{Config, Monitor, logging, open_store};
use livechat_client::ApiClient;

/// Record chat events from live rooms.
#[derive(Debug, Parser)]
#[command(name = "livechat", version, about)]
struct Args {
    /// YAML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Room to monitor; repeatable. Replaces the rooms in the config file.
    #[arg(short, long = "room", value_name = "ID")]
    rooms: Vec<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::read(path)?,
        None => Config::default(),
    };
    if !args.rooms.is_empty() {
        config = config.with_rooms(args.rooms);
    }
    config.validate()?;

    let _log_guard = logging::init(&config.log)?;
    tracing::info!(rooms = ?config.rooms, backend = ?config.storage.backend, "livechat starting");

    let store = open_store(&config.storage)
        .await
        .context("failed to open storage")?;
    let api = ApiClient::new()?.with_client_config(config.client.clone());

    let mut monitor = Monitor::new(config.monitor.clone(), store);
    monitor
        .prepare(&api, &config.rooms)
        .await
        .context("failed to resolve rooms")?;
    monitor.run_until_ctrl_c().await?;

    tracing::info!("bye");
    Ok(())
}
