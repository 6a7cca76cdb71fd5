use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use dca_bot::config::load_config;
use dca_bot::engine::Engine;
use dca_bot::market_data::MarketClient;
use dca_bot::storage::Storage;
use dca_bot::tasks::{spawn_refresh_task, spawn_rollover_task, TaskManager};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cfg = Arc::new(load_config()?);
    info!(
        "Starting budget engine for {} symbol(s), data dir {}",
        cfg.symbols.len(),
        cfg.data_dir
    );

    let storage = Arc::new(Storage::new(&cfg.data_dir)?);
    let migrated = storage.migrate_legacy_layout()?;
    if migrated > 0 {
        info!("Migrated {migrated} legacy document(s) to the versioned layout");
    }

    let engine = Arc::new(Engine::new(cfg.clone(), storage));
    let client = Arc::new(MarketClient::new(&cfg.binance)?);

    let mut tasks = TaskManager::new();
    if cfg.scheduler.enabled {
        spawn_refresh_task(&mut tasks, engine.clone(), client, cfg.clone());
        spawn_rollover_task(&mut tasks, engine.clone(), cfg.clone());
        info!(
            "Scheduler running: refresh every {}s, rollover check every {}s",
            cfg.scheduler.refresh_secs, cfg.scheduler.rollover_check_secs
        );
    } else {
        warn!("Scheduler disabled in config; no background refresh will run");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping background tasks");
    tasks.abort_all().await;

    Ok(())
}
