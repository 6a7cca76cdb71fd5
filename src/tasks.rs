// Background task management and the two periodic loops:
// snapshot refresh (network, then ledger-locked apply) and rollover ticks.

use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::AppCfg;
use crate::engine::Engine;
use crate::market_data::MarketClient;

#[derive(Clone)]
pub struct TaskInfo {
    pub name: String,
    pub handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

pub struct TaskManager {
    tasks: Vec<TaskInfo>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(TaskInfo {
            name: name.into(),
            handle: Arc::new(Mutex::new(Some(handle))),
        });
    }

    pub fn tasks(&self) -> &[TaskInfo] {
        &self.tasks
    }

    pub async fn abort_all(&self) {
        for task in &self.tasks {
            if let Some(handle) = task.handle.lock().await.take() {
                handle.abort();
                info!("TASKS: aborted '{}'", task.name);
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic snapshot refresh. Each cycle fetches market data for every
/// symbol (no ledger lock held) and then applies it through the engine,
/// which recomputes trend/band/flags and persists.
pub fn spawn_refresh_task(
    tm: &mut TaskManager,
    engine: Arc<Engine>,
    client: Arc<MarketClient>,
    cfg: Arc<AppCfg>,
) {
    tm.spawn("snapshot_refresh", async move {
        let mut ticker = interval(Duration::from_secs(cfg.scheduler.refresh_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let mut updated = 0usize;
            for symbol in &cfg.symbols {
                let snapshot = match client.fetch_snapshot(symbol, &cfg.trend).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!("REFRESH: {symbol}: snapshot fetch failed: {e}");
                        continue;
                    }
                };
                match engine.apply_snapshot(snapshot).await {
                    Ok(_) => updated += 1,
                    Err(e) => error!("REFRESH: {symbol}: apply failed: {e}"),
                }
            }
            info!("REFRESH: updated {updated}/{} symbols", cfg.symbols.len());
        }
    });
}

/// Periodic rollover boundary check. Applies any elapsed week/month ticks
/// per symbol; month-end liquidation actions are reported in the log.
pub fn spawn_rollover_task(tm: &mut TaskManager, engine: Arc<Engine>, cfg: Arc<AppCfg>) {
    tm.spawn("rollover_tick", async move {
        let mut ticker = interval(Duration::from_secs(cfg.scheduler.rollover_check_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let now = Utc::now();
            for symbol in &cfg.symbols {
                match engine.rollover_tick(symbol, now).await {
                    Ok(actions) => {
                        for action in actions {
                            info!(
                                "ROLLOVER: {} {} liquidate {} at market",
                                action.symbol, action.level, action.amount
                            );
                        }
                    }
                    Err(e) => error!("ROLLOVER: {symbol}: tick failed: {e}"),
                }
            }
        }
    });
}
