// ENGINE: per-symbol aggregate and the operations surface invoked by the
// front end. Every symbol gets its own lock (never a global one); all
// mutations to one symbol's ledger are serialized through it. Display reads
// go through an eventually-consistent view map refreshed after each change.
//
// Network I/O never happens under a symbol lock: snapshots are fetched first
// and applied here afterwards.

use chrono::{DateTime, Datelike, Utc};
use log::{info, warn};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::band::compute_band;
use crate::config::AppCfg;
use crate::flags::derive_all;
use crate::ledger::{calc_windows, BudgetCycle, LedgerError};
use crate::storage::{Storage, StorageError, SymbolDoc};
use crate::trend::classify_snapshot;
use crate::types::{
    BandSmoothing, BudgetSummary, BudgetTotals, FlagMap, IndicatorSnapshot, Level,
    LiquidationAction, PriceBand, Trend, TrendRecord, TrendState,
};

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
    #[error("configuration value out of range: {0}")]
    ConfigOutOfRange(String),
}

/// Everything the engine tracks for one symbol, guarded by one mutex.
struct SymbolState {
    snapshot: Option<IndicatorSnapshot>,
    trend: Option<TrendState>,
    band: PriceBand,
    smoothing: BandSmoothing,
    flags: FlagMap,
    cycle: BudgetCycle,
}

impl SymbolState {
    fn overall_trend(&self) -> Trend {
        self.trend.as_ref().map(|t| t.overall).unwrap_or(Trend::Range)
    }

    fn last_price(&self) -> f64 {
        self.snapshot.as_ref().map(|s| s.last_price).unwrap_or(0.0)
    }
}

/// Read-only display copy of a symbol's state.
#[derive(Clone, Debug)]
pub struct SymbolView {
    pub symbol: String,
    pub summary: BudgetSummary,
    pub flags: FlagMap,
    pub band: PriceBand,
    pub trend: Option<TrendState>,
    pub last_price: f64,
    pub updated_at: DateTime<Utc>,
}

pub struct Engine {
    cfg: Arc<AppCfg>,
    storage: Arc<Storage>,
    symbols: RwLock<HashMap<String, Arc<Mutex<SymbolState>>>>,
    views: RwLock<HashMap<String, SymbolView>>,
}

impl Engine {
    pub fn new(cfg: Arc<AppCfg>, storage: Arc<Storage>) -> Self {
        Self {
            cfg,
            storage,
            symbols: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppCfg {
        &self.cfg
    }

    fn normalize(symbol: &str) -> String {
        symbol.trim().replace('/', "").to_uppercase()
    }

    /// Month identifier ("YYYYMM", local time) for an instant.
    fn month_tag_now(&self, now: DateTime<Utc>) -> String {
        let win = calc_windows(now, self.cfg.budget.tz_offset_hours);
        let local = (win.month_start
            + chrono::Duration::hours(self.cfg.budget.tz_offset_hours as i64))
        .naive_utc();
        format!("{:04}{:02}", local.year(), local.month())
    }

    /// Get or lazily create the aggregate for a symbol. Creation restores
    /// persisted documents; corrupt or missing ones fall back to zeroed
    /// state, which was already logged as recoverable by the storage layer.
    async fn ensure_symbol(&self, symbol: &str, now: DateTime<Utc>) -> Arc<Mutex<SymbolState>> {
        let key = Self::normalize(symbol);

        if let Some(state) = self.symbols.read().await.get(&key) {
            return state.clone();
        }

        let mut map = self.symbols.write().await;
        if let Some(state) = map.get(&key) {
            return state.clone();
        }

        let doc = self
            .storage
            .load_symbol_doc(&key)
            .unwrap_or_else(|| SymbolDoc::empty(&key, now));

        // Prefer the current month's cycle; fall back to the previous one so
        // a restart across a month boundary still runs the month-end close
        // (roll_forward in the next operation) instead of dropping the carry.
        let cycle = self
            .storage
            .load_cycle(&key, &self.month_tag_now(now))
            .or_else(|| {
                let win = calc_windows(now, self.cfg.budget.tz_offset_hours);
                let prev_tag =
                    self.month_tag_now(win.month_start - chrono::Duration::seconds(1));
                self.storage.load_cycle(&key, &prev_tag)
            })
            .unwrap_or_else(|| {
                BudgetCycle::new(
                    &key,
                    self.cfg.monthly_budget_for(&key),
                    Trend::Range,
                    &self.cfg.budget,
                    now,
                )
            });

        let state = Arc::new(Mutex::new(SymbolState {
            snapshot: doc.snapshot,
            trend: doc.trend,
            band: doc.band,
            smoothing: doc.smoothing,
            flags: doc.flags,
            cycle,
        }));
        map.insert(key, state.clone());
        state
    }

    // ------------------------------------------------------------------
    // Shared recompute / persist plumbing (called with the lock held)
    // ------------------------------------------------------------------

    fn resolved_tick(&self, state: &SymbolState) -> Decimal {
        state
            .snapshot
            .as_ref()
            .and_then(|s| s.filters.tick_size)
            .unwrap_or_else(|| {
                Decimal::from_f64(self.cfg.band.fallback_tick).unwrap_or(Decimal::new(1, 2))
            })
    }

    /// Recompute trend, band and flags from the current snapshot + ledger.
    fn recompute(&self, state: &mut SymbolState) {
        let (trend, band) = match &state.snapshot {
            Some(snapshot) => {
                let trend = classify_snapshot(snapshot, &self.cfg.trend);
                let tick = self.resolved_tick(state);
                let band = compute_band(
                    snapshot.timeframe(&self.cfg.trend.tf1),
                    snapshot.last_price,
                    trend.overall,
                    tick,
                    &mut state.smoothing,
                    &self.cfg.band,
                );
                (Some(trend), band)
            }
            None => (None, PriceBand::default()),
        };

        state.trend = trend;
        state.band = band;

        let tf1 = state
            .snapshot
            .as_ref()
            .and_then(|s| s.timeframe(&self.cfg.trend.tf1).cloned());
        state.flags = derive_all(
            &state.cycle,
            &state.band,
            state.overall_trend(),
            state.last_price(),
            tf1.as_ref(),
        );
    }

    fn persist(&self, state: &SymbolState, now: DateTime<Utc>) -> Result<(), StorageError> {
        let tag = state.cycle.month_tag(self.cfg.budget.tz_offset_hours);
        self.storage.save_cycle(&state.cycle, &tag)?;
        self.storage.save_symbol_doc(&SymbolDoc {
            schema_version: crate::storage::SCHEMA_VERSION,
            symbol: state.cycle.symbol.clone(),
            snapshot: state.snapshot.clone(),
            trend: state.trend.clone(),
            band: state.band.clone(),
            smoothing: state.smoothing.clone(),
            flags: state.flags.clone(),
            updated_at: now,
        })
    }

    async fn refresh_view(&self, state: &SymbolState, now: DateTime<Utc>) {
        let view = SymbolView {
            symbol: state.cycle.symbol.clone(),
            summary: state.cycle.summary(),
            flags: state.flags.clone(),
            band: state.band.clone(),
            trend: state.trend.clone(),
            last_price: state.last_price(),
            updated_at: now,
        };
        self.views
            .write()
            .await
            .insert(state.cycle.symbol.clone(), view);
    }

    /// Apply any week/month boundaries that have elapsed since the cycle was
    /// last touched. Month-end liquidation actions are returned to the
    /// caller and logged.
    fn roll_forward(
        &self,
        state: &mut SymbolState,
        now: DateTime<Utc>,
    ) -> (bool, Vec<LiquidationAction>) {
        let mut rolled = false;
        let mut actions = Vec::new();
        let trend = state.overall_trend();

        loop {
            if state.cycle.month_elapsed(now) {
                let monthly = self.cfg.monthly_budget_for(&state.cycle.symbol);
                let mut acts =
                    state
                        .cycle
                        .monthly_rollover(monthly, trend, &self.cfg.budget, now);
                for a in &acts {
                    info!(
                        "LEDGER: {} {} month-end leftover {} -> liquidate at market",
                        a.symbol, a.level, a.amount
                    );
                }
                actions.append(&mut acts);
                rolled = true;
            } else if state.cycle.week_elapsed(now) {
                state.cycle.weekly_rollover(trend, &self.cfg.budget, now);
                info!(
                    "LEDGER: {} weekly rollover -> week {} (ISO {})",
                    state.cycle.symbol, state.cycle.week_index, state.cycle.iso_week
                );
                rolled = true;
            } else {
                break;
            }
        }

        (rolled, actions)
    }

    /// Common tail of every mutating operation: recompute, persist, publish
    /// the display view. The ledger mutation stays applied even when the
    /// write fails; the next successful persist reconverges the document.
    async fn finish_op(
        &self,
        state: &mut SymbolState,
        now: DateTime<Utc>,
    ) -> Result<BudgetSummary, OpError> {
        self.recompute(state);
        let persist_result = self.persist(state, now);
        self.refresh_view(state, now).await;
        persist_result?;
        Ok(state.cycle.summary())
    }

    // ------------------------------------------------------------------
    // Operations API (front-end facing)
    // ------------------------------------------------------------------

    /// Open a virtual order: earmark `amount` on a level.
    pub async fn reserve(
        &self,
        symbol: &str,
        level: Level,
        amount: i64,
    ) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        if let Some(min_notional) = state
            .snapshot
            .as_ref()
            .and_then(|s| s.filters.min_notional)
        {
            let floor = min_notional.ceil().to_i64().unwrap_or(0);
            if amount < floor {
                return Err(LedgerError::BelowMinNotional {
                    amount,
                    min_notional: floor,
                }
                .into());
            }
        }

        state.cycle.reserve(level, amount)?;
        info!("LEDGER: {} reserve {} on {}", state.cycle.symbol, amount, level);
        self.finish_op(&mut state, now).await
    }

    /// Close a virtual order without a fill. Clamps at zero, never rejects.
    pub async fn cancel(
        &self,
        symbol: &str,
        level: Level,
        amount: i64,
    ) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        let released = state.cycle.cancel(level, amount);
        info!(
            "LEDGER: {} cancel {} on {} (released {})",
            state.cycle.symbol, amount, level, released
        );
        self.finish_op(&mut state, now).await
    }

    /// Mark a virtual order filled. Over-fills are truncated to the open
    /// reservation.
    pub async fn fill(
        &self,
        symbol: &str,
        level: Level,
        amount: i64,
    ) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        let applied = state.cycle.fill(level, amount);
        if applied < amount {
            warn!(
                "LEDGER: {} fill {} on {} truncated to open reservation {}",
                state.cycle.symbol, amount, level, applied
            );
        } else {
            info!("LEDGER: {} fill {} on {}", state.cycle.symbol, applied, level);
        }
        self.finish_op(&mut state, now).await
    }

    /// Release every open reservation on a symbol.
    pub async fn cancel_all(&self, symbol: &str) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        let released = state.cycle.cancel_all();
        info!(
            "LEDGER: {} cancel-all released {}",
            state.cycle.symbol, released
        );
        self.finish_op(&mut state, now).await
    }

    /// Force the weekly requota now (the periodic job runner decides when).
    pub async fn weekly_rollover(&self, symbol: &str) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;

        let trend = state.overall_trend();
        state.cycle.weekly_rollover(trend, &self.cfg.budget, now);
        info!(
            "LEDGER: {} weekly rollover -> week {}",
            state.cycle.symbol, state.cycle.week_index
        );
        self.finish_op(&mut state, now).await
    }

    /// Force the month-end close now. Returns the liquidation actions for
    /// the weekly legs alongside the fresh summary.
    pub async fn monthly_rollover(
        &self,
        symbol: &str,
    ) -> Result<(BudgetSummary, Vec<LiquidationAction>), OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;

        let trend = state.overall_trend();
        let monthly = self.cfg.monthly_budget_for(&state.cycle.symbol);
        let actions = state
            .cycle
            .monthly_rollover(monthly, trend, &self.cfg.budget, now);
        for a in &actions {
            info!(
                "LEDGER: {} {} month-end leftover {} -> liquidate at market",
                a.symbol, a.level, a.amount
            );
        }
        let summary = self.finish_op(&mut state, now).await?;
        Ok((summary, actions))
    }

    /// Catch-up tick used by the scheduler: applies elapsed boundaries only.
    pub async fn rollover_tick(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<LiquidationAction>, OpError> {
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;

        let (rolled, actions) = self.roll_forward(&mut state, now);
        if rolled {
            self.finish_op(&mut state, now).await?;
        }
        Ok(actions)
    }

    /// Change a symbol's monthly budget at runtime.
    pub async fn set_monthly_budget(
        &self,
        symbol: &str,
        amount: i64,
    ) -> Result<BudgetSummary, OpError> {
        if amount < 0 {
            return Err(OpError::ConfigOutOfRange(format!(
                "monthly budget must not be negative, got {amount}"
            )));
        }
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        let trend = state.overall_trend();
        state
            .cycle
            .set_monthly_budget(amount, trend, &self.cfg.budget);
        info!(
            "LEDGER: {} monthly budget set to {}",
            state.cycle.symbol, amount
        );
        self.finish_op(&mut state, now).await
    }

    /// Adjust a symbol's monthly budget by a delta (floored at zero).
    pub async fn adjust_monthly_budget(
        &self,
        symbol: &str,
        delta: i64,
    ) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let current = state.lock().await.cycle.monthly_budget;
        drop(state);
        self.set_monthly_budget(symbol, (current + delta).max(0))
            .await
    }

    /// Re-seed a symbol's cycle as if at the start of the period.
    pub async fn manual_reset(&self, symbol: &str) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let mut state = state.lock().await;

        let trend = state.overall_trend();
        state.cycle.reset(trend, &self.cfg.budget, now);
        info!("LEDGER: {} manual reset", state.cycle.symbol);
        self.finish_op(&mut state, now).await
    }

    // ------------------------------------------------------------------
    // Snapshot ingestion (called by the refresh task, network already done)
    // ------------------------------------------------------------------

    /// Install a freshly fetched indicator snapshot and recompute everything
    /// derived from it. Logs overall-trend transitions and appends the trend
    /// history line.
    pub async fn apply_snapshot(
        &self,
        snapshot: IndicatorSnapshot,
    ) -> Result<BudgetSummary, OpError> {
        let now = Utc::now();
        let state = self.ensure_symbol(&snapshot.symbol, now).await;
        let mut state = state.lock().await;
        self.roll_forward(&mut state, now);

        let old_trend = state.overall_trend();
        state.snapshot = Some(snapshot);
        let summary = self.finish_op(&mut state, now).await?;

        if let Some(trend) = &state.trend {
            if trend.overall != old_trend {
                info!(
                    "TREND: {} {} -> {}",
                    state.cycle.symbol, old_trend, trend.overall
                );
            }
            self.storage.append_trend_record(&TrendRecord {
                ts: now.timestamp(),
                symbol: state.cycle.symbol.clone(),
                per_tf: trend.per_tf.clone(),
                overall: trend.overall,
            });
        }

        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Display reads (eventually consistent, no symbol lock)
    // ------------------------------------------------------------------

    pub async fn view(&self, symbol: &str) -> Option<SymbolView> {
        self.views.read().await.get(&Self::normalize(symbol)).cloned()
    }

    pub async fn all_views(&self) -> Vec<SymbolView> {
        let mut views: Vec<_> = self.views.read().await.values().cloned().collect();
        views.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        views
    }

    /// Current summary for a symbol, computed under its lock.
    pub async fn summary(&self, symbol: &str) -> BudgetSummary {
        let now = Utc::now();
        let state = self.ensure_symbol(symbol, now).await;
        let state = state.lock().await;
        state.cycle.summary()
    }

    /// Budget totals across every symbol the engine has touched.
    pub async fn totals(&self) -> BudgetTotals {
        let states: Vec<_> = self.symbols.read().await.values().cloned().collect();

        let mut totals = BudgetTotals::default();
        for state in states {
            let state = state.lock().await;
            totals.symbols += 1;
            totals.monthly_budget += state.cycle.monthly_budget;
            totals.free_budget += state.cycle.free_budget();
        }
        totals
    }
}
