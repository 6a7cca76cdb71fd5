// Configuration structures and loading logic
// YAML file with per-field defaults; values are validated once at load time

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::trend::TrendStrategy;
use crate::types::{Level, Trend};

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    /// Directory holding all persisted per-symbol documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Symbols tracked by the engine, e.g. ["BTCUSDC", "ETHUSDC"].
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default)]
    pub budget: BudgetCfg,
    #[serde(default)]
    pub trend: TrendCfg,
    #[serde(default)]
    pub band: BandCfg,
    #[serde(default)]
    pub scheduler: SchedulerCfg,
    #[serde(default)]
    pub binance: BinanceCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetCfg {
    /// Monthly budget in whole quote-currency units, used for symbols without
    /// a per-symbol override.
    #[serde(default)]
    pub default_monthly: i64,
    /// Per-symbol monthly budget overrides.
    #[serde(default)]
    pub per_symbol: BTreeMap<String, i64>,
    /// Number of weeks in one budgeting cycle.
    #[serde(default = "default_cycle_weeks")]
    pub cycle_weeks: u32,
    /// Accumulated rollover is capped at this multiple of the base quota.
    #[serde(default = "default_rollover_cap_mult")]
    pub rollover_cap_mult: i64,
    /// Local timezone offset applied when computing week/month windows.
    #[serde(default)]
    pub tz_offset_hours: i32,
    #[serde(default)]
    pub allocation: AllocationCfg,
}

impl Default for BudgetCfg {
    fn default() -> Self {
        Self {
            default_monthly: 0,
            per_symbol: BTreeMap::new(),
            cycle_weeks: default_cycle_weeks(),
            rollover_cap_mult: default_rollover_cap_mult(),
            tz_offset_hours: 0,
            allocation: AllocationCfg::default(),
        }
    }
}

/// Percentage share of the monthly budget per level, one row per trend.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct AllocationRow {
    pub oco: u32,
    pub l0: u32,
    pub l1: u32,
    pub l2: u32,
    pub l3: u32,
}

impl AllocationRow {
    pub fn share(&self, level: Level) -> u32 {
        match level {
            Level::Oco => self.oco,
            Level::L0 => self.l0,
            Level::L1 => self.l1,
            Level::L2 => self.l2,
            Level::L3 => self.l3,
        }
    }

    pub fn total(&self) -> u32 {
        self.oco + self.l0 + self.l1 + self.l2 + self.l3
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct AllocationCfg {
    #[serde(default = "default_alloc_up")]
    pub up: AllocationRow,
    #[serde(default = "default_alloc_range")]
    pub range: AllocationRow,
    #[serde(default = "default_alloc_down")]
    pub down: AllocationRow,
}

impl AllocationCfg {
    pub fn row(&self, trend: Trend) -> &AllocationRow {
        match trend {
            Trend::Up => &self.up,
            Trend::Range => &self.range,
            Trend::Down => &self.down,
        }
    }
}

impl Default for AllocationCfg {
    fn default() -> Self {
        Self {
            up: default_alloc_up(),
            range: default_alloc_range(),
            down: default_alloc_down(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrendCfg {
    /// Primary (reference) timeframe, also used by the band calculator.
    #[serde(default = "default_tf1")]
    pub tf1: String,
    /// Secondary timeframe for the overall trend pairing.
    #[serde(default = "default_tf2")]
    pub tf2: String,
    /// Classification strategy used on tf1.
    #[serde(default)]
    pub strategy_tf1: TrendStrategy,
    /// Classification strategy used on tf2. May differ from tf1.
    #[serde(default)]
    pub strategy_tf2: TrendStrategy,
    /// Candles fetched per timeframe for indicator computation.
    #[serde(default = "default_klines_limit")]
    pub klines_limit: u32,
}

impl Default for TrendCfg {
    fn default() -> Self {
        Self {
            tf1: default_tf1(),
            tf2: default_tf2(),
            strategy_tf1: TrendStrategy::default(),
            strategy_tf2: TrendStrategy::default(),
            klines_limit: default_klines_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BandCfg {
    /// Fraction of the previous value retained when the OCO band moves.
    #[serde(default = "default_smoothing_damping")]
    pub smoothing_damping: f64,
    /// Minimum change in width/offset before the band is allowed to move.
    #[serde(default = "default_smoothing_threshold")]
    pub smoothing_threshold: f64,
    /// Tick size assumed when the exchange filter is unknown.
    #[serde(default = "default_fallback_tick")]
    pub fallback_tick: f64,
}

impl Default for BandCfg {
    fn default() -> Self {
        Self {
            smoothing_damping: default_smoothing_damping(),
            smoothing_threshold: default_smoothing_threshold(),
            fallback_tick: default_fallback_tick(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerCfg {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Seconds between market snapshot refreshes.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    /// Seconds between rollover boundary checks.
    #[serde(default = "default_rollover_check_secs")]
    pub rollover_check_secs: u64,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            refresh_secs: default_refresh_secs(),
            rollover_check_secs: default_rollover_check_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BinanceCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BinanceCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_quote_asset() -> String {
    "USDC".to_string()
}

fn default_cycle_weeks() -> u32 {
    4
}

fn default_rollover_cap_mult() -> i64 {
    4
}

fn default_alloc_up() -> AllocationRow {
    AllocationRow {
        oco: 30,
        l0: 30,
        l1: 25,
        l2: 10,
        l3: 5,
    }
}

fn default_alloc_range() -> AllocationRow {
    AllocationRow {
        oco: 20,
        l0: 20,
        l1: 30,
        l2: 20,
        l3: 10,
    }
}

fn default_alloc_down() -> AllocationRow {
    AllocationRow {
        oco: 10,
        l0: 15,
        l1: 25,
        l2: 25,
        l3: 25,
    }
}

fn default_tf1() -> String {
    "12h".to_string()
}

fn default_tf2() -> String {
    "6h".to_string()
}

fn default_klines_limit() -> u32 {
    100
}

fn default_smoothing_damping() -> f64 {
    0.7
}

fn default_smoothing_threshold() -> f64 {
    0.05
}

fn default_fallback_tick() -> f64 {
    0.01
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_refresh_secs() -> u64 {
    900
}

fn default_rollover_check_secs() -> u64 {
    300
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl AppCfg {
    /// Monthly budget for a symbol: per-symbol override or the default.
    pub fn monthly_budget_for(&self, symbol: &str) -> i64 {
        self.budget
            .per_symbol
            .get(symbol)
            .copied()
            .unwrap_or(self.budget.default_monthly)
    }
}

/// Load application configuration from a YAML file.
///
/// The path can be given via `--config <path>`; it defaults to
/// `./config.yaml`. Fails if the file cannot be read, parsed, or validated.
pub fn load_config() -> Result<AppCfg> {
    let args: Vec<String> = std::env::args().collect();
    let path = args
        .windows(2)
        .find_map(|w| {
            if w[0] == "--config" {
                Some(w[1].clone())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "./config.yaml".to_string());

    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("cannot read config file {path}: {e}"))?;
    let cfg: AppCfg = serde_yaml::from_str(&content)?;

    validate_config(&cfg)?;
    Ok(cfg)
}

/// Validate configuration values. Out-of-range values are rejected outright;
/// the caller keeps whatever configuration it had before.
pub fn validate_config(cfg: &AppCfg) -> Result<()> {
    if cfg.symbols.is_empty() {
        return Err(anyhow!("symbols must not be empty"));
    }
    if cfg.budget.cycle_weeks == 0 || cfg.budget.cycle_weeks > 6 {
        return Err(anyhow!(
            "budget.cycle_weeks must be within 1..=6, got {}",
            cfg.budget.cycle_weeks
        ));
    }
    if cfg.budget.rollover_cap_mult < 0 || cfg.budget.rollover_cap_mult > 12 {
        return Err(anyhow!(
            "budget.rollover_cap_mult must be within 0..=12, got {}",
            cfg.budget.rollover_cap_mult
        ));
    }
    if cfg.budget.tz_offset_hours < -12 || cfg.budget.tz_offset_hours > 14 {
        return Err(anyhow!(
            "budget.tz_offset_hours must be within -12..=14, got {}",
            cfg.budget.tz_offset_hours
        ));
    }
    if cfg.budget.default_monthly < 0 {
        return Err(anyhow!("budget.default_monthly must not be negative"));
    }
    for (sym, amount) in &cfg.budget.per_symbol {
        if *amount < 0 {
            return Err(anyhow!("budget.per_symbol.{sym} must not be negative"));
        }
    }

    for (name, row) in [
        ("up", &cfg.budget.allocation.up),
        ("range", &cfg.budget.allocation.range),
        ("down", &cfg.budget.allocation.down),
    ] {
        if row.total() > 100 {
            return Err(anyhow!(
                "budget.allocation.{name} shares sum to {} (> 100)",
                row.total()
            ));
        }
    }

    if !(0.0..1.0).contains(&cfg.band.smoothing_damping) {
        return Err(anyhow!(
            "band.smoothing_damping must be within [0, 1), got {}",
            cfg.band.smoothing_damping
        ));
    }
    if cfg.band.smoothing_threshold < 0.0 {
        return Err(anyhow!("band.smoothing_threshold must not be negative"));
    }
    if cfg.band.fallback_tick <= 0.0 {
        return Err(anyhow!("band.fallback_tick must be positive"));
    }

    if cfg.scheduler.refresh_secs < 60 || cfg.scheduler.refresh_secs > 21_600 {
        return Err(anyhow!(
            "scheduler.refresh_secs must be within 60..=21600, got {}",
            cfg.scheduler.refresh_secs
        ));
    }
    if cfg.scheduler.rollover_check_secs < 60 || cfg.scheduler.rollover_check_secs > 86_400 {
        return Err(anyhow!(
            "scheduler.rollover_check_secs must be within 60..=86400, got {}",
            cfg.scheduler.rollover_check_secs
        ));
    }

    if cfg.trend.tf1 == cfg.trend.tf2 {
        return Err(anyhow!("trend.tf1 and trend.tf2 must differ"));
    }

    Ok(())
}
