// Domain types for the budget ledger and band engine
// All types and enums are centralized here for single source of truth

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Core Domain Types
// ============================================================================

/// One of the five trading price tiers. OCO is the immediate-execution tier,
/// L0..L3 form the limit ladder below market.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Level {
    #[serde(rename = "OCO")]
    Oco,
    L0,
    L1,
    L2,
    L3,
}

impl Level {
    pub const ALL: [Level; 5] = [Level::Oco, Level::L0, Level::L1, Level::L2, Level::L3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Oco => "OCO",
            Level::L0 => "L0",
            Level::L1 => "L1",
            Level::L2 => "L2",
            Level::L3 => "L3",
        }
    }

    /// Levels whose month-end leftover is liquidated at market rather than
    /// carried into the next month.
    pub fn liquidates_at_month_end(&self) -> bool {
        matches!(self, Level::Oco | Level::L0)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market trend classification, per timeframe and overall.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Up,
    Down,
    Range,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Up => "UP",
            Trend::Down => "DOWN",
            Trend::Range => "RANGE",
        };
        f.write_str(s)
    }
}

/// Per-level buy signal derived from ledger state and market position.
///
/// Priority (highest first): Check, Caution, then the automatic
/// Green/Yellow/Red rule.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Flag {
    /// Safe to buy at market now.
    Green,
    /// Queue a limit order and wait.
    Yellow,
    /// Too risky, do not buy.
    Red,
    /// Level already filled this week.
    Check,
    /// A virtual order is currently open on this level.
    Caution,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Flag::Green => "GREEN",
            Flag::Yellow => "YELLOW",
            Flag::Red => "RED",
            Flag::Check => "CHECK",
            Flag::Caution => "CAUTION",
        };
        f.write_str(s)
    }
}

pub type FlagMap = BTreeMap<Level, Flag>;

// ============================================================================
// Market Data Types
// ============================================================================

/// One OHLCV candle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Indicator block for a single timeframe. Produced by the market data
/// refresh, read-only to the core.
///
/// Histories are trailing windows ending at the current value (last element ==
/// current ma30/ma90). `atr14 == 0` marks the block indeterminate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TfSnapshot {
    pub last_close: f64,
    pub ma30: f64,
    pub ma90: f64,
    pub ma30_history: Vec<f64>,
    pub ma90_history: Vec<f64>,
    pub atr14: f64,
    pub collected_at: DateTime<Utc>,
}

/// Exchange trading filters for a symbol.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

/// Latest market statistics for one symbol across the configured timeframes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub timeframes: BTreeMap<String, TfSnapshot>,
    pub filters: SymbolFilters,
    pub updated_at: DateTime<Utc>,
}

impl IndicatorSnapshot {
    pub fn timeframe(&self, tf: &str) -> Option<&TfSnapshot> {
        self.timeframes.get(tf)
    }
}

// ============================================================================
// Derived Band / Trend Types
// ============================================================================

/// Trend classification result: one value per timeframe plus the aggregate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrendState {
    pub per_tf: BTreeMap<String, Trend>,
    pub overall: Trend,
}

impl TrendState {
    pub fn indeterminate() -> Self {
        Self {
            per_tf: BTreeMap::new(),
            overall: Trend::Range,
        }
    }
}

/// Sell-side protective band around the mean: take-profit limit above,
/// stop trigger/limit below.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OcoBand {
    pub tp_limit: Decimal,
    pub sl_trigger: Decimal,
    pub sl_limit: Decimal,
    /// Half-width multiplier `r` used to derive the band (smoothed).
    pub width: f64,
    /// Bias offset `b` used to derive the band (smoothed).
    pub offset: f64,
}

/// Computed price levels for a symbol. Empty (all None) when the inputs are
/// indeterminate.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceBand {
    pub oco: Option<OcoBand>,
    pub l0: Option<Decimal>,
    pub l1: Option<Decimal>,
    pub l2: Option<Decimal>,
    pub l3: Option<Decimal>,
}

impl PriceBand {
    pub fn is_empty(&self) -> bool {
        self.oco.is_none()
            && self.l0.is_none()
            && self.l1.is_none()
            && self.l2.is_none()
            && self.l3.is_none()
    }

    /// Ladder price for a level; OCO has no single ladder price.
    pub fn level_price(&self, level: Level) -> Option<Decimal> {
        match level {
            Level::Oco => None,
            Level::L0 => self.l0,
            Level::L1 => self.l1,
            Level::L2 => self.l2,
            Level::L3 => self.l3,
        }
    }
}

/// Per-symbol damping state for the OCO band. Lives on the symbol aggregate
/// so it is persisted and mutated under the same lock as the ledger.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BandSmoothing {
    pub width: Option<f64>,
    pub offset: Option<f64>,
}

// ============================================================================
// Summary Types (returned by the operations API)
// ============================================================================

/// Snapshot of one level's ledger entry for display.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelSummary {
    pub quota: i64,
    pub rollover: i64,
    pub reserved: i64,
    pub spent: i64,
    pub week_spent: i64,
    /// Amount still reservable this week.
    pub available: i64,
    pub filled_this_week: bool,
}

/// Recomputed budget state returned by every mutating operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetSummary {
    pub symbol: String,
    pub monthly_budget: i64,
    pub week_index: u32,
    pub iso_week: u32,
    /// Unreserved, unspent monthly budget across all levels.
    pub free_budget: i64,
    pub levels: BTreeMap<Level, LevelSummary>,
}

/// Aggregate budget totals across every tracked symbol.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetTotals {
    pub symbols: usize,
    pub monthly_budget: i64,
    pub free_budget: i64,
}

/// Month-end instruction to buy the leftover of a weekly leg at market.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidationAction {
    pub symbol: String,
    pub level: Level,
    pub amount: i64,
}

/// One line of the per-symbol trend history log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrendRecord {
    pub ts: i64,
    pub symbol: String,
    pub per_tf: BTreeMap<String, Trend>,
    pub overall: Trend,
}
