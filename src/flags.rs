// Signal derivation: one flag per level from ledger state, band and trend.
// Pure functions; recomputed whenever any input changes.

use rust_decimal::prelude::ToPrimitive;

use crate::ledger::BudgetCycle;
use crate::types::{Flag, FlagMap, Level, PriceBand, TfSnapshot, Trend};

/// Trend-dependent (alpha, delta) multipliers for the OCO red thresholds.
fn oco_thresholds(trend: Trend) -> (f64, f64) {
    match trend {
        Trend::Up => (0.7, 0.5),
        Trend::Down => (0.3, 0.2),
        Trend::Range => (0.5, 0.3),
    }
}

fn oco_auto(band: &PriceBand, trend: Trend, price: f64, tf: &TfSnapshot) -> Flag {
    let Some(oco) = &band.oco else {
        return Flag::Yellow;
    };
    let (alpha, delta) = oco_thresholds(trend);

    let red_mean = tf.ma30 + (alpha + oco.offset) * tf.atr14;
    let red_tp = oco.tp_limit.to_f64().unwrap_or(f64::MAX) + delta * tf.atr14;
    if price > red_mean && price > red_tp {
        return Flag::Red;
    }

    let sl_trigger = oco.sl_trigger.to_f64().unwrap_or(0.0);
    if price <= sl_trigger {
        Flag::Green
    } else {
        Flag::Yellow
    }
}

fn ladder_auto(level: Level, band: &PriceBand, trend: Trend, price: f64) -> Flag {
    // Trend guards: deep levels are blocked when the market is unlikely to
    // reach them, L0 is blocked in a falling market.
    match (level, trend) {
        (Level::L0, Trend::Down) => return Flag::Red,
        (Level::L2, Trend::Up) => return Flag::Red,
        (Level::L3, Trend::Up) | (Level::L3, Trend::Range) => return Flag::Red,
        _ => {}
    }

    match band.level_price(level).and_then(|p| p.to_f64()) {
        None => Flag::Yellow,
        Some(level_price) => {
            if price <= level_price {
                Flag::Green
            } else {
                Flag::Yellow
            }
        }
    }
}

/// Derive the flag for one level.
///
/// A fill this week wins over everything; an open reservation wins over the
/// automatic price rule.
pub fn derive_flag(
    level: Level,
    cycle: &BudgetCycle,
    band: &PriceBand,
    trend: Trend,
    price: f64,
    tf: Option<&TfSnapshot>,
) -> Flag {
    let entry = cycle.entry(level);

    if entry.last_fill_week == Some(cycle.week_index) {
        return Flag::Check;
    }
    if entry.reserved > 0 {
        return Flag::Caution;
    }

    match level {
        Level::Oco => match tf {
            Some(tf) if tf.atr14 > 0.0 => oco_auto(band, trend, price, tf),
            _ => Flag::Yellow,
        },
        _ => ladder_auto(level, band, trend, price),
    }
}

/// Derive flags for every level of a symbol.
pub fn derive_all(
    cycle: &BudgetCycle,
    band: &PriceBand,
    trend: Trend,
    price: f64,
    tf: Option<&TfSnapshot>,
) -> FlagMap {
    Level::ALL
        .iter()
        .map(|&level| (level, derive_flag(level, cycle, band, trend, price, tf)))
        .collect()
}
