// Trend classification from MA divergence and slope
// Two threshold sets exist as named strategies, selected per timeframe slot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::TrendCfg;
use crate::types::{IndicatorSnapshot, TfSnapshot, Trend, TrendState};

/// Named classification strategy, selected per timeframe slot in the
/// configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrategy {
    /// Hysteresis band of 0.6×ATR with a non-decreasing/non-increasing
    /// divergence requirement.
    #[default]
    MaDivergence,
    /// Tighter 0.4×ATR band gated by an explicit 0.1×ATR slope threshold.
    SlopeGated,
}

impl TrendStrategy {
    pub fn classify(&self, tf: &TfSnapshot) -> Trend {
        // Indeterminate inputs always degrade to RANGE.
        if tf.atr14 <= 0.0 || tf.last_close <= 0.0 {
            return Trend::Range;
        }

        let d_now = tf.ma30 - tf.ma90;
        let d_prev = prev_divergence(tf).unwrap_or(d_now);

        match self {
            TrendStrategy::MaDivergence => {
                let h = 0.6 * tf.atr14;
                if d_now > h && d_now >= d_prev {
                    Trend::Up
                } else if d_now < -h && d_now <= d_prev {
                    Trend::Down
                } else {
                    Trend::Range
                }
            }
            TrendStrategy::SlopeGated => {
                let h = 0.4 * tf.atr14;
                let gate = 0.1 * tf.atr14;
                let slope = d_now - d_prev;
                if d_now > h && slope >= gate {
                    Trend::Up
                } else if d_now < -h && slope <= -gate {
                    Trend::Down
                } else {
                    Trend::Range
                }
            }
        }
    }
}

/// Divergence at the previous history point, when at least two points exist.
fn prev_divergence(tf: &TfSnapshot) -> Option<f64> {
    let n30 = tf.ma30_history.len();
    let n90 = tf.ma90_history.len();
    if n30 < 2 || n90 < 2 {
        return None;
    }
    Some(tf.ma30_history[n30 - 2] - tf.ma90_history[n90 - 2])
}

/// Aggregate two timeframe trends into the overall value:
/// both UP -> UP, either DOWN -> DOWN, anything else -> RANGE.
pub fn combine(tf1: Trend, tf2: Trend) -> Trend {
    if tf1 == Trend::Up && tf2 == Trend::Up {
        Trend::Up
    } else if tf1 == Trend::Down || tf2 == Trend::Down {
        Trend::Down
    } else {
        Trend::Range
    }
}

/// Classify every timeframe on a snapshot and derive the overall trend from
/// the configured pairing. Missing timeframe blocks count as RANGE.
pub fn classify_snapshot(snapshot: &IndicatorSnapshot, cfg: &TrendCfg) -> TrendState {
    let mut per_tf = BTreeMap::new();

    for (name, strategy) in [
        (&cfg.tf1, cfg.strategy_tf1),
        (&cfg.tf2, cfg.strategy_tf2),
    ] {
        let trend = snapshot
            .timeframe(name)
            .map(|tf| strategy.classify(tf))
            .unwrap_or(Trend::Range);
        per_tf.insert(name.clone(), trend);
    }

    let t1 = per_tf.get(&cfg.tf1).copied().unwrap_or(Trend::Range);
    let t2 = per_tf.get(&cfg.tf2).copied().unwrap_or(Trend::Range);

    TrendState {
        per_tf,
        overall: combine(t1, t2),
    }
}
