// Band calculation: OCO take-profit/stop band around the 12h mean plus the
// L0..L3 limit ladder below it. Pure except for the per-symbol smoothing
// state, which the caller owns and persists.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::BandCfg;
use crate::types::{BandSmoothing, OcoBand, PriceBand, TfSnapshot, Trend};

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Floor a price to the exchange tick grid. Conservative direction for buys:
/// always toward the lower price.
pub fn floor_to_tick(value: f64, tick: Decimal) -> Option<Decimal> {
    let v = Decimal::from_f64(value)?;
    if tick <= Decimal::ZERO {
        return Some(v);
    }
    Some((v / tick).floor() * tick)
}

/// Keep the previous smoothed value unless the new one moved by more than the
/// threshold; on a real move, blend damping×previous + (1-damping)×new.
fn smooth(prev: Option<f64>, new: f64, cfg: &BandCfg) -> f64 {
    match prev {
        None => new,
        Some(p) if (new - p).abs() <= cfg.smoothing_threshold => p,
        Some(p) => cfg.smoothing_damping * p + (1.0 - cfg.smoothing_damping) * new,
    }
}

/// MA30 slope proxy from the trailing history (average step per period).
fn ma_slope(tf: &TfSnapshot) -> f64 {
    let n = tf.ma30_history.len();
    if n < 2 {
        return 0.0;
    }
    (tf.ma30_history[n - 1] - tf.ma30_history[0]) / (n - 1) as f64
}

/// Compute the full price band for one symbol.
///
/// Returns an empty band when the reference timeframe is missing or its
/// MA30/ATR14 are non-positive. `smoothing` is updated in place with the
/// accepted OCO width/offset.
pub fn compute_band(
    tf: Option<&TfSnapshot>,
    last_price: f64,
    trend: Trend,
    tick: Decimal,
    smoothing: &mut BandSmoothing,
    cfg: &BandCfg,
) -> PriceBand {
    let Some(tf) = tf else {
        return PriceBand::default();
    };
    if tf.ma30 <= 0.0 || tf.atr14 <= 0.0 {
        return PriceBand::default();
    }

    let ma = tf.ma30;
    let atr = tf.atr14;
    let price = if last_price > 0.0 { last_price } else { tf.last_close };

    // ---- OCO band: trend score, bias offset and volatility width ----------
    let d1 = tf.ma30 - tf.ma90;
    let slope = ma_slope(tf);
    let t_dist = clamp(d1.abs() / (2.0 * atr), 0.0, 1.0);
    let t_slope = clamp(slope.abs() / (2.0 * atr), 0.0, 1.0);
    let t_score = 0.6 * t_dist + 0.4 * t_slope;

    let near_ma = (price - ma).abs() <= 0.2 * atr;
    let offset_raw = if near_ma { 0.0 } else { 0.20 + 0.35 * t_score };

    // Width from ATR as a fraction of the mean: 2%..8% maps to 0.35..0.75.
    let atr_pct = atr / ma;
    let width_vol = if atr_pct <= 0.02 {
        0.35
    } else if atr_pct >= 0.08 {
        0.75
    } else {
        0.35 + (atr_pct - 0.02) * (0.75 - 0.35) / 0.06
    };
    let width_raw = clamp(width_vol * (1.0 - 0.2 * t_score), 0.30, 0.90);

    let width = smooth(smoothing.width, width_raw, cfg);
    let offset = smooth(smoothing.offset, offset_raw, cfg);
    smoothing.width = Some(width);
    smoothing.offset = Some(offset);

    let half = width * atr;
    let oco = (|| {
        let tp_limit = floor_to_tick(ma + (1.0 - offset) * half, tick)?;
        let sl_trigger = floor_to_tick(ma - (1.0 + offset) * half, tick)?;
        // Stop limit widened two ticks below the trigger.
        let sl_limit = sl_trigger - tick * Decimal::TWO;
        Some(OcoBand {
            tp_limit,
            sl_trigger,
            sl_limit,
            width,
            offset,
        })
    })();

    // ---- Limit ladder: K1 / D12 / D23 multipliers -------------------------
    let is_up = trend == Trend::Up;
    let is_down = trend == Trend::Down;
    let trend_weight = if is_up || is_down { 0.7 } else { 0.3 };

    // Normalized distance of price below the mean, in ATR units.
    let d = clamp((ma - price) / (0.8 * atr), 0.0, 1.0);

    let k1_base = if is_up {
        1.1
    } else if is_down {
        1.8
    } else {
        1.4
    };
    let down_shift = if is_down { 0.30 } else { 0.0 };
    let up_pull = if is_up { 0.7 } else { 0.3 };
    let k1 = clamp(k1_base + down_shift - 0.20 * up_pull + 0.40 * d, 0.6, 2.4);
    let d12 = clamp(0.6 + 0.40 * d + 0.20 * trend_weight, 0.3, 1.2);
    let d23 = clamp(0.9 + 0.50 * d + 0.30 * trend_weight, 0.4, 1.6);

    let l1 = floor_to_tick(ma - k1 * atr, tick);
    let l2 = floor_to_tick(ma - (k1 + d12) * atr, tick);
    let l3 = floor_to_tick(ma - (k1 + d12 + d23) * atr, tick);

    // L0 sits halfway between the take-profit limit and L1.
    let l0 = match (&oco, l1) {
        (Some(band), Some(l1)) => {
            let mid = (band.tp_limit + l1) / Decimal::TWO;
            if tick > Decimal::ZERO {
                Some((mid / tick).floor() * tick)
            } else {
                Some(mid)
            }
        }
        _ => None,
    };

    PriceBand { oco, l0, l1, l2, l3 }
}
