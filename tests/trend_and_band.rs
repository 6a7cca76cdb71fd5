// Trend classifier boundary behavior and band calculator output shape.

use chrono::Utc;
use rust_decimal_macros::dec;

use dca_bot::band::{compute_band, floor_to_tick};
use dca_bot::config::BandCfg;
use dca_bot::trend::{combine, TrendStrategy};
use dca_bot::types::{BandSmoothing, TfSnapshot, Trend};

mod test_utils {
    use super::*;

    /// Timeframe block with explicit divergence now/prev and ATR.
    pub fn tf(ma30: f64, ma90: f64, prev_ma30: f64, prev_ma90: f64, atr: f64) -> TfSnapshot {
        TfSnapshot {
            last_close: 100.0,
            ma30,
            ma90,
            ma30_history: vec![prev_ma30, ma30],
            ma90_history: vec![prev_ma90, ma90],
            atr14: atr,
            collected_at: Utc::now(),
        }
    }

    pub fn flat_tf(ma30: f64, atr: f64, last_close: f64) -> TfSnapshot {
        TfSnapshot {
            last_close,
            ma30,
            ma90: ma30,
            ma30_history: vec![ma30; 5],
            ma90_history: vec![ma30; 5],
            atr14: atr,
            collected_at: Utc::now(),
        }
    }
}

use test_utils::*;

// ============================================================================
// Trend classifier
// ============================================================================

#[test]
fn divergence_exactly_at_hysteresis_stays_range() {
    // H = 0.6 * 10 = 6; d_now == 6 must NOT classify as UP
    let block = tf(106.0, 100.0, 100.0, 100.0, 10.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Range);
}

#[test]
fn rising_divergence_above_hysteresis_is_up() {
    let block = tf(107.0, 100.0, 103.0, 100.0, 10.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Up);
}

#[test]
fn shrinking_divergence_is_range_even_above_hysteresis() {
    // d_now = 7 > H but d_prev = 9: momentum fading
    let block = tf(107.0, 100.0, 109.0, 100.0, 10.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Range);
}

#[test]
fn falling_divergence_below_negative_hysteresis_is_down() {
    let block = tf(93.0, 100.0, 96.0, 100.0, 10.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Down);
}

#[test]
fn zero_atr_is_indeterminate() {
    let block = tf(150.0, 100.0, 100.0, 100.0, 0.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Range);
    assert_eq!(TrendStrategy::SlopeGated.classify(&block), Trend::Range);
}

#[test]
fn zero_close_is_indeterminate() {
    let mut block = tf(150.0, 100.0, 100.0, 100.0, 10.0);
    block.last_close = 0.0;
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Range);
}

#[test]
fn short_history_falls_back_to_current_divergence() {
    let mut block = tf(107.0, 100.0, 0.0, 0.0, 10.0);
    block.ma30_history = vec![107.0];
    block.ma90_history = vec![100.0];
    // d_prev falls back to d_now, so the non-decreasing check passes
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Up);
}

#[test]
fn slope_gated_requires_both_band_and_slope() {
    // H = 0.4*10 = 4, gate = 1
    let fast_rise = tf(105.0, 100.0, 103.0, 100.0, 10.0); // d 3 -> 5, slope 2
    assert_eq!(TrendStrategy::SlopeGated.classify(&fast_rise), Trend::Up);

    let slow_rise = tf(105.0, 100.0, 104.5, 100.0, 10.0); // slope 0.5 < gate
    assert_eq!(TrendStrategy::SlopeGated.classify(&slow_rise), Trend::Range);

    let fast_fall = tf(95.0, 100.0, 97.0, 100.0, 10.0); // d -3 -> -5
    assert_eq!(TrendStrategy::SlopeGated.classify(&fast_fall), Trend::Down);
}

#[test]
fn strategies_disagree_between_thresholds() {
    // d_now = 5 sits between 0.4*ATR and 0.6*ATR: SlopeGated fires, the
    // hysteresis variant does not.
    let block = tf(105.0, 100.0, 103.0, 100.0, 10.0);
    assert_eq!(TrendStrategy::MaDivergence.classify(&block), Trend::Range);
    assert_eq!(TrendStrategy::SlopeGated.classify(&block), Trend::Up);
}

#[test]
fn overall_policy_table() {
    assert_eq!(combine(Trend::Up, Trend::Up), Trend::Up);
    assert_eq!(combine(Trend::Up, Trend::Range), Trend::Range);
    assert_eq!(combine(Trend::Range, Trend::Range), Trend::Range);
    assert_eq!(combine(Trend::Up, Trend::Down), Trend::Down);
    assert_eq!(combine(Trend::Down, Trend::Range), Trend::Down);
    assert_eq!(combine(Trend::Down, Trend::Down), Trend::Down);
}

// ============================================================================
// Band calculator
// ============================================================================

#[test]
fn zero_atr_yields_empty_band() {
    let block = flat_tf(100.0, 0.0, 100.0);
    let mut smoothing = BandSmoothing::default();
    let band = compute_band(
        Some(&block),
        100.0,
        Trend::Range,
        dec!(0.01),
        &mut smoothing,
        &BandCfg::default(),
    );
    assert!(band.is_empty());
}

#[test]
fn missing_timeframe_yields_empty_band() {
    let mut smoothing = BandSmoothing::default();
    let band = compute_band(
        None,
        100.0,
        Trend::Range,
        dec!(0.01),
        &mut smoothing,
        &BandCfg::default(),
    );
    assert!(band.is_empty());
}

#[test]
fn ladder_levels_descend_below_the_mean() {
    let block = flat_tf(100.0, 2.0, 100.0);
    let mut smoothing = BandSmoothing::default();
    let band = compute_band(
        Some(&block),
        100.0,
        Trend::Range,
        dec!(0.01),
        &mut smoothing,
        &BandCfg::default(),
    );

    let l1 = band.l1.unwrap();
    let l2 = band.l2.unwrap();
    let l3 = band.l3.unwrap();
    let l0 = band.l0.unwrap();
    let oco = band.oco.unwrap();

    assert!(l1 > l2 && l2 > l3, "ladder must descend: {l1} {l2} {l3}");
    assert!(l1 < dec!(100));
    assert!(l0 > l1 && l0 < oco.tp_limit, "L0 between L1 and TP");
    assert!(oco.sl_trigger < oco.tp_limit);
    assert_eq!(oco.sl_limit, oco.sl_trigger - dec!(0.02));
}

#[test]
fn prices_are_floored_to_the_tick_grid() {
    let block = flat_tf(123.456789, 3.21, 123.0);
    let mut smoothing = BandSmoothing::default();
    let tick = dec!(0.05);
    let band = compute_band(
        Some(&block),
        123.0,
        Trend::Range,
        tick,
        &mut smoothing,
        &BandCfg::default(),
    );

    for price in [
        band.l0.unwrap(),
        band.l1.unwrap(),
        band.l2.unwrap(),
        band.l3.unwrap(),
        band.oco.as_ref().unwrap().tp_limit,
        band.oco.as_ref().unwrap().sl_trigger,
    ] {
        assert_eq!(price % tick, dec!(0), "{price} not on the 0.05 grid");
    }
}

#[test]
fn down_trend_pushes_the_ladder_deeper() {
    let block = flat_tf(100.0, 2.0, 100.0);
    let cfg = BandCfg::default();

    let mut s1 = BandSmoothing::default();
    let range_band = compute_band(Some(&block), 100.0, Trend::Range, dec!(0.01), &mut s1, &cfg);
    let mut s2 = BandSmoothing::default();
    let down_band = compute_band(Some(&block), 100.0, Trend::Down, dec!(0.01), &mut s2, &cfg);

    assert!(down_band.l1.unwrap() < range_band.l1.unwrap());
}

#[test]
fn smoothing_holds_small_moves_and_damps_large_ones() {
    let cfg = BandCfg::default();
    // Flat market: t_score 0, atr% well under 2% -> raw width is exactly 0.35
    let block = flat_tf(1000.0, 5.0, 1000.0);

    // Small move: previous width within threshold is kept as-is
    let mut smoothing = BandSmoothing {
        width: Some(0.36),
        offset: Some(0.0),
    };
    compute_band(Some(&block), 1000.0, Trend::Range, dec!(0.01), &mut smoothing, &cfg);
    assert_eq!(smoothing.width, Some(0.36));

    // Large move: blended 70/30 toward the new value
    let mut smoothing = BandSmoothing {
        width: Some(0.80),
        offset: Some(0.0),
    };
    compute_band(Some(&block), 1000.0, Trend::Range, dec!(0.01), &mut smoothing, &cfg);
    let expected = 0.7 * 0.80 + 0.3 * 0.35;
    let got = smoothing.width.unwrap();
    assert!((got - expected).abs() < 1e-12, "got {got}, want {expected}");
}

#[test]
fn floor_to_tick_rounds_down() {
    assert_eq!(floor_to_tick(101.239, dec!(0.05)), Some(dec!(101.20)));
    assert_eq!(floor_to_tick(101.239, dec!(0)), Some(dec!(101.239)));
}
