// Indicator computation over candle series
// Plain rolling-window implementations; None marks points without enough data

use chrono::{DateTime, Utc};

use crate::types::{Candle, TfSnapshot};

/// Number of trailing MA points kept on a snapshot. Two are required for the
/// trend classifier; the extra points feed the OCO slope proxy.
const HISTORY_LEN: usize = 5;

/// Simple moving average. Output has the same length as the input; the first
/// `period - 1` entries are None.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    assert!(period > 0, "sma period must be > 0");

    let n = values.len();
    if n < period {
        return vec![None; n];
    }

    let mut result = vec![None; n];
    let mut window_sum: f64 = values[..period].iter().sum();
    result[period - 1] = Some(window_sum / period as f64);

    for i in period..n {
        window_sum += values[i] - values[i - period];
        result[i] = Some(window_sum / period as f64);
    }

    result
}

/// Average True Range as an SMA over the true-range series. The first
/// candle's true range is its high-low span (no previous close).
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    assert!(period > 0, "atr period must be > 0");

    let n = candles.len();
    if n == 0 {
        return Vec::new();
    }

    let mut true_ranges = Vec::with_capacity(n);
    true_ranges.push(candles[0].high - candles[0].low);

    let mut prev_close = candles[0].close;
    for candle in &candles[1..] {
        let tr = (candle.high - candle.low)
            .max((candle.high - prev_close).abs())
            .max((candle.low - prev_close).abs());
        true_ranges.push(tr);
        prev_close = candle.close;
    }

    sma(&true_ranges, period)
}

/// Build one timeframe's indicator block from a candle series.
///
/// Returns None when there is not enough data for the long MA — the caller
/// treats the missing block as indeterminate (trend RANGE, empty band).
pub fn tf_snapshot(
    candles: &[Candle],
    ma_short: usize,
    ma_long: usize,
    atr_period: usize,
    collected_at: DateTime<Utc>,
) -> Option<TfSnapshot> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let ma_short_arr = sma(&closes, ma_short);
    let ma_long_arr = sma(&closes, ma_long);
    let atr_arr = atr(candles, atr_period);

    // Last index where both MAs are defined.
    let last_idx = (0..candles.len())
        .rev()
        .find(|&i| ma_short_arr[i].is_some() && ma_long_arr[i].is_some())?;

    let ma30 = ma_short_arr[last_idx]?;
    let ma90 = ma_long_arr[last_idx]?;
    let atr14 = atr_arr
        .get(last_idx)
        .copied()
        .flatten()
        .unwrap_or(0.0);

    let history = |arr: &[Option<f64>]| -> Vec<f64> {
        arr[..=last_idx]
            .iter()
            .filter_map(|v| *v)
            .rev()
            .take(HISTORY_LEN)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    };

    Some(TfSnapshot {
        last_close: candles[last_idx].close,
        ma30,
        ma90,
        ma30_history: history(&ma_short_arr),
        ma90_history: history(&ma_long_arr),
        atr14,
        collected_at,
    })
}
