// Market data client for Binance spot public REST endpoints.
// Produces IndicatorSnapshot documents; missing fields degrade the snapshot
// (absent timeframe block, default filters) instead of failing the refresh.

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use log::warn;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{BinanceCfg, TrendCfg};
use crate::indicators::tf_snapshot;
use crate::types::{Candle, IndicatorSnapshot, SymbolFilters};

const MA_SHORT: usize = 30;
const MA_LONG: usize = 90;
const ATR_PERIOD: usize = 14;

pub struct MarketClient {
    http: Client,
    base_url: Url,
}

impl MarketClient {
    pub fn new(cfg: &BinanceCfg) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base url {}", cfg.base_url))?;
        Ok(Self { http, base_url })
    }

    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let mut url = self.base_url.join("/api/v3/klines")?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("interval", interval)
            .append_pair("limit", &limit.to_string());

        let rows: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let rows = rows
            .as_array()
            .ok_or_else(|| anyhow!("unexpected klines payload for {symbol}"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            match kline_row_to_candle(row) {
                Some(candle) => candles.push(candle),
                None => warn!("MARKET: skipping malformed kline row for {symbol}"),
            }
        }
        Ok(candles)
    }

    pub async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        let mut url = self.base_url.join("/api/v3/ticker/price")?;
        url.query_pairs_mut().append_pair("symbol", symbol);

        let body: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get("price")
            .and_then(|p| p.as_str())
            .and_then(|p| p.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("no price in ticker payload for {symbol}"))
    }

    /// Tick/step/notional filters from exchangeInfo. Any missing filter is
    /// left None; the band calculator falls back to a fixed tick.
    pub async fn fetch_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let mut url = self.base_url.join("/api/v3/exchangeInfo")?;
        url.query_pairs_mut().append_pair("symbol", symbol);

        let body: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut filters = SymbolFilters::default();
        let Some(filter_list) = body
            .get("symbols")
            .and_then(|s| s.as_array())
            .and_then(|s| s.first())
            .and_then(|s| s.get("filters"))
            .and_then(|f| f.as_array())
        else {
            return Ok(filters);
        };

        for f in filter_list {
            match f.get("filterType").and_then(|t| t.as_str()) {
                Some("PRICE_FILTER") => {
                    filters.tick_size = decimal_field(f, "tickSize");
                }
                Some("LOT_SIZE") => {
                    filters.step_size = decimal_field(f, "stepSize");
                }
                Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                    filters.min_notional = decimal_field(f, "minNotional");
                }
                _ => {}
            }
        }
        Ok(filters)
    }

    /// Assemble the full indicator snapshot for a symbol. A timeframe whose
    /// data cannot be fetched or computed is skipped with a warning; the
    /// trend classifier treats it as indeterminate.
    pub async fn fetch_snapshot(
        &self,
        symbol: &str,
        trend_cfg: &TrendCfg,
    ) -> Result<IndicatorSnapshot> {
        let now = Utc::now();
        let mut timeframes = BTreeMap::new();

        for tf in [&trend_cfg.tf1, &trend_cfg.tf2] {
            match self.fetch_klines(symbol, tf, trend_cfg.klines_limit).await {
                Ok(candles) => {
                    match tf_snapshot(&candles, MA_SHORT, MA_LONG, ATR_PERIOD, now) {
                        Some(block) => {
                            timeframes.insert(tf.clone(), block);
                        }
                        None => warn!(
                            "MARKET: {symbol} {tf}: not enough candles for indicators"
                        ),
                    }
                }
                Err(e) => warn!("MARKET: {symbol} {tf}: klines fetch failed: {e}"),
            }
        }

        let last_price = self.fetch_last_price(symbol).await.unwrap_or_else(|e| {
            warn!("MARKET: {symbol}: ticker fetch failed: {e}");
            0.0
        });

        let filters = self.fetch_filters(symbol).await.unwrap_or_else(|e| {
            warn!("MARKET: {symbol}: exchangeInfo fetch failed: {e}");
            SymbolFilters::default()
        });

        Ok(IndicatorSnapshot {
            symbol: symbol.to_uppercase(),
            last_price,
            timeframes,
            filters,
            updated_at: now,
        })
    }
}

fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
}

/// Binance kline rows are heterogeneous arrays:
/// [openTime, open, high, low, close, volume, ...] with numbers as strings.
fn kline_row_to_candle(row: &Value) -> Option<Candle> {
    let row = row.as_array()?;
    let open_time_ms = row.first()?.as_i64()?;
    let parse = |idx: usize| -> Option<f64> { row.get(idx)?.as_str()?.parse().ok() };

    Some(Candle {
        open_time: Utc.timestamp_millis_opt(open_time_ms).single()?,
        open: parse(1)?,
        high: parse(2)?,
        low: parse(3)?,
        close: parse(4)?,
        volume: parse(5)?,
    })
}
