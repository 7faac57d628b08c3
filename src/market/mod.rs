use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

pub mod coinalyze;

pub use coinalyze::CoinalyzeClient;

/// The candle fields the heuristics read, as the provider sent them. Fields
/// the provider omitted (or sent as something non-numeric) are `None`; the
/// rest of the record is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandleRecord {
    pub high: Option<f64>,
    pub volume: Option<f64>,
}

impl CandleRecord {
    pub fn from_json(value: &Value) -> Self {
        Self {
            high: value.get("high").and_then(lenient_f64),
            volume: value.get("volume").and_then(lenient_f64),
        }
    }

    /// Complete candle, or an error naming the first missing field.
    pub fn complete(&self) -> Result<Candle> {
        Ok(Candle {
            high: self.high.ok_or_else(|| anyhow!("candle missing high"))?,
            volume: self.volume.ok_or_else(|| anyhow!("candle missing volume"))?,
        })
    }
}

/// Candle with the fields the heuristics need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub high: f64,
    pub volume: f64,
}

/// Aggregate liquidation volume over the provider's lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiquidationSample {
    pub total: f64,
    pub average: f64,
    /// Records the provider returned. Zero means "no data", which is
    /// otherwise indistinguishable from a confirmed all-zero window.
    pub count: usize,
}

impl LiquidationSample {
    pub fn from_volumes(volumes: &[f64]) -> Self {
        let total: f64 = volumes.iter().sum();
        Self {
            total,
            average: total / volumes.len().max(1) as f64,
            count: volumes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Everything fetched for one symbol in one pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub candles: Vec<CandleRecord>,
    pub price: Option<f64>,
    pub liquidation: LiquidationSample,
}

/// Read-only market data source. Implementations never fail: transport and
/// decode problems degrade to empty results.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<CandleRecord>;
    async fn fetch_price(&self, symbol: &str) -> Option<f64>;
    async fn fetch_liquidation(&self, symbol: &str, limit: u32) -> LiquidationSample;
}

/// Numbers arrive either as JSON numbers or as numeric strings.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
