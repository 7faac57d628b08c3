use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::market::{lenient_f64, CandleRecord, LiquidationSample, MarketData};

/// REST client for the futures data provider.
pub struct CoinalyzeClient {
    client: Client,
    base: String,
    api_key: Option<String>,
}

impl CoinalyzeClient {
    pub fn new(base: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .context("building data provider client")?,
            base: base.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.data_base.clone(), cfg.data_api_key.clone(), cfg.http_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// GET `{base}/{path}` and return the body, which must be a JSON list.
    async fn get_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let _scope = ProfileScope::with_context("market.get", &[("path", v_str(path))]);
        let url = format!("{}/{}", self.base, path);
        let mut req = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("api_key", key);
        }
        let resp = req.send().await.with_context(|| format!("GET {path}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {path} returned {status}");
        }
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("GET {path} returned malformed JSON"))?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(anyhow!("GET {path} returned non-list {}", kind_of(&other))),
        }
    }

    pub async fn try_fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<CandleRecord>> {
        let items = self
            .get_list(
                "candles",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(items.iter().map(CandleRecord::from_json).collect())
    }

    pub async fn try_fetch_price(&self, symbol: &str) -> Result<Option<f64>> {
        let items = self.get_list("tickers", &[("symbol", symbol.to_string())]).await?;
        let Some(first) = items.first() else {
            return Ok(None);
        };
        let last = first
            .get("last")
            .and_then(lenient_f64)
            .ok_or_else(|| anyhow!("ticker for {symbol} has no numeric last"))?;
        Ok(Some(last))
    }

    pub async fn try_fetch_liquidation(&self, symbol: &str, limit: u32) -> Result<LiquidationSample> {
        let items = self
            .get_list(
                "liquidation",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        let volumes: Vec<f64> = items
            .iter()
            .map(|x| x.get("volume").and_then(lenient_f64).unwrap_or(0.0))
            .collect();
        Ok(LiquidationSample::from_volumes(&volumes))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn log_degraded(call: &str, symbol: &str, err: &anyhow::Error) {
    log(
        Level::Warn,
        Domain::Market,
        "fetch_failed",
        obj(&[
            ("symbol", v_str(symbol)),
            ("call", v_str(call)),
            ("error", json!(format!("{:#}", err))),
        ]),
    );
}

#[async_trait]
impl MarketData for CoinalyzeClient {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<CandleRecord> {
        self.try_fetch_candles(symbol, interval, limit)
            .await
            .unwrap_or_else(|e| {
                log_degraded("candles", symbol, &e);
                Vec::new()
            })
    }

    async fn fetch_price(&self, symbol: &str) -> Option<f64> {
        self.try_fetch_price(symbol).await.unwrap_or_else(|e| {
            log_degraded("tickers", symbol, &e);
            None
        })
    }

    async fn fetch_liquidation(&self, symbol: &str, limit: u32) -> LiquidationSample {
        self.try_fetch_liquidation(symbol, limit)
            .await
            .unwrap_or_else(|e| {
                log_degraded("liquidation", symbol, &e);
                LiquidationSample::default()
            })
    }
}
