use anyhow::{anyhow, Result};
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::sleep;

use crate::config::Config;
use crate::logging::{log, log_alert, log_pass_summary, log_skip, obj, v_num, v_str, Domain, Level, ProfileScope};
use crate::market::{MarketData, Snapshot};
use crate::notify::Notifier;
use crate::signals::{self, Verdict};

/// Counters for one pass over the symbol list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub scanned: usize,
    pub skipped: usize,
    pub alerts: usize,
    /// Symbols whose liquidation fetch came back with no records, either an
    /// outage or an empty window.
    pub liq_no_data: usize,
}

struct SymbolOutcome {
    /// Alerts sent, or `None` when the symbol was skipped.
    alerts: Option<usize>,
    liq_no_data: bool,
}

/// Polls every configured symbol, evaluates it and forwards alerts.
pub struct Scanner {
    cfg: Arc<Config>,
    market: Box<dyn MarketData>,
    notifier: Box<dyn Notifier>,
}

impl Scanner {
    pub fn new(cfg: Arc<Config>, market: Box<dyn MarketData>, notifier: Box<dyn Notifier>) -> Self {
        Self { cfg, market, notifier }
    }

    async fn snapshot(&self, symbol: &str) -> Snapshot {
        let candles = self
            .market
            .fetch_candles(symbol, &self.cfg.candle_interval, self.cfg.candle_limit)
            .await;
        if candles.is_empty() {
            return Snapshot::default();
        }
        let price = self.market.fetch_price(symbol).await;
        if price.is_none() {
            return Snapshot { candles, ..Snapshot::default() };
        }
        let liquidation = self
            .market
            .fetch_liquidation(symbol, self.cfg.liquidation_limit)
            .await;
        log(
            Level::Debug,
            Domain::Market,
            "snapshot",
            obj(&[
                ("symbol", v_str(symbol)),
                ("candles", json!(candles.len())),
                ("price", price.map(v_num).unwrap_or_default()),
                ("liq_total", v_num(liquidation.total)),
                ("liq_records", json!(liquidation.count)),
            ]),
        );
        Snapshot { candles, price, liquidation }
    }

    /// Fetch, evaluate and notify for one symbol.
    async fn scan_symbol(&self, symbol: &str) -> SymbolOutcome {
        let _scope = ProfileScope::with_context("scan.symbol", &[("symbol", v_str(symbol))]);
        let snapshot = self.snapshot(symbol).await;
        // liquidation is only fetched once a price is known
        let liq_no_data = snapshot.price.is_some() && snapshot.liquidation.is_empty();
        if liq_no_data {
            log(
                Level::Info,
                Domain::Market,
                "liquidation_no_data",
                obj(&[("symbol", v_str(symbol)), ("liq_records", json!(0))]),
            );
        }
        let alerts = match signals::evaluate(symbol, &snapshot) {
            Ok(Verdict::Evaluated(alerts)) => alerts,
            Ok(Verdict::Skipped(reason)) => {
                log_skip(symbol, reason);
                return SymbolOutcome { alerts: None, liq_no_data };
            }
            Err(e) => {
                log_skip(symbol, &format!("{:#}", e));
                return SymbolOutcome { alerts: None, liq_no_data };
            }
        };
        for alert in &alerts {
            let (value, baseline) = alert.values();
            log_alert(alert.symbol(), alert.kind(), value, baseline);
            self.notifier.send(&alert.text()).await;
        }
        SymbolOutcome {
            alerts: Some(alerts.len()),
            liq_no_data,
        }
    }

    /// One pass over all symbols. Per-symbol problems are absorbed here.
    pub async fn run_pass(&self) -> PassSummary {
        let scope = ProfileScope::new("scan.pass");
        let mut summary = PassSummary::default();
        for symbol in &self.cfg.symbols {
            summary.scanned += 1;
            let outcome = self.scan_symbol(symbol).await;
            match outcome.alerts {
                Some(sent) => summary.alerts += sent,
                None => summary.skipped += 1,
            }
            if outcome.liq_no_data {
                summary.liq_no_data += 1;
            }
        }
        log_pass_summary(
            summary.scanned,
            summary.skipped,
            summary.alerts,
            summary.liq_no_data,
            scope.elapsed_ms(),
        );
        summary
    }

    /// `run_pass` behind the error boundary: a panic inside the pass is
    /// reported to the operator instead of killing the loop.
    pub async fn guarded_pass(&self) -> Result<PassSummary> {
        match AssertUnwindSafe(self.run_pass()).catch_unwind().await {
            Ok(summary) => Ok(summary),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let err = anyhow!("scan pass panicked: {}", reason);
                log(
                    Level::Error,
                    Domain::Scan,
                    "pass_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                self.notifier.send(&signals::error_text(&err.to_string())).await;
                Err(err)
            }
        }
    }

    /// Poll forever.
    pub async fn run_forever(&self) {
        let interval = self.cfg.poll_interval();
        loop {
            let _ = self.guarded_pass().await;
            sleep(interval).await;
        }
    }
}
