//! Breakout, volume-spike and liquidation-spike heuristics.
//!
//! The breakout and volume baselines are taken over every candle except the
//! most recent one, so the newest candle is never compared against itself.

use anyhow::{Context, Result};

use crate::market::{Candle, LiquidationSample, Snapshot};

/// Multiplier over the baseline that counts as a spike.
pub const SPIKE_MULT: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    Breakout { symbol: String, price: f64, recent_high: f64 },
    VolumeSpike { symbol: String, volume: f64, avg_volume: f64 },
    LiquidationSpike { symbol: String, total: f64, average: f64 },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Breakout { .. } => "breakout",
            Alert::VolumeSpike { .. } => "volume_spike",
            Alert::LiquidationSpike { .. } => "liquidation_spike",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Alert::Breakout { symbol, .. }
            | Alert::VolumeSpike { symbol, .. }
            | Alert::LiquidationSpike { symbol, .. } => symbol,
        }
    }

    /// (observed, baseline) pair, for logging.
    pub fn values(&self) -> (f64, f64) {
        match self {
            Alert::Breakout { price, recent_high, .. } => (*price, *recent_high),
            Alert::VolumeSpike { volume, avg_volume, .. } => (*volume, *avg_volume),
            Alert::LiquidationSpike { total, average, .. } => (*total, *average),
        }
    }

    /// Message body as delivered to the chat.
    pub fn text(&self) -> String {
        match self {
            Alert::Breakout { symbol, price, recent_high } => format!(
                "🚀 Breakout scalp\nPair: {}\nPrice: {:.2}\nRecent High: {:.2}",
                symbol, price, recent_high
            ),
            Alert::VolumeSpike { symbol, volume, avg_volume } => format!(
                "📊 Volume spike scalp\nPair: {}\nVolume: {:.2} (avg {:.2})",
                symbol, volume, avg_volume
            ),
            Alert::LiquidationSpike { symbol, total, average } => format!(
                "💥 Liquidation spike scalp\nPair: {}\nLiquidations: ${} (avg ${})",
                symbol,
                thousands(*total),
                thousands(*average)
            ),
        }
    }
}

/// Body of the operator alert sent when a pass fails.
pub fn error_text(err: &str) -> String {
    format!("⚠️ Bot error: {}", err)
}

/// Result of looking at one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Not enough data to judge this pass.
    Skipped(&'static str),
    Evaluated(Vec<Alert>),
}

impl Verdict {
    pub fn into_alerts(self) -> Vec<Alert> {
        match self {
            Verdict::Skipped(_) => Vec::new(),
            Verdict::Evaluated(alerts) => alerts,
        }
    }
}

/// Evaluate all three heuristics for one symbol.
///
/// Empty candles or a missing price skip the symbol. A candle without `high`
/// or `volume` is an error, which the caller treats as a skip as well.
pub fn evaluate(symbol: &str, snapshot: &Snapshot) -> Result<Verdict> {
    if snapshot.candles.is_empty() {
        return Ok(Verdict::Skipped("no_candles"));
    }
    let Some(price) = snapshot.price else {
        return Ok(Verdict::Skipped("no_price"));
    };
    let candles = snapshot
        .candles
        .iter()
        .enumerate()
        .map(|(i, rec)| rec.complete().with_context(|| format!("{symbol} candle #{i}")))
        .collect::<Result<Vec<Candle>>>()?;

    let mut alerts = Vec::new();
    if let Some(alert) = breakout(symbol, &candles, price) {
        alerts.push(alert);
    }
    if let Some(alert) = volume_spike(symbol, &candles) {
        alerts.push(alert);
    }
    if let Some(alert) = liquidation_spike(symbol, &snapshot.liquidation) {
        alerts.push(alert);
    }
    Ok(Verdict::Evaluated(alerts))
}

/// Every candle but the most recent.
pub fn baseline(candles: &[Candle]) -> &[Candle] {
    match candles.split_last() {
        Some((_, rest)) => rest,
        None => &[],
    }
}

pub fn recent_high(candles: &[Candle]) -> Option<f64> {
    baseline(candles).iter().map(|c| c.high).reduce(f64::max)
}

pub fn avg_volume(candles: &[Candle]) -> Option<f64> {
    let base = baseline(candles);
    if base.is_empty() {
        return None;
    }
    Some(base.iter().map(|c| c.volume).sum::<f64>() / base.len() as f64)
}

pub fn breakout(symbol: &str, candles: &[Candle], price: f64) -> Option<Alert> {
    let high = recent_high(candles)?;
    (price > high).then(|| Alert::Breakout {
        symbol: symbol.to_string(),
        price,
        recent_high: high,
    })
}

pub fn volume_spike(symbol: &str, candles: &[Candle]) -> Option<Alert> {
    let avg = avg_volume(candles)?;
    let last = candles.last()?.volume;
    (last > avg * SPIKE_MULT).then(|| Alert::VolumeSpike {
        symbol: symbol.to_string(),
        volume: last,
        avg_volume: avg,
    })
}

pub fn liquidation_spike(symbol: &str, sample: &LiquidationSample) -> Option<Alert> {
    (sample.total > sample.average * SPIKE_MULT).then(|| Alert::LiquidationSpike {
        symbol: symbol.to_string(),
        total: sample.total,
        average: sample.average,
    })
}

/// Integer rendering with `,` every three digits.
fn thousands(value: f64) -> String {
    let rounded = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(rounded.len() + rounded.len() / 3);
    for (i, ch) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0.0 && rounded != "0" {
        out.insert(0, '-');
    }
    out
}
