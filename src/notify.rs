use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level};

/// Sink for alert messages. Delivery is best effort: implementations log
/// failures and never return them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Posts messages through the Telegram bot API.
pub struct TelegramNotifier {
    client: Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(base: &str, bot_token: &str, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .context("building messaging client")?,
            url: format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.telegram_base, &cfg.bot_token, cfg.chat_id.clone(), cfg.http_timeout())
    }

    /// One POST; any non-2xx status is an error.
    pub async fn try_send(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            // reqwest errors embed the URL, which carries the token
            .map_err(|e| anyhow::anyhow!("sendMessage failed: {}", e.without_url()))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("sendMessage returned {}", status);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        match self.try_send(text).await {
            Ok(()) => log(
                Level::Debug,
                Domain::Notify,
                "sent",
                obj(&[("chars", json!(text.chars().count()))]),
            ),
            Err(e) => log(
                Level::Warn,
                Domain::Notify,
                "send_failed",
                obj(&[("error", v_str(&format!("{:#}", e))), ("text", v_str(text))]),
            ),
        }
    }
}

/// Logs messages instead of delivering them. Used for dry runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        log(
            Level::Info,
            Domain::Notify,
            "dry_run",
            obj(&[("text", v_str(text))]),
        );
    }
}

/// Pick the notifier for this configuration.
pub fn build(cfg: &Config) -> Result<Box<dyn Notifier>> {
    if cfg.dry_run {
        Ok(Box::new(LogNotifier))
    } else {
        Ok(Box::new(TelegramNotifier::from_config(cfg)?))
    }
}
