use anyhow::{anyhow, bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::logging::params_hash;

pub const DEFAULT_SYMBOLS: &str = "BTCUSDT_PERP.A,ETHUSDT_PERP.A";
pub const DEFAULT_DATA_BASE: &str = "https://api.coinalyze.net/v1/futures";
pub const DEFAULT_TELEGRAM_BASE: &str = "https://api.telegram.org";

/// Process-wide settings, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub candle_interval: String,
    pub candle_limit: u32,
    pub liquidation_limit: u32,
    pub poll_secs: u64,
    pub http_timeout_secs: u64,
    pub data_base: String,
    pub data_api_key: Option<String>,
    pub telegram_base: String,
    pub bot_token: String,
    pub chat_id: String,
    pub port: Option<u16>,
    pub dry_run: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("symbols", &self.symbols)
            .field("candle_interval", &self.candle_interval)
            .field("candle_limit", &self.candle_limit)
            .field("liquidation_limit", &self.liquidation_limit)
            .field("poll_secs", &self.poll_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("data_base", &self.data_base)
            .field("telegram_base", &self.telegram_base)
            .field("chat_id", &self.chat_id)
            .field("port", &self.port)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let dry_run = matches!(
            get("DRY_RUN").as_deref(),
            Some("1") | Some("true") | Some("yes")
        );

        let bot_token = match get("BOT_TOKEN") {
            Some(token) => token,
            None if dry_run => String::new(),
            None => bail!("BOT_TOKEN is required"),
        };
        let chat_id = match get("CHAT_ID") {
            Some(id) => {
                validate_chat_id(&id)?;
                id
            }
            None if dry_run => String::new(),
            None => bail!("CHAT_ID is required"),
        };

        let symbols: Vec<String> = get("SYMBOLS")
            .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }

        let data_base = base_url(get("DATA_BASE"), DEFAULT_DATA_BASE, "DATA_BASE")?;
        let telegram_base = base_url(get("TELEGRAM_BASE"), DEFAULT_TELEGRAM_BASE, "TELEGRAM_BASE")?;

        let cfg = Self {
            symbols,
            candle_interval: get("CANDLE_INTERVAL").unwrap_or_else(|| "15m".to_string()),
            candle_limit: parse_or(get("CANDLE_LIMIT"), "CANDLE_LIMIT", 20)?,
            liquidation_limit: parse_or(get("LIQ_LIMIT"), "LIQ_LIMIT", 20)?,
            poll_secs: parse_or(get("POLL_SECS"), "POLL_SECS", 30)?,
            http_timeout_secs: parse_or(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 10)?,
            data_base,
            data_api_key: get("DATA_API_KEY"),
            telegram_base,
            bot_token,
            chat_id,
            port: get("PORT")
                .map(|p| p.parse::<u16>().with_context(|| format!("PORT={p} is not a port")))
                .transpose()?,
            dry_run,
        };

        if cfg.candle_limit == 0 {
            bail!("CANDLE_LIMIT must be positive");
        }
        if cfg.poll_secs == 0 {
            bail!("POLL_SECS must be positive");
        }
        if cfg.http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be positive");
        }
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Hash of the non-secret settings, logged at startup.
    pub fn fingerprint(&self) -> String {
        params_hash(&format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.symbols.join(","),
            self.candle_interval,
            self.candle_limit,
            self.liquidation_limit,
            self.poll_secs,
            self.data_base,
            self.chat_id,
        ))
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| anyhow!("{key}={v} is not a valid number")),
    }
}

fn base_url(raw: Option<String>, default: &str, key: &str) -> Result<String> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    let parsed = Url::parse(&raw).with_context(|| format!("{key}={raw} is not a URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{key} must be http(s), got {}", parsed.scheme());
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn validate_chat_id(id: &str) -> Result<()> {
    if id.starts_with('@') && id.len() > 1 {
        return Ok(());
    }
    id.parse::<i64>()
        .map(|_| ())
        .map_err(|_| anyhow!("CHAT_ID={id} must be a numeric id or @channel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_credentials() {
        let cfg = Config::from_lookup(lookup(&[("BOT_TOKEN", "123:abc"), ("CHAT_ID", "-1001")])).unwrap();
        assert_eq!(cfg.symbols, vec!["BTCUSDT_PERP.A", "ETHUSDT_PERP.A"]);
        assert_eq!(cfg.candle_interval, "15m");
        assert_eq!(cfg.candle_limit, 20);
        assert_eq!(cfg.liquidation_limit, 20);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));
        assert_eq!(cfg.http_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.data_base, DEFAULT_DATA_BASE);
        assert_eq!(cfg.port, None);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let err = Config::from_lookup(lookup(&[("CHAT_ID", "42")])).unwrap_err();
        assert!(err.to_string().contains("BOT_TOKEN"));
    }

    #[test]
    fn test_missing_chat_id_is_fatal() {
        let err = Config::from_lookup(lookup(&[("BOT_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("CHAT_ID"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        assert!(Config::from_lookup(lookup(&[("BOT_TOKEN", "  "), ("CHAT_ID", "42")])).is_err());
    }

    #[test]
    fn test_dry_run_waives_credentials() {
        let cfg = Config::from_lookup(lookup(&[("DRY_RUN", "1")])).unwrap();
        assert!(cfg.dry_run);
        assert!(cfg.bot_token.is_empty());
    }

    #[test]
    fn test_chat_id_forms() {
        assert!(Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "@alerts")])).is_ok());
        assert!(Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "alerts")])).is_err());
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let cfg = Config::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("CHAT_ID", "7"),
            ("SYMBOLS", " SOLUSDT_PERP.A , ,XRPUSDT_PERP.A"),
            ("POLL_SECS", "60"),
            ("PORT", "8080"),
            ("DATA_BASE", "http://localhost:9000/v1/"),
        ]))
        .unwrap();
        assert_eq!(cfg.symbols, vec!["SOLUSDT_PERP.A", "XRPUSDT_PERP.A"]);
        assert_eq!(cfg.poll_secs, 60);
        assert_eq!(cfg.port, Some(8080));
        assert_eq!(cfg.data_base, "http://localhost:9000/v1");
    }

    #[test]
    fn test_bad_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "7"), ("POLL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("POLL_SECS"));
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for key in ["POLL_SECS", "CANDLE_LIMIT", "HTTP_TIMEOUT_SECS"] {
            let err = Config::from_lookup(lookup(&[("DRY_RUN", "1"), (key, "0")])).unwrap_err();
            assert!(err.to_string().contains(key), "{} accepted zero", key);
        }
    }

    #[test]
    fn test_bad_base_url_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "7"), ("DATA_BASE", "ftp://x")])).is_err());
        assert!(Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "7"), ("DATA_BASE", "not a url")])).is_err());
    }

    #[test]
    fn test_fingerprint_ignores_token() {
        let a = Config::from_lookup(lookup(&[("BOT_TOKEN", "one"), ("CHAT_ID", "7")])).unwrap();
        let b = Config::from_lookup(lookup(&[("BOT_TOKEN", "two"), ("CHAT_ID", "7")])).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let cfg = Config::from_lookup(lookup(&[
            ("BOT_TOKEN", "123:secret"),
            ("CHAT_ID", "7"),
            ("DATA_API_KEY", "k-secret"),
        ]))
        .unwrap();
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("secret"));
    }
}
