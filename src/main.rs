use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

use scalpwatch::config::Config;
use scalpwatch::logging::{log, obj, run_id, v_str, Domain, Level};
use scalpwatch::market::CoinalyzeClient;
use scalpwatch::scanner::Scanner;
use scalpwatch::{liveness, notify};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            log(
                Level::Fatal,
                Domain::System,
                "config_invalid",
                obj(&[("error", v_str(&format!("{:#}", e)))]),
            );
            return Err(e);
        }
    };

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("run_id", v_str(run_id())),
            ("symbols", json!(cfg.symbols)),
            ("interval", v_str(&cfg.candle_interval)),
            ("poll_secs", json!(cfg.poll_secs)),
            ("dry_run", json!(cfg.dry_run)),
            ("port", json!(cfg.port)),
            ("config_hash", v_str(&cfg.fingerprint())),
        ]),
    );

    let market = CoinalyzeClient::from_config(&cfg)?;
    let notifier = notify::build(&cfg)?;
    let scanner = Scanner::new(cfg.clone(), Box::new(market), notifier);
    let poller = tokio::spawn(async move { scanner.run_forever().await });

    // Liveness runs on the main task; without a port the main task just waits.
    let listener = match cfg.port {
        Some(port) => Some(liveness::bind(port).await?),
        None => None,
    };
    let serve = async {
        match listener {
            Some(listener) => liveness::serve(listener).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = serve => {
            log(Level::Error, Domain::Http, "listener_stopped", obj(&[("error", v_str(&format!("{:?}", res)))]));
        }
        res = poller => {
            log(Level::Fatal, Domain::Scan, "poller_stopped", obj(&[("error", v_str(&format!("{:?}", res)))]));
        }
        _ = tokio::signal::ctrl_c() => {
            log(Level::Info, Domain::System, "shutdown", obj(&[("reason", v_str("ctrl_c"))]));
        }
    }
    Ok(())
}
