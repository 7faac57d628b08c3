//! End-to-end passes: a mocked data provider on one side, a mocked messaging
//! API on the other, and the real client, evaluator and notifier in between.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scalpwatch::config::Config;
use scalpwatch::market::CoinalyzeClient;
use scalpwatch::notify;
use scalpwatch::scanner::{PassSummary, Scanner};

fn config(provider: &MockServer, telegram: &MockServer, symbols: &str) -> Arc<Config> {
    let mut env: HashMap<&str, String> = HashMap::new();
    env.insert("BOT_TOKEN", "42:token".to_string());
    env.insert("CHAT_ID", "-100200".to_string());
    env.insert("SYMBOLS", symbols.to_string());
    env.insert("HTTP_TIMEOUT_SECS", "2".to_string());
    env.insert("DATA_BASE", provider.uri());
    env.insert("TELEGRAM_BASE", telegram.uri());
    Arc::new(Config::from_lookup(|k| env.get(k).cloned()).unwrap())
}

fn scanner(cfg: Arc<Config>) -> Scanner {
    let market = CoinalyzeClient::from_config(&cfg).unwrap();
    let notifier = notify::build(&cfg).unwrap();
    Scanner::new(cfg, Box::new(market), notifier)
}

fn candles(volumes: &[f64], high: f64) -> Value {
    Value::Array(
        volumes
            .iter()
            .map(|v| json!({"high": high, "low": high - 5.0, "close": high - 1.0, "volume": v}))
            .collect(),
    )
}

async fn mount_symbol(server: &MockServer, symbol: &str, candles: Value, tickers: Value, liq: Value) {
    Mock::given(method("GET"))
        .and(path("/candles"))
        .and(query_param("symbol", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_json(candles))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tickers"))
        .and(query_param("symbol", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_json(tickers))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/liquidation"))
        .and(query_param("symbol", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_json(liq))
        .mount(server)
        .await;
}

async fn sent_texts(telegram: &MockServer) -> Vec<String> {
    telegram
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect()
}

#[tokio::test]
async fn breakout_reaches_the_chat() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    mount_symbol(
        &provider,
        "BTCUSDT_PERP.A",
        candles(&[10.0; 20], 100.0),
        json!([{"last": 101.0}]),
        json!([]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/bot42:token/sendMessage"))
        .and(body_string_contains("chat_id=-100200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "BTCUSDT_PERP.A")).run_pass().await;
    assert_eq!(summary, PassSummary { scanned: 1, skipped: 0, alerts: 1, liq_no_data: 1 });

    let bodies = sent_texts(&telegram).await;
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("Breakout+scalp"));
    assert!(bodies[0].contains("Recent+High%3A+100.00"));
}

#[tokio::test]
async fn volume_and_liquidation_spikes_fire_together() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    let mut vols = vec![10.0; 19];
    vols.push(20.0);
    let liq: Vec<Value> = (0..20).map(|_| json!({"volume": "7.5"})).collect();
    mount_symbol(
        &provider,
        "ETHUSDT_PERP.A",
        candles(&vols, 100.0),
        json!([{"last": "99.0"}]),
        Value::Array(liq),
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "ETHUSDT_PERP.A")).run_pass().await;
    assert_eq!(summary.alerts, 2);

    let bodies = sent_texts(&telegram).await;
    assert!(bodies[0].contains("Volume+spike+scalp"));
    assert!(bodies[1].contains("Liquidation+spike+scalp"));
}

#[tokio::test]
async fn provider_outage_skips_without_alerts() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "A,B")).run_pass().await;
    assert_eq!(summary, PassSummary { scanned: 2, skipped: 2, alerts: 0, liq_no_data: 0 });
}

#[tokio::test]
async fn liquidation_outage_does_not_false_alarm() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/candles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candles(&[10.0; 20], 100.0)))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/tickers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"last": 90.0}])))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/liquidation"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "BTCUSDT_PERP.A")).run_pass().await;
    assert_eq!(summary, PassSummary { scanned: 1, skipped: 0, alerts: 0, liq_no_data: 1 });
}

#[tokio::test]
async fn one_bad_symbol_does_not_block_the_next() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    mount_symbol(
        &provider,
        "BAD",
        json!([{"close": 1.0}]),
        json!([{"last": 5.0}]),
        json!([]),
    )
    .await;
    mount_symbol(
        &provider,
        "GOOD",
        candles(&[10.0; 20], 100.0),
        json!([{"last": 150.0}]),
        json!([]),
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "BAD,GOOD")).run_pass().await;
    assert_eq!(summary, PassSummary { scanned: 2, skipped: 1, alerts: 1, liq_no_data: 2 });
}

#[tokio::test]
async fn messaging_failure_does_not_abort_pass() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    for sym in ["A", "B"] {
        mount_symbol(
            &provider,
            sym,
            candles(&[10.0; 20], 100.0),
            json!([{"last": 101.0}]),
            json!([]),
        )
        .await;
    }
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&telegram)
        .await;

    let summary = scanner(config(&provider, &telegram, "A,B")).run_pass().await;
    assert_eq!(summary.alerts, 2);
    assert_eq!(summary.skipped, 0);
}
