//! Structured JSON-lines logging for the scanner.
//!
//! Every record is one JSON object on stdout. When `LOG_DIR` is set the same
//! lines are mirrored into `{LOG_DIR}/{run_id}/events.jsonl` (trace/debug go to
//! `trace.jsonl`) so a run can be inspected after the fact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_LEVEL").as_deref().unwrap_or("info"))
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,  // Provider fetches
    Signal,  // Heuristic evaluation
    Notify,  // Outbound messages
    Scan,    // Pass orchestration
    Http,    // Liveness listener
    System,  // Startup, shutdown
    Profile, // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Signal => "signal",
            Domain::Notify => "notify",
            Domain::Scan => "scan",
            Domain::Http => "http",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

struct RunContext {
    run_id: String,
    min_level: Level,
    sink: Option<RunSink>,
}

/// File mirror of the stdout stream for one run.
pub struct RunSink {
    dir: PathBuf,
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl RunSink {
    pub fn open(base: &Path, run_id: &str) -> std::io::Result<Self> {
        let dir = base.join(run_id);
        create_dir_all(&dir)?;
        std::fs::write(
            dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": dir.to_string_lossy(),
            })
            .to_string(),
        )?;
        let events = File::create(dir.join("events.jsonl"))?;
        let trace = File::create(dir.join("trace.jsonl"))?;
        Ok(Self {
            dir,
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, level: Level, line: &str) {
        let writer = match level {
            Level::Trace | Level::Debug => &self.trace,
            _ => &self.events,
        };
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sink = std::env::var("LOG_DIR").ok().and_then(|base| {
            RunSink::open(Path::new(&base), &run_id)
                .map_err(|err| eprintln!("[log] failed to open run dir: {}", err))
                .ok()
        });
        RunContext {
            run_id,
            min_level: Level::from_env(),
            sink,
        }
    })
}

/// Identifier shared by every record of this process.
pub fn run_id() -> &'static str {
    &ensure_run_context().run_id
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "bot_token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    if level < ctx.min_level || !domain.is_enabled() {
        return;
    }
    let line = render_record(&ctx.run_id, level, domain.as_str(), event, fields);
    if let Some(sink) = &ctx.sink {
        sink.write(level, &line);
    }
    println!("{}", line);
}

fn render_record(
    run_id: &str,
    level: Level,
    component: &str,
    event: &str,
    fields: Map<String, Value>,
) -> String {
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain helpers
// =============================================================================

/// An alert that fired for a symbol.
pub fn log_alert(symbol: &str, kind: &str, value: f64, baseline: f64) {
    log(
        Level::Info,
        Domain::Signal,
        "alert",
        obj(&[
            ("symbol", v_str(symbol)),
            ("kind", v_str(kind)),
            ("value", v_num(value)),
            ("baseline", v_num(baseline)),
        ]),
    );
}

/// A symbol dropped from the current pass.
pub fn log_skip(symbol: &str, reason: &str) {
    log(
        Level::Info,
        Domain::Scan,
        "symbol_skipped",
        obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]),
    );
}

pub fn log_pass_summary(scanned: usize, skipped: usize, alerts: usize, liq_no_data: usize, elapsed_ms: f64) {
    log(
        Level::Info,
        Domain::Scan,
        "pass_summary",
        obj(&[
            ("scanned", json!(scanned)),
            ("skipped", json!(skipped)),
            ("alerts", json!(alerts)),
            ("liq_no_data", json!(liq_no_data)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

// =============================================================================
// Helpers
// =============================================================================

/// Short sha256 fingerprint, used to tag the active configuration.
pub fn params_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(self.elapsed_ms()));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
