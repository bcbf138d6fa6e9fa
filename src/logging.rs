//! Structured NDJSON logging.
//!
//! Every observable event (cycle progress, risk halts, per-item failures)
//! goes through `json_log` as one JSON object per line: mirrored to stdout
//! and appended to a run-scoped `events.jsonl` under `LOG_DIR`. Lines carry
//! a monotonic sequence number so replay ordering never depends on
//! timestamps.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

struct RunContext {
    run_id: String,
    events: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", Utc::now().timestamp_millis(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let events = File::create(run_dir.join("events.jsonl")).unwrap_or_else(|err| {
            eprintln!("[log] failed to create events log: {}", err);
            File::create("/tmp/alphafuse-events.jsonl").expect("events fallback")
        });
        RunContext {
            run_id,
            events: Mutex::new(BufWriter::new(events)),
        }
    })
}

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn now_ts() -> u64 {
    Utc::now().timestamp() as u64
}

/// Emit an info-level event for a module.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    log(Level::Info, module, fields);
}

pub fn log(level: Level, module: &str, fields: Map<String, Value>) {
    if level < Level::from_env() {
        return;
    }
    let ctx = ensure_run_context();
    let mut entry = Map::new();
    entry.insert("ts".into(), json!(ts_now()));
    entry.insert("run_id".into(), json!(ctx.run_id.clone()));
    entry.insert("seq".into(), json!(LOG_SEQ.fetch_add(1, Ordering::SeqCst)));
    entry.insert("lvl".into(), json!(level.as_str()));
    entry.insert("module".into(), json!(module));
    for (k, v) in fields {
        entry.insert(k, v);
    }
    let line = Value::Object(entry).to_string();
    if let Ok(mut w) = ctx.events.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
    println!("{}", line);
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
