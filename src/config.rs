//! Runtime configuration, read once from the environment.
//!
//! Every threshold and rate is tunable here; the hard-coded values are
//! fallbacks, not policy.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,

    // Thesis formation / revision
    pub formation_threshold: f64,
    pub invalidation_threshold: f64,
    pub belief_decay: f64,
    pub min_corroborating_sources: usize,

    // Risk limits
    pub max_drawdown: f64,
    pub max_position_size: f64,
    pub confidence_threshold: f64,

    // Reflection
    pub trust_learning_rate: f64,
    pub pnl_cap: f64,

    // Scheduling / collaborator bounds
    pub cycle_secs: u64,
    pub venue_timeout_secs: u64,
    pub lock_stale_secs: u64,

    pub starting_capital: f64,
    pub sqlite_path: String,
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir =
            PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
        Self {
            sqlite_path: std::env::var("SQLITE_PATH")
                .unwrap_or_else(|_| data_dir.join("cycles.sqlite").to_string_lossy().into_owned()),
            data_dir,
            formation_threshold: env_f64("FORMATION_TH", 0.55),
            invalidation_threshold: env_f64("INVALIDATION_TH", 0.35),
            belief_decay: env_f64("BELIEF_DECAY", 0.02),
            min_corroborating_sources: env_u64("MIN_CORROBORATION", 2) as usize,
            max_drawdown: env_f64("MAX_DRAWDOWN", 0.15),
            max_position_size: env_f64("MAX_POSITION_SIZE", 1.0),
            confidence_threshold: env_f64("CONFIDENCE_TH", 0.65),
            trust_learning_rate: env_f64("TRUST_LR", 0.05),
            pnl_cap: env_f64("PNL_CAP", 1.0),
            cycle_secs: env_u64("CYCLE_SECS", 3600),
            venue_timeout_secs: env_u64("VENUE_TIMEOUT_SECS", 30),
            lock_stale_secs: env_u64("LOCK_STALE_SECS", 7200),
            starting_capital: env_f64("STARTING_CAPITAL", 10_000.0),
        }
    }

    /// Config rooted at a specific directory; used by tests and tooling.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut cfg = Self::from_env();
        cfg.sqlite_path = dir.join("cycles.sqlite").to_string_lossy().into_owned();
        cfg.data_dir = dir;
        cfg
    }

    pub fn signals_path(&self) -> PathBuf {
        self.data_dir.join("alpha.jsonl")
    }

    pub fn worldview_path(&self) -> PathBuf {
        self.data_dir.join("worldview.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("state_history.jsonl")
    }

    pub fn trust_path(&self) -> PathBuf {
        self.data_dir.join("source_weights.json")
    }

    pub fn trades_path(&self) -> PathBuf {
        self.data_dir.join("trades.jsonl")
    }

    pub fn portfolio_path(&self) -> PathBuf {
        self.data_dir.join("portfolio.json")
    }

    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join("pending_decisions.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("cycle.lock")
    }

    pub fn sleep_until_next_cycle(&self, now_ts: u64) -> u64 {
        let next = ((now_ts / self.cycle_secs) + 1) * self.cycle_secs;
        next.saturating_sub(now_ts)
    }
}
