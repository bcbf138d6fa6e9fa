//! SQLite cycle-metrics store.
//!
//! Operational bookkeeping only — one row per completed cycle so operators
//! can query equity, drawdown and halt history without replaying JSON logs.
//! Authoritative state lives in the snapshot documents, not here.

use anyhow::Result;
use rusqlite::{params, Connection};

pub struct CycleStore {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct CycleRow {
    pub ts: u64,
    pub state_id: u64,
    pub signals_in: u64,
    pub active_theses: u64,
    pub decisions: u64,
    pub trades: u64,
    pub equity: f64,
    pub drawdown: f64,
    pub halted: bool,
}

impl CycleStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS cycles (
                ts INTEGER NOT NULL,
                state_id INTEGER NOT NULL,
                signals_in INTEGER NOT NULL,
                active_theses INTEGER NOT NULL,
                decisions INTEGER NOT NULL,
                trades INTEGER NOT NULL,
                equity REAL NOT NULL,
                drawdown REAL NOT NULL,
                halted INTEGER NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn record_cycle(&mut self, row: &CycleRow) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO cycles (ts, state_id, signals_in, active_theses, decisions, trades, equity, drawdown, halted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.ts as i64,
                row.state_id as i64,
                row.signals_in as i64,
                row.active_theses as i64,
                row.decisions as i64,
                row.trades as i64,
                row.equity,
                row.drawdown,
                row.halted as i64,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn cycle_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM cycles", [], |r| r.get(0))?;
        Ok(count as u64)
    }
}
