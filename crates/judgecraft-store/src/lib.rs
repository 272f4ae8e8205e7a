use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use judgecraft_types::{EvaluationResult, FailedCase, RunSummary};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("run {0} not found")]
    RunNotFound(i64),

    #[error("store connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Clones share one connection.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    /// Set once the run has finished.
    pub summary: Option<RunSummary>,
}

impl Store {
    /// Open a new store at the given path (e.g., "judgecraft.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata TEXT,
                summary TEXT
            );
            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                case_name TEXT NOT NULL,
                passed BOOLEAN NOT NULL,
                record TEXT NOT NULL,
                error TEXT,
                failure_reason TEXT,
                duration_ms INTEGER NOT NULL,
                tokens_in INTEGER,
                tokens_out INTEGER,
                cost_usd REAL,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            );
            CREATE INDEX IF NOT EXISTS results_run ON results(run_id);",
        )?;
        Ok(())
    }

    /// Create a new run entry
    pub fn create_run(&self, metadata: Option<serde_json::Value>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (created_at, metadata) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), metadata.map(|v| v.to_string())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one case outcome; the stored record has debug fields removed.
    pub fn save_result(&self, run_id: i64, result: &EvaluationResult) -> Result<i64> {
        let record = serde_json::to_string(&result.to_record())?;
        let usage = result.metrics.as_ref().and_then(|m| m.usage.as_ref());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO results
                (run_id, case_name, passed, record, error, failure_reason,
                 duration_ms, tokens_in, tokens_out, cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run_id,
                result.case_name,
                result.passed,
                record,
                result.error,
                result.failure_reason,
                result.duration_ms as i64,
                usage.map(|u| u.input_tokens),
                usage.map(|u| u.output_tokens),
                result.cost_usd(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, summary: &RunSummary) -> Result<()> {
        let summary = serde_json::to_string(summary)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE runs SET summary = ?1 WHERE id = ?2",
            params![summary, run_id],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> Result<RunEntity> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, metadata, summary FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        let (id, created_at, metadata, summary) = row.ok_or(StoreError::RunNotFound(run_id))?;
        Ok(RunEntity {
            id,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            summary: summary.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }

    /// Failed cases of a run, in the order they were recorded.
    pub fn failed_results(&self, run_id: i64) -> Result<Vec<FailedCase>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT case_name, COALESCE(error, failure_reason, 'unknown')
             FROM results WHERE run_id = ?1 AND passed = 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(FailedCase {
                case_name: row.get(0)?,
                reason: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
