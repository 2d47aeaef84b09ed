use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{CartographError, LedgerError};
use crate::pipeline::{JobKind, RunReport};

/// Current ledger schema version.
pub const SCHEMA_VERSION: &str = "1";

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS ledger_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Opaque progress markers (e.g. the last head the sensor saw)
CREATE TABLE IF NOT EXISTS checkpoints (
    kind TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per trigger event ever accepted
CREATE TABLE IF NOT EXISTS run_claims (
    run_key TEXT PRIMARY KEY,
    job TEXT NOT NULL,
    claimed_at TEXT NOT NULL
);

-- Completed runs
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    run_key TEXT,
    job TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    successful INTEGER NOT NULL,
    report TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_finished ON runs(finished_at);
CREATE INDEX IF NOT EXISTS idx_runs_key ON runs(run_key);
";

/// Durable bookkeeping for triggers: checkpoints, run-key claims and
/// completed run reports.
#[async_trait::async_trait]
pub trait RunLedger: Send + Sync + std::fmt::Debug {
    async fn get_checkpoint(&self, kind: &str) -> crate::error::Result<Option<String>>;

    async fn set_checkpoint(&self, kind: &str, value: &str) -> crate::error::Result<()>;

    /// Claim `run_key` for one run. Returns false when it was already claimed.
    async fn claim_run(&self, run_key: &str, job: JobKind) -> crate::error::Result<bool>;

    /// Drop a claim so the key can run again.
    async fn release_run(&self, run_key: &str) -> crate::error::Result<()>;

    async fn complete_run(&self, report: &RunReport) -> crate::error::Result<()>;

    /// Most recently finished runs, newest first.
    async fn recent_runs(&self, limit: usize) -> crate::error::Result<Vec<RunReport>>;
}

/// SQLite-backed [`RunLedger`].
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

fn sqlite(e: rusqlite::Error) -> CartographError {
    CartographError::Ledger(LedgerError::Sqlite(e))
}

// Fixed-width timestamps so text ordering matches time ordering.
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteLedger {
    /// Open (or create) a ledger at `path`, creating parent directories.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LedgerError::Io)?;
        }
        let conn = Connection::open(path).map_err(sqlite)?;
        let ledger = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite)?;
        let ledger = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(sqlite)?;
        // Ignored for in-memory databases.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(SCHEMA_SQL).map_err(sqlite)?;
        conn.execute(
            "INSERT OR IGNORE INTO ledger_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(sqlite)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RunLedger for SqliteLedger {
    async fn get_checkpoint(&self, kind: &str) -> crate::error::Result<Option<String>> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.query_row(
            "SELECT value FROM checkpoints WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )
        .optional()
        .map_err(sqlite)
    }

    async fn set_checkpoint(&self, kind: &str, value: &str) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute(
            "INSERT INTO checkpoints (kind, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(kind) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![kind, value, stamp(Utc::now())],
        )
        .map_err(sqlite)?;
        Ok(())
    }

    async fn claim_run(&self, run_key: &str, job: JobKind) -> crate::error::Result<bool> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO run_claims (run_key, job, claimed_at) VALUES (?1, ?2, ?3)",
                params![run_key, job.as_str(), stamp(Utc::now())],
            )
            .map_err(sqlite)?;
        debug!(run_key, claimed = inserted == 1, "Run claim");
        Ok(inserted == 1)
    }

    async fn release_run(&self, run_key: &str) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute("DELETE FROM run_claims WHERE run_key = ?1", params![run_key])
            .map_err(sqlite)?;
        Ok(())
    }

    async fn complete_run(&self, report: &RunReport) -> crate::error::Result<()> {
        let json = serde_json::to_string(report).map_err(LedgerError::Serialization)?;
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO runs
                (run_id, run_key, job, started_at, finished_at, successful, report)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.run_id,
                report.run_key,
                report.job.as_str(),
                stamp(report.started_at),
                stamp(report.finished_at),
                report.is_successful(),
                json,
            ],
        )
        .map_err(sqlite)?;
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> crate::error::Result<Vec<RunReport>> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT report FROM runs ORDER BY finished_at DESC, rowid DESC LIMIT ?1")
            .map_err(sqlite)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .map_err(sqlite)?;

        let mut reports = Vec::new();
        for row in rows {
            let text = row.map_err(sqlite)?;
            reports.push(serde_json::from_str(&text).map_err(LedgerError::Serialization)?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{StageId, StageReport, StageStatus};
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn report(run_id: &str, minutes_ago: i64, failed: bool) -> RunReport {
        let finished = Utc::now() - Duration::minutes(minutes_ago);
        let mut stage = StageReport::new(StageId::ImpactAssessment);
        if failed {
            stage.status = StageStatus::Failed;
        }
        RunReport {
            run_id: run_id.into(),
            run_key: Some(format!("commit_{run_id}")),
            job: JobKind::Continuous,
            started_at: finished - Duration::seconds(30),
            finished_at: finished,
            stages: BTreeMap::from([(StageId::ImpactAssessment, stage)]),
        }
    }

    #[tokio::test]
    async fn checkpoint_operations() {
        let ledger = SqliteLedger::in_memory().unwrap();
        assert!(ledger.get_checkpoint("sensor_last_head").await.unwrap().is_none());

        ledger.set_checkpoint("sensor_last_head", "abc123").await.unwrap();
        ledger.set_checkpoint("sensor_last_head", "def456").await.unwrap();
        assert_eq!(
            ledger.get_checkpoint("sensor_last_head").await.unwrap().unwrap(),
            "def456"
        );
    }

    #[tokio::test]
    async fn second_claim_of_a_key_is_refused() {
        let ledger = SqliteLedger::in_memory().unwrap();
        assert!(ledger.claim_run("commit_abc", JobKind::Continuous).await.unwrap());
        assert!(!ledger.claim_run("commit_abc", JobKind::Full).await.unwrap());
        assert!(ledger.claim_run("audit_2026-W01", JobKind::Audit).await.unwrap());

        ledger.release_run("commit_abc").await.unwrap();
        assert!(ledger.claim_run("commit_abc", JobKind::Continuous).await.unwrap());
    }

    #[tokio::test]
    async fn recent_runs_are_newest_first() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger.complete_run(&report("old", 60, false)).await.unwrap();
        ledger.complete_run(&report("new", 1, true)).await.unwrap();
        ledger.complete_run(&report("mid", 20, false)).await.unwrap();

        let runs = ledger.recent_runs(2).await.unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
        assert!(!runs[0].is_successful());
        assert!(runs[1].is_successful());
        assert_eq!(runs[1].run_key.as_deref(), Some("commit_mid"));
    }

    #[tokio::test]
    async fn ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.claim_run("commit_1", JobKind::Continuous).await.unwrap();
            ledger.complete_run(&report("r1", 5, false)).await.unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        assert_eq!(ledger.path(), Some(path.as_path()));
        assert!(!ledger.claim_run("commit_1", JobKind::Continuous).await.unwrap());
        assert_eq!(ledger.recent_runs(10).await.unwrap().len(), 1);
    }
}
