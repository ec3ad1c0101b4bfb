//! SQLite sink implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{LogEntry, LogLevel, RunPatch, RunRecord, RunStatus};
use super::ExecutionSink;
use crate::error::{Error, Result};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json(s: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> rusqlite::Result<T> {
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::Storage(e)),
        )
    })
}

/// SQLite-backed run sink.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                nodes_executed INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                last_checkpoint TEXT
            );

            CREATE TABLE IF NOT EXISTS run_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                node_id TEXT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_name, started_at);
            CREATE INDEX IF NOT EXISTS idx_run_logs_run ON run_logs(run_id, id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        let status: String = row.get(2)?;
        let input: String = row.get(3)?;
        let started_at: String = row.get(4)?;
        let finished_at: Option<String> = row.get(5)?;
        let duration_ms: Option<i64> = row.get(6)?;
        let nodes_executed: i64 = row.get(7)?;

        Ok(RunRecord {
            id: row.get(0)?,
            workflow_name: row.get(1)?,
            status: parse_enum(&status)?,
            input: parse_json(&input)?,
            started_at: parse_datetime_utc(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_datetime_utc).transpose()?,
            duration_ms: duration_ms.map(|ms| ms.max(0) as u64),
            nodes_executed: nodes_executed.max(0) as usize,
            error: row.get(8)?,
            last_checkpoint: row.get(9)?,
        })
    }

    /// Get one run by ID.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock().await;
        let run = conn
            .query_row(
                "SELECT id, workflow_name, status, input, started_at, finished_at, duration_ms,
                        nodes_executed, error, last_checkpoint
                 FROM runs WHERE id = ?1",
                params![run_id],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Most recent runs of a workflow, newest first.
    pub async fn list_runs(&self, workflow_name: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_name, status, input, started_at, finished_at, duration_ms,
                    nodes_executed, error, last_checkpoint
             FROM runs WHERE workflow_name = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![workflow_name, limit as i64], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Log lines of a run in append order.
    pub async fn list_logs(&self, run_id: &str) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT run_id, node_id, level, message, data, created_at
             FROM run_logs WHERE run_id = ?1 ORDER BY id",
        )?;
        let logs = stmt
            .query_map(params![run_id], |row| {
                let level: String = row.get(2)?;
                let data: Option<String> = row.get(4)?;
                let created_at: String = row.get(5)?;
                Ok(LogEntry {
                    run_id: row.get(0)?,
                    node_id: row.get(1)?,
                    level: parse_enum(&level)?,
                    message: row.get(3)?,
                    data: data.as_deref().map(parse_json).transpose()?,
                    timestamp: parse_datetime_utc(&created_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}

#[async_trait]
impl ExecutionSink for SqliteSink {
    async fn create_run(&self, workflow_name: &str, input: &Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO runs (id, workflow_name, status, input, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                workflow_name,
                RunStatus::Running.to_string(),
                serde_json::to_string(input)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE runs SET
                status = COALESCE(?2, status),
                finished_at = COALESCE(?3, finished_at),
                duration_ms = COALESCE(?4, duration_ms),
                nodes_executed = COALESCE(?5, nodes_executed),
                error = COALESCE(?6, error),
                last_checkpoint = COALESCE(?7, last_checkpoint)
             WHERE id = ?1",
            params![
                run_id,
                patch.status.map(|s| s.to_string()),
                patch.finished_at.map(|at| at.to_rfc3339()),
                patch.duration_ms.map(|ms| ms as i64),
                patch.nodes_executed.map(|n| n as i64),
                patch.error,
                patch.last_checkpoint,
            ],
        )?;
        if updated == 0 {
            return Err(Error::Storage(format!("Run not found: {}", run_id)));
        }
        Ok(())
    }

    async fn append_log(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Option<&Value>,
    ) -> Result<()> {
        let data = data.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO run_logs (run_id, node_id, level, message, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                node_id,
                level.to_string(),
                message,
                data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_complete_run() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let id = sink.create_run("orders", &json!({"id": 1})).await.unwrap();

        let run = sink.get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.input, json!({"id": 1}));

        sink.update_run(&id, RunPatch::progress(2, "fetch"))
            .await
            .unwrap();
        sink.update_run(&id, RunPatch::completed(3, 40)).await.unwrap();

        let run = sink.get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.nodes_executed, 3);
        assert_eq!(run.duration_ms, Some(40));
        assert_eq!(run.last_checkpoint.as_deref(), Some("fetch"));
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_error() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let id = sink.create_run("orders", &json!(null)).await.unwrap();
        sink.update_run(&id, RunPatch::failed("boom", Some("a".into()), 1, 5))
            .await
            .unwrap();

        let run = sink.get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(sink.list_runs("orders", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_logs_in_order() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let id = sink.create_run("wf", &json!({})).await.unwrap();
        sink.append_log(&id, None, LogLevel::Info, "run started", None)
            .await
            .unwrap();
        sink.append_log(&id, Some("a"), LogLevel::Error, "failed", Some(&json!({"x": 1})))
            .await
            .unwrap();

        let logs = sink.list_logs(&id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].node_id, None);
        assert_eq!(logs[1].level, LogLevel::Error);
        assert_eq!(logs[1].data, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_update_missing_run() {
        let sink = SqliteSink::open_in_memory().unwrap();
        assert!(sink.update_run("missing", RunPatch::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let id = {
            let sink = SqliteSink::open(&path).unwrap();
            sink.create_run("wf", &json!({})).await.unwrap()
        };

        let reopened = SqliteSink::open(&path).unwrap();
        assert!(reopened.get_run(&id).await.unwrap().is_some());
    }
}
