//! Debug log persistence adapter (spec.md §4.6, §6 "Persisted schema")
//!
//! Append-only sink for emitted translations with lazy cleanup: each append
//! deletes rows older than 45 minutes, then caps the table to 500 rows.
//! Failures here are logged and swallowed — losing a debug row must never
//! take down a session.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::warn;

use crate::types::APP_VERSION;

const RETENTION_MINUTES: i64 = 45;
const MAX_ROWS: i64 = 500;

#[derive(Debug, Clone)]
pub struct DebugLogRow {
    pub session_id: String,
    pub client_id: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DebugLogSink: Send + Sync {
    async fn append(&self, row: DebugLogRow);
}

pub struct SqliteDebugLogSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDebugLogSink {
    pub async fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS debug_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                source_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                source_language TEXT NOT NULL,
                target_language TEXT NOT NULL,
                reason TEXT NOT NULL,
                app_version TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_debug_log_created ON debug_log(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn cap_text(text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= 1000 {
            text.to_string()
        } else {
            chars[..1000].iter().collect()
        }
    }

    async fn append_fallible(&self, row: DebugLogRow) -> rusqlite::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO debug_log (session_id, client_id, source_text, translated_text, source_language, target_language, reason, app_version, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.session_id,
                row.client_id,
                Self::cap_text(&row.source_text),
                Self::cap_text(&row.translated_text),
                row.source_language,
                row.target_language,
                row.reason,
                APP_VERSION,
                row.created_at.to_rfc3339(),
            ],
        )?;

        let cutoff = (Utc::now() - chrono::Duration::minutes(RETENTION_MINUTES)).to_rfc3339();
        conn.execute("DELETE FROM debug_log WHERE created_at < ?1", params![cutoff])?;

        conn.execute(
            "DELETE FROM debug_log WHERE id IN (\
                SELECT id FROM debug_log ORDER BY created_at DESC LIMIT -1 OFFSET ?1\
             )",
            params![MAX_ROWS],
        )?;

        Ok(())
    }
}

#[async_trait]
impl DebugLogSink for SqliteDebugLogSink {
    /// Fire-and-forget: append, then enforce retention. Any failure is
    /// logged, never propagated (spec.md §4.6 "Failures are non-fatal").
    async fn append(&self, row: DebugLogRow) {
        if let Err(err) = self.append_fallible(row).await {
            warn!(error = %err, "debug log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(created_at: DateTime<Utc>) -> DebugLogRow {
        DebugLogRow {
            session_id: "s1".to_string(),
            client_id: "c1".to_string(),
            source_text: "hello".to_string(),
            translated_text: "salut".to_string(),
            source_language: "en-US".to_string(),
            target_language: "ro".to_string(),
            reason: "sentence_ending".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn append_and_retention_cleanup() {
        let dir = tempdir().unwrap();
        let sink = SqliteDebugLogSink::new(dir.path().join("debug.sqlite")).await.unwrap();

        let old = Utc::now() - chrono::Duration::minutes(60);
        sink.append_fallible(row(old)).await.unwrap();
        sink.append_fallible(row(Utc::now())).await.unwrap();

        let conn = sink.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM debug_log", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn caps_total_rows_to_500() {
        let dir = tempdir().unwrap();
        let sink = SqliteDebugLogSink::new(dir.path().join("debug.sqlite")).await.unwrap();

        for _ in 0..510 {
            sink.append_fallible(row(Utc::now())).await.unwrap();
        }

        let conn = sink.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM debug_log", [], |r| r.get(0)).unwrap();
        assert!(count <= 500);
    }
}
