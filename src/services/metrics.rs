use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inference_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    tenant TEXT NOT NULL,
    queue_wait_ms INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    success INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_inference_log_timestamp ON inference_log(timestamp);
"#;

/// One finished inference task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRecord {
    pub tenant: String,
    pub queue_wait_ms: u64,
    pub latency_ms: u64,
    pub success: bool,
}

/// SQLite log of inference latency, written by the scheduler worker.
pub struct MetricsStore {
    conn: Mutex<Connection>,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(&self, record: &InferenceRecord) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute(
            "INSERT INTO inference_log (timestamp, tenant, queue_wait_ms, latency_ms, success)
             VALUES (datetime('now'), ?1, ?2, ?3, ?4)",
            params![
                record.tenant,
                record.queue_wait_ms as i64,
                record.latency_ms as i64,
                record.success as i32
            ],
        ) {
            tracing::warn!(error = %e, "failed to record inference metrics");
        }
    }

    pub fn get_summary(&self, retention_days: u32) -> MetricsSummary {
        let query = format!(
            r#"
            SELECT
                COUNT(*) as total_requests,
                COALESCE(AVG(latency_ms), 0) as avg_latency_ms,
                COALESCE(AVG(queue_wait_ms), 0) as avg_queue_wait_ms,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) * 100.0 / NULLIF(COUNT(*), 0), 0) as error_rate
            FROM inference_log
            WHERE timestamp >= datetime('now', '-{} days')
            "#,
            retention_days
        );

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(&query, [], |row| {
            Ok(MetricsSummary {
                total_requests: row.get::<_, i64>(0)? as u64,
                avg_latency_ms: row.get::<_, f64>(1)? as u64,
                avg_queue_wait_ms: row.get::<_, f64>(2)? as u64,
                error_rate: row.get::<_, f64>(3)? as f32,
            })
        })
        .unwrap_or_default()
    }

    /// Delete entries older than the retention window; returns rows removed.
    pub fn cleanup(&self, retention_days: u32) -> usize {
        let query = format!(
            "DELETE FROM inference_log WHERE timestamp < datetime('now', '-{} days')",
            retention_days
        );
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(&query, []).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub avg_latency_ms: u64,
    pub avg_queue_wait_ms: u64,
    /// Percentage of failed tasks.
    pub error_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(latency_ms: u64, success: bool) -> InferenceRecord {
        InferenceRecord {
            tenant: "acme".to_string(),
            queue_wait_ms: 10,
            latency_ms,
            success,
        }
    }

    #[test]
    fn test_summary_aggregates_records() {
        let store = MetricsStore::open_in_memory().unwrap();
        store.record(&record(100, true));
        store.record(&record(300, false));

        let summary = store.get_summary(30);
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.avg_latency_ms, 200);
        assert_eq!(summary.avg_queue_wait_ms, 10);
        assert!((summary.error_rate - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_summary() {
        let store = MetricsStore::open_in_memory().unwrap();
        assert_eq!(store.get_summary(30), MetricsSummary::default());
    }

    #[test]
    fn test_cleanup_keeps_recent_rows() {
        let store = MetricsStore::open_in_memory().unwrap();
        store.record(&record(5, true));
        assert_eq!(store.cleanup(30), 0);
        assert_eq!(store.get_summary(30).total_requests, 1);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetricsStore::open(&dir.path().join("metrics.db")).unwrap();
        store.record(&record(1, true));
        assert_eq!(store.get_summary(1).total_requests, 1);
    }
}
