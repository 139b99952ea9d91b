//! Audit store — the append-only `fleet_audit` time series, backed by SQLite.
//!
//! One row per node per run. Rows are never updated or deleted here, and
//! every insert commits on its own so a bad row cannot roll back the rest
//! of the batch.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info};

use crate::error::FleetError;
use crate::node::{Health, NodeSummary};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS fleet_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        node_name TEXT NOT NULL,
        platform TEXT NOT NULL,
        health TEXT NOT NULL,
        total_revenue REAL,
        active_subs INTEGER,
        ai_metrics INTEGER,
        error TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_fleet_audit_node ON fleet_audit(node_name, created_at);
    CREATE INDEX IF NOT EXISTS idx_fleet_audit_run ON fleet_audit(run_id);
";

const SELECT_COLUMNS: &str = "SELECT id, run_id, node_name, platform, health, total_revenue, \
     active_subs, ai_metrics, error, created_at FROM fleet_audit";

/// A persisted audit row.
#[derive(Debug, Clone, Serialize)]
pub struct FleetAuditRow {
    pub id: i64,
    pub run_id: String,
    pub node_name: String,
    pub platform: String,
    pub health: Health,
    pub total_revenue: Option<f64>,
    pub active_subscriptions: Option<u64>,
    pub auxiliary_metric_count: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of persisting one batch.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub written: usize,
    /// `(node_name, error)` for each row that could not be appended.
    pub failed: Vec<(String, String)>,
}

pub struct AuditStore {
    db: Mutex<Connection>,
}

impl AuditStore {
    /// Open (or create) the audit store and make sure the table exists.
    ///
    /// Failing here means the store is unreachable, which is run-fatal.
    pub fn open(path: &Path) -> Result<Self, FleetError> {
        let db = Connection::open(path).map_err(FleetError::AuditStore)?;

        db.pragma_update(None, "journal_mode", "WAL")
            .map_err(FleetError::AuditStore)?;
        db.execute_batch(SCHEMA).map_err(FleetError::AuditStore)?;

        info!(path = %path.display(), "Audit store ready");
        Ok(Self { db: Mutex::new(db) })
    }

    /// Append a single summary. Returns the store-assigned row id;
    /// `created_at` is assigned by the store.
    pub fn append(&self, run_id: &str, summary: &NodeSummary) -> Result<i64> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("audit store lock poisoned"))?;

        db.execute(
            "INSERT INTO fleet_audit (run_id, node_name, platform, health, total_revenue, active_subs, ai_metrics, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                summary.node_name,
                summary.platform.as_str(),
                summary.health.as_str(),
                summary.total_revenue,
                summary.active_subscriptions.map(|v| v as i64),
                summary.auxiliary_metric_count.map(|v| v as i64),
                summary.error
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Append every summary. A failed row is logged and skipped.
    pub fn write_batch(&self, run_id: &str, batch: &[NodeSummary]) -> WriteReport {
        let mut report = WriteReport::default();

        for summary in batch {
            match self.append(run_id, summary) {
                Ok(_) => report.written += 1,
                Err(e) => {
                    error!(
                        node = %summary.node_name,
                        run_id = run_id,
                        "Audit row insert failed: {:#}",
                        e
                    );
                    report.failed.push((summary.node_name.clone(), format!("{:#}", e)));
                }
            }
        }

        report
    }

    /// Most recent rows for one node, newest first.
    pub fn rows_for_node(&self, node_name: &str, limit: usize) -> Result<Vec<FleetAuditRow>> {
        let sql = format!("{} WHERE node_name = ?1 ORDER BY id DESC LIMIT ?2", SELECT_COLUMNS);
        self.query(&sql, params![node_name, limit as i64])
    }

    /// All rows written by one run, in insertion order.
    pub fn rows_for_run(&self, run_id: &str) -> Result<Vec<FleetAuditRow>> {
        let sql = format!("{} WHERE run_id = ?1 ORDER BY id", SELECT_COLUMNS);
        self.query(&sql, params![run_id])
    }

    pub fn count(&self) -> Result<u64> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("audit store lock poisoned"))?;
        let n: i64 = db.query_row("SELECT COUNT(*) FROM fleet_audit", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<FleetAuditRow>> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("audit store lock poisoned"))?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt
            .query_map(args, row_to_audit)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<FleetAuditRow> {
    Ok(FleetAuditRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        node_name: row.get(2)?,
        platform: row.get(3)?,
        health: Health::parse(&row.get::<_, String>(4)?),
        total_revenue: row.get(5)?,
        active_subscriptions: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        auxiliary_metric_count: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        error: row.get(8)?,
        created_at: parse_created_at(&row.get::<_, String>(9)?)?,
    })
}

fn parse_created_at(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;

    fn summary(name: &str, health: Health, revenue: Option<f64>) -> NodeSummary {
        NodeSummary {
            node_name: name.into(),
            platform: Platform::Lovable,
            health,
            total_revenue: revenue,
            active_subscriptions: revenue.map(|_| 4),
            auxiliary_metric_count: revenue.map(|_| 9),
            error: if revenue.is_none() {
                Some("store unreachable".into())
            } else {
                None
            },
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        {
            let store = AuditStore::open(&path).unwrap();
            store.append("run-1", &summary("a", Health::Online, Some(1.0))).unwrap();
        }
        let store = AuditStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).unwrap();

        let id1 = store.append("run-1", &summary("a", Health::Online, Some(42.5))).unwrap();
        let id2 = store.append("run-1", &summary("b", Health::Offline, None)).unwrap();
        assert!(id2 > id1);

        let rows = store.rows_for_run("run-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].node_name, "a");
        assert_eq!(rows[0].platform, "lovable");
        assert_eq!(rows[0].health, Health::Online);
        assert_eq!(rows[0].total_revenue, Some(42.5));
        assert_eq!(rows[0].active_subscriptions, Some(4));
        assert_eq!(rows[0].auxiliary_metric_count, Some(9));
        assert_eq!(rows[0].error, None);

        assert_eq!(rows[1].health, Health::Offline);
        assert_eq!(rows[1].total_revenue, None);
        assert_eq!(rows[1].active_subscriptions, None);
        assert_eq!(rows[1].error.as_deref(), Some("store unreachable"));
    }

    #[test]
    fn test_identical_runs_are_not_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).unwrap();
        let s = summary("a", Health::Online, Some(7.0));

        store.append("run-1", &s).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        store.append("run-2", &s).unwrap();

        let rows = store.rows_for_node("a", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].run_id, "run-2");
        assert_eq!(rows[0].total_revenue, rows[1].total_revenue);
        assert!(rows[0].created_at > rows[1].created_at);
    }

    #[test]
    fn test_failed_row_does_not_block_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).unwrap();
        store
            .db
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON fleet_audit
                 WHEN NEW.node_name = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let batch = vec![
            summary("a", Health::Online, Some(1.0)),
            summary("poison", Health::Online, Some(2.0)),
            summary("c", Health::Unknown, None),
        ];
        let report = store.write_batch("run-1", &batch);

        assert_eq!(report.written, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "poison");
        assert!(report.failed[0].1.contains("rejected"));

        let names: Vec<_> = store
            .rows_for_run("run-1")
            .unwrap()
            .into_iter()
            .map(|r| r.node_name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_unreachable_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("audit.db");
        assert!(matches!(
            AuditStore::open(&path),
            Err(FleetError::AuditStore(_))
        ));
    }

    #[test]
    fn test_created_at_assigned_by_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).unwrap();

        let before = Utc::now() - chrono::Duration::seconds(5);
        store.append("run-1", &summary("a", Health::Online, Some(1.0))).unwrap();
        let after = Utc::now() + chrono::Duration::seconds(5);

        let raw: String = store
            .db
            .lock()
            .unwrap()
            .query_row("SELECT created_at FROM fleet_audit", [], |row| row.get(0))
            .unwrap();
        assert!(raw.ends_with('Z'));

        let row = &store.rows_for_node("a", 1).unwrap()[0];
        assert!(row.created_at > before && row.created_at < after);
    }

    #[test]
    fn test_unparsable_created_at_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).unwrap();
        store
            .db
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO fleet_audit (run_id, node_name, platform, health, created_at)
                 VALUES ('run-1', 'a', 'custom', 'online', 'yesterday')",
                [],
            )
            .unwrap();

        let err = store.rows_for_node("a", 10).unwrap_err();
        let conversion = err
            .downcast_ref::<rusqlite::Error>()
            .map(|e| matches!(e, rusqlite::Error::FromSqlConversionFailure(9, Type::Text, _)));
        assert_eq!(conversion, Some(true));
    }
}
