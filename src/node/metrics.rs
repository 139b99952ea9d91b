//! Node metrics reader — three read-only aggregates from a node's store.
//!
//! The connection is opened inside a blocking task and dropped when that
//! task returns, whichever query (if any) failed. Any failure discards the
//! values already read: a node reports all three aggregates or none.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use tracing::debug;

use super::NodeMetrics;
use crate::config::NodeDescriptor;

const REVENUE_SQL: &str = "SELECT COALESCE(SUM(amount), 0) FROM revenue_logs";
const ACTIVE_SUBS_SQL: &str = "SELECT COUNT(*) FROM subscriptions WHERE status = 'active'";
const AUX_METRICS_SQL: &str = "SELECT COUNT(*) FROM ai_metrics";

/// Reads a node's aggregate metrics.
#[async_trait]
pub trait MetricsReader: Send + Sync {
    async fn read(&self, node: &NodeDescriptor) -> Result<NodeMetrics>;
}

/// Reads from a SQLite metrics store, one exclusive connection per call.
pub struct SqliteMetricsReader {
    timeout: Duration,
}

impl SqliteMetricsReader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MetricsReader for SqliteMetricsReader {
    async fn read(&self, node: &NodeDescriptor) -> Result<NodeMetrics> {
        let address = node.metrics_store_address.clone();
        let busy = self.timeout;
        let task = tokio::task::spawn_blocking(move || read_store(&address, busy));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => bail!("metrics read task failed: {}", join_err),
            Err(_) => bail!("metrics read timed out after {}ms", self.timeout.as_millis()),
        }
    }
}

/// Open `address` read-only and run the three aggregate queries.
pub fn read_store(address: &str, busy_timeout: Duration) -> Result<NodeMetrics> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(address, flags)
        .with_context(|| format!("failed to open metrics store '{}'", address))?;
    conn.busy_timeout(busy_timeout)?;

    let revenue: f64 = conn
        .query_row(REVENUE_SQL, [], |row| row.get(0))
        .context("revenue query failed")?;
    let active: i64 = conn
        .query_row(ACTIVE_SUBS_SQL, [], |row| row.get(0))
        .context("subscription query failed")?;
    let aux: i64 = conn
        .query_row(AUX_METRICS_SQL, [], |row| row.get(0))
        .context("auxiliary metric query failed")?;

    if !revenue.is_finite() || revenue < 0.0 {
        bail!("malformed revenue total: {}", revenue);
    }

    let metrics = NodeMetrics {
        total_revenue: round_cents(revenue),
        active_subscriptions: u64::try_from(active).context("negative subscription count")?,
        auxiliary_metric_count: u64::try_from(aux).context("negative auxiliary metric count")?,
    };

    debug!(
        store = address,
        revenue = metrics.total_revenue,
        active_subs = metrics.active_subscriptions,
        aux = metrics.auxiliary_metric_count,
        "Metrics read"
    );
    Ok(metrics)
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
