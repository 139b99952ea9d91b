//! Run orchestrator — one fleet check from start to finish.
//!
//! `Idle → Polling → Persisting → Done`. Offline nodes, failed reads and
//! failed row inserts all still end in `Done`; only a poll task abort or an
//! unreachable audit store ends the run in `Failed`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditStore, WriteReport};
use crate::config::{FleetConfig, NodeDescriptor};
use crate::error::Result;
use crate::node::{Health, HttpProber, NodeSummary, SqliteMetricsReader};
use crate::poller::FleetPoller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Polling,
    Persisting,
    Done,
    Failed,
}

/// Everything one completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summaries: Vec<NodeSummary>,
    pub rows_written: usize,
    /// `(node_name, error)` for rows the audit store rejected.
    pub rows_failed: Vec<(String, String)>,
}

impl RunReport {
    pub fn count_health(&self, health: Health) -> usize {
        self.summaries.iter().filter(|s| s.health == health).count()
    }

    pub fn metrics_errors(&self) -> usize {
        self.summaries.iter().filter(|s| !s.metrics_ok()).count()
    }
}

pub struct RunOrchestrator {
    nodes: Vec<NodeDescriptor>,
    poller: FleetPoller,
    audit_path: PathBuf,
    state: RunState,
}

impl RunOrchestrator {
    pub fn new(nodes: Vec<NodeDescriptor>, poller: FleetPoller, audit_path: PathBuf) -> Self {
        Self {
            nodes,
            poller,
            audit_path,
            state: RunState::Idle,
        }
    }

    /// Wire the HTTP prober and SQLite reader from a validated config.
    pub fn from_config(config: &FleetConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let prober = HttpProber::new(config.probe_timeout())?;
        let reader = SqliteMetricsReader::new(config.metrics_timeout());
        let poller = FleetPoller::new(Arc::new(prober), Arc::new(reader))
            .with_max_concurrency(config.max_concurrency);

        Ok(Self::new(config.nodes.clone(), poller, config.audit_db_path()?))
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute one fleet check.
    pub async fn run(&mut self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.state = RunState::Idle;

        info!(
            run_id = %run_id,
            nodes = self.nodes.len(),
            "Fleet status check @ {}",
            started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let result = self.poll_and_persist(&run_id).await;
        let (summaries, write) = match result {
            Ok(out) => out,
            Err(e) => {
                error!(run_id = %run_id, state = ?self.state, "Run failed: {}", e);
                self.state = RunState::Failed;
                return Err(e);
            }
        };

        self.state = RunState::Done;
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            summaries,
            rows_written: write.written,
            rows_failed: write.failed,
        };

        info!(
            run_id = %report.run_id,
            online = report.count_health(Health::Online),
            offline = report.count_health(Health::Offline),
            unknown = report.count_health(Health::Unknown),
            metrics_errors = report.metrics_errors(),
            rows_written = report.rows_written,
            rows_failed = report.rows_failed.len(),
            "Fleet summary logged"
        );
        Ok(report)
    }

    async fn poll_and_persist(&mut self, run_id: &str) -> Result<(Vec<NodeSummary>, WriteReport)> {
        self.state = RunState::Polling;
        let summaries = self.poller.poll_all(&self.nodes).await?;

        self.state = RunState::Persisting;
        let store = AuditStore::open(&self.audit_path)?;
        let write = store.write_batch(run_id, &summaries);
        if !write.failed.is_empty() {
            warn!(
                run_id = run_id,
                failed = write.failed.len(),
                "Some audit rows were not written"
            );
        }

        Ok((summaries, write))
    }
}

// ── Console Output ──────────────────────────────────────────────────

const HEADERS: [&str; 7] = ["node", "platform", "health", "revenue", "active_subs", "ai_metrics", "error"];

/// Render the batch as a fixed-width table, sorted by node name.
pub fn render_table(summaries: &[NodeSummary]) -> String {
    let mut sorted: Vec<&NodeSummary> = summaries.iter().collect();
    sorted.sort_by(|a, b| a.node_name.cmp(&b.node_name));

    let opt = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    let rows: Vec<[String; 7]> = sorted
        .iter()
        .map(|s| {
            [
                s.node_name.clone(),
                s.platform.to_string(),
                s.health.to_string(),
                opt(s.total_revenue.map(|r| format!("{:.2}", r))),
                opt(s.active_subscriptions.map(|v| v.to_string())),
                opt(s.auxiliary_metric_count.map(|v| v.to_string())),
                opt(s.error.clone()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut line = |cells: &[&str]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect();
        let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
    };

    line(&HEADERS);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    line(&rule.iter().map(String::as_str).collect::<Vec<_>>());
    for row in &rows {
        line(&row.iter().map(String::as_str).collect::<Vec<_>>());
    }

    out
}
