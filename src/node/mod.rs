//! Per-node polling — one summary per node per run.
//!
//! A node task runs the health prober and the metrics reader for a single
//! descriptor and folds both outcomes into a `NodeSummary`. Nothing escapes
//! this boundary: a failed read becomes data on the summary, and a failed
//! probe is already folded into `Health::Offline` by the prober.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{NodeDescriptor, Platform};

pub mod metrics;
pub mod probe;

pub use metrics::{MetricsReader, SqliteMetricsReader};
pub use probe::{HealthProber, HttpProber};

// ── Core Types ──────────────────────────────────────────────────────

/// Health classification from a node's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Online,
    Offline,
    Unknown,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Online => "online",
            Health::Offline => "offline",
            Health::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Health::Online,
            "offline" => Health::Offline,
            _ => Health::Unknown,
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three aggregates read from a node's metrics store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub total_revenue: f64,
    pub active_subscriptions: u64,
    pub auxiliary_metric_count: u64,
}

/// One node's observation for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_name: String,
    pub platform: Platform,
    pub health: Health,
    pub total_revenue: Option<f64>,
    pub active_subscriptions: Option<u64>,
    pub auxiliary_metric_count: Option<u64>,
    /// Set only when the metrics read failed; the metric fields are then `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeSummary {
    /// Fold a probe outcome and a read outcome into a summary.
    pub fn assemble(
        node: &NodeDescriptor,
        health: Health,
        metrics: anyhow::Result<NodeMetrics>,
    ) -> Self {
        let mut summary = NodeSummary {
            node_name: node.name.clone(),
            platform: node.platform,
            health,
            total_revenue: None,
            active_subscriptions: None,
            auxiliary_metric_count: None,
            error: None,
        };

        match metrics {
            Ok(m) => {
                summary.total_revenue = Some(m.total_revenue);
                summary.active_subscriptions = Some(m.active_subscriptions);
                summary.auxiliary_metric_count = Some(m.auxiliary_metric_count);
            }
            // {:#} keeps the whole context chain on one line
            Err(e) => summary.error = Some(format!("{:#}", e)),
        }

        summary
    }

    pub fn metrics_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ── Poll Task ───────────────────────────────────────────────────────

/// Probe and read one node. Never fails: every error is encoded in the summary.
pub async fn poll_node(
    node: &NodeDescriptor,
    prober: &dyn HealthProber,
    reader: &dyn MetricsReader,
) -> NodeSummary {
    let health = prober.probe(node).await;
    debug!(node = %node.name, health = %health, "Probe finished");

    let metrics = reader.read(node).await;
    if let Err(e) = &metrics {
        warn!(
            node = %node.name,
            platform = %node.platform,
            "Metrics read failed: {:#}",
            e
        );
    }

    NodeSummary::assemble(node, health, metrics)
}
