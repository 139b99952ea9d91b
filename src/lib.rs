//! Fleet controller — aggregates health and revenue metrics across a fleet
//! of independently deployed storefront nodes.
//!
//! A run probes every node's health endpoint, reads three aggregates from
//! its metrics store, and appends one audit row per node to a central
//! SQLite store. Any subset of nodes may be down; the run still completes.

pub mod audit;
pub mod config;
pub mod error;
pub mod node;
pub mod poller;
pub mod run;

pub use audit::{AuditStore, FleetAuditRow, WriteReport};
pub use config::{FleetConfig, NodeDescriptor, Platform};
pub use error::{ConfigError, FleetError};
pub use node::{Health, NodeMetrics, NodeSummary};
pub use poller::FleetPoller;
pub use run::{render_table, RunOrchestrator, RunReport, RunState};
