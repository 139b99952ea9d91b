//! Node health prober — one bounded HTTP GET per node per run.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::Health;
use crate::config::NodeDescriptor;

/// Classifies a node's health endpoint. Implementations must not fail:
/// transport errors map to `Health::Offline`.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, node: &NodeDescriptor) -> Health;
}

/// Probes `GET <healthAddress>` and reads the `ok` flag of the JSON body.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, node: &NodeDescriptor) -> Health {
        let resp = match self.client.get(&node.health_address).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(node = %node.name, "Health request failed: {}", e);
                return Health::Offline;
            }
        };

        let status = resp.status();
        // A body that fails mid-stream is a transport failure, not a bad flag.
        let body = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!(node = %node.name, "Health body read failed: {}", e);
                return Health::Offline;
            }
        };

        classify(status, &body)
    }
}

/// Map a completed health response onto a classification.
pub fn classify(status: StatusCode, body: &[u8]) -> Health {
    if !status.is_success() {
        return Health::Offline;
    }

    let ready = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("ok").and_then(|ok| ok.as_bool()))
        .unwrap_or(false);

    if ready {
        Health::Online
    } else {
        Health::Unknown
    }
}
