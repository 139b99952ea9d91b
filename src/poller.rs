//! Fleet poller — fans one poll task out per node and joins on all of them.
//!
//! Every node gets its own spawned task, so a slow or failing node only
//! delays the barrier, never its siblings. Node-level failures come back as
//! data inside `NodeSummary`; a task that panics or is cancelled is a
//! run-level fault and is reported once every other task has finished.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::NodeDescriptor;
use crate::error::{FleetError, Result};
use crate::node::{self, HealthProber, MetricsReader, NodeSummary};

pub struct FleetPoller {
    prober: Arc<dyn HealthProber>,
    reader: Arc<dyn MetricsReader>,
    /// Optional cap on concurrently running node tasks.
    limit: Option<Arc<Semaphore>>,
}

impl FleetPoller {
    pub fn new(prober: Arc<dyn HealthProber>, reader: Arc<dyn MetricsReader>) -> Self {
        Self {
            prober,
            reader,
            limit: None,
        }
    }

    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.limit = max.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Poll every node concurrently and return one summary per node.
    ///
    /// Order of the returned batch is not meaningful.
    pub async fn poll_all(&self, nodes: &[NodeDescriptor]) -> Result<Vec<NodeSummary>> {
        let started = Instant::now();
        let mut handles = Vec::with_capacity(nodes.len());

        for node in nodes {
            let node = node.clone();
            let prober = Arc::clone(&self.prober);
            let reader = Arc::clone(&self.reader);
            let limit = self.limit.clone();
            let name = node.name.clone();

            let handle = tokio::spawn(async move {
                let _permit = match limit {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                node::poll_node(&node, prober.as_ref(), reader.as_ref()).await
            });
            handles.push((name, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut fatal = None;

        // Drain every handle before reporting a fault so no sibling is abandoned.
        for (name, handle) in handles {
            match handle.await {
                Ok(summary) => results.push(summary),
                Err(source) => {
                    error!(node = %name, "Poll task aborted: {}", source);
                    if fatal.is_none() {
                        fatal = Some(FleetError::TaskAborted { node: name, source });
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            nodes = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fleet poll complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::*;
    use crate::node::Health;
    use async_trait::async_trait;
    use std::time::Duration;

    fn poller(prober: FakeProber, reader: FakeReader) -> FleetPoller {
        FleetPoller::new(Arc::new(prober), Arc::new(reader))
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let p = poller(FakeProber::default(), FakeReader::default());
        let results = p.poll_all(&[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_one_summary_per_node_despite_failures() {
        let nodes: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| descriptor(n)).collect();

        let mut prober = FakeProber::default();
        prober.health.insert("a".into(), Health::Online);
        prober.health.insert("b".into(), Health::Unknown);
        let mut reader = FakeReader::default();
        reader.metrics.insert("a".into(), metrics(10.0, 1, 1));
        reader.metrics.insert("c".into(), metrics(0.0, 0, 0));

        let mut results = poller(prober, reader).poll_all(&nodes).await.unwrap();
        results.sort_by(|x, y| x.node_name.cmp(&y.node_name));

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].health, Health::Online);
        assert!(results[0].metrics_ok());
        assert_eq!(results[1].health, Health::Unknown);
        assert!(!results[1].metrics_ok());
        assert_eq!(results[2].health, Health::Offline);
        assert!(results[2].metrics_ok());
        assert_eq!(results[3].health, Health::Offline);
        assert!(!results[3].metrics_ok());
    }

    #[tokio::test]
    async fn test_nodes_run_concurrently() {
        let nodes: Vec<_> = ["a", "b", "c"].iter().map(|n| descriptor(n)).collect();
        let mut prober = FakeProber::default();
        for n in ["a", "b", "c"] {
            prober.delay.insert(n.into(), Duration::from_millis(300));
        }

        let start = Instant::now();
        let results = poller(prober, FakeReader::default())
            .poll_all(&nodes)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_max_concurrency_serializes() {
        let nodes: Vec<_> = ["a", "b"].iter().map(|n| descriptor(n)).collect();
        let mut prober = FakeProber::default();
        prober.delay.insert("a".into(), Duration::from_millis(200));
        prober.delay.insert("b".into(), Duration::from_millis(200));

        let start = Instant::now();
        let results = poller(prober, FakeReader::default())
            .with_max_concurrency(Some(1))
            .poll_all(&nodes)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    struct PanickingProber;

    #[async_trait]
    impl HealthProber for PanickingProber {
        async fn probe(&self, node: &NodeDescriptor) -> Health {
            if node.name == "bad" {
                panic!("prober bug");
            }
            Health::Online
        }
    }

    #[tokio::test]
    async fn test_task_panic_is_fatal() {
        let nodes = vec![descriptor("good"), descriptor("bad")];
        let p = FleetPoller::new(Arc::new(PanickingProber), Arc::new(FakeReader::default()));

        match p.poll_all(&nodes).await {
            Err(FleetError::TaskAborted { node, .. }) => assert_eq!(node, "bad"),
            other => panic!("expected TaskAborted, got {:?}", other.map(|r| r.len())),
        }
    }
}
