//! Published node resource usage
//!
//! The resource tracker is the single writer for the local node; controllers on
//! the request path read the latest snapshot without coordinating with it.

use crate::models::NodeResourceUsageStats;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default bound on how old a snapshot may be before it is ignored
pub const DEFAULT_MAX_STATS_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct PublishedStats {
    stats: NodeResourceUsageStats,
    published_at: Instant,
}

/// Latest resource usage snapshot per node
#[derive(Debug)]
pub struct ResourceUsageCollector {
    nodes: DashMap<String, PublishedStats>,
    max_age: Duration,
}

impl ResourceUsageCollector {
    pub fn new(max_age: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            max_age,
        }
    }

    /// Replace the snapshot for `stats.node_id`
    pub fn publish(&self, stats: NodeResourceUsageStats) {
        self.nodes.insert(
            stats.node_id.clone(),
            PublishedStats {
                stats,
                published_at: Instant::now(),
            },
        );
    }

    /// Latest snapshot for a node, `None` if absent or older than the staleness bound
    pub fn node_statistics(&self, node_id: &str) -> Option<NodeResourceUsageStats> {
        let entry = self.nodes.get(node_id)?;
        let age = entry.published_at.elapsed();
        if age > self.max_age {
            debug!(
                node_id = %node_id,
                age_ms = age.as_millis() as u64,
                "Ignoring stale resource usage stats"
            );
            return None;
        }
        Some(entry.stats.clone())
    }

    /// All snapshots regardless of age
    pub fn all_node_statistics(&self) -> Vec<NodeResourceUsageStats> {
        self.nodes.iter().map(|e| e.value().stats.clone()).collect()
    }

    pub fn remove(&self, node_id: &str) -> Option<NodeResourceUsageStats> {
        self.nodes.remove(node_id).map(|(_, v)| v.stats)
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl Default for ResourceUsageCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATS_AGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IoUsageStats;

    fn stats(node: &str, cpu: f64) -> NodeResourceUsageStats {
        NodeResourceUsageStats::new(node, cpu, 10.0, IoUsageStats::new(5.0))
    }

    #[test]
    fn test_publish_and_read() {
        let collector = ResourceUsageCollector::default();
        assert!(collector.node_statistics("node-1").is_none());

        collector.publish(stats("node-1", 42.0));
        let read = collector.node_statistics("node-1").unwrap();
        assert_eq!(read.cpu_utilization_percent, 42.0);

        collector.publish(stats("node-1", 43.0));
        assert_eq!(
            collector.node_statistics("node-1").unwrap().cpu_utilization_percent,
            43.0
        );
        assert_eq!(collector.all_node_statistics().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_stats_are_ignored() {
        let collector = ResourceUsageCollector::new(Duration::from_secs(5));
        collector.publish(stats("node-1", 42.0));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(collector.node_statistics("node-1").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(collector.node_statistics("node-1").is_none());
        // Still listed for diagnostics
        assert_eq!(collector.all_node_statistics().len(), 1);
    }

    #[test]
    fn test_remove() {
        let collector = ResourceUsageCollector::default();
        collector.publish(stats("node-1", 1.0));
        assert!(collector.remove("node-1").is_some());
        assert!(collector.node_statistics("node-1").is_none());
    }
}
