//! Perf stats monitor
//!
//! Keeps a short history of [`NodePerfStats`] per node and drives the node
//! admission state machine from each node's latest record. The local node's
//! record is refreshed periodically from the published resource usage; remote
//! records arrive through [`PerfStatsMonitor::record_node_perf_stats`].

use crate::models::AdmissionControlMode;
use crate::perf_stats::NodePerfStats;
use crate::settings::AdmissionControlSettings;
use crate::state::{AdmissionControllerState, NodeAdmissionStates};
use crate::tracker::RollingWindow;
use crate::usage::ResourceUsageCollector;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct PerfStatsMonitor {
    local_node_id: String,
    history: DashMap<String, RollingWindow<NodePerfStats>>,
    history_size: usize,
    refresh_interval: Duration,
    states: Arc<NodeAdmissionStates>,
    usage: Arc<ResourceUsageCollector>,
    settings: watch::Receiver<Arc<AdmissionControlSettings>>,
}

impl PerfStatsMonitor {
    pub fn new(
        local_node_id: impl Into<String>,
        states: Arc<NodeAdmissionStates>,
        usage: Arc<ResourceUsageCollector>,
        settings: watch::Receiver<Arc<AdmissionControlSettings>>,
    ) -> Self {
        let (history_size, refresh_interval) = {
            let current = settings.borrow();
            (
                current.monitor.history_size,
                current.monitor.refresh_interval(),
            )
        };
        Self {
            local_node_id: local_node_id.into(),
            history: DashMap::new(),
            history_size,
            refresh_interval,
            states,
            usage,
            settings,
        }
    }

    /// Fold a node's record into its history and re-evaluate its state.
    ///
    /// Ignored while admission control is disabled.
    pub fn record_node_perf_stats(
        &self,
        node_id: &str,
        stats: NodePerfStats,
    ) -> Option<AdmissionControllerState> {
        if self.settings.borrow().transport_mode == AdmissionControlMode::Disabled {
            return None;
        }

        let (cpu, memory) = (stats.cpu_percent_avg, stats.memory_percent_avg);
        self.history
            .entry(node_id.to_string())
            .or_insert_with(|| RollingWindow::new(self.history_size))
            .push(stats);

        Some(self.states.apply_usage(node_id, cpu, memory))
    }

    /// Record the local node's smoothed usage, if fresh stats are published
    pub fn refresh_local(&self) -> Option<AdmissionControllerState> {
        let Some(usage) = self.usage.node_statistics(&self.local_node_id) else {
            debug!(node_id = %self.local_node_id, "No local resource usage to record");
            return None;
        };
        self.record_node_perf_stats(&self.local_node_id, NodePerfStats::from_usage(&usage))
    }

    /// Averaged record over a node's history
    pub fn node_perf_stats(&self, node_id: &str) -> Option<NodePerfStats> {
        self.history
            .get(node_id)
            .and_then(|history| NodePerfStats::average(&history))
    }

    pub fn all_node_perf_stats(&self) -> BTreeMap<String, NodePerfStats> {
        self.history
            .iter()
            .filter_map(|e| NodePerfStats::average(e.value()).map(|s| (e.key().clone(), s)))
            .collect()
    }

    pub fn states(&self) -> &Arc<NodeAdmissionStates> {
        &self.states
    }

    /// Forget a node that left the cluster
    pub fn remove_node(&self, node_id: &str) {
        self.history.remove(node_id);
        self.states.remove(node_id);
    }

    /// Refresh the local record at a fixed delay until cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            node_id = %self.local_node_id,
            interval_secs = self.refresh_interval.as_secs(),
            "Starting perf stats monitor"
        );

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(state) = self.refresh_local() {
                        debug!(node_id = %self.local_node_id, state = %state, "Local admission state refreshed");
                    }
                }
                _ = token.cancelled() => {
                    info!("Shutting down perf stats monitor");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IoUsageStats, NodeResourceUsageStats};
    use crate::observability::{AdmissionMetrics, StructuredLogger};
    use crate::settings::DynamicSettings;

    fn monitor(mode: AdmissionControlMode) -> (Arc<ResourceUsageCollector>, PerfStatsMonitor) {
        let settings = DynamicSettings::new(AdmissionControlSettings {
            transport_mode: mode,
            ..Default::default()
        })
        .unwrap();
        let states = Arc::new(NodeAdmissionStates::new(
            settings.subscribe(),
            CancellationToken::new(),
            AdmissionMetrics::new(),
            StructuredLogger::new("local"),
        ));
        let usage = Arc::new(ResourceUsageCollector::default());
        let monitor = PerfStatsMonitor::new("local", states, usage.clone(), settings.subscribe());
        (usage, monitor)
    }

    #[tokio::test]
    async fn test_latest_record_drives_state() {
        let (_, monitor) = monitor(AdmissionControlMode::Enforced);

        let state = monitor.record_node_perf_stats("node-1", NodePerfStats::new(95.0, 10.0, 0.0));
        assert_eq!(state, Some(AdmissionControllerState::Open));

        let state = monitor.record_node_perf_stats("node-1", NodePerfStats::new(20.0, 10.0, 0.0));
        assert_eq!(state, Some(AdmissionControllerState::Closed));
        assert_eq!(
            monitor.states().state("node-1"),
            AdmissionControllerState::Closed
        );

        let averaged = monitor.node_perf_stats("node-1").unwrap();
        assert_eq!(averaged.cpu_percent_avg, 57.5);
    }

    #[tokio::test]
    async fn test_disabled_mode_does_not_record() {
        let (_, monitor) = monitor(AdmissionControlMode::Disabled);

        let state = monitor.record_node_perf_stats("node-1", NodePerfStats::new(95.0, 10.0, 0.0));
        assert_eq!(state, None);
        assert!(monitor.node_perf_stats("node-1").is_none());
        assert_eq!(
            monitor.states().state("node-1"),
            AdmissionControllerState::Disabled
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (_, monitor) = monitor(AdmissionControlMode::Monitor);
        for cpu in 0..15 {
            monitor.record_node_perf_stats("node-1", NodePerfStats::new(cpu as f64, 0.0, 0.0));
        }
        // Only 5..=14 remain
        assert_eq!(monitor.node_perf_stats("node-1").unwrap().cpu_percent_avg, 9.5);
    }

    #[tokio::test]
    async fn test_refresh_local_uses_published_usage() {
        let (usage, monitor) = monitor(AdmissionControlMode::Enforced);
        assert_eq!(monitor.refresh_local(), None);

        usage.publish(
            NodeResourceUsageStats::new("local", 60.0, 30.0, IoUsageStats::new(10.0))
                .with_ewma(75.0, 30.0),
        );
        assert_eq!(
            monitor.refresh_local(),
            Some(AdmissionControllerState::HalfOpen)
        );
        assert_eq!(monitor.all_node_perf_stats().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_node() {
        let (_, monitor) = monitor(AdmissionControlMode::Enforced);
        monitor.record_node_perf_stats("node-1", NodePerfStats::new(75.0, 10.0, 0.0));
        monitor.remove_node("node-1");
        assert!(monitor.node_perf_stats("node-1").is_none());
        assert_eq!(
            monitor.states().state("node-1"),
            AdmissionControllerState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (usage, monitor) = monitor(AdmissionControlMode::Enforced);
        usage.publish(NodeResourceUsageStats::new("local", 10.0, 10.0, IoUsageStats::new(1.0)));
        let monitor = Arc::new(monitor);
        let token = CancellationToken::new();

        let handle = tokio::spawn(monitor.clone().run(token.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(monitor.node_perf_stats("local").is_some());

        token.cancel();
        handle.await.unwrap();
    }
}
