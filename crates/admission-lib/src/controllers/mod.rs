//! Admission controllers
//!
//! Each controller checks one resource of the local node against per action
//! type ceilings. Controllers read the published usage snapshot and the
//! current settings on every call and never block.

mod cpu;
mod io;

pub use cpu::{CpuBasedAdmissionController, CPU_CONTROLLER_NAME};
pub use io::{IoBasedAdmissionController, IO_CONTROLLER_NAME};

use crate::cluster::ClusterInfo;
use crate::error::{AdmissionError, Rejection};
use crate::models::{ActionType, AdmissionControlMode, NodeResourceUsageStats};
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::settings::AdmissionControlSettings;
use crate::stats::ControllerStats;
use crate::usage::ResourceUsageCollector;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Contract shared by every admission controller
pub trait AdmissionController: Send + Sync {
    fn name(&self) -> &'static str;

    /// Effective mode, after applying any per-controller override
    fn mode(&self) -> AdmissionControlMode;

    fn is_enabled_for_transport_layer(&self) -> bool {
        self.mode() != AdmissionControlMode::Disabled
    }

    /// Check a request. Errors only for enforced rejections and wiring mistakes.
    fn apply(&self, action: &str, action_type: ActionType) -> Result<(), AdmissionError>;

    fn add_rejection_count(&self, action_type: ActionType, count: u64);

    fn rejection_count(&self, action_type: ActionType) -> u64;

    fn rejection_stats(&self) -> ControllerStats;
}

/// Monotonic rejection counts per action type
#[derive(Debug, Default)]
pub struct RejectionCounters {
    counts: [AtomicU64; 3],
}

impl RejectionCounters {
    pub fn add(&self, action_type: ActionType, count: u64) {
        self.counts[action_type.index()].fetch_add(count, Ordering::Relaxed);
    }

    pub fn get(&self, action_type: ActionType) -> u64 {
        self.counts[action_type.index()].load(Ordering::Relaxed)
    }

    /// Action types with at least one rejection
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        ActionType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), self.get(*t)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Everything a controller reads on the request path
#[derive(Clone)]
pub struct ControllerContext {
    pub usage: Arc<ResourceUsageCollector>,
    pub cluster: Arc<dyn ClusterInfo>,
    pub settings: watch::Receiver<Arc<AdmissionControlSettings>>,
    pub metrics: AdmissionMetrics,
    pub logger: StructuredLogger,
}

impl ControllerContext {
    pub fn settings(&self) -> Arc<AdmissionControlSettings> {
        self.settings.borrow().clone()
    }

    /// Fresh local usage; `None` (admit) until the node joined a cluster and
    /// the tracker published recently
    pub fn local_usage(&self) -> Option<NodeResourceUsageStats> {
        if !self.cluster.is_cluster_state_ready() {
            debug!("Cluster state not ready, admitting");
            return None;
        }
        let node_id = self.cluster.local_node_id();
        let stats = self.usage.node_statistics(node_id);
        if stats.is_none() {
            debug!(node_id = %node_id, "No resource usage stats available, admitting");
        }
        stats
    }

    /// Count a breach and reject it when enforced
    pub(crate) fn breach(
        &self,
        counters: &RejectionCounters,
        mode: AdmissionControlMode,
        rejection: Rejection,
    ) -> Result<(), AdmissionError> {
        counters.add(rejection.action_type, 1);
        self.metrics
            .inc_rejection(rejection.controller, rejection.action_type.as_str(), mode);
        self.logger.log_rejection(&rejection, mode);

        match mode {
            AdmissionControlMode::Enforced => Err(AdmissionError::Rejected(rejection)),
            _ => Ok(()),
        }
    }
}

/// Controllers known to the dispatcher
pub enum RegisteredController {
    Cpu(CpuBasedAdmissionController),
    Io(IoBasedAdmissionController),
}

impl RegisteredController {
    fn inner(&self) -> &dyn AdmissionController {
        match self {
            RegisteredController::Cpu(c) => c,
            RegisteredController::Io(c) => c,
        }
    }
}

impl AdmissionController for RegisteredController {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn mode(&self) -> AdmissionControlMode {
        self.inner().mode()
    }

    fn is_enabled_for_transport_layer(&self) -> bool {
        self.inner().is_enabled_for_transport_layer()
    }

    fn apply(&self, action: &str, action_type: ActionType) -> Result<(), AdmissionError> {
        self.inner().apply(action, action_type)
    }

    fn add_rejection_count(&self, action_type: ActionType, count: u64) {
        self.inner().add_rejection_count(action_type, count)
    }

    fn rejection_count(&self, action_type: ActionType) -> u64 {
        self.inner().rejection_count(action_type)
    }

    fn rejection_stats(&self) -> ControllerStats {
        self.inner().rejection_stats()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cluster::StaticClusterInfo;
    use crate::models::IoUsageStats;
    use crate::settings::DynamicSettings;

    pub(crate) struct Fixture {
        pub settings: DynamicSettings,
        pub usage: Arc<ResourceUsageCollector>,
        pub cluster: Arc<StaticClusterInfo>,
        pub ctx: ControllerContext,
    }

    impl Fixture {
        pub fn new(settings: AdmissionControlSettings) -> Self {
            let settings = DynamicSettings::new(settings).unwrap();
            let usage = Arc::new(ResourceUsageCollector::default());
            let cluster = Arc::new(StaticClusterInfo::ready("local"));
            let ctx = ControllerContext {
                usage: usage.clone(),
                cluster: cluster.clone(),
                settings: settings.subscribe(),
                metrics: AdmissionMetrics::new(),
                logger: StructuredLogger::new("local"),
            };
            Self {
                settings,
                usage,
                cluster,
                ctx,
            }
        }

        pub fn publish(&self, cpu: f64, io: f64) {
            self.usage.publish(NodeResourceUsageStats::new(
                "local",
                cpu,
                10.0,
                IoUsageStats::new(io),
            ));
        }

        pub fn update(&self, key: &str, value: serde_json::Value) {
            let mut changes = serde_json::Map::new();
            changes.insert(key.to_string(), value);
            self.settings.update(&changes).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_counters() {
        let counters = RejectionCounters::default();
        counters.add(ActionType::Search, 2);
        counters.add(ActionType::Indexing, 1);
        counters.add(ActionType::Search, 1);

        assert_eq!(counters.get(ActionType::Search), 3);
        assert_eq!(counters.get(ActionType::ClusterAdmin), 0);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["search"], 3);
        assert_eq!(snapshot["indexing"], 1);
    }

    #[test]
    fn test_rejection_counters_under_contention() {
        let counters = RejectionCounters::default();

        std::thread::scope(|s| {
            for i in 0..8 {
                let counters = &counters;
                let action_type = if i % 2 == 0 {
                    ActionType::Search
                } else {
                    ActionType::Indexing
                };
                s.spawn(move || {
                    for _ in 0..10_000 {
                        counters.add(action_type, 1);
                    }
                });
            }
        });

        assert_eq!(counters.get(ActionType::Search), 40_000);
        assert_eq!(counters.get(ActionType::Indexing), 40_000);
    }

    #[test]
    fn test_cpu_controller_counts_every_concurrent_rejection() {
        let mut settings = AdmissionControlSettings {
            transport_mode: AdmissionControlMode::Monitor,
            ..Default::default()
        };
        settings.cpu.search_limit = 80.0;
        let fixture = test_support::Fixture::new(settings);
        fixture.publish(85.0, 0.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        assert!(controller
                            .apply("indices:data/read/search", ActionType::Search)
                            .is_ok());
                    }
                });
            }
        });

        assert_eq!(controller.rejection_count(ActionType::Search), 4_000);
    }
}
