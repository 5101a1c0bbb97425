//! Node admission control
//!
//! Composition root wiring settings, the resource tracker, the perf stats
//! monitor and the admission controllers for one node. Constructed once by the
//! host and shared through an `Arc`.

use crate::classify::ActionClassifier;
use crate::cluster::{ClusterInfo, StaticClusterInfo};
use crate::controllers::ControllerContext;
use crate::dispatcher::AdmissionControlService;
use crate::error::{AdmissionError, SettingsError};
use crate::health::{components, HealthRegistry};
use crate::models::ActionType;
use crate::monitor::PerfStatsMonitor;
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::perf_stats::NodePerfStats;
use crate::settings::{AdmissionControlSettings, DynamicSettings};
use crate::state::{AdmissionControllerState, NodeAdmissionStates};
use crate::stats::{AdmissionControlStats, EvaluationResponse};
use crate::tracker::{ResourceProbe, ResourceTracker, ResourceTrackerBuilder, TrackerSnapshots};
use crate::usage::ResourceUsageCollector;
use anyhow::Result;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct NodeAdmissionControl {
    node_id: String,
    settings: DynamicSettings,
    usage: Arc<ResourceUsageCollector>,
    service: Arc<AdmissionControlService>,
    monitor: Arc<PerfStatsMonitor>,
    classifier: ActionClassifier,
    health: HealthRegistry,
    metrics: AdmissionMetrics,
    logger: StructuredLogger,
    snapshots: TrackerSnapshots,
    tracker: Mutex<Option<ResourceTracker>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
}

impl NodeAdmissionControl {
    pub fn builder() -> NodeAdmissionControlBuilder {
        NodeAdmissionControlBuilder::new()
    }

    /// Spawn the resource tracker and the perf stats monitor.
    ///
    /// A node starts once; after [`stop`](Self::stop) it cannot be restarted.
    pub async fn start(&self) -> Result<()> {
        let tracker = self
            .tracker
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("Admission control already started"))?;

        self.health.register(components::RESOURCE_TRACKER).await;
        self.health.register(components::PERF_STATS_MONITOR).await;
        self.health.register(components::ADMISSION_CONTROLLERS).await;

        let tracker_handle = tokio::spawn(tracker.run(self.token.child_token()));
        let monitor_handle = tokio::spawn(self.monitor.clone().run(self.token.child_token()));
        self.tasks.lock().extend([tracker_handle, monitor_handle]);

        self.health.set_ready(true).await;
        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), self.settings.current().transport_mode);
        Ok(())
    }

    /// Cancel the background tasks and wait for them to finish
    pub async fn stop(&self) {
        self.health.set_ready(false).await;
        self.token.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Admission control task ended abnormally");
            }
        }
        info!(node_id = %self.node_id, "Admission control stopped");
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn service(&self) -> &Arc<AdmissionControlService> {
        &self.service
    }

    pub fn monitor(&self) -> &Arc<PerfStatsMonitor> {
        &self.monitor
    }

    pub fn usage(&self) -> &Arc<ResourceUsageCollector> {
        &self.usage
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn classifier(&self) -> &ActionClassifier {
        &self.classifier
    }

    pub fn settings(&self) -> Arc<AdmissionControlSettings> {
        self.settings.current()
    }

    /// Apply dynamic setting changes; nothing changes if any key is rejected
    pub fn update_settings(&self, changes: &Map<String, Value>) -> Result<Vec<String>, SettingsError> {
        let updated = self.settings.update(changes)?;
        self.metrics.inc_settings_updates();
        self.logger.log_settings_updated(&updated);
        Ok(updated)
    }

    /// Fold a perf record received from another node
    pub fn record_node_perf_stats(
        &self,
        node_id: &str,
        stats: NodePerfStats,
    ) -> Option<AdmissionControllerState> {
        self.monitor.record_node_perf_stats(node_id, stats)
    }

    /// Run an action through the controllers.
    ///
    /// Without an explicit type the action name is classified; unclassified
    /// actions are admitted. Rejections are reported in the response,
    /// configuration errors are returned.
    pub fn evaluate(
        &self,
        action: &str,
        action_type: Option<ActionType>,
    ) -> Result<EvaluationResponse, AdmissionError> {
        let Some(action_type) = action_type.or_else(|| self.classifier.classify_action(action)) else {
            debug!(action = %action, "Action not subject to admission control");
            return Ok(EvaluationResponse {
                admitted: true,
                action_type: None,
                reason: None,
            });
        };

        match self.service.apply(action, action_type) {
            Ok(()) => Ok(EvaluationResponse {
                admitted: true,
                action_type: Some(action_type.to_string()),
                reason: None,
            }),
            Err(err @ AdmissionError::Rejected(_)) => Ok(EvaluationResponse {
                admitted: false,
                action_type: Some(action_type.to_string()),
                reason: Some(err.to_string()),
            }),
            Err(err) => Err(err),
        }
    }

    pub fn stats(&self) -> AdmissionControlStats {
        AdmissionControlStats {
            node_id: self.node_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            transport_mode: self.settings.current().transport_mode,
            controllers: self.service.rejection_stats(),
            resources: self.snapshots.get(),
            node_states: self.monitor.states().snapshot(),
            node_perf_stats: self.monitor.all_node_perf_stats(),
        }
    }
}

/// Builder for [`NodeAdmissionControl`]
pub struct NodeAdmissionControlBuilder {
    node_id: Option<String>,
    probe: Option<Arc<dyn ResourceProbe>>,
    cluster: Option<Arc<dyn ClusterInfo>>,
    settings: AdmissionControlSettings,
    classifier: ActionClassifier,
}

impl NodeAdmissionControlBuilder {
    pub fn new() -> Self {
        Self {
            node_id: None,
            probe: None,
            cluster: None,
            settings: AdmissionControlSettings::default(),
            classifier: ActionClassifier::default(),
        }
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Cluster view; defaults to a node that is ready immediately
    pub fn cluster(mut self, cluster: Arc<dyn ClusterInfo>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn settings(mut self, settings: AdmissionControlSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn classifier(mut self, classifier: ActionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn build(self) -> Result<NodeAdmissionControl> {
        let probe = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("Probe is required"))?;
        let cluster = match (self.cluster, self.node_id) {
            (Some(cluster), _) => cluster,
            (None, Some(node_id)) => Arc::new(StaticClusterInfo::ready(node_id)) as Arc<dyn ClusterInfo>,
            (None, None) => anyhow::bail!("Node id or cluster info is required"),
        };
        let node_id = cluster.local_node_id().to_string();

        let tracker_settings = self.settings.tracker.clone();
        let settings = DynamicSettings::new(self.settings)?;
        let usage = Arc::new(ResourceUsageCollector::new(tracker_settings.max_stats_age()));
        let metrics = AdmissionMetrics::new();
        let logger = StructuredLogger::new(&node_id);
        let health = HealthRegistry::new();
        let token = CancellationToken::new();

        let ctx = ControllerContext {
            usage: usage.clone(),
            cluster,
            settings: settings.subscribe(),
            metrics: metrics.clone(),
            logger: logger.clone(),
        };
        let service = Arc::new(AdmissionControlService::new(ctx));

        let states = Arc::new(NodeAdmissionStates::new(
            settings.subscribe(),
            token.child_token(),
            metrics.clone(),
            logger.clone(),
        ));
        let monitor = Arc::new(PerfStatsMonitor::new(
            &node_id,
            states,
            usage.clone(),
            settings.subscribe(),
        ));

        let tracker = ResourceTrackerBuilder::new()
            .node_id(&node_id)
            .probe(probe)
            .collector(usage.clone())
            .settings(tracker_settings)
            .health(health.clone())
            .build()?;
        let snapshots = tracker.snapshots();

        Ok(NodeAdmissionControl {
            node_id,
            settings,
            usage,
            service,
            monitor,
            classifier: self.classifier,
            health,
            metrics,
            logger,
            snapshots,
            tracker: Mutex::new(Some(tracker)),
            tasks: Mutex::new(Vec::new()),
            token,
        })
    }
}

impl Default for NodeAdmissionControlBuilder {
    fn default() -> Self {
        Self::new()
    }
}
