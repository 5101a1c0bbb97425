//! Per-node admission state with hysteresis
//!
//! A node under heavy load goes OPEN and stays there for the open-status
//! refresh interval before a one-shot timer demotes it to HALF_OPEN. Any newer
//! transition bumps the node's generation, which turns pending timers into no-ops.

use crate::models::AdmissionControlMode;
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::settings::AdmissionControlSettings;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// CPU above this opens the node
pub const OPEN_CPU_THRESHOLD: f64 = 90.0;
/// Memory above this opens the node
pub const OPEN_MEMORY_THRESHOLD: f64 = 80.0;
pub const HALF_OPEN_CPU_THRESHOLD: f64 = 70.0;
pub const HALF_OPEN_MEMORY_THRESHOLD: f64 = 70.0;

/// Circuit-breaker style state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionControllerState {
    Open,
    HalfOpen,
    Closed,
    Monitor,
    Disabled,
}

impl AdmissionControllerState {
    /// Target state for a perf record
    pub fn from_usage(cpu_percent: f64, memory_percent: f64) -> Self {
        if cpu_percent > OPEN_CPU_THRESHOLD || memory_percent > OPEN_MEMORY_THRESHOLD {
            AdmissionControllerState::Open
        } else if cpu_percent > HALF_OPEN_CPU_THRESHOLD
            || memory_percent > HALF_OPEN_MEMORY_THRESHOLD
        {
            AdmissionControllerState::HalfOpen
        } else {
            AdmissionControllerState::Closed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionControllerState::Open => "open",
            AdmissionControllerState::HalfOpen => "half_open",
            AdmissionControllerState::Closed => "closed",
            AdmissionControllerState::Monitor => "monitor",
            AdmissionControllerState::Disabled => "disabled",
        }
    }

    /// Gauge encoding
    pub fn code(&self) -> i64 {
        match self {
            AdmissionControllerState::Closed => 0,
            AdmissionControllerState::HalfOpen => 1,
            AdmissionControllerState::Open => 2,
            AdmissionControllerState::Monitor => 3,
            AdmissionControllerState::Disabled => 4,
        }
    }
}

impl fmt::Display for AdmissionControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    state: AdmissionControllerState,
    generation: u64,
}

/// Admission state of every known node
pub struct NodeAdmissionStates {
    states: Arc<DashMap<String, NodeState>>,
    /// Shared across nodes so a removed and re-added node never reuses a generation
    generations: Arc<AtomicU64>,
    settings: watch::Receiver<Arc<AdmissionControlSettings>>,
    open_status_refresh_interval: Duration,
    token: CancellationToken,
    metrics: AdmissionMetrics,
    logger: StructuredLogger,
}

impl NodeAdmissionStates {
    pub fn new(
        settings: watch::Receiver<Arc<AdmissionControlSettings>>,
        token: CancellationToken,
        metrics: AdmissionMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let open_status_refresh_interval = settings.borrow().monitor.open_status_refresh_interval();
        Self {
            states: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            settings,
            open_status_refresh_interval,
            token,
            metrics,
            logger,
        }
    }

    fn global_mode(&self) -> AdmissionControlMode {
        self.settings.borrow().transport_mode
    }

    /// Apply the thresholds to a node's latest perf record
    pub fn apply_usage(
        &self,
        node_id: &str,
        cpu_percent: f64,
        memory_percent: f64,
    ) -> AdmissionControllerState {
        let target = AdmissionControllerState::from_usage(cpu_percent, memory_percent);
        match target {
            AdmissionControllerState::Open => {
                let generation = self.set_state(node_id, target);
                self.schedule_demotion(node_id.to_string(), generation);
            }
            AdmissionControllerState::Closed
                if self.raw_state(node_id) == Some(AdmissionControllerState::Closed) => {}
            _ => {
                self.set_state(node_id, target);
            }
        }
        target
    }

    fn set_state(&self, node_id: &str, target: AdmissionControllerState) -> u64 {
        let generation = self.next_generation();
        let previous = match self.states.entry(node_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let node = entry.get_mut();
                let previous = node.state;
                node.state = target;
                node.generation = generation;
                Some(previous)
            }
            Entry::Vacant(entry) => {
                entry.insert(NodeState {
                    state: target,
                    generation,
                });
                None
            }
        };

        if previous != Some(target) {
            self.metrics.set_node_state(node_id, target);
            let from = previous.unwrap_or(AdmissionControllerState::Closed);
            if from != target {
                self.logger.log_state_transition(node_id, from, target);
            }
        }
        generation
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn schedule_demotion(&self, node_id: String, generation: u64) {
        let states = self.states.clone();
        let generations = self.generations.clone();
        let delay = self.open_status_refresh_interval;
        let token = self.token.child_token();
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }

            let demoted = match states.get_mut(&node_id) {
                Some(mut node)
                    if node.generation == generation
                        && node.state == AdmissionControllerState::Open =>
                {
                    node.state = AdmissionControllerState::HalfOpen;
                    node.generation = generations.fetch_add(1, Ordering::Relaxed) + 1;
                    true
                }
                _ => false,
            };

            if demoted {
                logger.log_state_transition(
                    &node_id,
                    AdmissionControllerState::Open,
                    AdmissionControllerState::HalfOpen,
                );
                metrics.set_node_state(&node_id, AdmissionControllerState::HalfOpen);
            } else {
                debug!(node_id = %node_id, generation, "Open state demotion superseded");
            }
        });
    }

    /// State recorded by the monitor, ignoring the global mode
    pub fn raw_state(&self, node_id: &str) -> Option<AdmissionControllerState> {
        self.states.get(node_id).map(|n| n.state)
    }

    /// State as reported to callers; unknown nodes are CLOSED
    pub fn state(&self, node_id: &str) -> AdmissionControllerState {
        match self.global_mode() {
            AdmissionControlMode::Disabled => AdmissionControllerState::Disabled,
            AdmissionControlMode::Monitor => AdmissionControllerState::Monitor,
            AdmissionControlMode::Enforced => self
                .raw_state(node_id)
                .unwrap_or(AdmissionControllerState::Closed),
        }
    }

    /// Whether requests towards the node should be throttled
    pub fn evaluate_to_enforce(&self, node_id: &str) -> bool {
        self.state(node_id) == AdmissionControllerState::Open
    }

    /// Effective state of every known node
    pub fn snapshot(&self) -> BTreeMap<String, AdmissionControllerState> {
        let mode = self.global_mode();
        self.states
            .iter()
            .map(|e| {
                let state = match mode {
                    AdmissionControlMode::Disabled => AdmissionControllerState::Disabled,
                    AdmissionControlMode::Monitor => AdmissionControllerState::Monitor,
                    AdmissionControlMode::Enforced => e.value().state,
                };
                (e.key().clone(), state)
            })
            .collect()
    }

    pub fn remove(&self, node_id: &str) {
        self.states.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DynamicSettings;

    fn states_with_mode(mode: AdmissionControlMode) -> (DynamicSettings, NodeAdmissionStates) {
        let settings = DynamicSettings::new(AdmissionControlSettings {
            transport_mode: mode,
            ..Default::default()
        })
        .unwrap();
        let states = NodeAdmissionStates::new(
            settings.subscribe(),
            CancellationToken::new(),
            AdmissionMetrics::new(),
            StructuredLogger::new("local"),
        );
        (settings, states)
    }

    #[test]
    fn test_thresholds() {
        use AdmissionControllerState::*;
        assert_eq!(AdmissionControllerState::from_usage(95.0, 10.0), Open);
        assert_eq!(AdmissionControllerState::from_usage(10.0, 81.0), Open);
        assert_eq!(AdmissionControllerState::from_usage(90.0, 10.0), HalfOpen);
        assert_eq!(AdmissionControllerState::from_usage(10.0, 75.0), HalfOpen);
        assert_eq!(AdmissionControllerState::from_usage(70.0, 70.0), Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_demotes_then_closes() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);

        states.apply_usage("node-1", 95.0, 10.0);
        assert_eq!(states.state("node-1"), AdmissionControllerState::Open);
        assert!(states.evaluate_to_enforce("node-1"));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(states.state("node-1"), AdmissionControllerState::HalfOpen);
        assert!(!states.evaluate_to_enforce("node-1"));

        states.apply_usage("node-1", 50.0, 10.0);
        assert_eq!(states.state("node-1"), AdmissionControllerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_open_supersedes_pending_demotion() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);

        states.apply_usage("node-1", 95.0, 10.0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        states.apply_usage("node-1", 96.0, 10.0);

        // First timer fires at 30s and must not demote
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(states.state("node-1"), AdmissionControllerState::Open);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(states.state("node-1"), AdmissionControllerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_record_after_open_cancels_demotion_effect() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);

        states.apply_usage("node-1", 95.0, 10.0);
        states.apply_usage("node-1", 20.0, 10.0);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(states.state("node-1"), AdmissionControllerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readded_node_ignores_timer_of_removed_entry() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);

        states.apply_usage("node-1", 95.0, 10.0);
        tokio::time::sleep(Duration::from_secs(20)).await;
        states.remove("node-1");
        states.apply_usage("node-1", 95.0, 10.0);

        // Timer of the removed entry fires at 30s
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(states.state("node-1"), AdmissionControllerState::Open);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(states.state("node-1"), AdmissionControllerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_unknown_node_is_closed() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);
        assert_eq!(states.state("nope"), AdmissionControllerState::Closed);
        assert!(!states.evaluate_to_enforce("nope"));
    }

    #[tokio::test]
    async fn test_global_mode_masks_state() {
        let (settings, states) = states_with_mode(AdmissionControlMode::Monitor);
        states.apply_usage("node-1", 95.0, 10.0);

        assert_eq!(states.state("node-1"), AdmissionControllerState::Monitor);
        assert!(!states.evaluate_to_enforce("node-1"));
        assert_eq!(
            states.raw_state("node-1"),
            Some(AdmissionControllerState::Open)
        );

        let mut update = serde_json::Map::new();
        update.insert(
            crate::settings::keys::TRANSPORT_MODE.to_string(),
            serde_json::json!("disabled"),
        );
        settings.update(&update).unwrap();
        assert_eq!(states.state("node-1"), AdmissionControllerState::Disabled);

        let mut update = serde_json::Map::new();
        update.insert(
            crate::settings::keys::TRANSPORT_MODE.to_string(),
            serde_json::json!("enforced"),
        );
        settings.update(&update).unwrap();
        assert!(states.evaluate_to_enforce("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_stops_demotion() {
        let settings = DynamicSettings::new(AdmissionControlSettings {
            transport_mode: AdmissionControlMode::Enforced,
            ..Default::default()
        })
        .unwrap();
        let token = CancellationToken::new();
        let states = NodeAdmissionStates::new(
            settings.subscribe(),
            token.clone(),
            AdmissionMetrics::new(),
            StructuredLogger::new("local"),
        );

        states.apply_usage("node-1", 95.0, 10.0);
        token.cancel();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(states.state("node-1"), AdmissionControllerState::Open);
    }

    #[tokio::test]
    async fn test_snapshot_reports_effective_states() {
        let (_settings, states) = states_with_mode(AdmissionControlMode::Enforced);
        states.apply_usage("node-1", 75.0, 10.0);
        states.apply_usage("node-2", 10.0, 10.0);

        let snapshot = states.snapshot();
        assert_eq!(snapshot["node-1"], AdmissionControllerState::HalfOpen);
        assert_eq!(snapshot["node-2"], AdmissionControllerState::Closed);
    }
}
