//! Observability infrastructure for admission control
//!
//! Provides:
//! - Prometheus metrics (decisions, rejections, latency, resource signals, node states)
//! - Structured JSON logging of admission events with tracing

use crate::error::Rejection;
use crate::models::{AdmissionControlMode, ResourceKind};
use crate::state::AdmissionControllerState;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge_vec, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for the admission check (in seconds); the check is sub-millisecond
const EVALUATION_BUCKETS: &[f64] = &[
    0.000_001, 0.000_005, 0.000_01, 0.000_025, 0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001,
    0.005, 0.01,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdmissionMetricsInner> = OnceLock::new();

struct AdmissionMetricsInner {
    rejections: IntCounterVec,
    evaluations: IntCounterVec,
    evaluation_latency_seconds: Histogram,
    resource_usage_percent: GaugeVec,
    sampler_errors: IntCounterVec,
    io_rejection_ratio: Gauge,
    node_state: IntGaugeVec,
    state_transitions: IntCounterVec,
    settings_updates: IntCounter,
}

impl AdmissionMetricsInner {
    fn new() -> Self {
        Self {
            rejections: register_int_counter_vec!(
                "admission_control_rejections_total",
                "Requests that breached an admission controller limit",
                &["controller", "action_type", "mode"]
            )
            .expect("Failed to register rejections"),

            evaluations: register_int_counter_vec!(
                "admission_control_evaluations_total",
                "Admission decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register evaluations"),

            evaluation_latency_seconds: register_histogram!(
                "admission_control_evaluation_latency_seconds",
                "Time spent evaluating all admission controllers for a request",
                EVALUATION_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            resource_usage_percent: register_gauge_vec!(
                "admission_control_resource_usage_percent",
                "Local node resource utilisation",
                &["resource", "signal"]
            )
            .expect("Failed to register resource_usage_percent"),

            sampler_errors: register_int_counter_vec!(
                "admission_control_sampler_errors_total",
                "Failed reads of the raw resource source",
                &["resource"]
            )
            .expect("Failed to register sampler_errors"),

            io_rejection_ratio: register_gauge!(
                "admission_control_io_rejection_ratio",
                "Current effective rejection ratio of the I/O based controller"
            )
            .expect("Failed to register io_rejection_ratio"),

            node_state: register_int_gauge_vec!(
                "admission_control_node_state",
                "Admission state per node (0 closed, 1 half_open, 2 open, 3 monitor, 4 disabled)",
                &["node"]
            )
            .expect("Failed to register node_state"),

            state_transitions: register_int_counter_vec!(
                "admission_control_state_transitions_total",
                "Node admission state transitions by target state",
                &["state"]
            )
            .expect("Failed to register state_transitions"),

            settings_updates: register_int_counter!(
                "admission_control_settings_updates_total",
                "Accepted dynamic settings updates"
            )
            .expect("Failed to register settings_updates"),
        }
    }
}

/// Admission control metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same metrics.
#[derive(Clone)]
pub struct AdmissionMetrics {
    _private: (),
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdmissionMetricsInner {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new)
    }

    pub fn inc_rejection(&self, controller: &str, action_type: &str, mode: AdmissionControlMode) {
        self.inner()
            .rejections
            .with_label_values(&[controller, action_type, mode.as_str()])
            .inc();
    }

    pub fn inc_admitted(&self) {
        self.inner().evaluations.with_label_values(&["admitted"]).inc();
    }

    pub fn inc_rejected(&self) {
        self.inner().evaluations.with_label_values(&["rejected"]).inc();
    }

    pub fn inc_evaluation_error(&self) {
        self.inner().evaluations.with_label_values(&["error"]).inc();
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    /// `signal` is one of `current`, `window`, `ewma`
    pub fn set_resource_usage(&self, resource: ResourceKind, signal: &str, percent: f64) {
        self.inner()
            .resource_usage_percent
            .with_label_values(&[resource.as_str(), signal])
            .set(percent);
    }

    pub fn inc_sampler_error(&self, resource: ResourceKind) {
        self.inner()
            .sampler_errors
            .with_label_values(&[resource.as_str()])
            .inc();
    }

    pub fn set_io_rejection_ratio(&self, ratio: f64) {
        self.inner().io_rejection_ratio.set(ratio);
    }

    pub fn set_node_state(&self, node_id: &str, state: AdmissionControllerState) {
        self.inner()
            .node_state
            .with_label_values(&[node_id])
            .set(state.code());
        self.inner()
            .state_transitions
            .with_label_values(&[state.as_str()])
            .inc();
    }

    pub fn inc_settings_updates(&self) {
        self.inner().settings_updates.inc();
    }
}

/// Structured logger for admission control events
#[derive(Clone)]
pub struct StructuredLogger {
    node_id: String,
}

impl StructuredLogger {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    /// Log a request breaching a controller limit
    pub fn log_rejection(&self, rejection: &Rejection, mode: AdmissionControlMode) {
        warn!(
            event = "admission_limit_reached",
            node = %self.node_id,
            controller = rejection.controller,
            action = %rejection.action,
            action_type = %rejection.action_type,
            resource = %rejection.resource,
            usage_percent = rejection.usage_percent,
            limit_percent = rejection.limit_percent,
            mode = %mode,
            "Admission controller limit reached"
        );
    }

    pub fn log_state_transition(
        &self,
        node: &str,
        from: AdmissionControllerState,
        to: AdmissionControllerState,
    ) {
        if to == AdmissionControllerState::Open {
            warn!(
                event = "admission_state_changed",
                node = %self.node_id,
                target_node = %node,
                from = %from,
                to = %to,
                "Node admission state opened"
            );
        } else {
            info!(
                event = "admission_state_changed",
                node = %self.node_id,
                target_node = %node,
                from = %from,
                to = %to,
                "Node admission state changed"
            );
        }
    }

    pub fn log_ratio_tuned(&self, previous: f64, current: f64, io_usage: f64) {
        info!(
            event = "rejection_ratio_tuned",
            node = %self.node_id,
            previous_ratio = previous,
            ratio = current,
            io_usage_percent = io_usage,
            "I/O rejection ratio adapted"
        );
    }

    pub fn log_settings_updated(&self, keys: &[String]) {
        info!(
            event = "settings_updated",
            node = %self.node_id,
            keys = ?keys,
            "Admission control settings updated"
        );
    }

    pub fn log_startup(&self, version: &str, mode: AdmissionControlMode) {
        info!(
            event = "admission_control_started",
            node = %self.node_id,
            version = %version,
            mode = %mode,
            "Admission control started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "admission_control_shutdown",
            node = %self.node_id,
            reason = %reason,
            "Admission control shutting down"
        );
    }
}
