//! Node-local admission control
//!
//! This crate provides the core functionality for:
//! - Resource usage tracking (CPU, memory, disk I/O) from procfs
//! - CPU and I/O based admission controllers with an adaptive rejection ratio
//! - Per-node admission state with hysteresis, driven by perf stats
//! - Dynamic settings, health checks and observability

pub mod classify;
pub mod cluster;
pub mod controllers;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod interceptor;
pub mod limiter;
pub mod models;
pub mod monitor;
pub mod node;
pub mod observability;
pub mod perf_stats;
pub mod settings;
pub mod state;
pub mod stats;
pub mod tracker;
pub mod usage;

pub use classify::ActionClassifier;
pub use cluster::{ClusterInfo, StaticClusterInfo};
pub use dispatcher::AdmissionControlService;
pub use error::{AdmissionError, Rejection, SettingsError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use interceptor::{AdmissionControlLayer, AdmissionRequest};
pub use models::*;
pub use node::{NodeAdmissionControl, NodeAdmissionControlBuilder};
pub use observability::{AdmissionMetrics, StructuredLogger};
pub use perf_stats::NodePerfStats;
pub use settings::{AdmissionControlSettings, DynamicSettings};
pub use state::AdmissionControllerState;
pub use stats::{AdmissionControlStats, ControllerStats, EvaluationResponse};
pub use tracker::ProcfsProbe;
