//! Resource tracking loop
//!
//! Polls the probe at a fixed delay, folds readings into per-resource samplers
//! and publishes the resulting [`NodeResourceUsageStats`] for the local node.

use super::{IoUsageCalculator, ResourceProbe, ResourceSampler, SamplerSnapshot};
use crate::health::{components, HealthRegistry};
use crate::models::{IoUsageStats, NodeResourceUsageStats, ResourceKind};
use crate::observability::AdmissionMetrics;
use crate::settings::TrackerSettings;
use crate::usage::ResourceUsageCollector;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one polling tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every signal was read
    Published,
    /// Stats were published, the listed signals kept their previous values
    Degraded { failed: Vec<ResourceKind> },
    /// Nothing could be read; nothing was published
    Failed,
}

/// Latest sampler snapshots, readable while the tracker runs
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshots {
    inner: Arc<RwLock<Vec<SamplerSnapshot>>>,
}

impl TrackerSnapshots {
    pub fn get(&self) -> Vec<SamplerSnapshot> {
        self.inner.read().clone()
    }

    fn set(&self, snapshots: Vec<SamplerSnapshot>) {
        *self.inner.write() = snapshots;
    }
}

/// Polls node resources and publishes smoothed usage for the local node
pub struct ResourceTracker {
    node_id: String,
    probe: Arc<dyn ResourceProbe>,
    collector: Arc<ResourceUsageCollector>,
    interval: Duration,
    cpu: ResourceSampler,
    memory: ResourceSampler,
    io: ResourceSampler,
    io_calculator: IoUsageCalculator,
    snapshots: TrackerSnapshots,
    metrics: AdmissionMetrics,
    health: Option<HealthRegistry>,
}

impl ResourceTracker {
    pub fn snapshots(&self) -> TrackerSnapshots {
        self.snapshots.clone()
    }

    /// Run until cancelled
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            node_id = %self.node_id,
            interval_ms = self.interval.as_millis() as u64,
            "Starting resource tracker"
        );

        if let Err(e) = self.probe.prime().await {
            debug!(error = %e, "Failed to prime resource probe");
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let outcome = self.poll_once().await;
                    ticks += 1;

                    if ticks % 60 == 0 {
                        debug!(
                            ticks,
                            elapsed_us = start.elapsed().as_micros() as u64,
                            outcome = ?outcome,
                            "Resource tracking tick"
                        );
                    }

                    self.report_health(&outcome).await;
                }
                _ = token.cancelled() => {
                    info!("Shutting down resource tracker");
                    break;
                }
            }
        }
    }

    /// Read every signal once and publish the result
    pub async fn poll_once(&mut self) -> TickOutcome {
        let mut failed = Vec::new();

        match self.probe.cpu_percent().await {
            Ok(cpu) => self.cpu.record(cpu),
            Err(e) => self.probe_failed(ResourceKind::Cpu, &e, &mut failed),
        }

        match self.probe.memory_used_percent().await {
            Ok(memory) => self.memory.record(memory),
            Err(e) => self.probe_failed(ResourceKind::Memory, &e, &mut failed),
        }

        match self.probe.io_stats().await {
            Ok(snapshot) => {
                // No value on the baseline tick and when no time has passed
                if let Some(io) = self.io_calculator.observe(&snapshot) {
                    self.io.record(io);
                }
            }
            Err(e) => self.probe_failed(ResourceKind::Io, &e, &mut failed),
        }

        if failed.len() == 3 {
            return TickOutcome::Failed;
        }

        self.collector.publish(self.current_stats());
        self.publish_snapshots();

        if failed.is_empty() {
            TickOutcome::Published
        } else {
            TickOutcome::Degraded { failed }
        }
    }

    /// Usage as seen by the controllers: window averages, I/O only once its window filled
    pub fn current_stats(&self) -> NodeResourceUsageStats {
        let io = if self.io.is_ready() {
            IoUsageStats {
                io_utilization_percent: self.io.window_average(),
                ewma_io_utilization_percent: self.io.average(),
            }
        } else {
            IoUsageStats::new(-1.0)
        };

        NodeResourceUsageStats::new(
            &self.node_id,
            self.cpu.window_average(),
            self.memory.window_average(),
            io,
        )
        .with_ewma(self.cpu.average(), self.memory.average())
    }

    fn publish_snapshots(&self) {
        let snapshots = vec![
            self.cpu.snapshot(),
            self.memory.snapshot(),
            self.io.snapshot(),
        ];
        for s in &snapshots {
            self.metrics.set_resource_usage(s.kind, "current", s.usage);
            self.metrics.set_resource_usage(s.kind, "window", s.window_average);
            self.metrics.set_resource_usage(s.kind, "ewma", s.ewma);
        }
        self.snapshots.set(snapshots);
    }

    fn probe_failed(&self, kind: ResourceKind, err: &anyhow::Error, failed: &mut Vec<ResourceKind>) {
        warn!(resource = %kind, error = %err, "Failed to read resource usage");
        self.metrics.inc_sampler_error(kind);
        failed.push(kind);
    }

    async fn report_health(&self, outcome: &TickOutcome) {
        let Some(health) = &self.health else {
            return;
        };
        match outcome {
            TickOutcome::Published => health.set_healthy(components::RESOURCE_TRACKER).await,
            TickOutcome::Degraded { failed } => {
                let names: Vec<&str> = failed.iter().map(|k| k.as_str()).collect();
                health
                    .set_degraded(
                        components::RESOURCE_TRACKER,
                        format!("Failed to read: {}", names.join(", ")),
                    )
                    .await
            }
            TickOutcome::Failed => {
                health
                    .set_unhealthy(components::RESOURCE_TRACKER, "All resource probes failing")
                    .await
            }
        }
    }
}

/// Builder for the resource tracker
pub struct ResourceTrackerBuilder {
    node_id: Option<String>,
    probe: Option<Arc<dyn ResourceProbe>>,
    collector: Option<Arc<ResourceUsageCollector>>,
    settings: TrackerSettings,
    health: Option<HealthRegistry>,
}

impl ResourceTrackerBuilder {
    pub fn new() -> Self {
        Self {
            node_id: None,
            probe: None,
            collector: None,
            settings: TrackerSettings::default(),
            health: None,
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

    pub fn collector(mut self, collector: Arc<ResourceUsageCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Polling interval, window size and EWMA alpha
    pub fn settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.settings.polling_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn window_size(mut self, window_size: usize) -> Self {
        self.settings.window_size = window_size;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<ResourceTracker> {
        let node_id = self
            .node_id
            .ok_or_else(|| anyhow::anyhow!("Node id is required"))?;
        let probe = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("Probe is required"))?;
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        if self.settings.polling_interval_ms == 0 {
            anyhow::bail!("Polling interval must be positive");
        }

        let sampler = |kind| {
            ResourceSampler::new(kind, self.settings.window_size, self.settings.ewma_alpha)
        };

        Ok(ResourceTracker {
            node_id,
            probe,
            collector,
            interval: self.settings.polling_interval(),
            cpu: sampler(ResourceKind::Cpu),
            memory: sampler(ResourceKind::Memory),
            io: sampler(ResourceKind::Io),
            io_calculator: IoUsageCalculator::new(),
            snapshots: TrackerSnapshots::default(),
            metrics: AdmissionMetrics::new(),
            health: self.health,
        })
    }
}

impl Default for ResourceTrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
