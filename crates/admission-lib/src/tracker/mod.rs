//! Resource usage tracking
//!
//! Polls a raw counter source at a fixed interval and turns CPU, memory and
//! disk I/O readings into smoothed utilisation signals (rolling window + EWMA)
//! that are published as [`NodeResourceUsageStats`](crate::models::NodeResourceUsageStats).

mod ewma;
mod io;
mod r#loop;
mod procfs;
mod sampler;
mod window;


pub use ewma::{Ewma, DEFAULT_ALPHA};
pub use io::IoUsageCalculator;
pub use procfs::{CpuTimes, ProcfsProbe};
pub use r#loop::{ResourceTracker, ResourceTrackerBuilder, TickOutcome, TrackerSnapshots};
pub use sampler::{ResourceSampler, SamplerSnapshot};
pub use window::{RollingWindow, DEFAULT_WINDOW_SIZE};

use crate::models::IoStatsSnapshot;
use anyhow::Result;

pub use async_trait::async_trait;

/// Source of raw node resource counters
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Record baselines for delta based counters before the first poll
    async fn prime(&self) -> Result<()> {
        Ok(())
    }

    /// Node CPU utilisation in percent since the previous call
    async fn cpu_percent(&self) -> Result<f64>;

    /// Memory in use, in percent of the available total
    async fn memory_used_percent(&self) -> Result<f64>;

    /// Cumulative disk busy-time counters
    async fn io_stats(&self) -> Result<IoStatsSnapshot>;
}
