//! Per-resource smoothing of polled utilisation values

use super::{Ewma, RollingWindow};
use crate::models::ResourceKind;
use serde::{Deserialize, Serialize};

/// Published view of a sampler, cheap to copy to readers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerSnapshot {
    pub kind: ResourceKind,
    /// Latest instantaneous value
    pub usage: f64,
    /// Mean over the rolling window
    pub window_average: f64,
    /// Exponentially weighted average
    pub ewma: f64,
    /// Whether the window has filled at least once
    pub ready: bool,
    pub samples: u64,
}

/// Folds polled values for one resource kind into a rolling window and an EWMA.
///
/// Owned by the sampler task (the single writer); readers consume [`SamplerSnapshot`]s.
#[derive(Debug, Clone)]
pub struct ResourceSampler {
    kind: ResourceKind,
    window: RollingWindow<f64>,
    ewma: Ewma,
    usage: f64,
    samples: u64,
}

impl ResourceSampler {
    pub fn new(kind: ResourceKind, window_size: usize, alpha: f64) -> Self {
        Self {
            kind,
            window: RollingWindow::new(window_size),
            ewma: Ewma::new(alpha, 0.0),
            usage: 0.0,
            samples: 0,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Record one polled value (percent)
    pub fn record(&mut self, usage: f64) {
        let usage = if usage.is_finite() {
            usage.clamp(0.0, 100.0)
        } else {
            return;
        };
        self.usage = usage;
        self.window.push(usage);
        self.ewma.add_value(usage);
        self.samples += 1;
    }

    /// Latest instantaneous value
    pub fn usage(&self) -> f64 {
        self.usage
    }

    /// Smoothed (EWMA) value
    pub fn average(&self) -> f64 {
        self.ewma.average()
    }

    pub fn window_average(&self) -> f64 {
        self.window.average()
    }

    pub fn is_ready(&self) -> bool {
        self.window.is_full()
    }

    pub fn snapshot(&self) -> SamplerSnapshot {
        SamplerSnapshot {
            kind: self.kind,
            usage: self.usage,
            window_average: self.window_average(),
            ewma: self.average(),
            ready: self.is_ready(),
            samples: self.samples,
        }
    }
}
