//! Disk I/O utilisation from cumulative busy-time counters

use crate::models::IoStatsSnapshot;
use tracing::debug;

/// Converts successive [`IoStatsSnapshot`]s into a utilisation percentage.
///
/// Utilisation is the average busy time per device over the wall time since
/// the previous snapshot.
#[derive(Debug, Default)]
pub struct IoUsageCalculator {
    prev_io_time_millis: Option<u64>,
    prev_timestamp_millis: Option<u64>,
}

impl IoUsageCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a snapshot into the calculator.
    ///
    /// Returns `Some(0.0)` on the first snapshot (baseline only), `None` when the
    /// tick must be skipped, and the utilisation percentage otherwise.
    pub fn observe(&mut self, snapshot: &IoStatsSnapshot) -> Option<f64> {
        let device_count = snapshot.devices.len() as u64;
        if device_count == 0 {
            debug!("No block devices reported, skipping I/O sample");
            return None;
        }

        let (prev_io, prev_ts) = match (self.prev_io_time_millis, self.prev_timestamp_millis) {
            (Some(io), Some(ts)) => (io, ts),
            _ => {
                self.record_baseline(snapshot);
                return Some(0.0);
            }
        };

        if snapshot.timestamp_millis <= prev_ts {
            return None;
        }

        if snapshot.total_io_time_millis < prev_io {
            debug!(
                previous = prev_io,
                current = snapshot.total_io_time_millis,
                "I/O time counter went backwards, re-baselining"
            );
            self.record_baseline(snapshot);
            return None;
        }

        let elapsed_millis = (snapshot.timestamp_millis - prev_ts) as f64;
        let busy_per_device = (snapshot.total_io_time_millis - prev_io) as f64 / device_count as f64;
        self.record_baseline(snapshot);

        Some((busy_per_device / elapsed_millis * 100.0).clamp(0.0, 100.0))
    }

    fn record_baseline(&mut self, snapshot: &IoStatsSnapshot) {
        self.prev_io_time_millis = Some(snapshot.total_io_time_millis);
        self.prev_timestamp_millis = Some(snapshot.timestamp_millis);
    }
}
