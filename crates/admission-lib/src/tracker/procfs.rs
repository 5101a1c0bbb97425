//! Linux procfs resource probe
//!
//! Reads raw node counters from the proc filesystem:
//! - /proc/stat for aggregate CPU time
//! - /proc/meminfo for memory in use
//! - /proc/diskstats for per-device I/O busy time

use super::ResourceProbe;
use crate::models::{DeviceIoStats, IoStatsSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Instant;

/// Aggregate CPU jiffies from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

/// Resource probe backed by /proc
pub struct ProcfsProbe {
    proc_path: PathBuf,
    /// Only these devices are considered when set
    devices: Option<Vec<String>>,
    prev_cpu: Mutex<Option<CpuTimes>>,
    started: Instant,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            devices: None,
            prev_cpu: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Restrict I/O tracking to the named block devices
    pub fn with_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Parse the aggregate `cpu` line of /proc/stat.
    /// Idle and iowait count as not busy.
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .context("No aggregate cpu line in stat")?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse::<u64>())
            .collect::<Result<_, _>>()
            .context("Failed to parse cpu times")?;

        if fields.len() < 4 {
            anyhow::bail!("Expected at least 4 cpu time fields, got {}", fields.len());
        }

        // guest and guest_nice are already included in user and nice
        let total: u64 = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);

        Ok(CpuTimes {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    /// Memory in use as a percentage of MemTotal
    pub fn parse_memory_used_percent(content: &str) -> Result<f64> {
        let mut values: HashMap<&str, u64> = HashMap::new();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                if let Ok(v) = value.parse::<u64>() {
                    values.insert(key.trim_end_matches(':'), v);
                }
            }
        }

        let total = *values.get("MemTotal").context("MemTotal missing")?;
        if total == 0 {
            anyhow::bail!("MemTotal is zero");
        }

        let available = match values.get("MemAvailable") {
            Some(v) => *v,
            None => {
                values.get("MemFree").copied().unwrap_or(0)
                    + values.get("Buffers").copied().unwrap_or(0)
                    + values.get("Cached").copied().unwrap_or(0)
            }
        };

        Ok(total.saturating_sub(available) as f64 * 100.0 / total as f64)
    }

    /// Parse /proc/diskstats into per-device busy time.
    ///
    /// Loop and ram devices are dropped, as are partitions whose parent disk is listed.
    pub fn parse_diskstats(content: &str, allow: Option<&[String]>) -> Vec<DeviceIoStats> {
        let mut devices = Vec::new();

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            // major minor name + 10 counters at minimum; io_ticks is the 10th counter
            if parts.len() < 13 {
                continue;
            }
            let name = parts[2];
            if let Ok(io_time_millis) = parts[12].parse::<u64>() {
                devices.push(DeviceIoStats {
                    device_name: name.to_string(),
                    io_time_millis,
                });
            }
        }

        if let Some(allow) = allow {
            devices.retain(|d| allow.iter().any(|a| a == &d.device_name));
            return devices;
        }

        let names: Vec<String> = devices.iter().map(|d| d.device_name.clone()).collect();
        devices.retain(|d| {
            let name = d.device_name.as_str();
            !name.starts_with("loop")
                && !name.starts_with("ram")
                && !is_partition(name, &names)
        });
        devices
    }

    async fn read(&self, file: &str) -> Result<String> {
        let path = self.proc_path.join(file);
        read_to_string(&path).await
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn is_partition(name: &str, all: &[String]) -> bool {
    all.iter().any(|parent| {
        name.strip_prefix(parent.as_str()).is_some_and(|rest| {
            // sda1, nvme0n1p1
            let rest = rest.strip_prefix('p').unwrap_or(rest);
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        })
    })
}

async fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[async_trait]
impl ResourceProbe for ProcfsProbe {
    async fn prime(&self) -> Result<()> {
        let content = self.read("stat").await?;
        let current = Self::parse_cpu_times(&content)?;
        *self.prev_cpu.lock() = Some(current);
        Ok(())
    }

    async fn cpu_percent(&self) -> Result<f64> {
        let content = self.read("stat").await?;
        let current = Self::parse_cpu_times(&content)?;

        let previous = self.prev_cpu.lock().replace(current);
        let Some(previous) = previous else {
            anyhow::bail!("CPU baseline recorded, no usage available yet");
        };

        let total = current.total.saturating_sub(previous.total);
        if total == 0 {
            anyhow::bail!("No CPU time elapsed since previous sample");
        }
        let busy = current.busy.saturating_sub(previous.busy);
        Ok(busy as f64 * 100.0 / total as f64)
    }

    async fn memory_used_percent(&self) -> Result<f64> {
        let content = self.read("meminfo").await?;
        Self::parse_memory_used_percent(&content)
    }

    async fn io_stats(&self) -> Result<IoStatsSnapshot> {
        let content = self.read("diskstats").await?;
        let devices = Self::parse_diskstats(&content, self.devices.as_deref());
        let timestamp_millis = self.started.elapsed().as_millis() as u64;
        Ok(IoStatsSnapshot::new(devices, timestamp_millis))
    }
}
