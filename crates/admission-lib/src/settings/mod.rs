//! Admission control settings
//!
//! Typed settings with defaults and validation. Dynamic keys can be updated at
//! runtime through [`DynamicSettings`], which validates the whole candidate
//! before swapping it in and notifies subscribers through a watch channel.

mod cpu;
mod io;

pub use cpu::CpuUsageSettings;
pub use io::IoUsageSettings;

use crate::error::SettingsError;
use crate::models::AdmissionControlMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Flat setting keys
pub mod keys {
    pub const TRANSPORT_MODE: &str = "admission_control.transport.mode";
    pub const CPU_MODE_OVERRIDE: &str = "admission_control.transport.cpu_usage.mode_override";
    pub const SEARCH_CPU_LIMIT: &str = "admission_control.search.cpu_usage.limit";
    pub const INDEXING_CPU_LIMIT: &str = "admission_control.indexing.cpu_usage.limit";
    pub const IO_MODE_OVERRIDE: &str = "admission_control.transport.io_usage.mode_override";
    pub const SEARCH_IO_LIMIT: &str = "admission_control.search.io_usage.limit";
    pub const INDEXING_IO_LIMIT: &str = "admission_control.indexing.io_usage.limit";
    pub const MAX_IO_LIMIT: &str = "admission_control.max_io_usage.limit";
    pub const IO_REJECTION_RATIO: &str = "admission_control.io_usage.rejection_ratio";
    pub const IO_REJECTION_BURST: &str = "admission_control.io_usage.rejection_burst";
    pub const IO_REJECTION_RATIO_RATE: &str = "admission_control.io_usage.rejection_ratio_rate";

    // Read at startup only
    pub const TRACKER_POLLING_INTERVAL: &str = "admission_control.tracker.polling_interval_ms";
    pub const TRACKER_WINDOW_SIZE: &str = "admission_control.tracker.window_size";
    pub const TRACKER_EWMA_ALPHA: &str = "admission_control.tracker.ewma_alpha";
    pub const TRACKER_MAX_STATS_AGE: &str = "admission_control.tracker.max_stats_age_secs";
    pub const MONITOR_REFRESH_INTERVAL: &str = "admission_control.monitor.refresh_interval_secs";
    pub const MONITOR_OPEN_STATUS_REFRESH_INTERVAL: &str =
        "admission_control.monitor.open_status_refresh_interval_secs";
    pub const MONITOR_HISTORY_SIZE: &str = "admission_control.monitor.history_size";

    pub const STATIC: &[&str] = &[
        TRACKER_POLLING_INTERVAL,
        TRACKER_WINDOW_SIZE,
        TRACKER_EWMA_ALPHA,
        TRACKER_MAX_STATS_AGE,
        MONITOR_REFRESH_INTERVAL,
        MONITOR_OPEN_STATUS_REFRESH_INTERVAL,
        MONITOR_HISTORY_SIZE,
    ];
}

/// Resource tracker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Published stats older than this are ignored by the controllers
    #[serde(default = "default_max_stats_age_secs")]
    pub max_stats_age_secs: u64,
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_window_size() -> usize {
    10
}

fn default_ewma_alpha() -> f64 {
    0.3
}

fn default_max_stats_age_secs() -> u64 {
    30
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            window_size: default_window_size(),
            ewma_alpha: default_ewma_alpha(),
            max_stats_age_secs: default_max_stats_age_secs(),
        }
    }
}

impl TrackerSettings {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn max_stats_age(&self) -> Duration {
        Duration::from_secs(self.max_stats_age_secs)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.polling_interval_ms == 0 {
            return Err(SettingsError::invalid(
                keys::TRACKER_POLLING_INTERVAL,
                self.polling_interval_ms,
                "must be positive",
            ));
        }
        if self.window_size == 0 {
            return Err(SettingsError::invalid(
                keys::TRACKER_WINDOW_SIZE,
                self.window_size,
                "must be at least 1",
            ));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(SettingsError::invalid(
                keys::TRACKER_EWMA_ALPHA,
                self.ewma_alpha,
                "must be in (0, 1]",
            ));
        }
        if self.max_stats_age_secs == 0 {
            return Err(SettingsError::invalid(
                keys::TRACKER_MAX_STATS_AGE,
                self.max_stats_age_secs,
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Perf stats monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// How long a node stays OPEN before dropping to HALF_OPEN
    #[serde(default = "default_open_status_refresh_interval_secs")]
    pub open_status_refresh_interval_secs: u64,

    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_open_status_refresh_interval_secs() -> u64 {
    30
}

fn default_history_size() -> usize {
    10
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            open_status_refresh_interval_secs: default_open_status_refresh_interval_secs(),
            history_size: default_history_size(),
        }
    }
}

impl MonitorSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn open_status_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.open_status_refresh_interval_secs)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.refresh_interval_secs == 0 {
            return Err(SettingsError::invalid(
                keys::MONITOR_REFRESH_INTERVAL,
                self.refresh_interval_secs,
                "must be positive",
            ));
        }
        if self.history_size == 0 {
            return Err(SettingsError::invalid(
                keys::MONITOR_HISTORY_SIZE,
                self.history_size,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Complete admission control settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdmissionControlSettings {
    #[serde(default)]
    pub transport_mode: AdmissionControlMode,

    #[serde(default)]
    pub cpu: CpuUsageSettings,

    #[serde(default)]
    pub io: IoUsageSettings,

    #[serde(default)]
    pub tracker: TrackerSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl AdmissionControlSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.cpu.validate()?;
        self.io.validate()?;
        self.tracker.validate()?;
        self.monitor.validate()
    }

    pub fn cpu_mode(&self) -> AdmissionControlMode {
        self.cpu.mode(self.transport_mode)
    }

    pub fn io_mode(&self) -> AdmissionControlMode {
        self.io.mode(self.transport_mode)
    }

    /// Apply one dynamic key. `null` resets the key to its default.
    pub fn set(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        if keys::STATIC.contains(&key) {
            return Err(SettingsError::NotDynamic(key.to_string()));
        }

        let defaults = AdmissionControlSettings::default();
        match key {
            keys::TRANSPORT_MODE => {
                self.transport_mode = match value {
                    Value::Null => defaults.transport_mode,
                    v => parse_mode(key, v)?,
                }
            }
            keys::CPU_MODE_OVERRIDE => {
                self.cpu.mode_override = match value {
                    Value::Null => None,
                    v => Some(parse_mode(key, v)?),
                }
            }
            keys::IO_MODE_OVERRIDE => {
                self.io.mode_override = match value {
                    Value::Null => None,
                    v => Some(parse_mode(key, v)?),
                }
            }
            keys::SEARCH_CPU_LIMIT => {
                self.cpu.search_limit = number_or(key, value, defaults.cpu.search_limit)?
            }
            keys::INDEXING_CPU_LIMIT => {
                self.cpu.indexing_limit = number_or(key, value, defaults.cpu.indexing_limit)?
            }
            keys::SEARCH_IO_LIMIT => {
                self.io.search_limit = number_or(key, value, defaults.io.search_limit)?
            }
            keys::INDEXING_IO_LIMIT => {
                self.io.indexing_limit = number_or(key, value, defaults.io.indexing_limit)?
            }
            keys::MAX_IO_LIMIT => self.io.max_limit = number_or(key, value, defaults.io.max_limit)?,
            keys::IO_REJECTION_RATIO => {
                self.io.rejection_ratio = number_or(key, value, defaults.io.rejection_ratio)?
            }
            keys::IO_REJECTION_BURST => {
                self.io.rejection_burst = number_or(key, value, defaults.io.rejection_burst)?
            }
            keys::IO_REJECTION_RATIO_RATE => {
                self.io.rejection_ratio_rate =
                    number_or(key, value, defaults.io.rejection_ratio_rate)?
            }
            other => return Err(SettingsError::UnknownSetting(other.to_string())),
        }
        Ok(())
    }

    /// All settings as flat key to value pairs
    pub fn to_flat_map(&self) -> BTreeMap<&'static str, Value> {
        let mode = |m: Option<AdmissionControlMode>| match m {
            Some(m) => Value::from(m.as_str()),
            None => Value::Null,
        };

        BTreeMap::from([
            (keys::TRANSPORT_MODE, Value::from(self.transport_mode.as_str())),
            (keys::CPU_MODE_OVERRIDE, mode(self.cpu.mode_override)),
            (keys::SEARCH_CPU_LIMIT, Value::from(self.cpu.search_limit)),
            (keys::INDEXING_CPU_LIMIT, Value::from(self.cpu.indexing_limit)),
            (keys::IO_MODE_OVERRIDE, mode(self.io.mode_override)),
            (keys::SEARCH_IO_LIMIT, Value::from(self.io.search_limit)),
            (keys::INDEXING_IO_LIMIT, Value::from(self.io.indexing_limit)),
            (keys::MAX_IO_LIMIT, Value::from(self.io.max_limit)),
            (keys::IO_REJECTION_RATIO, Value::from(self.io.rejection_ratio)),
            (keys::IO_REJECTION_BURST, Value::from(self.io.rejection_burst)),
            (
                keys::IO_REJECTION_RATIO_RATE,
                Value::from(self.io.rejection_ratio_rate),
            ),
            (
                keys::TRACKER_POLLING_INTERVAL,
                Value::from(self.tracker.polling_interval_ms),
            ),
            (keys::TRACKER_WINDOW_SIZE, Value::from(self.tracker.window_size)),
            (keys::TRACKER_EWMA_ALPHA, Value::from(self.tracker.ewma_alpha)),
            (
                keys::TRACKER_MAX_STATS_AGE,
                Value::from(self.tracker.max_stats_age_secs),
            ),
            (
                keys::MONITOR_REFRESH_INTERVAL,
                Value::from(self.monitor.refresh_interval_secs),
            ),
            (
                keys::MONITOR_OPEN_STATUS_REFRESH_INTERVAL,
                Value::from(self.monitor.open_status_refresh_interval_secs),
            ),
            (keys::MONITOR_HISTORY_SIZE, Value::from(self.monitor.history_size)),
        ])
    }
}

pub(crate) fn check_percent(key: &str, value: f64) -> Result<(), SettingsError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(SettingsError::invalid(key, value, "must be between 0 and 100"));
    }
    Ok(())
}

fn parse_mode(key: &str, value: &Value) -> Result<AdmissionControlMode, SettingsError> {
    let raw = value
        .as_str()
        .ok_or_else(|| SettingsError::invalid(key, value, "expected a mode name"))?;
    raw.parse()
        .map_err(|reason: String| SettingsError::invalid(key, raw, reason))
}

/// Numbers may also arrive as strings
fn number_or(key: &str, value: &Value, default: f64) -> Result<f64, SettingsError> {
    match value {
        Value::Null => Ok(default),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| SettingsError::invalid(key, value, "not a finite number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| SettingsError::invalid(key, s, "not a number")),
        other => Err(SettingsError::invalid(key, other, "expected a number")),
    }
}

/// Settings holder shared by the node; dependents subscribe instead of being registered
#[derive(Debug)]
pub struct DynamicSettings {
    tx: watch::Sender<Arc<AdmissionControlSettings>>,
}

impl DynamicSettings {
    /// Validate the initial settings and create the holder
    pub fn new(initial: AdmissionControlSettings) -> Result<Self, SettingsError> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self { tx })
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AdmissionControlSettings>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<AdmissionControlSettings> {
        self.tx.borrow().clone()
    }

    /// Apply a batch of flat key updates atomically.
    ///
    /// Either every key is applied and the result validates, or nothing changes.
    /// Returns the updated keys.
    pub fn update(&self, changes: &Map<String, Value>) -> Result<Vec<String>, SettingsError> {
        let mut outcome = Ok(());
        // Built under the channel lock so concurrent updates never overwrite each other
        self.tx.send_if_modified(|current| {
            let mut candidate = (**current).clone();
            let applied = changes
                .iter()
                .try_for_each(|(key, value)| candidate.set(key, value))
                .and_then(|()| candidate.validate());
            match applied {
                Ok(()) => {
                    *current = Arc::new(candidate);
                    true
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });

        outcome.map(|()| changes.keys().cloned().collect())
    }
}
