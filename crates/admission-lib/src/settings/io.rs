//! I/O based admission controller settings

use crate::error::{AdmissionError, SettingsError};
use crate::models::{ActionType, AdmissionControlMode};
use serde::{Deserialize, Serialize};

use super::keys;

/// Tunables of the I/O based admission controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoUsageSettings {
    #[serde(default)]
    pub mode_override: Option<AdmissionControlMode>,

    #[serde(default = "default_io_limit")]
    pub search_limit: f64,

    #[serde(default = "default_io_limit")]
    pub indexing_limit: f64,

    /// Usage above this rejects regardless of the ratio limiter
    #[serde(default = "default_max_io_limit")]
    pub max_limit: f64,

    /// Baseline share of breaching requests that get rejected
    #[serde(default = "default_rejection_ratio")]
    pub rejection_ratio: f64,

    #[serde(default = "default_rejection_burst")]
    pub rejection_burst: f64,

    /// Factor applied to the ratio on each tuning step
    #[serde(default = "default_rejection_ratio_rate")]
    pub rejection_ratio_rate: f64,
}

fn default_io_limit() -> f64 {
    95.0
}

fn default_max_io_limit() -> f64 {
    99.0
}

fn default_rejection_ratio() -> f64 {
    0.25
}

fn default_rejection_burst() -> f64 {
    5.0
}

fn default_rejection_ratio_rate() -> f64 {
    2.0
}

impl Default for IoUsageSettings {
    fn default() -> Self {
        Self {
            mode_override: None,
            search_limit: default_io_limit(),
            indexing_limit: default_io_limit(),
            max_limit: default_max_io_limit(),
            rejection_ratio: default_rejection_ratio(),
            rejection_burst: default_rejection_burst(),
            rejection_ratio_rate: default_rejection_ratio_rate(),
        }
    }
}

impl IoUsageSettings {
    pub fn mode(&self, transport_mode: AdmissionControlMode) -> AdmissionControlMode {
        self.mode_override.unwrap_or(transport_mode)
    }

    /// I/O ceiling for an action type
    pub fn limit(&self, action_type: ActionType) -> Result<f64, AdmissionError> {
        match action_type {
            ActionType::Search => Ok(self.search_limit),
            ActionType::Indexing => Ok(self.indexing_limit),
            other => Err(AdmissionError::Configuration(format!(
                "admission control not supported for action type [{other}] by io controller"
            ))),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SettingsError> {
        super::check_percent(keys::SEARCH_IO_LIMIT, self.search_limit)?;
        super::check_percent(keys::INDEXING_IO_LIMIT, self.indexing_limit)?;
        super::check_percent(keys::MAX_IO_LIMIT, self.max_limit)?;

        if !(self.rejection_ratio > 0.0 && self.rejection_ratio <= 1.0) {
            return Err(SettingsError::invalid(
                keys::IO_REJECTION_RATIO,
                self.rejection_ratio,
                "must be in (0, 1]",
            ));
        }
        if !(self.rejection_burst >= 1.0) {
            return Err(SettingsError::invalid(
                keys::IO_REJECTION_BURST,
                self.rejection_burst,
                "must be at least 1",
            ));
        }
        if !(self.rejection_ratio_rate >= 1.0) {
            return Err(SettingsError::invalid(
                keys::IO_REJECTION_RATIO_RATE,
                self.rejection_ratio_rate,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
