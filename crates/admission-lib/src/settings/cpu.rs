//! CPU based admission controller settings

use crate::error::{AdmissionError, SettingsError};
use crate::models::{ActionType, AdmissionControlMode};
use serde::{Deserialize, Serialize};

/// Tunables of the CPU based admission controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsageSettings {
    /// Falls back to the transport mode when unset
    #[serde(default)]
    pub mode_override: Option<AdmissionControlMode>,

    #[serde(default = "default_cpu_limit")]
    pub search_limit: f64,

    #[serde(default = "default_cpu_limit")]
    pub indexing_limit: f64,
}

pub(crate) fn default_cpu_limit() -> f64 {
    95.0
}

impl Default for CpuUsageSettings {
    fn default() -> Self {
        Self {
            mode_override: None,
            search_limit: default_cpu_limit(),
            indexing_limit: default_cpu_limit(),
        }
    }
}

impl CpuUsageSettings {
    pub fn mode(&self, transport_mode: AdmissionControlMode) -> AdmissionControlMode {
        self.mode_override.unwrap_or(transport_mode)
    }

    /// CPU ceiling for an action type
    pub fn limit(&self, action_type: ActionType) -> Result<f64, AdmissionError> {
        match action_type {
            ActionType::Search => Ok(self.search_limit),
            ActionType::Indexing => Ok(self.indexing_limit),
            other => Err(AdmissionError::Configuration(format!(
                "admission control not supported for action type [{other}] by cpu controller"
            ))),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SettingsError> {
        super::check_percent(super::keys::SEARCH_CPU_LIMIT, self.search_limit)?;
        super::check_percent(super::keys::INDEXING_CPU_LIMIT, self.indexing_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_override_falls_back_to_transport_mode() {
        let mut settings = CpuUsageSettings::default();
        assert_eq!(
            settings.mode(AdmissionControlMode::Monitor),
            AdmissionControlMode::Monitor
        );

        settings.mode_override = Some(AdmissionControlMode::Enforced);
        assert_eq!(
            settings.mode(AdmissionControlMode::Monitor),
            AdmissionControlMode::Enforced
        );
    }

    #[test]
    fn test_limit_lookup() {
        let settings = CpuUsageSettings {
            mode_override: None,
            search_limit: 80.0,
            indexing_limit: 70.0,
        };
        assert_eq!(settings.limit(ActionType::Search).unwrap(), 80.0);
        assert_eq!(settings.limit(ActionType::Indexing).unwrap(), 70.0);
        assert!(matches!(
            settings.limit(ActionType::ClusterAdmin),
            Err(AdmissionError::Configuration(_))
        ));
    }
}
