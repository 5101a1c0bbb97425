//! Error types for admission control

use crate::models::{ActionType, ResourceKind};
use thiserror::Error;

/// Details of a request rejected by an admission controller
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub controller: &'static str,
    pub action: String,
    pub action_type: ActionType,
    pub resource: ResourceKind,
    pub usage_percent: f64,
    pub limit_percent: f64,
}

/// Errors surfaced by the admission control path
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The request was rejected because a resource ceiling was breached.
    /// Only raised in enforced mode; callers should treat it as a retryable overload.
    #[error(
        "action [{}] of type [{}] rejected by admission controller [{}]: {} usage [{:.1}%] reached limit [{:.1}%]",
        .0.action, .0.action_type, .0.controller, .0.resource, .0.usage_percent, .0.limit_percent
    )]
    Rejected(Rejection),

    /// Admission control was wired incorrectly, e.g. a ceiling was requested
    /// for an action type the controller does not support
    #[error("admission control configuration error: {0}")]
    Configuration(String),
}

impl AdmissionError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, AdmissionError::Rejected(_))
    }

    /// Rejections are retryable once pressure subsides; configuration errors are not
    pub fn is_retryable(&self) -> bool {
        self.is_rejection()
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AdmissionError::Rejected(rejection) => Some(rejection),
            AdmissionError::Configuration(_) => None,
        }
    }
}

/// Errors raised while loading or updating admission control settings
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("unknown setting [{0}]")]
    UnknownSetting(String),

    #[error("setting [{0}] is not dynamically updateable")]
    NotDynamic(String),

    #[error("invalid value [{value}] for setting [{key}]: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_and_classification() {
        let err = AdmissionError::Rejected(Rejection {
            controller: "global_cpu_usage",
            action: "indices:data/read/search".to_string(),
            action_type: ActionType::Search,
            resource: ResourceKind::Cpu,
            usage_percent: 85.0,
            limit_percent: 80.0,
        });

        let message = err.to_string();
        assert!(message.contains("indices:data/read/search"));
        assert!(message.contains("[85.0%]"));
        assert!(err.is_retryable());
        assert_eq!(err.rejection().unwrap().action_type, ActionType::Search);
    }

    #[test]
    fn test_configuration_error_not_retryable() {
        let err = AdmissionError::Configuration("bad".to_string());
        assert!(!err.is_rejection());
        assert!(!err.is_retryable());
        assert!(err.rejection().is_none());
    }
}
