//! CPU based admission controller

use super::{AdmissionController, ControllerContext, RejectionCounters};
use crate::error::{AdmissionError, Rejection};
use crate::models::{ActionType, AdmissionControlMode, ResourceKind};
use crate::stats::ControllerStats;

pub const CPU_CONTROLLER_NAME: &str = "global_cpu_usage";

/// Rejects requests while the node's CPU utilisation is at or above the
/// ceiling configured for the request's action type
pub struct CpuBasedAdmissionController {
    ctx: ControllerContext,
    counters: RejectionCounters,
}

impl CpuBasedAdmissionController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            counters: RejectionCounters::default(),
        }
    }
}

impl AdmissionController for CpuBasedAdmissionController {
    fn name(&self) -> &'static str {
        CPU_CONTROLLER_NAME
    }

    fn mode(&self) -> AdmissionControlMode {
        self.ctx.settings().cpu_mode()
    }

    fn apply(&self, action: &str, action_type: ActionType) -> Result<(), AdmissionError> {
        let settings = self.ctx.settings();
        let mode = settings.cpu_mode();
        if mode == AdmissionControlMode::Disabled {
            return Ok(());
        }

        let Some(usage) = self.ctx.local_usage() else {
            return Ok(());
        };

        let limit = settings.cpu.limit(action_type)?;
        let cpu = usage.cpu_utilization_percent;
        if cpu >= limit {
            return self.ctx.breach(
                &self.counters,
                mode,
                Rejection {
                    controller: CPU_CONTROLLER_NAME,
                    action: action.to_string(),
                    action_type,
                    resource: ResourceKind::Cpu,
                    usage_percent: cpu,
                    limit_percent: limit,
                },
            );
        }
        Ok(())
    }

    fn add_rejection_count(&self, action_type: ActionType, count: u64) {
        self.counters.add(action_type, count);
    }

    fn rejection_count(&self, action_type: ActionType) -> u64 {
        self.counters.get(action_type)
    }

    fn rejection_stats(&self) -> ControllerStats {
        ControllerStats {
            controller: CPU_CONTROLLER_NAME.to_string(),
            mode: self.mode(),
            rejection_count: self.counters.snapshot(),
            rejection_ratio: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::Fixture;
    use crate::settings::{keys, AdmissionControlSettings};
    use serde_json::json;

    const SEARCH: &str = "indices:data/read/search";

    fn fixture(mode: AdmissionControlMode, search_limit: f64) -> Fixture {
        let mut settings = AdmissionControlSettings {
            transport_mode: mode,
            ..Default::default()
        };
        settings.cpu.search_limit = search_limit;
        Fixture::new(settings)
    }

    #[test]
    fn test_enforced_rejects_over_limit() {
        let fixture = fixture(AdmissionControlMode::Enforced, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(85.0, 0.0);

        let err = controller.apply(SEARCH, ActionType::Search).unwrap_err();
        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.controller, CPU_CONTROLLER_NAME);
        assert_eq!(rejection.usage_percent, 85.0);
        assert_eq!(rejection.limit_percent, 80.0);
        assert_eq!(controller.rejection_count(ActionType::Search), 1);
        assert_eq!(controller.rejection_count(ActionType::Indexing), 0);
    }

    #[test]
    fn test_monitor_counts_but_admits() {
        let fixture = fixture(AdmissionControlMode::Monitor, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(85.0, 0.0);

        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(controller.rejection_count(ActionType::Search), 1);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let fixture = fixture(AdmissionControlMode::Enforced, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());

        fixture.publish(80.0, 0.0);
        assert!(controller.apply(SEARCH, ActionType::Search).is_err());

        fixture.publish(79.9, 0.0);
        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
    }

    #[test]
    fn test_disabled_neither_counts_nor_rejects() {
        let fixture = fixture(AdmissionControlMode::Disabled, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(99.0, 0.0);

        assert!(!controller.is_enabled_for_transport_layer());
        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(controller.rejection_count(ActionType::Search), 0);
    }

    #[test]
    fn test_no_stats_admits() {
        let fixture = fixture(AdmissionControlMode::Enforced, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());

        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(controller.rejection_count(ActionType::Search), 0);
    }

    #[test]
    fn test_cluster_not_ready_admits() {
        let fixture = fixture(AdmissionControlMode::Enforced, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(99.0, 0.0);
        fixture.cluster.set_ready(false);

        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
    }

    #[test]
    fn test_unsupported_action_type_is_configuration_error() {
        let fixture = fixture(AdmissionControlMode::Enforced, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(10.0, 0.0);

        assert!(matches!(
            controller.apply("cluster:admin/settings", ActionType::ClusterAdmin),
            Err(AdmissionError::Configuration(_))
        ));
    }

    #[test]
    fn test_settings_change_applies_to_next_call() {
        let fixture = fixture(AdmissionControlMode::Monitor, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        fixture.publish(85.0, 0.0);
        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());

        fixture.update(keys::CPU_MODE_OVERRIDE, json!("enforced"));
        assert_eq!(controller.mode(), AdmissionControlMode::Enforced);
        assert!(controller.apply(SEARCH, ActionType::Search).is_err());

        fixture.update(keys::SEARCH_CPU_LIMIT, json!(90));
        assert!(controller.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(controller.rejection_count(ActionType::Search), 2);
    }

    #[test]
    fn test_rejection_stats() {
        let fixture = fixture(AdmissionControlMode::Monitor, 80.0);
        let controller = CpuBasedAdmissionController::new(fixture.ctx.clone());
        controller.add_rejection_count(ActionType::Indexing, 4);

        let stats = controller.rejection_stats();
        assert_eq!(stats.controller, CPU_CONTROLLER_NAME);
        assert_eq!(stats.mode, AdmissionControlMode::Monitor);
        assert_eq!(stats.rejection_count["indexing"], 4);
        assert_eq!(stats.rejection_ratio, None);
    }
}
