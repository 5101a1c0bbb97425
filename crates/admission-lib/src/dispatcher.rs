//! Admission control service
//!
//! Runs a request through every enabled controller in registration order and
//! stops at the first rejection.

use crate::controllers::{
    AdmissionController, ControllerContext, CpuBasedAdmissionController,
    IoBasedAdmissionController, RegisteredController,
};
use crate::error::AdmissionError;
use crate::models::ActionType;
use crate::observability::AdmissionMetrics;
use crate::stats::ControllerStats;
use std::time::Instant;

pub struct AdmissionControlService {
    controllers: Vec<RegisteredController>,
    metrics: AdmissionMetrics,
}

impl AdmissionControlService {
    /// Service with the CPU controller followed by the I/O controller
    pub fn new(ctx: ControllerContext) -> Self {
        let metrics = ctx.metrics.clone();
        Self::with_controllers(
            vec![
                RegisteredController::Cpu(CpuBasedAdmissionController::new(ctx.clone())),
                RegisteredController::Io(IoBasedAdmissionController::new(ctx)),
            ],
            metrics,
        )
    }

    pub fn with_controllers(
        controllers: Vec<RegisteredController>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            controllers,
            metrics,
        }
    }

    /// Admit or reject a request
    pub fn apply(&self, action: &str, action_type: ActionType) -> Result<(), AdmissionError> {
        let start = Instant::now();

        let result = self
            .controllers
            .iter()
            .filter(|c| c.is_enabled_for_transport_layer())
            .try_for_each(|c| c.apply(action, action_type));

        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => self.metrics.inc_admitted(),
            Err(AdmissionError::Rejected(_)) => self.metrics.inc_rejected(),
            Err(AdmissionError::Configuration(_)) => self.metrics.inc_evaluation_error(),
        }
        result
    }

    pub fn controllers(&self) -> &[RegisteredController] {
        &self.controllers
    }

    pub fn controller(&self, name: &str) -> Option<&RegisteredController> {
        self.controllers.iter().find(|c| c.name() == name)
    }

    /// Current effective I/O rejection ratio, if an I/O controller is registered
    pub fn io_rejection_ratio(&self) -> Option<f64> {
        self.controllers.iter().find_map(|c| match c {
            RegisteredController::Io(io) => Some(io.rejection_ratio()),
            RegisteredController::Cpu(_) => None,
        })
    }

    /// Rejections of one action type across controllers
    pub fn rejection_count(&self, action_type: ActionType) -> u64 {
        self.controllers
            .iter()
            .map(|c| c.rejection_count(action_type))
            .sum()
    }

    pub fn rejection_stats(&self) -> Vec<ControllerStats> {
        self.controllers.iter().map(|c| c.rejection_stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::Fixture;
    use crate::controllers::{CPU_CONTROLLER_NAME, IO_CONTROLLER_NAME};
    use crate::models::AdmissionControlMode;
    use crate::settings::AdmissionControlSettings;

    const SEARCH: &str = "indices:data/read/search";

    fn fixture(mode: AdmissionControlMode) -> Fixture {
        let mut settings = AdmissionControlSettings {
            transport_mode: mode,
            ..Default::default()
        };
        settings.cpu.search_limit = 80.0;
        settings.io.search_limit = 80.0;
        settings.io.max_limit = 90.0;
        Fixture::new(settings)
    }

    #[test]
    fn test_controllers_registered_in_order() {
        let fixture = fixture(AdmissionControlMode::Monitor);
        let service = AdmissionControlService::new(fixture.ctx.clone());

        let names: Vec<&str> = service.controllers().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec![CPU_CONTROLLER_NAME, IO_CONTROLLER_NAME]);
        assert!(service.controller(IO_CONTROLLER_NAME).is_some());
        assert_eq!(service.io_rejection_ratio(), Some(0.25));
    }

    #[test]
    fn test_enforced_rejection_from_cpu() {
        let fixture = fixture(AdmissionControlMode::Enforced);
        let service = AdmissionControlService::new(fixture.ctx.clone());
        fixture.publish(85.0, 10.0);

        let err = service.apply(SEARCH, ActionType::Search).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(service.rejection_count(ActionType::Search), 1);
    }

    #[test]
    fn test_monitor_admits_and_counts() {
        let fixture = fixture(AdmissionControlMode::Monitor);
        let service = AdmissionControlService::new(fixture.ctx.clone());
        fixture.publish(85.0, 10.0);

        assert!(service.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(service.rejection_count(ActionType::Search), 1);
    }

    #[test]
    fn test_no_stats_admits_without_counting() {
        let fixture = fixture(AdmissionControlMode::Enforced);
        let service = AdmissionControlService::new(fixture.ctx.clone());

        assert!(service.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(service.rejection_count(ActionType::Search), 0);
    }

    #[test]
    fn test_first_rejection_short_circuits() {
        let fixture = fixture(AdmissionControlMode::Enforced);
        let service = AdmissionControlService::new(fixture.ctx.clone());
        // Both CPU and I/O over their ceilings
        fixture.publish(85.0, 95.0);

        let err = service.apply(SEARCH, ActionType::Search).unwrap_err();
        assert_eq!(err.rejection().unwrap().controller, CPU_CONTROLLER_NAME);

        let io = service.controller(IO_CONTROLLER_NAME).unwrap();
        assert_eq!(io.rejection_count(ActionType::Search), 0);
    }

    #[test]
    fn test_monitor_runs_every_controller() {
        let fixture = fixture(AdmissionControlMode::Monitor);
        let service = AdmissionControlService::new(fixture.ctx.clone());
        fixture.publish(85.0, 95.0);

        assert!(service.apply(SEARCH, ActionType::Search).is_ok());
        let stats = service.rejection_stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.total_rejections() == 1));
    }

    #[test]
    fn test_empty_service_admits() {
        let service = AdmissionControlService::with_controllers(vec![], AdmissionMetrics::new());
        assert!(service.apply(SEARCH, ActionType::Search).is_ok());
        assert_eq!(service.io_rejection_ratio(), None);
    }
}
