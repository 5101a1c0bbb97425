//! I/O based admission controller
//!
//! Above the global maximum every request breaches. Between the per action type
//! ceiling and the maximum only a share of requests breaches, decided by an
//! [`AdaptiveTokenBucket`] clocked by admitted requests whose ratio tightens
//! while pressure persists and resets once usage drops below the ceiling.

use super::{AdmissionController, ControllerContext, RejectionCounters};
use crate::error::{AdmissionError, Rejection};
use crate::limiter::AdaptiveTokenBucket;
use crate::models::{ActionType, AdmissionControlMode, ResourceKind};
use crate::settings::AdmissionControlSettings;
use crate::stats::ControllerStats;
use tracing::debug;

pub const IO_CONTROLLER_NAME: &str = "global_io_usage";

pub struct IoBasedAdmissionController {
    ctx: ControllerContext,
    counters: RejectionCounters,
    limiter: AdaptiveTokenBucket,
}

impl IoBasedAdmissionController {
    pub fn new(ctx: ControllerContext) -> Self {
        let limiter = {
            let settings = ctx.settings();
            AdaptiveTokenBucket::new(settings.io.rejection_ratio, settings.io.rejection_burst)
        };
        Self::with_limiter(ctx, limiter)
    }

    fn with_limiter(ctx: ControllerContext, limiter: AdaptiveTokenBucket) -> Self {
        ctx.metrics.set_io_rejection_ratio(limiter.ratio());
        Self {
            ctx,
            counters: RejectionCounters::default(),
            limiter,
        }
    }

    /// Current effective rejection ratio
    pub fn rejection_ratio(&self) -> f64 {
        self.limiter.ratio()
    }

    fn evaluate(
        &self,
        action: &str,
        action_type: ActionType,
        settings: &AdmissionControlSettings,
        mode: AdmissionControlMode,
    ) -> Result<(), AdmissionError> {
        let Some(usage) = self.ctx.local_usage() else {
            return Ok(());
        };
        let io = usage.io_usage_stats.io_utilization_percent;
        if !usage.io_usage_stats.is_available() {
            debug!("I/O usage not available yet, admitting");
            return Ok(());
        }

        let limit = settings.io.limit(action_type)?;
        let rejection = |limit_percent| Rejection {
            controller: IO_CONTROLLER_NAME,
            action: action.to_string(),
            action_type,
            resource: ResourceKind::Io,
            usage_percent: io,
            limit_percent,
        };

        if io > settings.io.max_limit {
            return self
                .ctx
                .breach(&self.counters, mode, rejection(settings.io.max_limit));
        }

        if io >= limit {
            if let Some(change) = self.limiter.tune(io, settings.io.rejection_ratio_rate) {
                self.ctx.metrics.set_io_rejection_ratio(change.current);
                self.ctx
                    .logger
                    .log_ratio_tuned(change.previous, change.current, io);
            }
            if self.limiter.request() {
                return self.ctx.breach(&self.counters, mode, rejection(limit));
            }
            return Ok(());
        }

        if self.limiter.reset_ratio() {
            self.ctx.metrics.set_io_rejection_ratio(self.limiter.ratio());
        }
        Ok(())
    }
}

impl AdmissionController for IoBasedAdmissionController {
    fn name(&self) -> &'static str {
        IO_CONTROLLER_NAME
    }

    fn mode(&self) -> AdmissionControlMode {
        self.ctx.settings().io_mode()
    }

    fn apply(&self, action: &str, action_type: ActionType) -> Result<(), AdmissionError> {
        let settings = self.ctx.settings();
        let mode = settings.io_mode();
        if mode == AdmissionControlMode::Disabled {
            return Ok(());
        }

        if self
            .limiter
            .sync_settings(settings.io.rejection_ratio, settings.io.rejection_burst)
        {
            self.ctx.metrics.set_io_rejection_ratio(self.limiter.ratio());
        }

        let result = self.evaluate(action, action_type, &settings, mode);
        if result.is_ok() {
            self.limiter.record_completion();
        }
        result
    }

    fn add_rejection_count(&self, action_type: ActionType, count: u64) {
        self.counters.add(action_type, count);
    }

    fn rejection_count(&self, action_type: ActionType) -> u64 {
        self.counters.get(action_type)
    }

    fn rejection_stats(&self) -> ControllerStats {
        ControllerStats {
            controller: IO_CONTROLLER_NAME.to_string(),
            mode: self.mode(),
            rejection_count: self.counters.snapshot(),
            rejection_ratio: Some(self.limiter.ratio()),
        }
    }
}
