//! Adaptive concurrency controller.
//!
//! The allowed number of running jobs is the smaller of the operator ceiling
//! and a throttle level. A failure lowers the throttle by one and starts a
//! cooldown; once the cooldown has passed, every call to
//! [`ConcurrencyController::effective_concurrency`] raises it by one again.
//! Independently, the limit shrinks as the accumulated size of stored results
//! grows.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::THROTTLE_BACKOFFS;
use crate::orchestrator::BatchConfig;

/// Snapshot of the controller's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub configured: usize,
    pub throttle: usize,
    pub in_cooldown: bool,
}

/// Computes how many jobs may run at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    hard_max: usize,
    configured: usize,
    throttle: usize,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
    low_water_bytes: u64,
    high_water_bytes: u64,
}

impl ConcurrencyController {
    /// Create a controller. The throttle starts at 1 and ramps up on polling.
    pub fn new(config: &BatchConfig) -> Self {
        let hard_max = config.max_concurrency.max(1);
        Self {
            hard_max,
            configured: config.default_concurrency.clamp(1, hard_max),
            throttle: 1,
            cooldown: config.cooldown(),
            cooldown_until: None,
            low_water_bytes: config.storage_low_water_bytes,
            high_water_bytes: config.storage_high_water_bytes,
        }
    }

    /// Set the operator ceiling, clamped to `[1, hard_max]`.
    ///
    /// Returns the ceiling actually applied.
    pub fn set_ceiling(&mut self, requested: i64) -> usize {
        let ceiling = requested.clamp(1, self.hard_max as i64) as usize;
        if ceiling != self.configured {
            info!(requested, ceiling, "Concurrency ceiling updated");
        }
        self.configured = ceiling;
        self.throttle = self.throttle.min(ceiling).max(1);
        ceiling
    }

    pub fn configured_ceiling(&self) -> usize {
        self.configured
    }

    pub fn hard_max(&self) -> usize {
        self.hard_max
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        ConcurrencyLimits {
            configured: self.configured,
            throttle: self.throttle,
            in_cooldown: self.in_cooldown_at(Instant::now()),
        }
    }

    /// Currently allowed concurrency given the accumulated result size.
    pub fn effective_concurrency(&mut self, stored_bytes: u64) -> usize {
        self.effective_concurrency_at(Instant::now(), stored_bytes)
    }

    pub fn effective_concurrency_at(&mut self, now: Instant, stored_bytes: u64) -> usize {
        if !self.in_cooldown_at(now) && self.throttle < self.configured {
            self.throttle += 1;
            debug!(throttle = self.throttle, "Throttle recovered one step");
        }

        let mut limit = self.configured.min(self.throttle);
        if stored_bytes > self.high_water_bytes {
            limit = 1;
        } else if stored_bytes > self.low_water_bytes {
            limit = limit.min(2);
        }

        limit.min(self.hard_max).max(1)
    }

    /// Report a finished job. Only failures change state.
    pub fn record_outcome(&mut self, success: bool) {
        self.record_outcome_at(Instant::now(), success);
    }

    pub fn record_outcome_at(&mut self, now: Instant, success: bool) {
        if success {
            return;
        }
        self.throttle = self.throttle.saturating_sub(1).max(1);
        self.cooldown_until = Some(now + self.cooldown);
        THROTTLE_BACKOFFS.inc();
        info!(
            throttle = self.throttle,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Job failed, throttling concurrency"
        );
    }

    fn in_cooldown_at(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn controller(ceiling: usize) -> ConcurrencyController {
        let config = BatchConfig {
            default_concurrency: ceiling,
            cooldown_ms: 45_000,
            ..Default::default()
        };
        ConcurrencyController::new(&config)
    }

    #[test]
    fn test_throttle_ramps_one_step_per_call() {
        let mut c = controller(3);
        let now = Instant::now();
        assert_eq!(c.effective_concurrency_at(now, 0), 2);
        assert_eq!(c.effective_concurrency_at(now, 0), 3);
        assert_eq!(c.effective_concurrency_at(now, 0), 3);
    }

    #[test]
    fn test_set_ceiling_clamps_and_lowers_throttle() {
        let mut c = controller(3);
        let now = Instant::now();
        c.effective_concurrency_at(now, 0);
        c.effective_concurrency_at(now, 0);
        assert_eq!(c.limits().throttle, 3);

        assert_eq!(c.set_ceiling(1), 1);
        assert_eq!(c.limits().throttle, 1);
        assert_eq!(c.set_ceiling(0), 1);
        assert_eq!(c.set_ceiling(-4), 1);
        assert_eq!(c.set_ceiling(99), 3);
        assert_eq!(c.configured_ceiling(), 3);
    }

    #[test]
    fn test_failure_backs_off_until_cooldown_passes() {
        let mut c = controller(3);
        let start = Instant::now();
        c.effective_concurrency_at(start, 0);
        let before = c.effective_concurrency_at(start, 0);
        assert_eq!(before, 3);

        c.record_outcome_at(start, false);
        let during = start + Duration::from_secs(10);
        assert_eq!(c.effective_concurrency_at(during, 0), 2);
        assert_eq!(c.effective_concurrency_at(during, 0), 2);
        assert_eq!(
            c.effective_concurrency_at(start + Duration::from_secs(45), 0),
            2
        );

        let after = start + Duration::from_secs(46);
        assert_eq!(c.effective_concurrency_at(after, 0), 3);
    }

    #[test]
    fn test_success_does_not_reward() {
        let mut c = controller(3);
        let now = Instant::now();
        c.record_outcome_at(now, false);
        c.record_outcome_at(now, true);
        assert_eq!(c.limits().throttle, 1);
        assert!(c.limits().in_cooldown);
    }

    #[test]
    fn test_throttle_never_drops_below_one() {
        let mut c = controller(2);
        let now = Instant::now();
        for _ in 0..5 {
            c.record_outcome_at(now, false);
        }
        assert_eq!(c.limits().throttle, 1);
        assert_eq!(c.effective_concurrency_at(now, 0), 1);
    }

    #[test]
    fn test_storage_pressure_caps_limit() {
        let mut c = controller(3);
        let now = Instant::now();
        c.effective_concurrency_at(now, 0);
        c.effective_concurrency_at(now, 0);

        assert_eq!(c.effective_concurrency_at(now, 350 * MIB), 3);
        assert_eq!(c.effective_concurrency_at(now, 350 * MIB + 1), 2);
        assert_eq!(c.effective_concurrency_at(now, 650 * MIB + 1), 1);
    }

    #[test]
    fn test_high_water_forces_one_regardless_of_throttle() {
        let mut c = controller(3);
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(c.effective_concurrency_at(now, 700 * MIB), 1);
        }
        assert_eq!(c.limits().throttle, 3);
    }
}
