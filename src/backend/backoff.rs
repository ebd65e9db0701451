//! Reconnect backoff
//!
//! When the loader dies on its own (USB unplugged, console reset) the worker
//! respawns it after a linearly increasing delay. The attempt counter lives in
//! the [`Session`](crate::session::Session) because an upload starting resets
//! it; this module owns the policy and the single pending deadline.

use crate::config::ReconnectConfig;
use std::time::{Duration, Instant};

/// Upper bound on any reconnect delay
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay schedule for reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub step: Duration,
    pub max_steps: u32,
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based)
    ///
    /// Saturates at [`MAX_RECONNECT_DELAY`] instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt.min(self.max_steps))
            .and_then(|steps| self.base.checked_add(steps))
            .map_or(MAX_RECONNECT_DELAY, |delay| delay.min(MAX_RECONNECT_DELAY))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            step: Duration::from_millis(config.step_ms),
            max_steps: config.max_steps,
        }
    }
}

/// Status text shown while waiting to reconnect
pub fn reconnect_status(attempts: u32) -> String {
    format!(
        "Reconnecting... ({} attempt{} so far)",
        attempts,
        if attempts == 1 { "" } else { "s" }
    )
}

/// Holds at most one pending respawn
#[derive(Debug, Clone, Default)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    deadline: Option<Instant>,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            deadline: None,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a transport death and schedule a respawn
    ///
    /// Increments `attempts` and returns the scheduled delay. Returns `None`
    /// without touching `attempts` when a respawn is already pending.
    pub fn schedule(&mut self, attempts: &mut u32, now: Instant) -> Option<Duration> {
        if self.deadline.is_some() {
            tracing::debug!("Reconnect already pending, not scheduling another");
            return None;
        }

        *attempts = attempts.saturating_add(1);
        let delay = self.policy.delay_for(*attempts);
        self.deadline = Some(now + delay);
        tracing::info!(attempt = *attempts, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        Some(delay)
    }

    /// When the pending respawn is due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending respawn if it is due at `now`
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending respawn
    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            tracing::debug!("Pending reconnect cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_deaths_schedule_linear_capped_delays() {
        let mut scheduler = ReconnectScheduler::new(BackoffPolicy::default());
        let mut attempts = 0;
        let now = Instant::now();

        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(scheduler.schedule(&mut attempts, now).unwrap().as_millis());
            assert!(scheduler.take_due(now + Duration::from_secs(10)));
        }

        assert_eq!(delays, vec![1500, 2000, 2500, 3000, 3500]);
        assert_eq!(attempts, 5);
    }

    #[test]
    fn test_delay_is_capped_after_max_steps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_millis(3500));
        assert_eq!(policy.delay_for(100), Duration::from_millis(3500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_only_one_pending_respawn() {
        let mut scheduler = ReconnectScheduler::default();
        let mut attempts = 0;
        let now = Instant::now();

        assert!(scheduler.schedule(&mut attempts, now).is_some());
        assert!(scheduler.schedule(&mut attempts, now).is_none());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_take_due_waits_for_deadline() {
        let mut scheduler = ReconnectScheduler::default();
        let mut attempts = 0;
        let now = Instant::now();
        scheduler.schedule(&mut attempts, now);

        assert!(!scheduler.take_due(now + Duration::from_millis(1499)));
        assert!(scheduler.take_due(now + Duration::from_millis(1500)));
        assert!(!scheduler.is_pending());
        assert!(!scheduler.take_due(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut scheduler = ReconnectScheduler::default();
        let mut attempts = 0;
        scheduler.schedule(&mut attempts, Instant::now());
        scheduler.cancel();
        scheduler.cancel();
        assert!(scheduler.deadline().is_none());
    }

    #[test]
    fn test_policy_from_config() {
        let config = ReconnectConfig {
            base_delay_ms: 100,
            step_ms: 10,
            max_steps: 2,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.delay_for(1), Duration::from_millis(110));
        assert_eq!(policy.delay_for(3), Duration::from_millis(120));
    }

    #[test]
    fn test_huge_config_saturates_instead_of_overflowing() {
        let config = ReconnectConfig {
            base_delay_ms: u64::MAX,
            step_ms: u64::MAX,
            max_steps: u32::MAX,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.delay_for(u32::MAX), MAX_RECONNECT_DELAY);
        assert_eq!(policy.delay_for(0), MAX_RECONNECT_DELAY);

        let mut scheduler = ReconnectScheduler::new(policy);
        let mut attempts = u32::MAX;
        let now = Instant::now();
        assert_eq!(scheduler.schedule(&mut attempts, now), Some(MAX_RECONNECT_DELAY));
        assert_eq!(attempts, u32::MAX);
        assert!(!scheduler.take_due(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_reconnect_status_pluralizes() {
        assert_eq!(reconnect_status(1), "Reconnecting... (1 attempt so far)");
        assert_eq!(reconnect_status(3), "Reconnecting... (3 attempts so far)");
    }
}
