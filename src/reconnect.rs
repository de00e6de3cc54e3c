use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::SyncConfig;

/// Where the policy currently stands. `Exhausted` is terminal until an
/// explicit `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Scheduled,
    Attempting,
    Succeeded,
    Exhausted,
}

/// What the supervisor should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then attempt to reconnect.
    RetryAfter(Duration),
    /// Ceiling hit; stop scheduling attempts.
    GiveUp,
}

/// Reconnection policy: bounded exponential backoff with jitter.
///
/// The delay advances as `delay = min(delay * 2 + rand(0..1), max_delay)`
/// per failure; a successful authenticated connection resets both the
/// attempt counter and the delay to base. Auth failures must never be fed
/// into `on_failure` — credential rejection is not retryable.
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempts: u32,
    delay: f64,
    base_delay: f64,
    max_delay: f64,
    max_attempts: u32,
    state: RetryState,
}

impl ReconnectPolicy {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            attempts: 0,
            delay: config.base_delay_secs,
            base_delay: config.base_delay_secs,
            max_delay: config.max_delay_secs,
            max_attempts: config.max_reconnect_attempts,
            state: RetryState::Idle,
        }
    }

    /// Records a retryable transport failure and decides the next step.
    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.state = RetryState::Exhausted;
            return RetryDecision::GiveUp;
        }

        let wait = Duration::from_secs_f64(self.delay);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.delay = (self.delay * 2.0 + jitter).min(self.max_delay);
        self.state = RetryState::Scheduled;
        info!(attempt = self.attempts, wait_secs = wait.as_secs_f64(), "reconnect scheduled");
        RetryDecision::RetryAfter(wait)
    }

    /// A connection attempt is now in flight.
    pub fn on_attempt(&mut self) {
        self.state = RetryState::Attempting;
    }

    /// An authenticated connection was established.
    pub fn on_success(&mut self) {
        self.attempts = 0;
        self.delay = self.base_delay;
        self.state = RetryState::Succeeded;
    }

    /// Manual reset (app-foreground transition and the like): back to base,
    /// bypassing any pending backoff wait.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.base_delay;
        self.state = RetryState::Idle;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == RetryState::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(&SyncConfig::default())
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let mut policy = policy();
        let mut previous = 0.0_f64;
        for attempt in 1..=9 {
            match policy.on_failure() {
                RetryDecision::RetryAfter(wait) => {
                    let secs = wait.as_secs_f64();
                    assert!(secs >= previous, "delay shrank at attempt {attempt}");
                    assert!(secs <= 30.0, "delay exceeded cap at attempt {attempt}");
                    assert_eq!(policy.attempts(), attempt);
                    previous = secs;
                }
                RetryDecision::GiveUp => panic!("gave up early at attempt {attempt}"),
            }
        }
        // Well past doubling range, the delay sits at the cap.
        assert!((previous - 30.0).abs() < f64::EPSILON || previous <= 30.0);
    }

    #[test]
    fn ceiling_is_terminal() {
        let mut policy = policy();
        for _ in 1..10 {
            assert!(matches!(policy.on_failure(), RetryDecision::RetryAfter(_)));
        }
        // The tenth consecutive failure exhausts the policy.
        assert_eq!(policy.on_failure(), RetryDecision::GiveUp);
        assert!(policy.is_exhausted());
    }

    #[test]
    fn success_resets_counter_and_delay() {
        let mut policy = policy();
        policy.on_failure();
        policy.on_failure();
        assert_eq!(policy.attempts(), 2);
        policy.on_success();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.state(), RetryState::Succeeded);
        // The next failure starts from the base delay again.
        match policy.on_failure() {
            RetryDecision::RetryAfter(wait) => {
                assert!((wait.as_secs_f64() - 1.0).abs() < f64::EPSILON)
            }
            RetryDecision::GiveUp => panic!("unexpected give-up"),
        }
    }

    #[test]
    fn manual_reset_leaves_exhausted_state() {
        let mut policy = policy();
        while !matches!(policy.on_failure(), RetryDecision::GiveUp) {}
        assert!(policy.is_exhausted());
        policy.reset();
        assert_eq!(policy.state(), RetryState::Idle);
        assert_eq!(policy.attempts(), 0);
    }
}
