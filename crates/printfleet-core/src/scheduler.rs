// ── Update scheduling ──
//
// The poll loop ticks fast but polls slow: every tick re-evaluates
// whether a full fleet poll is due, and the failure budget can push the
// next poll into the future after repeated errors.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::coordinator::Coordinator;
use crate::error::CoreError;

/// Health of the polling pipeline, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateHealth {
    /// Last poll succeeded.
    Ok,
    /// Recent polls failed but the budget is not yet exhausted.
    Degraded { consecutive_failures: u32 },
    /// The failure budget was exhausted; polling is paused.
    CoolingDown,
    /// Credentials were rejected. Polling halted until reauthentication.
    AuthExpired,
}

/// Consecutive-failure counter with a cooldown latch.
///
/// Exhausting the budget arms a cooldown; once the cooldown expires the
/// counter starts over from zero.
#[derive(Debug)]
pub(crate) struct FailureBudget {
    max_failures: u32,
    cooldown: Duration,
    failed: u32,
    resume_at: Option<Instant>,
}

impl FailureBudget {
    pub(crate) fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures,
            cooldown,
            failed: 0,
            resume_at: None,
        }
    }

    /// `true` while polling must stay paused. Clears the latch (and the
    /// counter) once the cooldown has elapsed.
    pub(crate) fn in_cooldown(&mut self, now: Instant) -> bool {
        match self.resume_at {
            Some(resume_at) if now < resume_at => true,
            Some(_) => {
                self.failed = 0;
                self.resume_at = None;
                false
            }
            None => false,
        }
    }

    /// Record one recoverable failure. Returns `true` if this one
    /// exhausted the budget and armed the cooldown.
    pub(crate) fn record_failure(&mut self, now: Instant) -> bool {
        self.failed += 1;
        if self.failed >= self.max_failures {
            self.resume_at = Some(now + self.cooldown);
            true
        } else {
            false
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.failed = 0;
        self.resume_at = None;
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failed
    }
}

/// Background poll loop. Ticks at `poll_interval` until cancelled; the
/// coordinator decides per tick whether a real poll is due. Halts on
/// authentication failure -- every other error is logged and retried on
/// the next due tick.
pub(crate) async fn poll_task(coordinator: Coordinator, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(coordinator.config().poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match coordinator.scheduled_update().await {
                    Ok(()) => {}
                    Err(CoreError::AuthenticationFailed { message }) => {
                        error!(%message, "authentication failed; poll loop halting");
                        break;
                    }
                    Err(e) => warn!(error = %e, "fleet update failed"),
                }
            }
        }
    }

    debug!("poll task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::FailureBudget;

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[test]
    fn budget_arms_cooldown_at_max_failures() {
        let mut budget = FailureBudget::new(3, COOLDOWN);
        let now = Instant::now();

        assert!(!budget.record_failure(now));
        assert!(!budget.record_failure(now));
        assert!(budget.record_failure(now));
        assert!(budget.in_cooldown(now));
        assert!(budget.in_cooldown(now + COOLDOWN - Duration::from_secs(1)));
    }

    #[test]
    fn cooldown_expiry_resets_the_counter() {
        let mut budget = FailureBudget::new(2, COOLDOWN);
        let now = Instant::now();

        budget.record_failure(now);
        budget.record_failure(now);
        assert!(budget.in_cooldown(now));

        let later = now + COOLDOWN + Duration::from_secs(1);
        assert!(!budget.in_cooldown(later));
        assert_eq!(budget.failures(), 0);

        // A fresh run of failures is needed to arm it again.
        assert!(!budget.record_failure(later));
    }

    #[test]
    fn success_clears_failures_and_latch() {
        let mut budget = FailureBudget::new(2, COOLDOWN);
        let now = Instant::now();

        budget.record_failure(now);
        budget.record_success();
        assert_eq!(budget.failures(), 0);

        budget.record_failure(now);
        budget.record_failure(now);
        budget.record_success();
        assert!(!budget.in_cooldown(now));
    }
}
