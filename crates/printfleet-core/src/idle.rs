// ── Idle debounce ──

use std::time::Duration;

use tokio::time::Instant;

/// Converts instantaneous idle eligibility into a debounced, one-shot
/// close decision.
///
/// The first eligible observation records an idle-since mark. Once
/// eligibility has been sustained past the threshold, `observe` fires
/// exactly once and resets -- it will not fire again until a fresh idle
/// interval accumulates. Any non-eligible observation clears the mark.
#[derive(Debug, Default)]
pub(crate) struct IdleTracker {
    idle_since: Option<Instant>,
}

impl IdleTracker {
    /// Feed one evaluation's eligibility verdict. Returns `true` when the
    /// channel should be closed now.
    pub(crate) fn observe(&mut self, eligible: bool, threshold: Duration, now: Instant) -> bool {
        if !eligible {
            self.idle_since = None;
            return false;
        }

        let since = *self.idle_since.get_or_insert(now);
        if now.duration_since(since) > threshold {
            self.idle_since = None;
            return true;
        }

        false
    }

    /// Forget any accumulated idleness (e.g. after a manual restart).
    pub(crate) fn reset(&mut self) {
        self.idle_since = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::IdleTracker;

    const THRESHOLD: Duration = Duration::from_secs(300);

    #[test]
    fn never_fires_below_threshold() {
        let mut tracker = IdleTracker::default();
        let start = Instant::now();

        for i in 0..10 {
            let now = start + Duration::from_secs(i * 30);
            assert!(!tracker.observe(true, THRESHOLD, now), "fired at {i}");
        }
    }

    #[test]
    fn fires_exactly_once_after_sustained_idle() {
        let mut tracker = IdleTracker::default();
        let start = Instant::now();

        assert!(!tracker.observe(true, THRESHOLD, start));
        assert!(tracker.observe(true, THRESHOLD, start + THRESHOLD + Duration::from_secs(1)));

        // One-shot: the next observation starts a fresh interval.
        let later = start + THRESHOLD + Duration::from_secs(2);
        assert!(!tracker.observe(true, THRESHOLD, later));
        assert!(tracker.observe(true, THRESHOLD, later + THRESHOLD + Duration::from_secs(1)));
    }

    #[test]
    fn activity_resets_the_clock() {
        let mut tracker = IdleTracker::default();
        let start = Instant::now();

        assert!(!tracker.observe(true, THRESHOLD, start));
        assert!(!tracker.observe(false, THRESHOLD, start + Duration::from_secs(200)));

        // The earlier idle span no longer counts.
        let resumed = start + Duration::from_secs(250);
        assert!(!tracker.observe(true, THRESHOLD, resumed));
        assert!(!tracker.observe(true, THRESHOLD, resumed + Duration::from_secs(200)));
        assert!(tracker.observe(true, THRESHOLD, resumed + THRESHOLD + Duration::from_secs(1)));
    }

    #[test]
    fn reset_discards_accumulated_idleness() {
        let mut tracker = IdleTracker::default();
        let start = Instant::now();

        assert!(!tracker.observe(true, THRESHOLD, start));
        tracker.reset();
        assert!(!tracker.observe(true, THRESHOLD, start + THRESHOLD + Duration::from_secs(1)));
    }
}
