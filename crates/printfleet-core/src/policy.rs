// ── Connection policy ──
//
// Pure decision functions over an activity snapshot. No clocks, no locks,
// no channel state mutation -- the coordinator gathers the inputs, calls
// these, and acts on the verdicts under its evaluate lock.

use std::time::Duration;

use printfleet_api::FleetActivity;
use tokio::time::Instant;

use crate::config::ConnectMode;

/// Everything a single policy evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PolicyInputs {
    pub activity: FleetActivity,
    pub mode: ConnectMode,
    /// A user action is still inside its grace window.
    pub action_pending: bool,
    pub manual_override: bool,
    /// Host finished starting up.
    pub host_ready: bool,
    pub shutting_down: bool,
    /// Channel is Starting or Open.
    pub channel_started: bool,
}

/// The mode's activity predicate: "something is happening that requires
/// the channel."
fn mode_active(mode: ConnectMode, activity: FleetActivity) -> bool {
    match mode {
        ConnectMode::NeverConnect => false,
        ConnectMode::PrintingOnly => activity.any_busy,
        ConnectMode::PrintingOrDrying => activity.any_busy || activity.any_drying,
        ConnectMode::DeviceOnline => activity.any_online_or_busy,
        ConnectMode::Always => true,
    }
}

/// The mode's inactivity predicate. Deliberately not `!mode_active`:
/// `PrintingOnly` counts an in-flight job as activity on the way down even
/// though only `busy` opens the channel on the way up.
fn mode_inactive(mode: ConnectMode, activity: FleetActivity) -> bool {
    match mode {
        ConnectMode::NeverConnect => true,
        ConnectMode::PrintingOnly => !activity.any_busy && !activity.any_pending_print,
        ConnectMode::PrintingOrDrying => {
            !activity.any_busy && !activity.any_pending_print && !activity.any_drying
        }
        ConnectMode::DeviceOnline => !activity.any_online_or_busy,
        ConnectMode::Always => false,
    }
}

/// Whether the channel should be opened now.
///
/// `NeverConnect` is absolute: no activity, action, or manual override
/// opens the channel.
pub(crate) fn should_start(inputs: &PolicyInputs) -> bool {
    if inputs.mode == ConnectMode::NeverConnect {
        return false;
    }

    !inputs.channel_started
        && !inputs.shutting_down
        && inputs.host_ready
        && (inputs.action_pending
            || mode_active(inputs.mode, inputs.activity)
            || inputs.manual_override)
}

/// Whether the fleet currently qualifies as idle for the configured mode.
///
/// Forced false while an action's grace window is live -- an in-flight
/// request/response pair must not be torn down by a concurrent idle
/// evaluation. The [`IdleTracker`](crate::idle::IdleTracker) converts this
/// instantaneous signal into a debounced close decision.
pub(crate) fn is_idle_eligible(inputs: &PolicyInputs) -> bool {
    if inputs.action_pending {
        return false;
    }
    mode_inactive(inputs.mode, inputs.activity)
}

/// Whether the channel should be closed now. `idle_fired` is the idle
/// tracker's one-shot verdict for this evaluation.
///
/// Manual override wins over idleness but never over host shutdown.
pub(crate) fn should_stop(inputs: &PolicyInputs, idle_fired: bool) -> bool {
    inputs.channel_started
        && (inputs.shutting_down
            || (idle_fired && !inputs.manual_override && !inputs.action_pending))
}

/// Rolling "last user action" timestamp.
///
/// While within the grace window, stop/idle decisions are suppressed so the
/// action's response can still arrive over the channel.
#[derive(Debug, Default)]
pub(crate) struct ActionTimer {
    last_action: Option<Instant>,
}

impl ActionTimer {
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_action = Some(now);
    }

    pub(crate) fn within_grace(&self, grace: Duration, now: Instant) -> bool {
        self.last_action
            .is_some_and(|last| now.duration_since(last) < grace)
    }
}

#[cfg(test)]
mod tests {
    use printfleet_api::FleetActivity;
    use tokio::time::Instant;

    use super::{ActionTimer, PolicyInputs, is_idle_eligible, should_start, should_stop};
    use crate::config::ConnectMode;

    fn inputs(mode: ConnectMode, activity: FleetActivity) -> PolicyInputs {
        PolicyInputs {
            activity,
            mode,
            action_pending: false,
            manual_override: false,
            host_ready: true,
            shutting_down: false,
            channel_started: false,
        }
    }

    #[test]
    fn printing_only_tracks_busy_flag() {
        let busy = FleetActivity {
            any_busy: true,
            any_online_or_busy: true,
            any_pending_print: true,
            ..Default::default()
        };
        assert!(should_start(&inputs(ConnectMode::PrintingOnly, busy)));
        assert!(!should_start(&inputs(
            ConnectMode::PrintingOnly,
            FleetActivity::default()
        )));
    }

    #[test]
    fn printing_or_drying_also_opens_for_dryers() {
        let drying = FleetActivity {
            any_drying: true,
            any_online_or_busy: true,
            ..Default::default()
        };
        assert!(should_start(&inputs(ConnectMode::PrintingOrDrying, drying)));
        assert!(!should_start(&inputs(ConnectMode::PrintingOnly, drying)));
    }

    #[test]
    fn device_online_opens_for_reachable_idle_devices() {
        let online = FleetActivity {
            any_online_or_busy: true,
            ..Default::default()
        };
        assert!(should_start(&inputs(ConnectMode::DeviceOnline, online)));
        assert!(!should_start(&inputs(ConnectMode::PrintingOnly, online)));
    }

    #[test]
    fn always_mode_opens_unconditionally_and_never_idles() {
        let quiet = inputs(ConnectMode::Always, FleetActivity::default());
        assert!(should_start(&quiet));
        assert!(!is_idle_eligible(&quiet));
    }

    #[test]
    fn never_connect_is_absolute() {
        let mut i = inputs(
            ConnectMode::NeverConnect,
            FleetActivity {
                any_busy: true,
                any_online_or_busy: true,
                any_pending_print: true,
                any_drying: true,
            },
        );
        i.manual_override = true;
        i.action_pending = true;
        assert!(!should_start(&i));
        assert!(is_idle_eligible(&inputs(
            ConnectMode::NeverConnect,
            FleetActivity::default()
        )));
    }

    #[test]
    fn start_requires_host_ready_and_not_shutting_down() {
        let busy = FleetActivity {
            any_busy: true,
            any_online_or_busy: true,
            any_pending_print: true,
            ..Default::default()
        };
        let mut i = inputs(ConnectMode::PrintingOnly, busy);
        i.host_ready = false;
        assert!(!should_start(&i));
        i.host_ready = true;
        i.shutting_down = true;
        assert!(!should_start(&i));
    }

    #[test]
    fn start_is_a_noop_while_channel_already_started() {
        let busy = FleetActivity {
            any_busy: true,
            any_online_or_busy: true,
            any_pending_print: true,
            ..Default::default()
        };
        let mut i = inputs(ConnectMode::PrintingOnly, busy);
        i.channel_started = true;
        assert!(!should_start(&i));
    }

    #[test]
    fn pending_print_blocks_idle_even_when_not_busy() {
        let settling = FleetActivity {
            any_pending_print: true,
            any_online_or_busy: true,
            ..Default::default()
        };
        assert!(!is_idle_eligible(&inputs(ConnectMode::PrintingOnly, settling)));
    }

    #[test]
    fn grace_window_suppresses_stop_and_idle() {
        let mut i = inputs(ConnectMode::PrintingOnly, FleetActivity::default());
        i.channel_started = true;
        i.action_pending = true;
        assert!(!is_idle_eligible(&i));
        assert!(!should_stop(&i, true));
    }

    #[test]
    fn manual_override_blocks_idle_stop_but_not_shutdown() {
        let mut i = inputs(ConnectMode::PrintingOnly, FleetActivity::default());
        i.channel_started = true;
        i.manual_override = true;
        assert!(!should_stop(&i, true));
        i.shutting_down = true;
        assert!(should_stop(&i, false));
    }

    #[test]
    fn action_timer_grace_window_expires() {
        let mut timer = ActionTimer::default();
        let start = Instant::now();
        let grace = std::time::Duration::from_secs(60);

        assert!(!timer.within_grace(grace, start));
        timer.touch(start);
        assert!(timer.within_grace(grace, start + std::time::Duration::from_secs(59)));
        assert!(!timer.within_grace(grace, start + std::time::Duration::from_secs(60)));
    }
}
