// ── Coordinator configuration ──
//
// Every tunable the control loop consults. Built by the host and handed
// in whole -- the core never reads config files or persisted options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// When the push channel should be open.
///
/// Immutable per configuration load; changing it means rebuilding the
/// coordinator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// Never open the channel, regardless of activity or manual override.
    NeverConnect,
    /// Open while any device is printing.
    #[default]
    PrintingOnly,
    /// Open while any device is printing or drying filament.
    PrintingOrDrying,
    /// Open while any device is reachable.
    DeviceOnline,
    /// Keep the channel open unconditionally.
    Always,
}

/// Timing and budget knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub connect_mode: ConnectMode,

    /// Scheduler tick. Each tick re-evaluates whether a fleet poll is due.
    pub poll_interval: Duration,
    /// Minimum spacing between full fleet polls; ticks inside this window
    /// only rebuild the published snapshot from cached state.
    pub min_poll_interval: Duration,
    /// After a forced update, how soon the next natural poll lands.
    pub post_action_poll_delay: Duration,

    /// Grace window after a user action during which stop/idle decisions
    /// are suppressed (the last action is still awaiting its response).
    pub action_grace: Duration,
    /// Sustained idleness required before the channel is closed.
    pub idle_threshold: Duration,

    /// Consecutive recoverable poll failures tolerated before a cooldown.
    pub max_failed_polls: u32,
    /// How long polling pauses once the failure budget is exhausted.
    pub failure_cooldown: Duration,

    /// Minimum spacing between manual channel refreshes.
    pub refresh_cooldown: Duration,
    /// Settle delay between the stop and restart halves of a refresh.
    /// Empirically load-bearing in the field; kept configurable.
    pub refresh_settle: Duration,

    /// Bound on waiting for the session to report connected.
    pub connect_timeout: Duration,
    /// Bound on waiting for disconnect confirmation; teardown proceeds
    /// regardless once it elapses.
    pub disconnect_timeout: Duration,

    /// Delay between a job-started push event and the follow-up poll.
    pub job_started_poll_delay: Duration,
    /// Delay after subscription confirmation before querying device options.
    pub subscribe_settle: Duration,
    /// Delay before re-checking a requested local file listing.
    pub file_recheck_delay: Duration,

    /// Initial state of the manual connect override.
    pub manual_override: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connect_mode: ConnectMode::default(),
            poll_interval: Duration::from_secs(20),
            min_poll_interval: Duration::from_secs(120),
            post_action_poll_delay: Duration::from_secs(10),
            action_grace: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(300),
            max_failed_polls: 3,
            failure_cooldown: Duration::from_secs(300),
            refresh_cooldown: Duration::from_secs(60),
            refresh_settle: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(10),
            job_started_poll_delay: Duration::from_secs(15),
            subscribe_settle: Duration::from_secs(10),
            file_recheck_delay: Duration::from_secs(5),
            manual_override: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::ConnectMode;

    #[test]
    fn connect_mode_round_trips_through_strings() {
        for mode in [
            ConnectMode::NeverConnect,
            ConnectMode::PrintingOnly,
            ConnectMode::PrintingOrDrying,
            ConnectMode::DeviceOnline,
            ConnectMode::Always,
        ] {
            let text = mode.to_string();
            assert_eq!(ConnectMode::from_str(&text).expect("parse"), mode);
        }
    }
}
