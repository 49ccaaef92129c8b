// ── Shared device model ──
//
// The read-only derived fields the coordinator consumes. Wire clients
// populate a `DeviceStatus` from whatever the cloud returns; the
// coordinator never sees raw payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable numeric device identifier assigned by the cloud account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Printing process family. Gates which optional features a device can
/// ever expose (e.g. resin machines have no filament station).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Fdm,
    Resin,
}

/// Which material-station bay a command or capability refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationSlot {
    Primary,
    Secondary,
}

impl StationSlot {
    /// Number of connected station units required for this slot to exist.
    pub fn required_units(self) -> u8 {
        match self {
            StationSlot::Primary => 1,
            StationSlot::Secondary => 2,
        }
    }
}

/// Latest print job as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub name: Option<String>,
    pub in_progress: bool,
    pub paused: bool,
    pub complete: bool,
    pub failed: bool,
    pub progress_pct: Option<f64>,
}

/// Filament-drying state for one station slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DryingStatus {
    pub active: bool,
    pub target_temp: Option<f64>,
    pub remaining_minutes: Option<u32>,
}

/// One entry of a device-side file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: Option<u64>,
}

/// Full state of one managed device, as of the last poll or push payload.
///
/// This is the boundary type between wire clients and the coordinator:
/// poll responses and `DataChanged` push payloads both deliver it whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub name: String,
    pub model: Option<String>,
    pub online: bool,
    pub busy: bool,
    pub available: bool,
    pub material_kind: MaterialKind,
    /// Whether the firmware supports an external material station at all.
    pub supports_station: bool,
    /// Connected station units (0 when none attached).
    pub station_count: u8,
    pub job: JobState,
    pub primary_drying: DryingStatus,
    pub secondary_drying: DryingStatus,
    /// `None` until a file listing has been requested and answered.
    pub local_files: Option<Vec<FileEntry>>,
    pub usb_files: Option<Vec<FileEntry>>,
    pub fw_version: Option<String>,
}

impl DeviceStatus {
    /// Minimal constructor for an idle, online FDM device. Wire clients
    /// and tests fill in the rest field-by-field.
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            model: None,
            online: true,
            busy: false,
            available: true,
            material_kind: MaterialKind::Fdm,
            supports_station: false,
            station_count: 0,
            job: JobState::default(),
            primary_drying: DryingStatus::default(),
            secondary_drying: DryingStatus::default(),
            local_files: None,
            usb_files: None,
            fw_version: None,
        }
    }

    /// Either station slot is actively drying filament.
    pub fn is_drying(&self) -> bool {
        self.primary_drying.active || self.secondary_drying.active
    }

    /// Busy now, or a job is still in flight (covers the window where the
    /// device reports idle but the job has not finished uploading/settling).
    pub fn print_pending(&self) -> bool {
        self.busy || self.job.in_progress
    }

    /// Reachable for the purposes of the `DeviceOnline` connect mode.
    pub fn online_or_busy(&self) -> bool {
        self.online || self.busy
    }
}

/// Per-evaluation summary of fleet activity, recomputed from the latest
/// device statuses. Owned exclusively by the evaluation call -- never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetActivity {
    pub any_busy: bool,
    pub any_drying: bool,
    pub any_online_or_busy: bool,
    pub any_pending_print: bool,
}

impl FleetActivity {
    pub fn from_statuses<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a DeviceStatus>,
    {
        let mut activity = Self::default();
        for status in statuses {
            activity.any_busy |= status.busy;
            activity.any_drying |= status.is_drying();
            activity.any_online_or_busy |= status.online_or_busy();
            activity.any_pending_print |= status.print_pending();
        }
        activity
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceId, DeviceStatus, FleetActivity};

    #[test]
    fn fleet_activity_aggregates_across_devices() {
        let mut a = DeviceStatus::new(DeviceId(1), "mono");
        a.online = false;
        let mut b = DeviceStatus::new(DeviceId(2), "kobra");
        b.busy = true;
        b.job.in_progress = true;

        let activity = FleetActivity::from_statuses([&a, &b]);
        assert!(activity.any_busy);
        assert!(activity.any_online_or_busy);
        assert!(activity.any_pending_print);
        assert!(!activity.any_drying);
    }

    #[test]
    fn pending_print_outlives_busy_flag() {
        let mut status = DeviceStatus::new(DeviceId(3), "max");
        status.busy = false;
        status.job.in_progress = true;
        assert!(status.print_pending());
    }
}
