// ── Published snapshot ──
//
// The externally visible state object. Thin by design: it projects the
// device model into serializable view types and attaches coordinator
// flags. Presentation layers consume it via the coordinator's watch
// channel and never touch the store directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use printfleet_api::{DeviceId, DeviceStatus};
use serde::Serialize;
use serde_json::json;

/// Externally visible state of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: DeviceId,
    pub name: String,
    pub online: bool,
    pub busy: bool,
    pub available: bool,
    pub job_name: Option<String>,
    pub job_in_progress: bool,
    pub job_progress_pct: Option<f64>,
    pub drying: bool,
    pub fw_version: Option<String>,
    /// Free-form supplementary attributes keyed by state name.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl DeviceView {
    fn from_status(status: &DeviceStatus) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "current_status".to_owned(),
            json!({
                "model": status.model,
                "material_kind": status.material_kind,
                "supports_station": status.supports_station,
                "station_count": status.station_count,
            }),
        );
        attributes.insert(
            "drying".to_owned(),
            json!({
                "primary": status.primary_drying,
                "secondary": status.secondary_drying,
            }),
        );
        attributes.insert(
            "file_lists".to_owned(),
            json!({
                "local": status.local_files,
                "usb": status.usb_files,
            }),
        );

        Self {
            id: status.id,
            name: status.name.clone(),
            online: status.online,
            busy: status.busy,
            available: status.available,
            job_name: status.job.name.clone(),
            job_in_progress: status.job.in_progress,
            job_progress_pct: status.job.progress_pct,
            drying: status.is_drying(),
            fw_version: status.fw_version.clone(),
            attributes,
        }
    }
}

/// Externally visible state of the whole fleet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetView {
    pub devices: BTreeMap<DeviceId, DeviceView>,
    /// Manual connect override currently engaged.
    pub manual_override: bool,
    /// Push channel currently started (Starting or Open).
    pub channel_active: bool,
    /// The last poll failed; data shown is the last good snapshot.
    pub stale: bool,
}

impl FleetView {
    pub(crate) fn build<'a, I>(
        statuses: I,
        manual_override: bool,
        channel_active: bool,
        stale: bool,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Arc<DeviceStatus>>,
    {
        let devices = statuses
            .into_iter()
            .map(|status| (status.id, DeviceView::from_status(status)))
            .collect();
        Self {
            devices,
            manual_override,
            channel_active,
            stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use printfleet_api::{DeviceId, DeviceStatus};

    use super::FleetView;

    #[test]
    fn build_projects_devices_and_flags() {
        let mut status = DeviceStatus::new(DeviceId(5), "kobra");
        status.primary_drying.active = true;
        status.job.name = Some("benchy.gcode".into());
        let statuses = vec![Arc::new(status)];

        let view = FleetView::build(&statuses, true, false, false);
        assert!(view.manual_override);
        assert!(!view.channel_active);

        let device = view.devices.get(&DeviceId(5)).expect("device present");
        assert!(device.drying);
        assert_eq!(device.job_name.as_deref(), Some("benchy.gcode"));
        assert!(device.attributes.contains_key("current_status"));
    }
}
