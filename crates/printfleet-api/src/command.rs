use serde::{Deserialize, Serialize};

use crate::model::StationSlot;

/// Typed command surface for one device.
///
/// Every command rides the poll client's authenticated session, but the
/// device only answers while the push channel is open -- callers go through
/// the coordinator's ensure-connected path first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum DeviceCommand {
    PausePrint,
    ResumePrint,
    CancelPrint,
    StartDrying {
        slot: StationSlot,
        minutes: u32,
        target_temp: f64,
    },
    StopDrying {
        slot: StationSlot,
    },
    SetAutoFeed {
        slot: StationSlot,
        enabled: bool,
    },
    /// Ask the device to publish its on-board file listing.
    RequestLocalFiles,
    RequestUsbFiles,
    /// Refresh the account-level cloud file listing.
    RequestCloudFiles,
    /// Query option/peripheral state; sent to each online device after the
    /// push channel confirms its subscriptions.
    QueryOptions,
}

impl DeviceCommand {
    /// Short stable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::PausePrint => "pause_print",
            DeviceCommand::ResumePrint => "resume_print",
            DeviceCommand::CancelPrint => "cancel_print",
            DeviceCommand::StartDrying { .. } => "start_drying",
            DeviceCommand::StopDrying { .. } => "stop_drying",
            DeviceCommand::SetAutoFeed { .. } => "set_auto_feed",
            DeviceCommand::RequestLocalFiles => "request_local_files",
            DeviceCommand::RequestUsbFiles => "request_usb_files",
            DeviceCommand::RequestCloudFiles => "request_cloud_files",
            DeviceCommand::QueryOptions => "query_options",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::DeviceCommand;
    use crate::model::StationSlot;

    #[test]
    fn commands_serialize_under_a_command_tag() {
        let value = serde_json::to_value(DeviceCommand::StartDrying {
            slot: StationSlot::Primary,
            minutes: 240,
            target_temp: 55.0,
        })
        .expect("serialize");

        assert_eq!(
            value,
            json!({
                "command": "start_drying",
                "slot": "primary",
                "minutes": 240,
                "target_temp": 55.0,
            })
        );
    }

    #[test]
    fn unit_commands_round_trip() {
        let parsed: DeviceCommand =
            serde_json::from_value(json!({ "command": "pause_print" })).expect("deserialize");
        assert_eq!(parsed, DeviceCommand::PausePrint);
    }
}
