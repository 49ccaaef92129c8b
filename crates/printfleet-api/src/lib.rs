//! Collaborator contracts for the printfleet coordinator.
//!
//! `printfleet-core` drives a fleet of cloud-connected printers through two
//! abstract surfaces defined here:
//!
//! - **[`PollClient`]** -- slow authenticated request/response fetch of full
//!   device state, plus the typed [`DeviceCommand`] surface.
//! - **[`PushClient`]** -- optional persistent pub/sub channel delivering
//!   [`PushEvent`]s (data changed, job started, subscriptions confirmed)
//!   through a single broadcast stream.
//!
//! The crate also owns the shared device model ([`DeviceStatus`] and its
//! derived activity/capability fields) and the transport error taxonomy
//! ([`ApiError`]). Wire concerns -- HTTP/MQTT framing, authentication flows,
//! credential persistence, payload parsing -- belong to implementors.

pub mod client;
pub mod command;
pub mod error;
pub mod model;

pub use client::{PollClient, PushClient, PushEvent};
pub use command::DeviceCommand;
pub use error::ApiError;
pub use model::{
    DeviceId, DeviceStatus, DryingStatus, FileEntry, FleetActivity, JobState, MaterialKind,
    StationSlot,
};
