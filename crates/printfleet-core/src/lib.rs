//! Connection-lifecycle coordination for a fleet of networked 3D printers.
//!
//! The devices expose two transports with very different costs: a slow
//! authenticated poll API that always works, and a push (pub/sub) channel
//! that delivers realtime events but holds a persistent session the cloud
//! service tolerates poorly when left open unattended. This crate owns the
//! policy of *when that channel should exist* and everything downstream of
//! that decision:
//!
//! - **[`Coordinator`]** — Central facade. [`start()`](Coordinator::start)
//!   runs an initial fleet poll, then spawns the scheduled poll loop and
//!   the push event dispatcher. User actions, push events, and shutdown all
//!   route through it.
//!
//! - **Connection policy** ([`ConnectMode`]) — Pure predicates deciding when
//!   the channel opens (activity, pending actions, manual override) and when
//!   sustained idleness closes it. `NeverConnect` is absolute.
//!
//! - **[`ChannelState`]** — Observable push-channel lifecycle
//!   (`Closed → Starting → Open → Closing`), published on a watch channel.
//!
//! - **[`FleetView`]** — The externally visible snapshot, rebuilt after
//!   every poll or push payload and published on a watch channel.
//!
//! - **Capability-gated registration** ([`EntityDescriptor`],
//!   [`EntityAddition`]) — Optional per-device features are declared up
//!   front and promoted, deferred, or dropped as device capabilities become
//!   known.
//!
//! Transport concerns live behind the [`printfleet_api`] traits; this crate
//! never parses a wire payload.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod registration;
pub mod scheduler;
pub mod snapshot;

mod idle;
mod policy;
mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectMode, CoordinatorConfig};
pub use coordinator::Coordinator;
pub use error::CoreError;
pub use lifecycle::ChannelState;
pub use registration::{CapabilitySnapshot, EntityAddition, EntityDescriptor, Platform};
pub use scheduler::UpdateHealth;
pub use snapshot::{DeviceView, FleetView};
