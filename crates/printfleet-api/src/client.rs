// ── Collaborator contracts ──
//
// The coordinator never talks to the wire directly. It consumes two
// abstract clients: a slow authenticated poll surface and an optional
// persistent push (pub/sub) channel. Real implementations own HTTP/MQTT
// framing, credential persistence, and payload parsing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::command::DeviceCommand;
use crate::error::ApiError;
use crate::model::{DeviceId, DeviceStatus};

/// Request/response fetch of full device state plus the command surface.
///
/// Credential storage and refresh is entirely the implementor's concern;
/// the coordinator only learns whether the session is still valid.
#[async_trait]
pub trait PollClient: Send + Sync {
    /// Re-validate (and, if the implementation supports it, re-save) the
    /// session credentials. `Ok(false)` means the credentials were rejected.
    async fn validate_credentials(&self) -> Result<bool, ApiError>;

    /// Fetch the full current state of one device.
    async fn poll_device(&self, id: DeviceId) -> Result<DeviceStatus, ApiError>;

    /// Send a command to one device. Callers must have confirmed the push
    /// channel is open first, otherwise the device will never answer.
    async fn send_command(&self, id: DeviceId, command: DeviceCommand) -> Result<(), ApiError>;
}

/// Asynchronous event delivered by the push channel.
///
/// Replaces per-callback registration with a single typed stream consumed
/// by one dispatch point, so inbound events never mutate coordinator state
/// reentrantly.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// Device state changed; the payload is the already-parsed new status.
    /// The coordinator applies it to its store before republishing the
    /// externally visible snapshot.
    DataChanged { id: DeviceId, status: DeviceStatus },
    /// A print job started on the device.
    JobStarted { id: DeviceId },
    /// The session's per-device subscriptions are confirmed.
    Subscribed,
}

/// Persistent pub/sub channel delivering asynchronous device events.
///
/// `connect()` drives the session: it resolves only when the session ends
/// (normally after `disconnect()`, or on an unrecoverable session error).
/// The coordinator spawns it as a background task and observes progress
/// through `wait_for_connect` / `wait_for_disconnect`.
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Run the session until it ends. Spawned, never awaited inline.
    async fn connect(&self) -> Result<(), ApiError>;

    /// Request session teardown. Returns once the request is issued;
    /// confirmation arrives via [`wait_for_disconnect`](Self::wait_for_disconnect).
    async fn disconnect(&self) -> Result<(), ApiError>;

    /// Register interest in one device's topics.
    async fn subscribe(&self, device: &DeviceStatus) -> Result<(), ApiError>;

    /// Drop one device's subscriptions.
    async fn unsubscribe(&self, device: &DeviceStatus) -> Result<(), ApiError>;

    fn is_connected(&self) -> bool;

    /// Wait until the session is established, bounded. `false` on timeout.
    async fn wait_for_connect(&self, timeout: Duration) -> bool;

    /// Wait until the session has fully torn down. The coordinator always
    /// bounds this wait itself -- implementations may block indefinitely.
    async fn wait_for_disconnect(&self);

    /// Subscribe to the typed event stream.
    fn events(&self) -> broadcast::Receiver<PushEvent>;
}
