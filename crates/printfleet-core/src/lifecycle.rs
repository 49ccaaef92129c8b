// ── Push-channel lifecycle ──
//
// Single owner of the push-channel handle. All state transitions happen
// here, and callers serialize through the coordinator's evaluate lock --
// two overlapping evaluations can never both decide to start.

use std::sync::Arc;
use std::time::Duration;

use printfleet_api::{DeviceStatus, PushClient};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Observable state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Starting,
    Open,
    Closing,
}

impl ChannelState {
    /// Starting or Open -- a session exists (or is being established).
    pub fn is_started(self) -> bool {
        matches!(self, ChannelState::Starting | ChannelState::Open)
    }
}

/// Supervises the background session task and the channel state machine.
pub(crate) struct PushChannel {
    client: Arc<dyn PushClient>,
    state: watch::Sender<ChannelState>,
    session_task: Mutex<Option<JoinHandle<()>>>,
    connect_timeout: Duration,
}

impl PushChannel {
    pub(crate) fn new(client: Arc<dyn PushClient>, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Closed);
        Self {
            client,
            state,
            session_task: Mutex::new(None),
            connect_timeout,
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// Open the channel: register every managed device, then spawn the
    /// session task. Fire-and-forget -- the state flips to Open once the
    /// session confirms, or back to Closed if it fails.
    ///
    /// Idempotent: a no-op unless the channel is fully Closed.
    pub(crate) async fn start(&self, devices: &[Arc<DeviceStatus>]) {
        if self.state() != ChannelState::Closed {
            return;
        }
        let _ = self.state.send(ChannelState::Starting);

        for device in devices {
            if let Err(e) = self.client.subscribe(device).await {
                warn!(device = %device.id, error = %e, "device subscription failed");
            }
        }

        let mut slot = self.session_task.lock().await;
        if slot.as_ref().is_none_or(JoinHandle::is_finished) {
            debug!("spawning push session task");
            *slot = Some(tokio::spawn(run_session(
                Arc::clone(&self.client),
                self.state.clone(),
                self.connect_timeout,
            )));
        }
    }

    /// Close the channel: best-effort per-device unsubscribe, request
    /// disconnect, bounded wait for confirmation, then cancel the session
    /// task if it is still running. Always reaches Closed within a bounded
    /// time -- a single device's unsubscribe failure never hangs shutdown.
    pub(crate) async fn stop(&self, devices: &[Arc<DeviceStatus>], disconnect_timeout: Duration) {
        if matches!(self.state(), ChannelState::Closed | ChannelState::Closing) {
            return;
        }
        let _ = self.state.send(ChannelState::Closing);

        for device in devices {
            if let Err(e) = self.client.unsubscribe(device).await {
                warn!(device = %device.id, error = %e, "unsubscribe failed (continuing)");
            }
        }

        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "disconnect request failed (continuing)");
        }

        if timeout(disconnect_timeout, self.client.wait_for_disconnect())
            .await
            .is_err()
        {
            warn!("disconnect confirmation timed out; tearing down anyway");
        }

        if let Some(handle) = self.session_task.lock().await.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let _ = self.state.send(ChannelState::Closed);
        debug!("push channel closed");
    }

    /// Block (bounded) until the channel reaches Open. `false` on timeout.
    pub(crate) async fn wait_open(&self, wait: Duration) -> bool {
        let mut rx = self.state.subscribe();
        timeout(wait, rx.wait_for(|s| *s == ChannelState::Open))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

/// Drives one push session: runs the client's session future, flips the
/// state to Open once the connection confirms, and back to Closed when the
/// session ends for any reason. A connect failure leaves the state Closed
/// and lets the next periodic evaluation retry.
async fn run_session(
    client: Arc<dyn PushClient>,
    state: watch::Sender<ChannelState>,
    connect_timeout: Duration,
) {
    let session = client.connect();
    tokio::pin!(session);

    tokio::select! {
        result = &mut session => {
            // Session ended before ever confirming the connection.
            match result {
                Ok(()) => debug!("push session ended before connecting"),
                Err(e) => warn!(error = %e, "push session failed to establish"),
            }
            demote_to_closed(&state);
            return;
        }
        confirmed = client.wait_for_connect(connect_timeout) => {
            if confirmed {
                let flipped = state.send_if_modified(|s| {
                    if *s == ChannelState::Starting {
                        *s = ChannelState::Open;
                        true
                    } else {
                        false
                    }
                });
                if flipped {
                    debug!("push channel open");
                }
            } else {
                warn!(
                    timeout_secs = connect_timeout.as_secs(),
                    "push channel did not confirm in time; abandoning session"
                );
                demote_to_closed(&state);
                return;
            }
        }
    }

    match session.await {
        Ok(()) => debug!("push session ended"),
        Err(e) => warn!(error = %e, "push session terminated with error"),
    }
    demote_to_closed(&state);
}

/// Closed unless a stop sequence already owns the transition.
fn demote_to_closed(state: &watch::Sender<ChannelState>) {
    state.send_if_modified(|s| {
        if matches!(*s, ChannelState::Starting | ChannelState::Open) {
            *s = ChannelState::Closed;
            true
        } else {
            false
        }
    });
}
