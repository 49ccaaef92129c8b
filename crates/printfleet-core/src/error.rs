// ── Core error types ──
//
// User-facing errors from printfleet-core. Consumers never see transport
// failures raw -- the `From<ApiError>` impl translates collaborator errors
// into domain-appropriate variants.

use printfleet_api::ApiError;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Credentials rejected. Polling halts until the host reauthenticates.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A recoverable poll failure. The previous snapshot stays visible;
    /// the failure budget decides when to impose a cooldown.
    #[error("fleet update failed: {message}")]
    UpdateFailed { message: String },

    /// `ensure_connected_for_action` gave up waiting for the channel.
    /// The triggering action must be treated as aborted.
    #[error("push channel unavailable (not open after {timeout_secs}s)")]
    ChannelUnavailable { timeout_secs: u64 },

    /// A command was addressed to a device this coordinator does not manage.
    #[error("device not found: {id}")]
    DeviceNotFound { id: printfleet_api::DeviceId },

    /// A command failed after the channel was confirmed open.
    #[error("device command failed: {message}")]
    CommandFailed { message: String },
}

impl From<ApiError> for CoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth { message } => CoreError::AuthenticationFailed { message },
            ApiError::Parse { message } | ApiError::Transient { message } => {
                CoreError::UpdateFailed { message }
            }
            ApiError::Timeout { timeout_secs } => CoreError::UpdateFailed {
                message: format!("request timed out after {timeout_secs}s"),
            },
            ApiError::Unsupported { operation } => CoreError::CommandFailed {
                message: format!("operation not supported: {operation}"),
            },
        }
    }
}
