use thiserror::Error;

/// Top-level error type for collaborator clients.
///
/// Covers every failure mode the coordinator has to reason about:
/// authentication, response parsing, transient transport trouble, and
/// bounded-wait timeouts. `printfleet-core` maps these into user-facing
/// diagnostics and decides which ones count against the failure budget.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials rejected or expired. Non-recoverable -- the host must
    /// reauthenticate; retrying will not help.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The service answered but the payload could not be understood.
    #[error("malformed API response: {message}")]
    Parse { message: String },

    /// Connection refused, DNS failure, 5xx, and other retryable trouble.
    #[error("transient API failure: {message}")]
    Transient { message: String },

    /// A bounded wait elapsed without a response.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The device or firmware does not implement the requested operation.
    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },
}

impl ApiError {
    /// Whether the failure is worth retrying on the next poll tick.
    ///
    /// Authentication failures are terminal until the host intervenes;
    /// everything else is counted against the failure budget instead.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ApiError::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;

    #[test]
    fn auth_errors_are_not_recoverable() {
        let err = ApiError::Auth {
            message: "token expired".into(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn transport_errors_are_recoverable() {
        let parse = ApiError::Parse {
            message: "unexpected field".into(),
        };
        let transient = ApiError::Transient {
            message: "connection reset".into(),
        };
        assert!(parse.is_recoverable());
        assert!(transient.is_recoverable());
    }
}
