use thiserror::Error;

/// Result type alias for remote store operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No database URL, or one that is not http(s).
    #[error("Invalid database URL {0:?}")]
    InvalidUrl(String),

    /// Transport-level failure (DNS, TLS, timeout, reset).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not what we expected.
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server cancelled the event stream (rules changed, access lost).
    #[error("Event stream cancelled by server: {0}")]
    Cancelled(String),

    /// The credential used for the event stream expired or was revoked.
    #[error("Credential revoked: {0}")]
    AuthRevoked(String),

    /// The event stream ended.
    #[error("Event stream closed")]
    StreamClosed,

    /// Nothing arrived on the event stream, not even a keep-alive.
    #[error("Event stream idle for {0:?}")]
    StreamIdle(std::time::Duration),

    /// Injected failure from the in-memory store.
    #[error("Simulated remote failure: {0}")]
    Simulated(String),
}

impl RemoteError {
    /// Whether a subscription should be re-established after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http(_)
            | RemoteError::StreamClosed
            | RemoteError::StreamIdle(_)
            | RemoteError::Cancelled(_) => true,
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::AuthRevoked(_) => true,
            RemoteError::InvalidUrl(_) | RemoteError::Decode(_) | RemoteError::Simulated(_) => false,
        }
    }
}
