use petpal_hardware::FatalLinkFailure;
use petpal_remote::RemoteError;
use thiserror::Error;

/// Reasons the dispatcher stops before it is cancelled.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The appliance is unreachable; operator intervention is required.
    #[error("Fatal link failure: {0}")]
    FatalLink(#[from] FatalLinkFailure),

    /// The command feed could not be started.
    #[error("Failed to subscribe to remote commands: {0}")]
    Subscribe(#[source] RemoteError),

    /// Startup failed for a reason other than the link.
    #[error("Dispatcher startup failed: {0}")]
    Startup(String),
}

impl DispatchError {
    pub fn is_fatal_link(&self) -> bool {
        matches!(self, DispatchError::FatalLink(_))
    }
}
