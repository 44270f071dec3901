//! Error types for peripheral link operations.
//!
//! The variants follow the lifecycle of the link: discovery of the port,
//! opening it, writing to it, and the terminal state reached when the
//! connection manager gives up.

use crate::state::LinkState;
use crate::types::PeripheralAddress;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur while managing the peripheral link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No candidate port matched.
    #[error("No peripheral found (searched {searched})")]
    Discovery { searched: String },

    /// A discovery pattern could not be used.
    #[error("Invalid discovery pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The port exists but could not be opened or prepared.
    #[error("Failed to open {address}: {message}")]
    Connect {
        address: PeripheralAddress,
        message: String,
    },

    /// Writing or flushing a command failed.
    #[error("Write to {address} failed: {source}")]
    Write {
        address: PeripheralAddress,
        #[source]
        source: std::io::Error,
    },

    /// No link is open.
    #[error("Link not connected")]
    NotConnected,

    /// Every connection attempt failed; the manager is now terminal.
    #[error("Connection attempts exhausted after {attempts} tries: {last}")]
    Exhausted { attempts: u32, last: Box<LinkError> },

    /// The manager already reached terminal failure.
    #[error("Link manager is in terminal failure state")]
    Terminal,

    /// Internal state machine violation.
    #[error("Invalid link state transition from {from} to {to}")]
    InvalidTransition { from: LinkState, to: LinkState },
}

impl LinkError {
    /// Create a new discovery error.
    pub fn discovery(searched: impl Into<String>) -> Self {
        Self::Discovery {
            searched: searched.into(),
        }
    }

    /// Create a new connect error.
    pub fn connect(address: &PeripheralAddress, message: impl Into<String>) -> Self {
        Self::Connect {
            address: address.clone(),
            message: message.into(),
        }
    }

    /// Create a new write error.
    pub fn write(address: &PeripheralAddress, source: std::io::Error) -> Self {
        Self::Write {
            address: address.clone(),
            source,
        }
    }

    /// Whether the connection manager's backoff loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Discovery { .. } | Self::Connect { .. })
    }
}
