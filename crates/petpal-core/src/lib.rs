//! Shared domain types for the PetPal bridge.
//!
//! Everything in here is plain data: the motor commands the appliance
//! understands, the canonical time-of-day key used for schedule matching,
//! the remote schedule record, and the bridge configuration. No I/O beyond
//! reading a configuration file.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{
    BridgeConfig, DiscoveryConfig, DryRunConfig, LinkConfig, RemoteConfig, ScheduleConfig, UsbId,
};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
