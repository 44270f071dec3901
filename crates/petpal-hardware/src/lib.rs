//! Peripheral link layer for the PetPal bridge.
//!
//! This crate owns everything between a [`MotorCommand`](petpal_core::MotorCommand)
//! and the bytes on the serial line:
//!
//! - **Discovery**: [`PortResolver`] implementations find the endpoint by
//!   explicit path, USB vendor/product signature, or filesystem glob.
//! - **Links**: the [`PeripheralLink`](traits::PeripheralLink) and
//!   [`LinkOpener`](traits::LinkOpener) traits, implemented over
//!   `serialport` by [`SerialOpener`] and in memory by the `mock` module
//!   (behind the `mock` feature).
//! - **Lifecycle**: [`ConnectionManager`] drives the
//!   `Disconnected -> Connecting -> Connected` state machine with capped
//!   exponential [`Backoff`] and a terminal `Failed` state.
//! - **Transmission**: [`CommandChannel`] serializes all writes from any
//!   number of producers and trips a fatal latch after repeated failures.
//!
//! # Example
//!
//! ```
//! use petpal_core::{LinkConfig, MotorCommand};
//! use petpal_hardware::mock::{MockOpener, MockResolver};
//! use petpal_hardware::{CommandChannel, ConnectionManager};
//!
//! #[tokio::main(flavor = "current_thread", start_paused = true)]
//! async fn main() {
//!     let (opener, handle) = MockOpener::new();
//!     let manager = ConnectionManager::new(
//!         MockResolver::found("/dev/ttyACM0"),
//!         opener,
//!         LinkConfig::default(),
//!     );
//!     let channel = CommandChannel::new(manager, 3);
//!
//!     let producer = channel.clone();
//!     let task = tokio::spawn(async move { producer.send(MotorCommand::Food).await });
//!     channel.send(MotorCommand::Water).await.unwrap();
//!     task.await.unwrap().unwrap();
//!
//!     assert_eq!(handle.lines().len(), 2);
//! }
//! ```

pub mod channel;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod resolver;
pub mod serial;
pub mod state;
pub mod traits;
pub mod types;

pub use channel::{Ack, ChannelStatus, CommandChannel, FatalLinkFailure, FatalReason, SendError};
pub use connection::ConnectionManager;
pub use error::{LinkError, Result};
pub use resolver::{AnyPortResolver, PortResolver, list_ports};
pub use serial::{SerialLink, SerialOpener};
pub use state::LinkState;
pub use types::{Backoff, ConnectionInfo, DiscoveredPort, PeripheralAddress};
