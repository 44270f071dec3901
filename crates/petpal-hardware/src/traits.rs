//! Link trait definitions.
//!
//! [`LinkOpener`] turns a [`PeripheralAddress`] into an open
//! [`PeripheralLink`]. The connection manager is generic over the opener so
//! the serial implementation and the mock share the same lifecycle code.
//!
//! Methods return `impl Future + Send` rather than using bare `async fn`
//! so the connection manager can be driven from spawned Tokio tasks.
//! Implementations may still be written with `async fn`.

use std::future::Future;

use petpal_core::LinkConfig;

use crate::error::Result;
use crate::types::PeripheralAddress;

/// An open byte-stream connection to the peripheral.
///
/// The peripheral has no framing of its own; callers write complete
/// newline-terminated frames and must not interleave them.
pub trait PeripheralLink: Send {
    /// Write the entire buffer.
    fn write_all(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Push buffered output to the device.
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Discard anything the device has sent so far.
    fn clear_input(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the underlying handle. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens links to a resolved address.
pub trait LinkOpener: Send + Sync {
    /// Link type produced by this opener.
    type Link: PeripheralLink;

    /// Open the endpoint with the configured parameters.
    ///
    /// The settle delay is applied by the caller, not here.
    fn open(
        &self,
        address: &PeripheralAddress,
        config: &LinkConfig,
    ) -> impl Future<Output = Result<Self::Link>> + Send;
}
