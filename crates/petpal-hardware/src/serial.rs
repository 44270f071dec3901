//! Serial port link backed by the `serialport` crate.
//!
//! Writes are blocking calls bounded by the configured write timeout. A
//! command frame is at most six bytes, which is a few milliseconds at
//! 9600 baud, so the calls are made directly from the async methods.

use std::io::Write;

use petpal_core::LinkConfig;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace, warn};

use crate::error::{LinkError, Result};
use crate::traits::{LinkOpener, PeripheralLink};
use crate::types::PeripheralAddress;

/// Opens 8N1 serial links with no flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl SerialOpener {
    pub fn new() -> Self {
        Self
    }
}

impl LinkOpener for SerialOpener {
    type Link = SerialLink;

    async fn open(&self, address: &PeripheralAddress, config: &LinkConfig) -> Result<SerialLink> {
        debug!(
            address = %address,
            baud_rate = config.baud_rate,
            "Opening serial port"
        );

        let mut port = serialport::new(address.as_str(), config.baud_rate)
            .timeout(config.write_timeout())
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| LinkError::connect(address, e.to_string()))?;

        // Asserting DTR resets Arduino-class boards; the manager's settle
        // delay covers the bootloader.
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!(address = %address, "Failed to assert DTR: {}", e);
        }

        Ok(SerialLink {
            address: address.clone(),
            port: Some(port),
        })
    }
}

/// An open serial port.
pub struct SerialLink {
    address: PeripheralAddress,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(LinkError::NotConnected)
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("address", &self.address)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl PeripheralLink for SerialLink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let address = self.address.clone();
        trace!(address = %address, len = bytes.len(), "Writing frame");
        self.port()?
            .write_all(bytes)
            .map_err(|e| LinkError::write(&address, e))
    }

    async fn flush(&mut self) -> Result<()> {
        let address = self.address.clone();
        self.port()?
            .flush()
            .map_err(|e| LinkError::write(&address, e))
    }

    async fn clear_input(&mut self) -> Result<()> {
        let address = self.address.clone();
        self.port()?
            .clear(ClearBuffer::Input)
            .map_err(|e| LinkError::connect(&address, format!("failed to purge input: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(address = %self.address, "Serial port closed");
        }
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if self.port.is_some() {
            debug!(address = %self.address, "SerialLink dropped while open - port will be closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_is_connect_error() {
        let opener = SerialOpener::new();
        let address = PeripheralAddress::new("/nonexistent/ttyACM9");

        let result = opener.open(&address, &LinkConfig::default()).await;
        assert!(matches!(result, Err(LinkError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_closed_link_rejects_writes() {
        let mut link = SerialLink {
            address: PeripheralAddress::new("/dev/null"),
            port: None,
        };

        assert!(matches!(
            link.write_all(b"FOOD\n").await,
            Err(LinkError::NotConnected)
        ));
        assert!(link.close().await.is_ok());
    }
}
