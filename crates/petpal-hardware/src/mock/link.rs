//! Mock opener and link.
//!
//! All bytes written through any [`MockLink`] produced by a [`MockOpener`]
//! land in one shared transcript, in the order they were written. Failures
//! are injected through the [`MockLinkHandle`].

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petpal_core::LinkConfig;

use crate::error::{LinkError, Result};
use crate::traits::{LinkOpener, PeripheralLink};
use crate::types::PeripheralAddress;

#[derive(Debug, Default)]
struct MockLinkState {
    transcript: Vec<u8>,
    open_failures_remaining: u32,
    write_failures_remaining: u32,
    writes_failing: bool,
    byte_by_byte: bool,
    opens: u32,
    open_attempts: u32,
    closes: u32,
    clears: u32,
    opened_addresses: Vec<PeripheralAddress>,
}

/// Handle for controlling and inspecting mock links.
///
/// Cloning the handle shares the underlying state.
///
/// # Examples
///
/// ```
/// use petpal_hardware::mock::MockOpener;
/// use petpal_hardware::traits::{LinkOpener, PeripheralLink};
/// use petpal_hardware::PeripheralAddress;
/// use petpal_core::LinkConfig;
///
/// #[tokio::main]
/// async fn main() -> petpal_hardware::Result<()> {
///     let (opener, handle) = MockOpener::new();
///     handle.fail_next_opens(1);
///
///     let address = PeripheralAddress::new("/dev/ttyACM0");
///     assert!(opener.open(&address, &LinkConfig::default()).await.is_err());
///
///     let mut link = opener.open(&address, &LinkConfig::default()).await?;
///     link.write_all(b"FOOD\n").await?;
///     assert_eq!(handle.lines(), vec!["FOOD"]);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockLinkHandle {
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLinkHandle {
    fn lock(&self) -> MutexGuard<'_, MockLinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().open_failures_remaining = count;
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().write_failures_remaining = count;
    }

    /// Make every write fail until turned off again.
    pub fn set_writes_failing(&self, failing: bool) {
        self.lock().writes_failing = failing;
    }

    /// Write one byte at a time, yielding to the scheduler between bytes.
    ///
    /// Unserialized concurrent writers then interleave visibly in the
    /// transcript.
    pub fn set_byte_by_byte(&self, enabled: bool) {
        self.lock().byte_by_byte = enabled;
    }

    /// Every byte written so far.
    pub fn transcript(&self) -> Vec<u8> {
        self.lock().transcript.clone()
    }

    /// Transcript split into lines, terminators removed.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.lock().transcript)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Successful opens.
    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    /// Open attempts, failed ones included.
    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }

    pub fn clear_count(&self) -> u32 {
        self.lock().clears
    }

    pub fn opened_addresses(&self) -> Vec<PeripheralAddress> {
        self.lock().opened_addresses.clone()
    }
}

/// Opener producing [`MockLink`]s.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    handle: MockLinkHandle,
}

impl MockOpener {
    /// Create an opener and the handle controlling its links.
    pub fn new() -> (Self, MockLinkHandle) {
        let handle = MockLinkHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl LinkOpener for MockOpener {
    type Link = MockLink;

    async fn open(&self, address: &PeripheralAddress, _config: &LinkConfig) -> Result<MockLink> {
        let mut state = self.handle.lock();
        state.open_attempts += 1;

        if state.open_failures_remaining > 0 {
            state.open_failures_remaining -= 1;
            return Err(LinkError::connect(address, "mock open failure"));
        }

        state.opens += 1;
        state.opened_addresses.push(address.clone());

        Ok(MockLink {
            handle: self.handle.clone(),
            address: address.clone(),
            open: true,
        })
    }
}

/// In-memory link writing into the shared transcript.
#[derive(Debug)]
pub struct MockLink {
    handle: MockLinkHandle,
    address: PeripheralAddress,
    open: bool,
}

impl MockLink {
    fn check_write(&self) -> Result<bool> {
        if !self.open {
            return Err(LinkError::NotConnected);
        }

        let mut state = self.handle.lock();
        if state.writes_failing || state.write_failures_remaining > 0 {
            state.write_failures_remaining = state.write_failures_remaining.saturating_sub(1);
            return Err(LinkError::write(
                &self.address,
                io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"),
            ));
        }
        Ok(state.byte_by_byte)
    }
}

impl PeripheralLink for MockLink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let byte_by_byte = self.check_write()?;

        if byte_by_byte {
            for byte in bytes {
                self.handle.lock().transcript.push(*byte);
                tokio::task::yield_now().await;
            }
        } else {
            self.handle.lock().transcript.extend_from_slice(bytes);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.handle.lock().clears += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.handle.lock().closes += 1;
        }
        Ok(())
    }
}
