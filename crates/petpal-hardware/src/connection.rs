//! Connection lifecycle management.
//!
//! The [`ConnectionManager`] owns the open link and its health flag and
//! drives the [`LinkStateMachine`]:
//!
//! ```text
//!                 open() / reconnect()
//!  Disconnected ───────────────────────► Connecting ──┐ resolve/open failed,
//!       ▲                                 │    ▲      │ backoff, retry
//!       │ close() / reconnect()           │    └──────┘
//!       │                                 │
//!   Connected ◄───────────────────────────┤ opened, settled, purged
//!                                         │
//!                                         ▼ attempts exhausted
//!                                      Failed (terminal)
//! ```
//!
//! The manager does no locking of its own. It is owned by the
//! [`CommandChannel`](crate::channel::CommandChannel), whose lock covers
//! every write and every reconnect.

use tracing::{debug, error, info, warn};

use petpal_core::LinkConfig;

use crate::error::{LinkError, Result};
use crate::resolver::PortResolver;
use crate::state::{LinkState, LinkStateMachine};
use crate::traits::{LinkOpener, PeripheralLink};
use crate::types::{Backoff, ConnectionInfo, PeripheralAddress};

/// Owns the byte-stream connection to the peripheral.
///
/// # Examples
///
/// ```
/// use petpal_core::LinkConfig;
/// use petpal_hardware::ConnectionManager;
/// use petpal_hardware::mock::{MockOpener, MockResolver};
///
/// #[tokio::main(flavor = "current_thread", start_paused = true)]
/// async fn main() -> petpal_hardware::Result<()> {
///     let (opener, handle) = MockOpener::new();
///     let mut manager = ConnectionManager::new(
///         MockResolver::found("/dev/ttyACM0"),
///         opener,
///         LinkConfig::default(),
///     );
///
///     let info = manager.open().await?;
///     assert_eq!(info.address.as_str(), "/dev/ttyACM0");
///     assert!(manager.is_healthy());
///
///     manager.write_line(b"FOOD\n").await?;
///     assert_eq!(handle.lines(), vec!["FOOD"]);
///     Ok(())
/// }
/// ```
pub struct ConnectionManager<R, O: LinkOpener> {
    resolver: R,
    opener: O,
    config: LinkConfig,
    backoff: Backoff,
    machine: LinkStateMachine,
    link: Option<O::Link>,
    address: Option<PeripheralAddress>,
    healthy: bool,
    retry_count: u32,
}

impl<R, O> ConnectionManager<R, O>
where
    R: PortResolver,
    O: LinkOpener,
{
    /// Create a manager in the `Disconnected` state.
    pub fn new(resolver: R, opener: O, config: LinkConfig) -> Self {
        let backoff = Backoff::new(config.backoff_base(), config.backoff_cap());
        Self {
            resolver,
            opener,
            config,
            backoff,
            machine: LinkStateMachine::new(),
            link: None,
            address: None,
            healthy: false,
            retry_count: 0,
        }
    }

    /// Open the link, retrying with backoff.
    ///
    /// Returns immediately if already connected.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Exhausted` once `max_connect_attempts` attempts
    /// have failed, or at the first error that retrying cannot fix; the
    /// manager is then terminal. Returns
    /// `LinkError::Terminal` if it already was.
    pub async fn open(&mut self) -> Result<ConnectionInfo> {
        match self.state() {
            LinkState::Failed => Err(LinkError::Terminal),
            LinkState::Connected if self.link.is_some() => Ok(self.current_info()),
            _ => self.connect_with_backoff().await,
        }
    }

    /// Drop the current link (best-effort) and open a fresh one.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn reconnect(&mut self) -> Result<ConnectionInfo> {
        if self.state().is_terminal() {
            return Err(LinkError::Terminal);
        }

        info!(
            address = self.address.as_ref().map(|a| a.as_str()).unwrap_or("<none>"),
            "Reconnecting peripheral link"
        );
        self.close_stale().await;
        self.connect_with_backoff().await
    }

    /// Close the link. Failures while closing are logged and ignored.
    pub async fn close(&mut self) {
        self.close_stale().await;
        debug!(state = %self.state(), "Connection closed");
    }

    /// `true` while connected and no write has failed since.
    pub fn is_healthy(&self) -> bool {
        self.healthy && self.link.is_some() && self.state() == LinkState::Connected
    }

    /// Record that the link misbehaved; the next send reconnects first.
    pub fn mark_unhealthy(&mut self) {
        if self.healthy {
            debug!("Link marked unhealthy");
        }
        self.healthy = false;
    }

    /// Write one complete frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::NotConnected` without a link and
    /// `LinkError::Write` on I/O failure. Health is not changed here;
    /// the command channel decides what a failure means.
    pub async fn write_line(&mut self, frame: &[u8]) -> Result<usize> {
        let link = self.link.as_mut().ok_or(LinkError::NotConnected)?;
        link.write_all(frame).await?;
        link.flush().await?;
        Ok(frame.len())
    }

    pub fn state(&self) -> LinkState {
        self.machine.current_state()
    }

    pub fn state_machine(&self) -> &LinkStateMachine {
        &self.machine
    }

    /// Address of the current (or last) link.
    pub fn address(&self) -> Option<&PeripheralAddress> {
        self.address.as_ref()
    }

    /// Failed attempts in the current or most recent connection cycle.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn current_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            address: self
                .address
                .clone()
                .unwrap_or_else(|| PeripheralAddress::new("<unknown>")),
            attempts: self.retry_count + 1,
        }
    }

    async fn close_stale(&mut self) {
        self.healthy = false;

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("Ignoring error while closing stale link: {}", e);
            }
        }

        if self.state() == LinkState::Connected {
            // Connected -> Disconnected is always valid
            let _ = self.machine.transition_to(LinkState::Disconnected);
        }
    }

    async fn connect_with_backoff(&mut self) -> Result<ConnectionInfo> {
        self.machine.transition_to(LinkState::Connecting)?;
        self.retry_count = 0;

        let max_attempts = self.config.max_connect_attempts.max(1);
        let mut last_error = LinkError::NotConnected;
        let mut attempts = 0;

        for attempt in 0..max_attempts {
            attempts = attempt + 1;
            if attempt > 0 {
                let delay = self.backoff.delay(attempt - 1);
                debug!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next connection attempt"
                );
                tokio::time::sleep(delay).await;
                self.machine.transition_to(LinkState::Connecting)?;
            }

            match self.try_connect().await {
                Ok(info) => {
                    self.machine.transition_to(LinkState::Connected)?;
                    self.healthy = true;
                    info!(
                        address = %info.address,
                        attempts = info.attempts,
                        "Peripheral link connected"
                    );
                    return Ok(info);
                }
                Err(e) => {
                    self.retry_count += 1;
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        "Connection attempt failed: {}",
                        e
                    );
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.machine.transition_to(LinkState::Failed)?;
        error!(attempts, "Peripheral link failed permanently: {}", last_error);
        Err(LinkError::Exhausted {
            attempts,
            last: Box::new(last_error),
        })
    }

    async fn try_connect(&mut self) -> Result<ConnectionInfo> {
        let address = self.resolver.resolve()?;
        let mut link = self.opener.open(&address, &self.config).await?;

        let settle = self.config.connect_settle_delay();
        if !settle.is_zero() {
            debug!(address = %address, settle_ms = settle.as_millis() as u64, "Waiting for peripheral to settle");
            tokio::time::sleep(settle).await;
        }

        if let Err(e) = link.clear_input().await {
            let _ = link.close().await;
            return Err(e);
        }

        self.link = Some(link);
        self.address = Some(address.clone());

        Ok(ConnectionInfo {
            address,
            attempts: self.retry_count + 1,
        })
    }
}

impl<R, O: LinkOpener> std::fmt::Debug for ConnectionManager<R, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.machine.current_state())
            .field("address", &self.address)
            .field("healthy", &self.healthy)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
