//! Serialized command transmission.
//!
//! [`CommandChannel`] is the only way commands reach the peripheral. It is
//! cheap to clone; every clone shares one [`ConnectionManager`] behind a
//! single Tokio mutex. The lock is held for a whole send attempt, including
//! any reconnect that attempt triggers, so two producers can never
//! interleave bytes on the wire or race each other through a reconnect.
//!
//! Consecutive write failures are counted. When the count reaches the
//! configured threshold, or a reconnect gives up, the channel trips: the
//! failing send returns [`SendError::Fatal`] exactly once, the status
//! watch flips to [`ChannelStatus::Halted`], and every later send returns
//! [`SendError::Halted`] without touching the link.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use petpal_core::MotorCommand;

use crate::connection::ConnectionManager;
use crate::error::LinkError;
use crate::resolver::PortResolver;
use crate::traits::LinkOpener;
use crate::types::{ConnectionInfo, PeripheralAddress};

/// Successful transmission of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub command: MotorCommand,
    pub bytes_written: usize,
    pub address: PeripheralAddress,
}

/// Why the channel gave up on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Too many consecutive write failures.
    WriteThreshold,
    /// A reconnect ran out of attempts.
    ReconnectExhausted,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::WriteThreshold => write!(f, "write failure threshold reached"),
            FatalReason::ReconnectExhausted => write!(f, "reconnect attempts exhausted"),
        }
    }
}

/// The appliance is unreachable; operator intervention is required.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Peripheral unreachable ({reason}, {consecutive_failures} consecutive failures): {last_error}")]
pub struct FatalLinkFailure {
    pub reason: FatalReason,
    pub consecutive_failures: u32,
    pub last_error: String,
}

/// Errors returned by [`CommandChannel::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The write failed; the link will be reconnected on the next send.
    #[error("Failed to send {command} ({consecutive_failures} consecutive failures): {source}")]
    Write {
        command: MotorCommand,
        consecutive_failures: u32,
        #[source]
        source: LinkError,
    },

    /// This send tripped the channel.
    #[error(transparent)]
    Fatal(FatalLinkFailure),

    /// The channel tripped earlier; nothing was attempted.
    #[error("Command channel halted: {0}")]
    Halted(FatalLinkFailure),

    /// The channel was closed during shutdown.
    #[error("Command channel closed")]
    Closed,
}

impl SendError {
    /// The fatal failure behind this error, if any.
    pub fn fatal(&self) -> Option<&FatalLinkFailure> {
        match self {
            SendError::Fatal(failure) | SendError::Halted(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Observable health of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Ready,
    /// Recent writes failed but the threshold has not been reached.
    Degraded { consecutive_failures: u32 },
    Halted(FatalLinkFailure),
}

impl ChannelStatus {
    pub fn is_halted(&self) -> bool {
        matches!(self, ChannelStatus::Halted(_))
    }
}

struct ChannelState<R, O: LinkOpener> {
    manager: ConnectionManager<R, O>,
    consecutive_failures: u32,
    failure_threshold: u32,
    tripped: Option<FatalLinkFailure>,
    closed: bool,
}

/// Mutually exclusive access to the peripheral, shared by all producers.
pub struct CommandChannel<R, O: LinkOpener> {
    state: Arc<Mutex<ChannelState<R, O>>>,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl<R, O: LinkOpener> Clone for CommandChannel<R, O> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            status: Arc::clone(&self.status),
        }
    }
}

impl<R, O> CommandChannel<R, O>
where
    R: PortResolver,
    O: LinkOpener,
{
    /// Wrap a connection manager. `failure_threshold` is clamped to at least 1.
    pub fn new(manager: ConnectionManager<R, O>, failure_threshold: u32) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Ready);
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                manager,
                consecutive_failures: 0,
                failure_threshold: failure_threshold.max(1),
                tripped: None,
                closed: false,
            })),
            status: Arc::new(status),
        }
    }

    /// Transmit one command.
    ///
    /// Reconnects first if the link is unhealthy.
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub async fn send(&self, command: MotorCommand) -> Result<Ack, SendError> {
        let mut state = self.state.lock().await;

        if let Some(failure) = &state.tripped {
            debug!(command = %command, "Dropping command, channel halted");
            return Err(SendError::Halted(failure.clone()));
        }
        if state.closed {
            return Err(SendError::Closed);
        }

        if !state.manager.is_healthy() {
            if let Err(e) = state.manager.reconnect().await {
                let failure = FatalLinkFailure {
                    reason: FatalReason::ReconnectExhausted,
                    consecutive_failures: state.consecutive_failures,
                    last_error: e.to_string(),
                };
                return Err(self.trip(&mut state, failure));
            }
        }

        let frame = command.wire_frame();
        match state.manager.write_line(&frame).await {
            Ok(bytes_written) => {
                if state.consecutive_failures > 0 {
                    info!(
                        previous_failures = state.consecutive_failures,
                        "Peripheral writes recovered"
                    );
                    state.consecutive_failures = 0;
                    self.status.send_replace(ChannelStatus::Ready);
                }

                let address = state
                    .manager
                    .address()
                    .cloned()
                    .unwrap_or_else(|| PeripheralAddress::new("<unknown>"));
                debug!(command = %command, address = %address, bytes_written, "Command sent");

                Ok(Ack {
                    command,
                    bytes_written,
                    address,
                })
            }
            Err(e) => {
                state.manager.mark_unhealthy();
                state.consecutive_failures += 1;
                let consecutive_failures = state.consecutive_failures;

                if consecutive_failures >= state.failure_threshold {
                    let failure = FatalLinkFailure {
                        reason: FatalReason::WriteThreshold,
                        consecutive_failures,
                        last_error: e.to_string(),
                    };
                    return Err(self.trip(&mut state, failure));
                }

                warn!(
                    command = %command,
                    consecutive_failures,
                    threshold = state.failure_threshold,
                    "Write to peripheral failed: {}",
                    e
                );
                self.status
                    .send_replace(ChannelStatus::Degraded { consecutive_failures });

                Err(SendError::Write {
                    command,
                    consecutive_failures,
                    source: e,
                })
            }
        }
    }

    /// Current status.
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes, e.g. to stop a loop when the channel trips.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        self.status.borrow().is_halted()
    }

    /// Open the link if not already connected.
    ///
    /// # Errors
    ///
    /// Returns the connection manager's error; the channel trips on
    /// exhaustion.
    pub async fn connect(&self) -> Result<ConnectionInfo, SendError> {
        let mut state = self.state.lock().await;
        if let Some(failure) = &state.tripped {
            return Err(SendError::Halted(failure.clone()));
        }

        match state.manager.open().await {
            Ok(info) => Ok(info),
            Err(e) => {
                let failure = FatalLinkFailure {
                    reason: FatalReason::ReconnectExhausted,
                    consecutive_failures: state.consecutive_failures,
                    last_error: e.to_string(),
                };
                Err(self.trip(&mut state, failure))
            }
        }
    }

    /// Close the link and refuse further sends. Waits for an in-flight send.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.manager.close().await;
    }

    fn trip(&self, state: &mut ChannelState<R, O>, failure: FatalLinkFailure) -> SendError {
        error!(
            reason = %failure.reason,
            consecutive_failures = failure.consecutive_failures,
            "Peripheral unreachable, halting command channel: {}",
            failure.last_error
        );
        state.tripped = Some(failure.clone());
        self.status.send_replace(ChannelStatus::Halted(failure.clone()));
        SendError::Fatal(failure)
    }
}

impl<R, O: LinkOpener> fmt::Debug for CommandChannel<R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLinkHandle, MockOpener, MockResolver};
    use petpal_core::LinkConfig;

    fn channel(threshold: u32) -> (CommandChannel<MockResolver, MockOpener>, MockLinkHandle) {
        let (opener, handle) = MockOpener::new();
        let config = LinkConfig {
            max_connect_attempts: 2,
            ..Default::default()
        };
        let manager = ConnectionManager::new(MockResolver::found("/dev/ttyACM0"), opener, config);
        (CommandChannel::new(manager, threshold), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_opens_lazily_and_writes_token() {
        let (channel, handle) = channel(3);

        let ack = channel.send(MotorCommand::Food).await.unwrap();

        assert_eq!(ack.command, MotorCommand::Food);
        assert_eq!(ack.bytes_written, 5);
        assert_eq!(ack.address.as_str(), "/dev/ttyACM0");
        assert_eq!(handle.transcript(), b"FOOD\n");
        assert_eq!(channel.status(), ChannelStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_degrades_then_recovers() {
        let (channel, handle) = channel(3);
        channel.connect().await.unwrap();

        handle.fail_next_writes(1);
        let err = channel.send(MotorCommand::Water).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::Write {
                consecutive_failures: 1,
                ..
            }
        ));
        assert_eq!(
            channel.status(),
            ChannelStatus::Degraded {
                consecutive_failures: 1
            }
        );

        channel.send(MotorCommand::Water).await.unwrap();
        assert_eq!(channel.status(), ChannelStatus::Ready);
        // reconnected before the second attempt
        assert_eq!(handle.open_count(), 2);
        assert_eq!(handle.lines(), vec!["WATER"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_trips_without_writing() {
        let (opener, handle) = MockOpener::new();
        let config = LinkConfig {
            max_connect_attempts: 2,
            ..Default::default()
        };
        let resolver = MockResolver::sequence([Some("/dev/ttyACM0"), None]);
        let manager = ConnectionManager::new(resolver, opener, config);
        let channel = CommandChannel::new(manager, 3);
        channel.connect().await.unwrap();

        handle.fail_next_writes(1);
        assert!(matches!(
            channel.send(MotorCommand::Food).await,
            Err(SendError::Write { .. })
        ));

        let err = channel.send(MotorCommand::Food).await.unwrap_err();
        let failure = err.fatal().cloned().unwrap();
        assert!(matches!(err, SendError::Fatal(_)));
        assert_eq!(failure.reason, FatalReason::ReconnectExhausted);
        assert!(handle.transcript().is_empty());
        assert!(channel.is_halted());

        assert!(matches!(
            channel.send(MotorCommand::Water).await,
            Err(SendError::Halted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_further_sends() {
        let (channel, handle) = channel(3);
        channel.send(MotorCommand::Food).await.unwrap();

        channel.close().await;

        assert!(matches!(
            channel.send(MotorCommand::Food).await,
            Err(SendError::Closed)
        ));
        assert_eq!(handle.close_count(), 1);
        assert_eq!(handle.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_of_one_trips_immediately() {
        let (channel, handle) = channel(1);
        handle.set_writes_failing(true);

        let err = channel.send(MotorCommand::Waste).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::Fatal(FatalLinkFailure {
                reason: FatalReason::WriteThreshold,
                consecutive_failures: 1,
                ..
            })
        ));
    }
}
