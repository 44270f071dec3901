//! Push notification handling.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use petpal_core::MotorCommand;
use petpal_hardware::traits::LinkOpener;
use petpal_hardware::{Ack, CommandChannel, FatalLinkFailure, PortResolver, SendError};
use petpal_remote::{CommandNotification, RemoteStore};

/// What happened to one notification.
#[derive(Debug)]
pub enum Disposition {
    /// The slot holds the cleared sentinel; nothing to do.
    Sentinel,
    Sent(Ack),
    SendFailed {
        command: MotorCommand,
        error: SendError,
    },
    /// The payload is not a known command; nothing was sent.
    Unrecognized(String),
}

#[derive(Debug)]
pub struct NotificationOutcome {
    pub disposition: Disposition,
    /// Whether the upstream slot was cleared.
    pub cleared: bool,
}

impl NotificationOutcome {
    pub fn fatal(&self) -> Option<&FatalLinkFailure> {
        match &self.disposition {
            Disposition::SendFailed { error, .. } => error.fatal(),
            _ => None,
        }
    }
}

/// Forwards pushed requests to the channel and clears the slot.
pub struct EventAdapter<R, O: LinkOpener, S> {
    channel: CommandChannel<R, O>,
    store: Arc<S>,
}

impl<R, O, S> EventAdapter<R, O, S>
where
    R: PortResolver,
    O: LinkOpener,
    S: RemoteStore,
{
    pub fn new(channel: CommandChannel<R, O>, store: Arc<S>) -> Self {
        Self { channel, store }
    }

    /// Handle one change of the command slot.
    ///
    /// Any payload other than the sentinel is cleared exactly once after
    /// the send, recognized or not. The sentinel itself is never cleared,
    /// since clearing is what produces it.
    pub async fn on_notification(&self, notification: CommandNotification) -> NotificationOutcome {
        if notification.is_sentinel() {
            debug!("Command slot is empty");
            return NotificationOutcome {
                disposition: Disposition::Sentinel,
                cleared: false,
            };
        }

        let disposition = match parse_payload(&notification.payload) {
            Some(command) => {
                info!(command = %command, "Remote command received");
                match self.channel.send(command).await {
                    Ok(ack) => Disposition::Sent(ack),
                    Err(error) => {
                        warn!(command = %command, "Remote command not delivered: {}", error);
                        Disposition::SendFailed { command, error }
                    }
                }
            }
            None => {
                let payload = display_payload(&notification.payload);
                warn!(payload = %payload, "Ignoring unrecognized command");
                Disposition::Unrecognized(payload)
            }
        };

        let cleared = match self.store.clear_command().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to clear command slot: {}", e);
                false
            }
        };

        NotificationOutcome {
            disposition,
            cleared,
        }
    }
}

fn parse_payload(payload: &Value) -> Option<MotorCommand> {
    payload
        .as_str()
        .and_then(|text| MotorCommand::from_payload(text).ok())
}

fn display_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
