//! Collaborator interfaces.
//!
//! The bridge core only ever talks to the remote side through these two
//! traits: [`RemoteStore`] for the schedule record and the command slot,
//! and [`CommandFeed`] for the push subscription on that slot.

use std::future::Future;

use petpal_core::ScheduleRecord;
use petpal_core::constants::CLEARED_COMMAND;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// One change of the remote command slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandNotification {
    pub payload: Value,
}

impl CommandNotification {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// `true` for `""` and `null`, the values the slot holds once cleared.
    pub fn is_sentinel(&self) -> bool {
        match &self.payload {
            Value::Null => true,
            Value::String(s) => s == CLEARED_COMMAND,
            _ => false,
        }
    }

    /// The payload as text, if it is a JSON string.
    pub fn as_text(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

impl From<&str> for CommandNotification {
    fn from(payload: &str) -> Self {
        Self::new(payload)
    }
}

/// Read/write access to the small records the bridge uses.
pub trait RemoteStore: Send + Sync {
    /// Current schedule record; `None` when nothing is stored.
    fn fetch_schedule(&self) -> impl Future<Output = Result<Option<ScheduleRecord>>> + Send;

    /// Reset the command slot to the empty sentinel.
    fn clear_command(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Push subscription on the command slot.
pub trait CommandFeed: Send + Sync {
    /// Start delivering notifications. Any previous subscription is replaced.
    ///
    /// The receiver yields `None` once the subscription is torn down.
    fn subscribe(&self)
    -> impl Future<Output = Result<mpsc::Receiver<CommandNotification>>> + Send;

    /// Stop delivering notifications. Safe to call when not subscribed.
    fn unsubscribe(&self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(""), true)]
    #[case(json!(null), true)]
    #[case(json!("FOOD"), false)]
    #[case(json!(" "), false)]
    #[case(json!(0), false)]
    #[case(json!({"cmd": "FOOD"}), false)]
    fn test_sentinel(#[case] payload: Value, #[case] expected: bool) {
        assert_eq!(CommandNotification::new(payload).is_sentinel(), expected);
    }
}
