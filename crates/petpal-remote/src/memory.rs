//! In-memory store for tests and dry runs.
//!
//! Behaves like the real database as far as the bridge can tell: clearing
//! the command slot is itself a change, so subscribers see the empty
//! sentinel echoed back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petpal_core::ScheduleRecord;
use petpal_core::constants::CLEARED_COMMAND;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{RemoteError, Result};
use crate::traits::{CommandFeed, CommandNotification, RemoteStore};

const FEED_CAPACITY: usize = 32;

#[derive(Debug, Default)]
struct MemoryState {
    schedule: Option<ScheduleRecord>,
    command_slot: Value,
    fetch_failures_remaining: u32,
    clear_failures_remaining: u32,
    fetches: u32,
    clears: u32,
    subscriber: Option<mpsc::Sender<CommandNotification>>,
}

/// Shared, controllable store. Clones share state.
///
/// # Examples
///
/// ```
/// use petpal_remote::{CommandFeed, MemoryStore, RemoteStore};
///
/// #[tokio::main]
/// async fn main() -> petpal_remote::Result<()> {
///     let store = MemoryStore::new();
///     let mut feed = store.subscribe().await?;
///
///     store.push_command("FOOD");
///     assert_eq!(feed.recv().await.unwrap().as_text(), Some("FOOD"));
///
///     store.clear_command().await?;
///     assert!(feed.recv().await.unwrap().is_sentinel());
///     assert_eq!(store.clear_count(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a schedule.
    pub fn with_schedule(schedule: ScheduleRecord) -> Self {
        let store = Self::new();
        store.set_schedule(Some(schedule));
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_schedule(&self, schedule: Option<ScheduleRecord>) {
        self.lock().schedule = schedule;
    }

    /// Write the command slot and notify the subscriber, if any.
    ///
    /// Returns `false` when nobody is subscribed or the notification
    /// could not be queued.
    pub fn push_command(&self, payload: impl Into<Value>) -> bool {
        let payload = payload.into();
        let mut state = self.lock();
        state.command_slot = payload.clone();
        Self::notify(&mut state, payload)
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().fetch_failures_remaining = count;
    }

    pub fn fail_next_clears(&self, count: u32) {
        self.lock().clear_failures_remaining = count;
    }

    pub fn command_slot(&self) -> Value {
        self.lock().command_slot.clone()
    }

    pub fn fetch_count(&self) -> u32 {
        self.lock().fetches
    }

    pub fn clear_count(&self) -> u32 {
        self.lock().clears
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock()
            .subscriber
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn notify(state: &mut MemoryState, payload: Value) -> bool {
        let Some(tx) = &state.subscriber else {
            trace!("No subscriber for command slot change");
            return false;
        };

        match tx.try_send(CommandNotification { payload }) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping command notification: {}", e);
                false
            }
        }
    }
}

impl RemoteStore for MemoryStore {
    async fn fetch_schedule(&self) -> Result<Option<ScheduleRecord>> {
        let mut state = self.lock();
        state.fetches += 1;
        if state.fetch_failures_remaining > 0 {
            state.fetch_failures_remaining -= 1;
            return Err(RemoteError::Simulated("schedule fetch".into()));
        }
        Ok(state.schedule.clone())
    }

    async fn clear_command(&self) -> Result<()> {
        let mut state = self.lock();
        if state.clear_failures_remaining > 0 {
            state.clear_failures_remaining -= 1;
            return Err(RemoteError::Simulated("command clear".into()));
        }

        state.clears += 1;
        state.command_slot = Value::from(CLEARED_COMMAND);
        Self::notify(&mut state, Value::from(CLEARED_COMMAND));
        Ok(())
    }
}

impl CommandFeed for MemoryStore {
    async fn subscribe(&self) -> Result<mpsc::Receiver<CommandNotification>> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let mut state = self.lock();

        // The real database delivers the current value on subscribe.
        let current = state.command_slot.clone();
        state.subscriber = Some(tx);
        Self::notify(&mut state, current);

        Ok(rx)
    }

    async fn unsubscribe(&self) {
        self.lock().subscriber = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petpal_core::MotorCommand;

    #[tokio::test]
    async fn test_subscribe_delivers_current_value() {
        let store = MemoryStore::new();
        store.push_command("WATER");

        let mut feed = store.subscribe().await.unwrap();
        assert_eq!(feed.recv().await.unwrap().as_text(), Some("WATER"));
    }

    #[tokio::test]
    async fn test_initial_slot_is_null() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe().await.unwrap();
        assert!(feed.recv().await.unwrap().is_sentinel());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_feed() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe().await.unwrap();
        let _ = feed.recv().await;

        store.unsubscribe().await;
        assert!(!store.is_subscribed());
        assert!(feed.recv().await.is_none());
        assert!(!store.push_command("FOOD"));
    }

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let mut schedule = ScheduleRecord::default();
        schedule.food_refill_times.push("08:00:AM".into());
        let store = MemoryStore::with_schedule(schedule.clone());
        store.fail_next_fetches(1);

        assert!(store.fetch_schedule().await.is_err());
        let fetched = store.fetch_schedule().await.unwrap().unwrap();
        assert_eq!(fetched.times_for(MotorCommand::Food), ["08:00:AM"]);
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_resets_slot() {
        let store = MemoryStore::new();
        store.push_command("FOOD");
        store.clear_command().await.unwrap();
        assert_eq!(store.command_slot(), Value::String(String::new()));
    }
}
