//! Remote side of the PetPal bridge.
//!
//! The bridge reads its feeding schedule from, and receives on-demand
//! commands through, a small remote database. This crate hides that
//! database behind two traits, [`RemoteStore`] and [`CommandFeed`], with
//! two implementations:
//!
//! - [`FirebaseStore`]: Firebase Realtime Database via REST and
//!   server-sent events
//! - [`MemoryStore`]: in-process store for tests and `--dry-run`
//!
//! [`AnyStore`] selects between them at runtime.

pub mod error;
pub mod firebase;
pub mod memory;
pub mod sse;
pub mod traits;

pub use error::{RemoteError, Result};
pub use firebase::FirebaseStore;
pub use memory::MemoryStore;
pub use traits::{CommandFeed, CommandNotification, RemoteStore};

use petpal_core::ScheduleRecord;
use tokio::sync::mpsc;

/// Enum wrapper for store dispatch.
#[derive(Debug)]
pub enum AnyStore {
    Firebase(FirebaseStore),
    Memory(MemoryStore),
}

impl AnyStore {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnyStore::Firebase(_) => "firebase",
            AnyStore::Memory(_) => "memory",
        }
    }
}

impl RemoteStore for AnyStore {
    async fn fetch_schedule(&self) -> Result<Option<ScheduleRecord>> {
        match self {
            AnyStore::Firebase(store) => store.fetch_schedule().await,
            AnyStore::Memory(store) => store.fetch_schedule().await,
        }
    }

    async fn clear_command(&self) -> Result<()> {
        match self {
            AnyStore::Firebase(store) => store.clear_command().await,
            AnyStore::Memory(store) => store.clear_command().await,
        }
    }
}

impl CommandFeed for AnyStore {
    async fn subscribe(&self) -> Result<mpsc::Receiver<CommandNotification>> {
        match self {
            AnyStore::Firebase(store) => store.subscribe().await,
            AnyStore::Memory(store) => store.subscribe().await,
        }
    }

    async fn unsubscribe(&self) {
        match self {
            AnyStore::Firebase(store) => store.unsubscribe().await,
            AnyStore::Memory(store) => store.unsubscribe().await,
        }
    }
}

impl From<MemoryStore> for AnyStore {
    fn from(store: MemoryStore) -> Self {
        AnyStore::Memory(store)
    }
}

impl From<FirebaseStore> for AnyStore {
    fn from(store: FirebaseStore) -> Self {
        AnyStore::Firebase(store)
    }
}
