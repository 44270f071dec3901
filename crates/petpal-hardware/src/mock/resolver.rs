//! Scripted port resolver.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{LinkError, Result};
use crate::resolver::PortResolver;
use crate::types::PeripheralAddress;

/// Resolver that replays a script of outcomes.
///
/// Each call consumes the next outcome; once the script is down to its
/// last entry that entry repeats forever. Clones share the script and
/// the call counter.
///
/// # Examples
///
/// ```
/// use petpal_hardware::mock::MockResolver;
/// use petpal_hardware::resolver::PortResolver;
///
/// let resolver = MockResolver::sequence([None, Some("/dev/ttyACM0")]);
/// assert!(resolver.resolve().is_err());
/// assert_eq!(resolver.resolve().unwrap().as_str(), "/dev/ttyACM0");
/// assert_eq!(resolver.resolve().unwrap().as_str(), "/dev/ttyACM0");
/// assert_eq!(resolver.resolve_count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MockResolver {
    script: Arc<Mutex<VecDeque<Option<PeripheralAddress>>>>,
    calls: Arc<AtomicU32>,
}

impl MockResolver {
    /// Always resolves to `address`.
    pub fn found(address: &str) -> Self {
        Self::sequence([Some(address)])
    }

    /// Never finds anything.
    pub fn not_found() -> Self {
        Self::sequence([None])
    }

    /// Replay `outcomes`, `None` meaning nothing was found.
    pub fn sequence<'a>(outcomes: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let script = outcomes
            .into_iter()
            .map(|outcome| outcome.map(PeripheralAddress::new))
            .collect();
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of `resolve` calls so far.
    pub fn resolve_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PortResolver for MockResolver {
    fn resolve(&self) -> Result<PeripheralAddress> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().cloned().flatten()
        };

        outcome.ok_or_else(|| LinkError::discovery(self.describe()))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
