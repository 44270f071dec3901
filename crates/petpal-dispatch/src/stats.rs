use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub evaluations: u64,
    pub schedule_triggers: u64,
    pub notifications: u64,
    pub unrecognized: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub clear_failures: u64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} failed, {} scheduled triggers over {} evaluations, {} notifications ({} unrecognized)",
            self.commands_sent,
            self.commands_failed,
            self.schedule_triggers,
            self.evaluations,
            self.notifications,
            self.unrecognized
        )?;
        if self.clear_failures > 0 {
            write!(f, ", {} failed clears", self.clear_failures)?;
        }
        Ok(())
    }
}

/// Shared counters updated by both producers.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub evaluations: AtomicU64,
    pub schedule_triggers: AtomicU64,
    pub notifications: AtomicU64,
    pub unrecognized: AtomicU64,
    pub commands_sent: AtomicU64,
    pub commands_failed: AtomicU64,
    pub clear_failures: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            schedule_triggers: self.schedule_triggers.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            clear_failures: self.clear_failures.load(Ordering::Relaxed),
        }
    }
}
