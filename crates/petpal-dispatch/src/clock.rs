//! Wall-clock source for schedule evaluation.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveTime, TimeDelta};

/// Source of the local time of day.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveTime;
}

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Clock set by hand. Clones share the same reading.
///
/// ```
/// use petpal_dispatch::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::at(23, 59);
/// clock.advance_minutes(2);
/// assert_eq!(clock.now().format("%H:%M").to_string(), "00:01");
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    time: Arc<Mutex<NaiveTime>>,
}

impl ManualClock {
    /// Start at `hour:minute:00`. Out-of-range values clamp to midnight.
    pub fn at(hour: u32, minute: u32) -> Self {
        Self {
            time: Arc::new(Mutex::new(
                NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
            )),
        }
    }

    pub fn set(&self, time: NaiveTime) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Move forward, wrapping at midnight.
    pub fn advance_minutes(&self, minutes: i64) {
        let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        *time = *time + TimeDelta::minutes(minutes);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveTime {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
