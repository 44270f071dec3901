//! Command dispatch for the PetPal bridge.
//!
//! Two producers decide when a motor should run:
//!
//! - the [`EventAdapter`] reacts to commands pushed into the remote slot
//! - the [`ScheduleEvaluator`] compares the clock with the remote schedule
//!   and uses a [`LastTriggered`] ledger so each slot fires once
//!
//! The [`Dispatcher`] runs both against one shared
//! [`CommandChannel`](petpal_hardware::CommandChannel) until it is
//! cancelled or the peripheral becomes unreachable.

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod schedule;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use events::{Disposition, EventAdapter, NotificationOutcome};
pub use schedule::{Evaluation, LastTriggered, ScheduleEvaluator, due_actions};
pub use stats::DispatchStats;
