//! Schedule evaluation with a deduplication ledger.
//!
//! The evaluator is polled on a fixed period that is usually shorter than
//! a minute, so the same time-of-day key is seen several times in a row.
//! [`LastTriggered`] remembers, per motor, the key that last fired; a key
//! fires at most once per motor for as long as the process runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Timelike;
use tracing::{debug, info, trace, warn};

use petpal_core::{MotorCommand, ScheduleRecord, TimeKey};
use petpal_hardware::traits::LinkOpener;
use petpal_hardware::{CommandChannel, FatalLinkFailure, PortResolver, SendError};
use petpal_remote::RemoteStore;

/// Last key that triggered each motor.
///
/// ```
/// use petpal_core::{MotorCommand, TimeKey};
/// use petpal_dispatch::LastTriggered;
///
/// let key = TimeKey::from_hm(8, 0).unwrap();
/// let mut ledger = LastTriggered::new();
/// assert!(ledger.is_due(MotorCommand::Food, key));
///
/// ledger.record(MotorCommand::Food, key);
/// assert!(!ledger.is_due(MotorCommand::Food, key));
/// assert!(ledger.is_due(MotorCommand::Water, key));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastTriggered {
    entries: BTreeMap<MotorCommand, TimeKey>,
}

impl LastTriggered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, command: MotorCommand) -> Option<TimeKey> {
        self.entries.get(&command).copied()
    }

    /// Remember `key` for `command`, returning the previous key.
    pub fn record(&mut self, command: MotorCommand, key: TimeKey) -> Option<TimeKey> {
        self.entries.insert(command, key)
    }

    /// `true` unless `key` is what last fired for `command`.
    pub fn is_due(&self, command: MotorCommand, key: TimeKey) -> bool {
        self.get(command) != Some(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Motors whose schedule contains `key` and that have not fired for it.
///
/// Returned in the fixed command order.
pub fn due_actions(record: &ScheduleRecord, key: TimeKey, ledger: &LastTriggered) -> Vec<MotorCommand> {
    MotorCommand::ALL
        .into_iter()
        .filter(|command| record.contains(*command, key) && ledger.is_due(*command, key))
        .collect()
}

/// Result of one evaluation cycle.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// The ledger to use for the next cycle.
    pub ledger: LastTriggered,
    /// Key the cycle was evaluated for.
    pub key: Option<TimeKey>,
    pub sent: Vec<MotorCommand>,
    pub failed: Vec<MotorCommand>,
    /// Set when a send in this cycle found the channel tripped.
    pub fatal: Option<FatalLinkFailure>,
}

impl Evaluation {
    pub fn triggered(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

impl From<Evaluation> for LastTriggered {
    fn from(evaluation: Evaluation) -> Self {
        evaluation.ledger
    }
}

/// Turns the current time and the remote schedule into commands.
pub struct ScheduleEvaluator<R, O: LinkOpener, S> {
    channel: CommandChannel<R, O>,
    store: Arc<S>,
    reported_invalid: Mutex<HashSet<String>>,
}

impl<R, O, S> ScheduleEvaluator<R, O, S>
where
    R: PortResolver,
    O: LinkOpener,
    S: RemoteStore,
{
    pub fn new(channel: CommandChannel<R, O>, store: Arc<S>) -> Self {
        Self {
            channel,
            store,
            reported_invalid: Mutex::new(HashSet::new()),
        }
    }

    /// Run one cycle for `now`.
    ///
    /// Every due motor is sent and recorded in the ledger whether or not
    /// the send succeeded; a missed slot is not retried. A missing,
    /// empty, or unreadable schedule means nothing is due.
    pub async fn evaluate<T: Timelike>(&self, now: &T, ledger: LastTriggered) -> Evaluation {
        let mut evaluation = Evaluation {
            ledger,
            ..Default::default()
        };

        let record = match self.store.fetch_schedule().await {
            Ok(Some(record)) if !record.is_empty() => record,
            Ok(_) => {
                debug!("No schedule configured");
                return evaluation;
            }
            Err(e) => {
                warn!("Failed to fetch schedule, skipping this cycle: {}", e);
                return evaluation;
            }
        };
        self.report_invalid_entries(&record);

        let key = TimeKey::from_time(now);
        evaluation.key = Some(key);

        let due = due_actions(&record, key, &evaluation.ledger);
        if due.is_empty() {
            trace!(key = %key, "Nothing due");
            return evaluation;
        }

        for command in due {
            info!(command = %command, key = %key, "Scheduled refill due");
            evaluation.ledger.record(command, key);

            match self.channel.send(command).await {
                Ok(_) => evaluation.sent.push(command),
                Err(e) => {
                    warn!(command = %command, key = %key, "Scheduled send failed: {}", e);
                    if let SendError::Fatal(failure) | SendError::Halted(failure) = e {
                        evaluation.fatal.get_or_insert(failure);
                    }
                    evaluation.failed.push(command);
                }
            }
        }

        evaluation
    }

    fn report_invalid_entries(&self, record: &ScheduleRecord) {
        let invalid = record.invalid_entries();
        if invalid.is_empty() {
            return;
        }

        let mut reported = self
            .reported_invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (command, entry) in invalid {
            if reported.insert(format!("{}:{}", command.kind(), entry)) {
                warn!(command = %command, entry, "Ignoring unparseable schedule entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use petpal_core::LinkConfig;
    use petpal_hardware::ConnectionManager;
    use petpal_hardware::mock::{MockLinkHandle, MockOpener, MockResolver};
    use petpal_remote::MemoryStore;
    use proptest::prelude::*;
    use rstest::rstest;

    type TestEvaluator = ScheduleEvaluator<MockResolver, MockOpener, MemoryStore>;

    fn record(food: &[&str], water: &[&str], waste: &[&str]) -> ScheduleRecord {
        let owned = |times: &[&str]| times.iter().map(|t| t.to_string()).collect();
        ScheduleRecord {
            food_refill_times: owned(food),
            water_refill_times: owned(water),
            waste_refill_times: owned(waste),
        }
    }

    fn evaluator(store: MemoryStore) -> (TestEvaluator, MockLinkHandle) {
        let (opener, handle) = MockOpener::new();
        let manager = ConnectionManager::new(
            MockResolver::found("/dev/ttyACM0"),
            opener,
            LinkConfig::default(),
        );
        let channel = CommandChannel::new(manager, 3);
        (ScheduleEvaluator::new(channel, Arc::new(store)), handle)
    }

    fn at(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).unwrap()
    }

    #[rstest]
    #[case(8, 0, vec![MotorCommand::Food, MotorCommand::Waste])]
    #[case(20, 0, vec![MotorCommand::Water])]
    #[case(9, 0, vec![])]
    fn test_due_actions(#[case] hour: u32, #[case] minute: u32, #[case] expected: Vec<MotorCommand>) {
        let record = record(&["08:00:AM"], &["08:00:PM"], &["8:00 am"]);
        let key = TimeKey::from_hm(hour, minute).unwrap();
        assert_eq!(due_actions(&record, key, &LastTriggered::new()), expected);
    }

    #[test]
    fn test_due_actions_respects_ledger() {
        let record = record(&["08:00:AM"], &["08:00:AM"], &[]);
        let key = TimeKey::from_hm(8, 0).unwrap();
        let mut ledger = LastTriggered::new();
        ledger.record(MotorCommand::Food, key);

        assert_eq!(due_actions(&record, key, &ledger), vec![MotorCommand::Water]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_minute_fires_once() {
        let store = MemoryStore::with_schedule(record(&["08:00:AM"], &[], &[]));
        let (evaluator, handle) = evaluator(store);

        let first = evaluator.evaluate(&at(8, 0, 5), LastTriggered::new()).await;
        assert_eq!(first.sent, vec![MotorCommand::Food]);

        let second = evaluator.evaluate(&at(8, 0, 35), first.ledger).await;
        assert_eq!(second.triggered(), 0);
        assert_eq!(handle.lines(), vec!["FOOD"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_key_fires_again() {
        let store = MemoryStore::with_schedule(record(&["08:00:AM", "08:01:AM"], &[], &[]));
        let (evaluator, handle) = evaluator(store);

        let ledger = evaluator.evaluate(&at(8, 0, 0), LastTriggered::new()).await.ledger;
        let evaluation = evaluator.evaluate(&at(8, 1, 0), ledger).await;

        assert_eq!(evaluation.sent, vec![MotorCommand::Food]);
        assert_eq!(
            evaluation.ledger.get(MotorCommand::Food),
            Some(TimeKey::from_hm(8, 1).unwrap())
        );
        assert_eq!(handle.lines(), vec!["FOOD", "FOOD"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_still_updates_ledger() {
        let store = MemoryStore::with_schedule(record(&["12:30:PM"], &["12:30:PM"], &[]));
        let (evaluator, handle) = evaluator(store);
        evaluator.channel.connect().await.unwrap();
        handle.fail_next_writes(1);

        let evaluation = evaluator.evaluate(&at(12, 30, 0), LastTriggered::new()).await;

        assert_eq!(evaluation.failed, vec![MotorCommand::Food]);
        assert_eq!(evaluation.sent, vec![MotorCommand::Water]);
        assert!(evaluation.fatal.is_none());
        assert!(!evaluation.ledger.is_due(MotorCommand::Food, TimeKey::from_hm(12, 30).unwrap()));

        let again = evaluator.evaluate(&at(12, 30, 30), evaluation.ledger).await;
        assert_eq!(again.triggered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_or_failed_schedule_is_noop() {
        let store = MemoryStore::new();
        let (evaluator, handle) = evaluator(store.clone());

        let evaluation = evaluator.evaluate(&at(8, 0, 0), LastTriggered::new()).await;
        assert_eq!(evaluation.triggered(), 0);
        assert!(evaluation.key.is_none());

        store.set_schedule(Some(record(&["08:00:AM"], &[], &[])));
        store.fail_next_fetches(1);
        let evaluation = evaluator.evaluate(&at(8, 0, 0), LastTriggered::new()).await;
        assert_eq!(evaluation.triggered(), 0);
        assert!(handle.transcript().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_entries_are_skipped() {
        let store = MemoryStore::with_schedule(record(&["breakfast", "7:15pm"], &["25:00:AM"], &[]));
        let (evaluator, handle) = evaluator(store);

        let evaluation = evaluator.evaluate(&at(19, 15, 0), LastTriggered::new()).await;

        assert_eq!(evaluation.sent, vec![MotorCommand::Food]);
        assert_eq!(handle.lines(), vec!["FOOD"]);
        assert_eq!(evaluator.reported_invalid.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_midnight_and_noon_keys() {
        let record = record(&["12:00:AM"], &["12:00:PM"], &[]);
        let midnight = TimeKey::from_time(&at(0, 0, 0));
        let noon = TimeKey::from_time(&at(12, 0, 0));
        assert_eq!(due_actions(&record, midnight, &LastTriggered::new()), vec![MotorCommand::Food]);
        assert_eq!(due_actions(&record, noon, &LastTriggered::new()), vec![MotorCommand::Water]);
    }

    proptest! {
        #[test]
        fn prop_ledger_blocks_repeat(hour in 0u32..24, minute in 0u32..60) {
            let key = TimeKey::from_hm(hour, minute).unwrap();
            let times = vec![key.to_string()];
            let record = ScheduleRecord {
                food_refill_times: times.clone(),
                water_refill_times: times.clone(),
                waste_refill_times: times,
            };

            let mut ledger = LastTriggered::new();
            let first = due_actions(&record, key, &ledger);
            prop_assert_eq!(first.len(), 3);
            for command in first {
                ledger.record(command, key);
            }
            prop_assert!(due_actions(&record, key, &ledger).is_empty());
        }

        #[test]
        fn prop_different_key_fires(h1 in 0u32..24, m1 in 0u32..60, h2 in 0u32..24, m2 in 0u32..60) {
            let k1 = TimeKey::from_hm(h1, m1).unwrap();
            let k2 = TimeKey::from_hm(h2, m2).unwrap();
            prop_assume!(k1 != k2);

            let record = ScheduleRecord {
                food_refill_times: vec![k2.to_string()],
                ..Default::default()
            };
            let mut ledger = LastTriggered::new();
            ledger.record(MotorCommand::Food, k1);
            prop_assert_eq!(due_actions(&record, k2, &ledger), vec![MotorCommand::Food]);
        }
    }
}
