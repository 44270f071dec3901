//! Composition root.
//!
//! ```text
//!                       ┌──────────────────┐
//!  command slot ──────► │   EventAdapter   │──┐
//!  (push feed)          └──────────────────┘  │     ┌────────────────┐
//!                                             ├───► │ CommandChannel │ ──► peripheral
//!  clock + schedule ──► ┌──────────────────┐  │     └────────────────┘
//!  (poll period)        │ScheduleEvaluator │──┘             │
//!                       └──────────────────┘                │ status
//!                                                           ▼
//!                                             Halted ends the dispatcher
//! ```
//!
//! Both producers run concurrently inside [`Dispatcher::run`] and meet only
//! at the channel lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use petpal_hardware::traits::LinkOpener;
use petpal_hardware::{ChannelStatus, CommandChannel, FatalLinkFailure, PortResolver};
use petpal_remote::{CommandFeed, CommandNotification, RemoteStore};

use crate::clock::{Clock, SystemClock};
use crate::error::DispatchError;
use crate::events::{Disposition, EventAdapter};
use crate::schedule::{LastTriggered, ScheduleEvaluator};
use crate::stats::{DispatchStats, StatsCounters};

/// Runs the event adapter and the schedule loop over one command channel.
pub struct Dispatcher<R, O: LinkOpener, S, C = SystemClock> {
    channel: CommandChannel<R, O>,
    store: Arc<S>,
    evaluator: ScheduleEvaluator<R, O, S>,
    adapter: EventAdapter<R, O, S>,
    clock: C,
    poll_period: Duration,
    stats: StatsCounters,
}

impl<R, O, S> Dispatcher<R, O, S, SystemClock>
where
    R: PortResolver,
    O: LinkOpener,
    S: RemoteStore + CommandFeed,
{
    pub fn new(channel: CommandChannel<R, O>, store: S, poll_period: Duration) -> Self {
        let store = Arc::new(store);
        Self {
            evaluator: ScheduleEvaluator::new(channel.clone(), Arc::clone(&store)),
            adapter: EventAdapter::new(channel.clone(), Arc::clone(&store)),
            channel,
            store,
            clock: SystemClock,
            // interval() rejects a zero period
            poll_period: poll_period.max(Duration::from_millis(1)),
            stats: StatsCounters::default(),
        }
    }
}

impl<R, O, S, C> Dispatcher<R, O, S, C>
where
    R: PortResolver,
    O: LinkOpener,
    S: RemoteStore + CommandFeed,
    C: Clock,
{
    /// Replace the wall clock.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Dispatcher<R, O, S, C2> {
        Dispatcher {
            channel: self.channel,
            store: self.store,
            evaluator: self.evaluator,
            adapter: self.adapter,
            clock,
            poll_period: self.poll_period,
            stats: self.stats,
        }
    }

    pub fn channel(&self) -> &CommandChannel<R, O> {
        &self.channel
    }

    /// Counters so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }

    /// Connect, subscribe, and dispatch until cancelled or the link fails.
    ///
    /// The connection is closed and the feed unsubscribed on every exit path.
    ///
    /// # Errors
    ///
    /// `DispatchError::FatalLink` when the peripheral cannot be opened or
    /// becomes unreachable; `DispatchError::Subscribe` when the feed cannot
    /// be started.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<DispatchStats, DispatchError> {
        let result = self.dispatch(shutdown).await;

        self.store.unsubscribe().await;
        self.channel.close().await;

        let stats = self.stats.snapshot();
        match &result {
            Ok(()) => info!("Dispatcher stopped: {}", stats),
            Err(e) => error!("Dispatcher aborted: {} ({})", e, stats),
        }
        result.map(|()| stats)
    }

    async fn dispatch(&self, shutdown: CancellationToken) -> Result<(), DispatchError> {
        let mut status = self.channel.subscribe_status();

        let info = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            connected = self.channel.connect() => connected.map_err(|e| match e.fatal() {
                Some(failure) => DispatchError::FatalLink(failure.clone()),
                None => DispatchError::Startup(e.to_string()),
            })?,
        };
        info!(address = %info.address, attempts = info.attempts, "Peripheral ready");

        let feed = self.store.subscribe().await.map_err(DispatchError::Subscribe)?;
        info!(
            poll_period_secs = self.poll_period.as_secs(),
            "Dispatching remote commands and schedule"
        );

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Shutdown requested");
                Ok(())
            }
            failure = wait_for_halt(&mut status) => Err(DispatchError::FatalLink(failure)),
            () = self.event_loop(feed) => Ok(()),
            () = self.schedule_loop() => Ok(()),
        }
    }

    /// Handle notifications until the feed ends, then idle.
    async fn event_loop(&self, mut feed: mpsc::Receiver<CommandNotification>) {
        while let Some(notification) = feed.recv().await {
            let outcome = self.adapter.on_notification(notification).await;

            match &outcome.disposition {
                Disposition::Sentinel => continue,
                Disposition::Sent(_) => StatsCounters::bump(&self.stats.commands_sent),
                Disposition::SendFailed { .. } => StatsCounters::bump(&self.stats.commands_failed),
                Disposition::Unrecognized(_) => StatsCounters::bump(&self.stats.unrecognized),
            }
            StatsCounters::bump(&self.stats.notifications);
            if !outcome.cleared {
                StatsCounters::bump(&self.stats.clear_failures);
            }
        }

        warn!("Command feed ended; continuing with the schedule only");
        std::future::pending::<()>().await;
    }

    async fn schedule_loop(&self) {
        let mut ticker = tokio::time::interval(self.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ledger = LastTriggered::new();

        loop {
            ticker.tick().await;

            let evaluation = self.evaluator.evaluate(&self.clock.now(), ledger).await;
            StatsCounters::bump(&self.stats.evaluations);
            StatsCounters::add(&self.stats.schedule_triggers, evaluation.triggered());
            StatsCounters::add(&self.stats.commands_sent, evaluation.sent.len());
            StatsCounters::add(&self.stats.commands_failed, evaluation.failed.len());

            ledger = evaluation.into();
        }
    }
}

async fn wait_for_halt(status: &mut watch::Receiver<ChannelStatus>) -> FatalLinkFailure {
    loop {
        if let ChannelStatus::Halted(failure) = &*status.borrow_and_update() {
            return failure.clone();
        }
        if status.changed().await.is_err() {
            // sender lives as long as the channel; never resolves
            std::future::pending::<()>().await;
        }
    }
}
