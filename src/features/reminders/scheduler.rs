//! Reminder dispatch loop
//!
//! A single background task ticks on the configured interval and runs one
//! dispatch cycle per tick: select due reminders, then deliver-then-disarm
//! each of them on a bounded worker pool. Cycles never overlap; a tick that
//! arrives while a cycle is still running is dropped.
//!
//! Loop states move `Idle -> Running -> Idle` per cycle and to `Stopped` on
//! shutdown. Shutdown lets an in-flight cycle drain for the configured grace
//! period before abandoning what is left of it.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::dispatch::{
    DeliveryOutcome, DeliveryReport, DisarmOutcome, DisarmPolicy, ReminderDispatcher,
};
use super::selector::DueReminderSelector;
use super::store::{EventStore, OwnerLookup, StoreError};
use crate::core::format_duration;
use crate::features::notifications::Notifier;

/// Capacity of the delivery report broadcast channel
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Tuning knobs for the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSettings {
    /// Time between dispatch cycles
    pub poll_interval: Duration,
    /// Maximum concurrent deliveries within one cycle
    pub workers: usize,
    pub disarm_policy: DisarmPolicy,
    /// How long an in-flight cycle may drain after shutdown is requested
    pub shutdown_grace: Duration,
    /// Optional bound on a single delivery attempt
    pub delivery_timeout: Option<Duration>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            workers: 4,
            disarm_policy: DisarmPolicy::Always,
            shutdown_grace: Duration::from_secs(30),
            delivery_timeout: None,
        }
    }
}

/// Dispatch loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Running => write!(f, "running"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-cycle tallies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Due reminders returned by the selector
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Not attempted because the owner could not be resolved
    pub skipped: usize,
    /// Reminders flipped to disarmed by this cycle
    pub disarmed: usize,
    /// Events that vanished or were already disarmed at disarm time
    pub vanished: usize,
}

impl CycleSummary {
    fn record(&mut self, report: &DeliveryReport) {
        match report.outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::DeliveryFailed => self.failed += 1,
            DeliveryOutcome::OwnerMissing | DeliveryOutcome::OwnerLookupFailed => {
                self.skipped += 1
            }
        }
        match report.disarm {
            DisarmOutcome::Applied => self.disarmed += 1,
            DisarmOutcome::NoChange => self.vanished += 1,
            DisarmOutcome::Skipped | DisarmOutcome::Failed => {}
        }
    }
}

/// Result of asking for a dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Another cycle was already running
    Skipped,
    /// The scheduler has been shut down
    Stopped,
}

/// Returns the loop to `Idle` when a cycle ends, unless it was stopped meanwhile
struct CycleGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let _ = self.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Periodic scan-and-dispatch engine for event reminders
pub struct ReminderScheduler {
    selector: DueReminderSelector,
    dispatcher: Arc<ReminderDispatcher>,
    settings: ReminderSettings,
    state: AtomicU8,
    reports: broadcast::Sender<DeliveryReport>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn EventStore>,
        owners: Arc<dyn OwnerLookup>,
        notifier: Arc<dyn Notifier>,
        settings: ReminderSettings,
    ) -> Self {
        let dispatcher = ReminderDispatcher::new(store.clone(), owners, notifier)
            .with_policy(settings.disarm_policy)
            .with_delivery_timeout(settings.delivery_timeout);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Self {
            selector: DueReminderSelector::new(store),
            dispatcher: Arc::new(dispatcher),
            settings,
            state: AtomicU8::new(LoopState::Idle as u8),
            reports,
        }
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Receive one [`DeliveryReport`] per attempted event
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    /// Refuse any further cycles; an in-flight cycle is not interrupted
    pub fn stop(&self) {
        self.state.store(LoopState::Stopped as u8, Ordering::Release);
    }

    fn begin_cycle(&self) -> Result<CycleGuard<'_>, LoopState> {
        self.state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| CycleGuard { state: &self.state })
            .map_err(LoopState::from_u8)
    }

    /// Run one dispatch cycle as of `now`
    ///
    /// Returns `Skipped` without touching the store if a cycle is already in
    /// progress. A failing selection aborts this cycle only; per-event
    /// failures never surface here.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, StoreError> {
        let _guard = match self.begin_cycle() {
            Ok(guard) => guard,
            Err(LoopState::Stopped) => return Ok(CycleOutcome::Stopped),
            Err(_) => {
                debug!("Reminder cycle already running, skipping");
                return Ok(CycleOutcome::Skipped);
            }
        };

        let due = self.selector.select(now).await?;
        let mut summary = CycleSummary {
            selected: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(CycleOutcome::Completed(summary));
        }

        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for event in due {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Reminder worker pool closed: {e}");
                    break;
                }
            };
            let dispatcher = self.dispatcher.clone();
            tasks.spawn(async move {
                let report = dispatcher.process(&event).await;
                drop(permit);
                report
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    summary.record(&report);
                    // No subscribers is fine
                    let _ = self.reports.send(report);
                }
                Err(e) => {
                    error!("Reminder delivery task aborted: {e}");
                    summary.failed += 1;
                }
            }
        }

        Ok(CycleOutcome::Completed(summary))
    }

    /// Tick until `cancel` fires, then drain and stop
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "⏰ Reminder scheduler started (interval: {}, workers: {}, disarm policy: {})",
            format_duration(self.settings.poll_interval),
            self.settings.workers,
            self.settings.disarm_policy
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let cycle = self.run_cycle(Utc::now());
            tokio::pin!(cycle);

            tokio::select! {
                result = &mut cycle => Self::log_cycle(&result),
                _ = cancel.cancelled() => {
                    self.stop();
                    info!(
                        "Shutdown requested during a reminder cycle, draining for up to {}",
                        format_duration(self.settings.shutdown_grace)
                    );
                    match tokio::time::timeout(self.settings.shutdown_grace, &mut cycle).await {
                        Ok(result) => Self::log_cycle(&result),
                        Err(_) => warn!(
                            "Reminder cycle did not finish within {}, abandoning remaining deliveries",
                            format_duration(self.settings.shutdown_grace)
                        ),
                    }
                    break;
                }
            }
        }

        self.stop();
        info!("Reminder scheduler stopped");
    }

    fn log_cycle(result: &Result<CycleOutcome, StoreError>) {
        match result {
            Ok(CycleOutcome::Completed(summary)) if summary.selected > 0 => info!(
                "Reminder cycle: {} due, {} delivered, {} failed, {} skipped, {} disarmed, {} vanished",
                summary.selected,
                summary.delivered,
                summary.failed,
                summary.skipped,
                summary.disarmed,
                summary.vanished
            ),
            Ok(CycleOutcome::Completed(_)) => debug!("Reminder cycle: nothing due"),
            Ok(CycleOutcome::Skipped) => debug!("Reminder cycle skipped (previous still running)"),
            Ok(CycleOutcome::Stopped) => debug!("Reminder cycle refused (scheduler stopped)"),
            Err(e) => error!("Reminder cycle failed, retrying next tick: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::events::Event;
    use crate::features::reminders::store::InMemoryStore;
    use crate::features::reminders::testing::{
        contact, event_with_reminder, GatedNotifier, RecordingNotifier, UnreachableOwners,
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicBool;

    fn settings() -> ReminderSettings {
        ReminderSettings {
            poll_interval: Duration::from_millis(20),
            workers: 4,
            disarm_policy: DisarmPolicy::Always,
            shutdown_grace: Duration::from_secs(2),
            delivery_timeout: None,
        }
    }

    fn scheduler(
        store: &InMemoryStore,
        notifier: Arc<dyn Notifier>,
        settings: ReminderSettings,
    ) -> Arc<ReminderScheduler> {
        Arc::new(ReminderScheduler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            notifier,
            settings,
        ))
    }

    fn due(id: &str, now: DateTime<Utc>) -> Event {
        event_with_reminder(
            id,
            "u1",
            true,
            Some(now - ChronoDuration::seconds(1)),
            now + ChronoDuration::hours(1),
        )
    }

    /// Fails every query until `healthy` is set
    struct FlakyStore {
        inner: InMemoryStore,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(StoreError::Query("connection reset".to_string()));
            }
            self.inner.find_due(now).await
        }

        async fn conditional_disarm(&self, event_id: &str) -> Result<bool, StoreError> {
            self.inner.conditional_disarm(event_id).await
        }
    }

    #[tokio::test]
    async fn test_due_reminder_delivered_once_then_disarmed() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        let first = scheduler.run_cycle(now).await.unwrap();
        let second = scheduler.run_cycle(now).await.unwrap();

        let CycleOutcome::Completed(first) = first else {
            panic!("expected completed cycle");
        };
        assert_eq!(first.selected, 1);
        assert_eq!(first.delivered, 1);
        assert_eq!(first.disarmed, 1);
        assert_eq!(second, CycleOutcome::Completed(CycleSummary::default()));
        assert_eq!(notifier.attempts_for("e1"), 1);
        assert!(!store.event("e1").unwrap().reminder.armed);
        assert_eq!(scheduler.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_future_and_stale_reminders_are_left_alone() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(event_with_reminder(
            "later",
            "u1",
            true,
            Some(now + ChronoDuration::hours(1)),
            now + ChronoDuration::hours(2),
        ));
        store.upsert_event(event_with_reminder(
            "past",
            "u1",
            true,
            Some(now - ChronoDuration::seconds(1)),
            now - ChronoDuration::seconds(1),
        ));

        let outcome = scheduler.run_cycle(now).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Completed(CycleSummary::default()));
        assert!(notifier.attempts().is_empty());
        assert!(store.event("later").unwrap().reminder.armed);
        assert!(store.event("past").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_isolated_from_other_events() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::failing_for(&["bad"]));
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let mut reports = scheduler.subscribe();
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("bad", now));
        store.upsert_event(due("good", now));

        let outcome = scheduler.run_cycle(now).await.unwrap();

        let CycleOutcome::Completed(summary) = outcome else {
            panic!("expected completed cycle");
        };
        assert_eq!(summary.selected, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.disarmed, 2);
        assert!(!store.event("bad").unwrap().reminder.armed);
        assert!(!store.event("good").unwrap().reminder.armed);

        let mut seen = vec![reports.recv().await.unwrap(), reports.recv().await.unwrap()];
        seen.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        assert_eq!(seen[0].event_id, "bad");
        assert_eq!(seen[0].outcome, DeliveryOutcome::DeliveryFailed);
        assert!(seen[0].reason.is_some());
        assert_eq!(seen[1].event_id, "good");
        assert_eq!(seen[1].outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_unresolvable_owners_do_not_block_other_events() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::new(store.clone()),
            Arc::new(UnreachableOwners::new(store.clone(), &["offline"])),
            notifier.clone(),
            settings(),
        ));
        let mut reports = scheduler.subscribe();
        let now = Utc::now();
        store.upsert_contact(contact("offline"));
        store.upsert_contact(contact("u1"));
        let mut unreachable = due("unreachable", now);
        unreachable.owner_id = "offline".to_string();
        let mut orphan = due("orphan", now);
        orphan.owner_id = "ghost".to_string();
        store.upsert_event(unreachable);
        store.upsert_event(orphan);
        store.upsert_event(due("good", now));

        let outcome = scheduler.run_cycle(now).await.unwrap();

        let CycleOutcome::Completed(summary) = outcome else {
            panic!("expected completed cycle");
        };
        assert_eq!(summary.selected, 3);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.disarmed, 1);
        assert_eq!(notifier.attempts(), vec!["good".to_string()]);
        assert!(!store.event("good").unwrap().reminder.armed);
        assert!(store.event("unreachable").unwrap().reminder.armed);
        assert!(store.event("orphan").unwrap().reminder.armed);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(reports.recv().await.unwrap());
        }
        seen.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        assert_eq!(seen[0].event_id, "good");
        assert_eq!(seen[1].event_id, "orphan");
        assert_eq!(seen[1].outcome, DeliveryOutcome::OwnerMissing);
        assert_eq!(seen[1].disarm, DisarmOutcome::Skipped);
        assert_eq!(seen[2].event_id, "unreachable");
        assert_eq!(seen[2].outcome, DeliveryOutcome::OwnerLookupFailed);
        assert_eq!(seen[2].disarm, DisarmOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_on_success_policy_retries_next_cycle() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::failing_for(&["e1"]));
        let scheduler = scheduler(
            &store,
            notifier.clone(),
            ReminderSettings {
                disarm_policy: DisarmPolicy::OnSuccess,
                ..settings()
            },
        );
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        scheduler.run_cycle(now).await.unwrap();
        scheduler.run_cycle(now).await.unwrap();

        assert_eq!(notifier.attempts_for("e1"), 2);
        assert!(store.event("e1").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let store = InMemoryStore::new();
        let notifier = GatedNotifier::new();
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        let running = scheduler.clone();
        let first = tokio::spawn(async move { running.run_cycle(now).await });
        notifier.wait_entered().await;

        assert_eq!(scheduler.state(), LoopState::Running);
        let second = scheduler.run_cycle(now).await.unwrap();
        assert_eq!(second, CycleOutcome::Skipped);

        notifier.open(1);
        let first = first.await.unwrap().unwrap();

        assert!(matches!(first, CycleOutcome::Completed(ref s) if s.delivered == 1));
        assert_eq!(notifier.calls(), 1);
        assert_eq!(scheduler.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_store_failure_fails_cycle_but_not_scheduler() {
        let inner = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let now = Utc::now();
        inner.upsert_contact(contact("u1"));
        inner.upsert_event(due("e1", now));
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            healthy: AtomicBool::new(false),
        });
        let scheduler = ReminderScheduler::new(
            store.clone(),
            Arc::new(inner.clone()),
            notifier.clone(),
            settings(),
        );

        assert!(scheduler.run_cycle(now).await.is_err());
        assert_eq!(scheduler.state(), LoopState::Idle);
        assert!(notifier.attempts().is_empty());

        store.healthy.store(true, Ordering::SeqCst);
        let outcome = scheduler.run_cycle(now).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.delivered == 1));
    }

    #[tokio::test]
    async fn test_stopped_scheduler_refuses_cycles() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        scheduler.stop();

        assert_eq!(scheduler.run_cycle(now).await.unwrap(), CycleOutcome::Stopped);
        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert!(store.event("e1").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_worker_pool_processes_every_event() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = scheduler(
            &store,
            notifier.clone(),
            ReminderSettings {
                workers: 2,
                ..settings()
            },
        );
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        for i in 0..10 {
            store.upsert_event(due(&format!("e{i}"), now));
        }

        let outcome = scheduler.run_cycle(now).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.delivered == 10));
        for i in 0..10 {
            assert_eq!(notifier.attempts_for(&format!("e{i}")), 1);
        }
    }

    #[tokio::test]
    async fn test_run_loop_delivers_and_stops_on_cancel() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let mut reports = scheduler.subscribe();
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.clone().run(cancel.clone()));

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.event_id, "e1");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert_eq!(notifier.attempts_for("e1"), 1);
        assert!(!store.event("e1").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_cycle() {
        let store = InMemoryStore::new();
        let notifier = GatedNotifier::new();
        let scheduler = scheduler(&store, notifier.clone(), settings());
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.clone().run(cancel.clone()));
        notifier.wait_entered().await;

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        notifier.open(1);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert!(!store.event("e1").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_cycle_after_grace() {
        let store = InMemoryStore::new();
        let notifier = GatedNotifier::new();
        let scheduler = scheduler(
            &store,
            notifier.clone(),
            ReminderSettings {
                shutdown_grace: Duration::from_millis(50),
                ..settings()
            },
        );
        let now = Utc::now();
        store.upsert_contact(contact("u1"));
        store.upsert_event(due("e1", now));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.clone().run(cancel.clone()));
        notifier.wait_entered().await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.state(), LoopState::Stopped);
        // Abandoned before the disarm step
        assert!(store.event("e1").unwrap().reminder.armed);
        assert_eq!(notifier.calls(), 1);
    }
}
