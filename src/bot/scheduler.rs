// src/bot/scheduler.rs - Durable deferred moderation actions with exactly-once dispatch

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::platforms::OperatorNotifier;
use crate::storage::{self, Store};
use crate::types::{
    ActionKind, ActionState, ActuatorError, ActuatorResult, ModerationResult, ScheduledAction,
    StuckActionError, UserId, ValidationError,
};

const COLLECTION: &str = "actions";

/// Subject used for actions that target the bot itself, such as status reverts
pub const SELF_SUBJECT: UserId = 0;

/// Performs the reversal an action stands for
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ScheduledAction) -> ActuatorResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed,
    Stuck(StuckActionError),
    /// Gone, not pending, not yet due, or claimed by someone else
    Skipped,
}

/// Result of one poll pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub completed: Vec<Uuid>,
    pub stuck: Vec<StuckActionError>,
    pub skipped: usize,
}

/// Actions in `actions` that are pending and due at `now`, earliest first
pub fn due_actions(actions: &[ScheduledAction], now: DateTime<Utc>) -> Vec<ScheduledAction> {
    let mut due: Vec<ScheduledAction> = actions.iter().filter(|a| a.is_due(now)).cloned().collect();
    due.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.id.cmp(&b.id)));
    due
}

/// Persistent queue of deferred reversals.
///
/// An action is claimed by moving it to `Executing` with a conditional write
/// before its handler runs, and retired with a conditional delete afterwards.
/// A failed handler leaves the action `Stuck` until an operator clears or
/// retries it; it is never dispatched again on its own.
pub struct ActionScheduler {
    store: Arc<dyn Store>,
    executor: Arc<dyn ActionExecutor>,
    notifier: Arc<dyn OperatorNotifier>,
    poll_interval: Duration,
    handler_timeout: Duration,
    schedule_lock: Mutex<()>,
    shutdown_signal: Arc<AtomicBool>,
    wake: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ActionScheduler {
    pub fn new(
        config: &SchedulerConfig,
        store: Arc<dyn Store>,
        executor: Arc<dyn ActionExecutor>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            poll_interval: config.poll_interval(),
            handler_timeout: config.handler_timeout(),
            schedule_lock: Mutex::new(()),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    async fn load_entries(&self) -> ModerationResult<Vec<(u64, ScheduledAction)>> {
        let docs = self.store.scan_all(COLLECTION).await?;
        let mut entries = Vec::with_capacity(docs.len());
        for doc in docs {
            match storage::decode::<ScheduledAction>(COLLECTION, &doc) {
                Ok(action) => entries.push((doc.revision, action)),
                Err(e) => error!("Skipping unreadable scheduled action: {}", e),
            }
        }
        Ok(entries)
    }

    /// Persist a deferred action. A pending action for the same kind and
    /// subject is replaced, so a repeated offense moves the timer instead
    /// of stacking a second one.
    pub async fn schedule(
        &self,
        kind: ActionKind,
        subject_id: UserId,
        due_at: DateTime<Utc>,
        tag: &str,
    ) -> ModerationResult<ScheduledAction> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ValidationError::MalformedSchedule("dedup tag must not be empty".to_string()).into());
        }

        let _guard = self.schedule_lock.lock().await;
        let action = ScheduledAction::new(kind, subject_id, due_at, tag);
        self.store
            .put(COLLECTION, &action.id.to_string(), storage::encode(&action)?)
            .await?;

        for (revision, existing) in self.load_entries().await? {
            if existing.id == action.id || !existing.is_pending() || !existing.same_slot(kind, subject_id) {
                continue;
            }
            if self
                .store
                .delete_if_revision(COLLECTION, &existing.id.to_string(), revision)
                .await?
            {
                info!(
                    "Replaced {} for user {} due {} with one due {}",
                    kind, subject_id, existing.due_at, due_at
                );
            }
        }

        info!("Scheduled {} for user {} at {} ({})", kind, subject_id, due_at, tag);
        Ok(action)
    }

    pub async fn schedule_unmute(
        &self,
        subject_id: UserId,
        after: ChronoDuration,
        tag: &str,
    ) -> ModerationResult<ScheduledAction> {
        self.schedule(ActionKind::Unmute, subject_id, Utc::now() + after, tag).await
    }

    pub async fn schedule_unban(
        &self,
        subject_id: UserId,
        after: ChronoDuration,
        tag: &str,
    ) -> ModerationResult<ScheduledAction> {
        self.schedule(ActionKind::Unban, subject_id, Utc::now() + after, tag).await
    }

    pub async fn schedule_unselfmute(
        &self,
        subject_id: UserId,
        after: ChronoDuration,
        tag: &str,
    ) -> ModerationResult<ScheduledAction> {
        self.schedule(ActionKind::Unselfmute, subject_id, Utc::now() + after, tag).await
    }

    pub async fn schedule_status_revert(&self, after: ChronoDuration, tag: &str) -> ModerationResult<ScheduledAction> {
        self.schedule(ActionKind::RevertStatus, SELF_SUBJECT, Utc::now() + after, tag).await
    }

    /// Cancel pending actions for `(kind, subject_id)`, returning how many were removed.
    /// Safe against a concurrent poll: a claimed action is left to finish.
    pub async fn unschedule(&self, kind: ActionKind, subject_id: UserId) -> ModerationResult<usize> {
        let _guard = self.schedule_lock.lock().await;
        let mut removed = 0;
        for (revision, action) in self.load_entries().await? {
            if !action.is_pending() || !action.same_slot(kind, subject_id) {
                continue;
            }
            if self
                .store
                .delete_if_revision(COLLECTION, &action.id.to_string(), revision)
                .await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Unscheduled {} {} action(s) for user {}", removed, kind, subject_id);
        }
        Ok(removed)
    }

    /// Pending actions due at `now`. Reads only; calling it repeatedly with
    /// the same stored state and `now` yields the same set.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> ModerationResult<Vec<ScheduledAction>> {
        let actions: Vec<ScheduledAction> = self.load_entries().await?.into_iter().map(|(_, a)| a).collect();
        Ok(due_actions(&actions, now))
    }

    /// Dispatch every action due at `now`
    pub async fn run_due(&self, now: DateTime<Utc>) -> ModerationResult<PassReport> {
        let due = self.poll_once(now).await?;
        let mut report = PassReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        debug!("{} scheduled action(s) due", due.len());
        for action in due {
            match self.dispatch(action.id, Some(now)).await {
                Ok(DispatchOutcome::Completed) => report.completed.push(action.id),
                Ok(DispatchOutcome::Stuck(err)) => report.stuck.push(err),
                Ok(DispatchOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to dispatch action {}: {}", action.id, e);
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    async fn dispatch(&self, id: Uuid, now: Option<DateTime<Utc>>) -> ModerationResult<DispatchOutcome> {
        let key = id.to_string();
        // Re-check existence: the action may have been unscheduled or replaced since the poll
        let Some(doc) = self.store.get(COLLECTION, &key).await? else {
            debug!("Action {} vanished before dispatch", id);
            return Ok(DispatchOutcome::Skipped);
        };
        let mut action: ScheduledAction = storage::decode(COLLECTION, &doc)?;
        if !action.is_pending() || now.map_or(false, |now| !action.is_due(now)) {
            return Ok(DispatchOutcome::Skipped);
        }

        action.state = ActionState::Executing { started_at: Utc::now() };
        let Some(claimed) = self
            .store
            .put_if_revision(COLLECTION, &key, doc.revision, storage::encode(&action)?)
            .await?
        else {
            debug!("Action {} was claimed or changed concurrently", id);
            return Ok(DispatchOutcome::Skipped);
        };

        let result = match tokio::time::timeout(self.handler_timeout, self.executor.execute(&action)).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::TimedOut(self.handler_timeout)),
        };

        match result {
            Ok(()) => match self.store.delete_if_revision(COLLECTION, &key, claimed).await {
                Ok(retired) => {
                    if !retired {
                        warn!("Action {} changed while executing; leaving it in the store", id);
                    }
                    info!("Completed {} for user {}", action.kind, action.subject_id);
                    Ok(DispatchOutcome::Completed)
                }
                Err(e) => {
                    // Ran once already; it must not be picked up again
                    let cause = format!("executed but could not be retired: {}", e);
                    Ok(DispatchOutcome::Stuck(self.mark_stuck(action, claimed, cause).await))
                }
            },
            Err(e) => Ok(DispatchOutcome::Stuck(self.mark_stuck(action, claimed, e.to_string()).await)),
        }
    }

    /// Flag an action for an operator. The report goes out even when the
    /// store cannot record the new state.
    async fn mark_stuck(&self, mut action: ScheduledAction, revision: u64, cause: String) -> StuckActionError {
        action.state = ActionState::Stuck {
            reason: cause.clone(),
            since: Utc::now(),
        };
        let written = match storage::encode(&action) {
            Ok(body) => {
                self.store
                    .put_if_revision(COLLECTION, &action.id.to_string(), revision, body)
                    .await
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(Some(_)) => {}
            Ok(None) => warn!("Action {} changed before it could be marked stuck", action.id),
            Err(e) => error!("Could not record action {} as stuck: {}", action.id, e),
        }

        let stuck = StuckActionError {
            action_id: action.id,
            kind: action.kind,
            subject_id: action.subject_id,
            cause,
        };
        error!("{}", stuck);
        self.notifier.report_stuck_action(&stuck).await;
        stuck
    }

    /// Startup pass: flag actions interrupted mid-dispatch, then run everything
    /// that became due while the process was down
    pub async fn recover(&self, now: DateTime<Utc>) -> ModerationResult<PassReport> {
        let entries = self.load_entries().await?;
        info!("Recovering {} persisted action(s)", entries.len());

        let mut interrupted = Vec::new();
        for (revision, action) in entries {
            if matches!(action.state, ActionState::Executing { .. }) {
                let stuck = self
                    .mark_stuck(action, revision, "interrupted while executing".to_string())
                    .await;
                interrupted.push(stuck);
            }
        }

        let mut report = self.run_due(now).await?;
        report.stuck.extend(interrupted);
        info!(
            "Recovery pass: {} completed, {} stuck, {} skipped",
            report.completed.len(),
            report.stuck.len(),
            report.skipped
        );
        Ok(report)
    }

    /// Run the recovery pass, then poll on a fixed interval until `shutdown`.
    /// Starting again replaces the running loop.
    pub async fn start(self: &Arc<Self>) -> ModerationResult<PassReport> {
        let mut slot = self.loop_handle.lock().await;
        if let Some(previous) = slot.take() {
            info!("Restarting action scheduler loop");
            self.stop_loop(previous).await;
        }

        self.shutdown_signal.store(false, Ordering::Relaxed);
        let report = self.recover(Utc::now()).await?;

        let scheduler = Arc::clone(self);
        let shutdown_signal = Arc::clone(&self.shutdown_signal);
        let wake = Arc::clone(&self.wake);
        let period = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            info!("Action scheduler polling every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }

                if shutdown_signal.load(Ordering::Relaxed) {
                    break;
                }

                match scheduler.run_due(Utc::now()).await {
                    Ok(report) if !report.completed.is_empty() || !report.stuck.is_empty() => {
                        info!(
                            "Scheduler pass: {} completed, {} stuck",
                            report.completed.len(),
                            report.stuck.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Scheduler pass failed: {}", e),
                }
            }

            info!("Action scheduler stopped");
        });

        *slot = Some(handle);
        Ok(report)
    }

    async fn stop_loop(&self, handle: JoinHandle<()>) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
        self.wake.notify_one();
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    /// Ask the poll loop for an immediate pass
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn shutdown(&self) {
        let previous = self.loop_handle.lock().await.take();
        match previous {
            Some(handle) => self.stop_loop(handle).await,
            None => self.shutdown_signal.store(true, Ordering::Relaxed),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Every persisted action, earliest due first
    pub async fn list(&self) -> ModerationResult<Vec<ScheduledAction>> {
        let mut actions: Vec<ScheduledAction> = self.load_entries().await?.into_iter().map(|(_, a)| a).collect();
        actions.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.id.cmp(&b.id)));
        Ok(actions)
    }

    pub async fn get(&self, id: Uuid) -> ModerationResult<Option<ScheduledAction>> {
        match self.store.get(COLLECTION, &id.to_string()).await? {
            Some(doc) => Ok(Some(storage::decode(COLLECTION, &doc)?)),
            None => Ok(None),
        }
    }

    async fn get_with_revision(&self, id: Uuid) -> ModerationResult<(u64, ScheduledAction)> {
        match self.store.get(COLLECTION, &id.to_string()).await? {
            Some(doc) => Ok((doc.revision, storage::decode(COLLECTION, &doc)?)),
            None => Err(ValidationError::NotFound {
                expression: id.to_string(),
            }
            .into()),
        }
    }

    /// Execute a pending action now, through the same claim and retire path as the loop
    pub async fn complete_now(&self, id: Uuid) -> ModerationResult<DispatchOutcome> {
        let (_, action) = self.get_with_revision(id).await?;
        if !action.is_pending() {
            return Err(ValidationError::MalformedSchedule(format!("action {} is not pending", id)).into());
        }
        info!("Completing {} for user {} ahead of schedule", action.kind, action.subject_id);
        self.dispatch(id, None).await
    }

    /// Operator clearance: drop a stuck action without running it
    pub async fn clear_stuck(&self, id: Uuid) -> ModerationResult<ScheduledAction> {
        let (revision, action) = self.get_with_revision(id).await?;
        if !action.is_stuck() {
            return Err(ValidationError::MalformedSchedule(format!("action {} is not stuck", id)).into());
        }
        if !self
            .store
            .delete_if_revision(COLLECTION, &id.to_string(), revision)
            .await?
        {
            return Err(ValidationError::MalformedSchedule(format!("action {} changed concurrently", id)).into());
        }
        info!("Cleared stuck {} for user {}", action.kind, action.subject_id);
        Ok(action)
    }

    /// Return a stuck action to the queue; it runs on the next pass if due
    pub async fn retry_stuck(&self, id: Uuid) -> ModerationResult<ScheduledAction> {
        let (revision, mut action) = self.get_with_revision(id).await?;
        if !action.is_stuck() {
            return Err(ValidationError::MalformedSchedule(format!("action {} is not stuck", id)).into());
        }
        action.state = ActionState::Pending;
        if self
            .store
            .put_if_revision(COLLECTION, &id.to_string(), revision, storage::encode(&action)?)
            .await?
            .is_none()
        {
            return Err(ValidationError::MalformedSchedule(format!("action {} changed concurrently", id)).into());
        }
        info!("Re-queued stuck {} for user {}", action.kind, action.subject_id);
        self.wake();
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::memory::LogNotifier;
    use crate::storage::{Document, DocumentFilter, JsonFileStore, MemoryStore};
    use crate::types::{ModerationError, StoreResult};
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<(ActionKind, UserId)>>,
        failing: Mutex<HashSet<UserId>>,
        delay: Option<Duration>,
    }

    impl RecordingExecutor {
        async fn executed(&self) -> Vec<(ActionKind, UserId)> {
            self.executed.lock().await.clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, action: &ScheduledAction) -> ActuatorResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.executed.lock().await.push((action.kind, action.subject_id));
            if self.failing.lock().await.contains(&action.subject_id) {
                return Err(ActuatorError::Unavailable("rate limited".to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        executor: Arc<RecordingExecutor>,
        notifier: Arc<LogNotifier>,
        scheduler: Arc<ActionScheduler>,
    }

    fn harness_with(store: Arc<MemoryStore>, executor: RecordingExecutor, poll_seconds: u64) -> Harness {
        let executor = Arc::new(executor);
        let notifier = Arc::new(LogNotifier::new());
        let config = SchedulerConfig {
            poll_interval_seconds: poll_seconds,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(ActionScheduler::new(
            &config,
            store.clone(),
            executor.clone(),
            notifier.clone(),
        ));
        Harness {
            store,
            executor,
            notifier,
            scheduler,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStore::new()), RecordingExecutor::default(), 3600)
    }

    #[tokio::test]
    async fn test_second_schedule_replaces_first() {
        let h = harness();
        let now = Utc::now();
        h.scheduler
            .schedule(ActionKind::Unmute, 1, now + ChronoDuration::minutes(30), "spam")
            .await
            .unwrap();
        let later = now + ChronoDuration::hours(1);
        h.scheduler.schedule(ActionKind::Unmute, 1, later, "spam").await.unwrap();
        h.scheduler.schedule(ActionKind::Unban, 1, now, "ban").await.unwrap();

        let unmutes: Vec<_> = h
            .scheduler
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ActionKind::Unmute)
            .collect();
        assert_eq!(unmutes.len(), 1);
        assert_eq!(unmutes[0].due_at, later);
        assert_eq!(h.store.len("actions").await, 2);
    }

    #[tokio::test]
    async fn test_empty_tag_is_rejected() {
        let h = harness();
        let err = h
            .scheduler
            .schedule(ActionKind::Unmute, 1, Utc::now(), "  ")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::MalformedSchedule(_))
        ));
        assert_eq!(h.store.len("actions").await, 0);
    }

    #[test]
    fn test_due_actions_is_deterministic() {
        let now = Utc::now();
        let mut stuck = ScheduledAction::new(ActionKind::Unban, 4, now - ChronoDuration::hours(2), "x");
        stuck.state = ActionState::Stuck {
            reason: "boom".to_string(),
            since: now,
        };
        let actions = vec![
            ScheduledAction::new(ActionKind::Unmute, 1, now + ChronoDuration::minutes(1), "a"),
            ScheduledAction::new(ActionKind::Unmute, 2, now - ChronoDuration::minutes(1), "b"),
            ScheduledAction::new(ActionKind::Unban, 3, now, "c"),
            ScheduledAction::new(ActionKind::Unselfmute, 5, now - ChronoDuration::hours(1), "d"),
            stuck,
        ];

        let first = due_actions(&actions, now);
        let second = due_actions(&actions, now);
        assert_eq!(first, second);
        let subjects: Vec<UserId> = first.iter().map(|a| a.subject_id).collect();
        assert_eq!(subjects, vec![5, 2, 3]);
    }

    #[tokio::test]
    async fn test_poll_once_does_not_consume() {
        let h = harness();
        let now = Utc::now();
        h.scheduler
            .schedule(ActionKind::Unmute, 1, now - ChronoDuration::seconds(5), "t")
            .await
            .unwrap();

        let first = h.scheduler.poll_once(now).await.unwrap();
        let second = h.scheduler.poll_once(now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert!(h.executor.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_runs_past_due_before_first_tick() {
        let store = Arc::new(MemoryStore::new());
        {
            let before_crash = harness_with(store.clone(), RecordingExecutor::default(), 3600);
            let past = Utc::now() - ChronoDuration::minutes(10);
            for subject in 1..=3 {
                before_crash
                    .scheduler
                    .schedule(ActionKind::Unmute, subject, past, "crash")
                    .await
                    .unwrap();
            }
        }

        let h = harness_with(store.clone(), RecordingExecutor::default(), 3600);
        let report = h.scheduler.start().await.unwrap();
        assert_eq!(report.completed.len(), 3);
        assert_eq!(h.executor.executed().await.len(), 3);
        assert_eq!(store.len("actions").await, 0);
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_action_is_stuck_and_not_retried() {
        let executor = RecordingExecutor::default();
        executor.failing.lock().await.insert(7);
        let h = harness_with(Arc::new(MemoryStore::new()), executor, 3600);
        let now = Utc::now();
        let action = h
            .scheduler
            .schedule(ActionKind::Unban, 7, now - ChronoDuration::seconds(1), "appeal")
            .await
            .unwrap();

        let report = h.scheduler.run_due(now).await.unwrap();
        assert_eq!(report.stuck.len(), 1);
        assert_eq!(report.stuck[0].action_id, action.id);

        let report = h.scheduler.run_due(now + ChronoDuration::minutes(5)).await.unwrap();
        assert!(report.stuck.is_empty());
        assert_eq!(h.executor.executed().await.len(), 1);
        assert_eq!(h.notifier.stuck_reports().await.len(), 1);

        let listed = h.scheduler.list().await.unwrap();
        assert!(listed[0].is_stuck());

        h.scheduler.clear_stuck(action.id).await.unwrap();
        assert!(h.scheduler.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_stuck_requeues_action() {
        let executor = RecordingExecutor::default();
        executor.failing.lock().await.insert(3);
        let h = harness_with(Arc::new(MemoryStore::new()), executor, 3600);
        let now = Utc::now();
        let action = h
            .scheduler
            .schedule(ActionKind::Unmute, 3, now - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();
        h.scheduler.run_due(now).await.unwrap();

        h.executor.failing.lock().await.clear();
        let requeued = h.scheduler.retry_stuck(action.id).await.unwrap();
        assert!(requeued.is_pending());

        let report = h.scheduler.run_due(now).await.unwrap();
        assert_eq!(report.completed, vec![action.id]);
        assert!(h.scheduler.get(action.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unschedule_wins_race_with_poll() {
        let h = harness();
        let now = Utc::now();
        h.scheduler
            .schedule(ActionKind::Unmute, 9, now - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();

        let due = h.scheduler.poll_once(now).await.unwrap();
        assert_eq!(h.scheduler.unschedule(ActionKind::Unmute, 9).await.unwrap(), 1);

        let outcome = h.scheduler.dispatch(due[0].id, Some(now)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(h.executor.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_executes_once() {
        let h = harness_with(
            Arc::new(MemoryStore::new()),
            RecordingExecutor {
                delay: Some(Duration::from_millis(20)),
                ..RecordingExecutor::default()
            },
            3600,
        );
        let now = Utc::now();
        let action = h
            .scheduler
            .schedule(ActionKind::Unmute, 1, now - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.scheduler.dispatch(action.id, Some(now)),
            h.scheduler.dispatch(action.id, Some(now))
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| **o == DispatchOutcome::Completed).count(), 1);
        assert_eq!(h.executor.executed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_action_is_flagged_not_rerun() {
        let h = harness();
        let mut action = ScheduledAction::new(ActionKind::Unmute, 4, Utc::now() - ChronoDuration::hours(1), "t");
        action.state = ActionState::Executing {
            started_at: Utc::now() - ChronoDuration::minutes(59),
        };
        h.store
            .put("actions", &action.id.to_string(), storage::encode(&action).unwrap())
            .await
            .unwrap();

        let report = h.scheduler.recover(Utc::now()).await.unwrap();
        assert_eq!(report.stuck.len(), 1);
        assert!(report.completed.is_empty());
        assert!(h.executor.executed().await.is_empty());
        assert!(h.scheduler.get(action.id).await.unwrap().unwrap().is_stuck());
    }

    #[tokio::test]
    async fn test_handler_timeout_marks_action_stuck() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(RecordingExecutor {
            delay: Some(Duration::from_millis(200)),
            ..RecordingExecutor::default()
        });
        let notifier = Arc::new(LogNotifier::new());
        let scheduler = ActionScheduler::new(&SchedulerConfig::default(), store, executor, notifier.clone())
            .with_handler_timeout(Duration::from_millis(20));

        let now = Utc::now();
        scheduler
            .schedule(ActionKind::Unmute, 1, now - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();
        let report = scheduler.run_due(now).await.unwrap();
        assert_eq!(report.stuck.len(), 1);
        assert!(report.stuck[0].cause.contains("timed out"));
        assert_eq!(notifier.stuck_reports().await.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_now_runs_future_action() {
        let h = harness();
        let action = h
            .scheduler
            .schedule_unselfmute(6, ChronoDuration::days(1), "self")
            .await
            .unwrap();

        let outcome = h.scheduler.complete_now(action.id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(h.executor.executed().await, vec![(ActionKind::Unselfmute, 6)]);
        assert!(h.scheduler.complete_now(action.id).await.is_err());
    }

    #[tokio::test]
    async fn test_wake_triggers_loop_pass() {
        let h = harness();
        h.scheduler.start().await.unwrap();
        h.scheduler
            .schedule(ActionKind::Unmute, 2, Utc::now() - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();

        h.scheduler.wake();
        for _ in 0..50 {
            if !h.executor.executed().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.executor.executed().await, vec![(ActionKind::Unmute, 2)]);
        h.scheduler.shutdown().await;
    }

    /// Succeeds, but takes the store down on the way out
    struct OutageExecutor {
        store: Arc<MemoryStore>,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for OutageExecutor {
        async fn execute(&self, _action: &ScheduledAction) -> ActuatorResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.store.set_unavailable(true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unretirable_action_is_reported_immediately() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(OutageExecutor {
            store: store.clone(),
            runs: AtomicUsize::new(0),
        });
        let notifier = Arc::new(LogNotifier::new());
        let scheduler = ActionScheduler::new(
            &SchedulerConfig::default(),
            store.clone(),
            executor.clone(),
            notifier.clone(),
        );

        let now = Utc::now();
        let action = scheduler
            .schedule(ActionKind::Unmute, 3, now - ChronoDuration::seconds(1), "t")
            .await
            .unwrap();
        let report = scheduler.run_due(now).await.unwrap();
        assert_eq!(report.stuck.len(), 1);
        assert_eq!(report.stuck[0].action_id, action.id);
        assert!(report.stuck[0].cause.contains("could not be retired"));
        assert_eq!(notifier.stuck_reports().await.len(), 1);

        store.set_unavailable(false);
        let report = scheduler.run_due(now).await.unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_skips_unreadable_file_next_to_valid_action() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(temp_dir.path()).await.unwrap());
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = ActionScheduler::new(
            &SchedulerConfig::default(),
            store,
            executor.clone(),
            Arc::new(LogNotifier::new()),
        );

        scheduler
            .schedule(ActionKind::Unmute, 4, Utc::now() - ChronoDuration::minutes(1), "t")
            .await
            .unwrap();
        tokio::fs::write(temp_dir.path().join("actions").join("garbage.json"), b"{trunc")
            .await
            .unwrap();

        let report = scheduler.recover(Utc::now()).await.unwrap();
        assert_eq!(report.completed.len(), 1);
        assert_eq!(executor.executed().await, vec![(ActionKind::Unmute, 4)]);
        scheduler
            .schedule(ActionKind::Unban, 4, Utc::now() + ChronoDuration::hours(1), "later")
            .await
            .unwrap();
    }

    /// Memory store that counts collection scans, one per poll pass
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn put(&self, collection: &str, id: &str, body: Value) -> StoreResult<u64> {
            self.inner.put(collection, id, body).await
        }

        async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
            self.inner.get(collection, id).await
        }

        async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
            self.inner.delete(collection, id).await
        }

        async fn scan(&self, collection: &str, predicate: DocumentFilter<'_>) -> StoreResult<Vec<Document>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.scan(collection, predicate).await
        }

        async fn put_if_revision(
            &self,
            collection: &str,
            id: &str,
            expected: u64,
            body: Value,
        ) -> StoreResult<Option<u64>> {
            self.inner.put_if_revision(collection, id, expected, body).await
        }

        async fn delete_if_revision(&self, collection: &str, id: &str, expected: u64) -> StoreResult<bool> {
            self.inner.delete_if_revision(collection, id, expected).await
        }
    }

    #[tokio::test]
    async fn test_second_start_replaces_running_loop() {
        let store = Arc::new(CountingStore::default());
        let config = SchedulerConfig {
            poll_interval_seconds: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(ActionScheduler::new(
            &config,
            store.clone(),
            Arc::new(RecordingExecutor::default()),
            Arc::new(LogNotifier::new()),
        ));

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);

        let after_start = store.scans.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // A single loop makes exactly one pass in the first interval
        assert_eq!(store.scans.load(Ordering::SeqCst) - after_start, 1);

        scheduler.shutdown().await;
        assert!(!scheduler.is_running().await);
    }
}
