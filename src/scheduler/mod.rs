//! Check scheduler.
//!
//! One recurring task per active service plus an immediate-trigger path, both
//! funneled through a per-service lock so a service never has two probes in
//! flight at once. Each fire re-fetches the service, gates on connectivity,
//! runs the checker, persists the result, appends history and feeds the
//! notification gate.

use crate::checker::Checker;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{CheckHistoryRecord, DbError, Service, Store};
use crate::notify::{NotificationGate, Notifier};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Floor applied to every service interval. The original scheduling
    /// backend could not fire more often than every 15 minutes; the floor is
    /// kept configurable rather than silently assumed.
    pub min_interval: Duration,
    /// Delay before retrying a fire that was skipped by the connectivity gate.
    pub retry_delay: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(15 * 60),
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// How a completed job reports back to the owning loop. A failed probe is a
/// monitoring result, not a job failure; only store errors fail the job, and
/// only the connectivity gate requests a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Success,
    Retry,
    Failure,
}

/// Everything a single fire needs, cloneable into spawned tasks.
#[derive(Clone)]
struct JobContext {
    store: Arc<Store>,
    checker: Arc<dyn Checker>,
    gate: Arc<NotificationGate>,
    connectivity: Arc<dyn ConnectivityMonitor>,
}

/// Per-service execution slot. The lock serializes probes for one service id;
/// the queued flag coalesces immediate triggers so a burst of run-now requests
/// collapses into the one already waiting.
struct Slot {
    lock: tokio::sync::Mutex<()>,
    queued: AtomicBool,
}

/// The main scheduler owning one recurring timer per active service.
pub struct Scheduler {
    ctx: JobContext,
    options: SchedulerOptions,
    timers: Arc<RwLock<HashMap<i64, broadcast::Sender<()>>>>,
    slots: Arc<StdMutex<HashMap<i64, Arc<Slot>>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        checker: Arc<dyn Checker>,
        notifier: Arc<dyn Notifier>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            ctx: JobContext {
                store,
                checker,
                gate: Arc::new(NotificationGate::new(notifier)),
                connectivity,
            },
            options,
            timers: Arc::new(RwLock::new(HashMap::new())),
            slots: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Establish (or replace) a recurring timer for every non-archived
    /// service. Idempotent: re-invoking replaces existing timers keyed by
    /// service id and drops timers for services no longer active.
    pub async fn schedule_all(&self) -> Result<(), DbError> {
        let services = self.ctx.store.get_active()?;
        tracing::info!("Scheduler: scheduling {} services", services.len());

        let active_ids: Vec<i64> = services.iter().map(|s| s.id).collect();
        {
            let mut timers = self.timers.write().await;
            let stale: Vec<i64> = timers
                .keys()
                .copied()
                .filter(|id| !active_ids.contains(id))
                .collect();
            for id in stale {
                if let Some(stop) = timers.remove(&id) {
                    let _ = stop.send(());
                }
            }
        }

        for service in services {
            self.schedule_service(service.id, service.interval).await;
        }
        Ok(())
    }

    /// Replace the timer for a single service — the call to make after a
    /// create or edit, since the interval may have changed. Archived services
    /// get their timer cancelled instead.
    pub async fn reschedule_one(&self, service: &Service) {
        if service.archived {
            self.cancel_one(service.id).await;
        } else {
            self.schedule_service(service.id, service.interval).await;
        }
    }

    /// Cancel and remove the timer for a service — the call to make on delete.
    /// Any in-flight probe is abandoned, not killed; its completion handler
    /// tolerates the service being gone.
    pub async fn cancel_one(&self, id: i64) {
        let mut timers = self.timers.write().await;
        if let Some(stop) = timers.remove(&id) {
            let _ = stop.send(());
            tracing::info!("Scheduler: cancelled service {}", id);
        }
    }

    /// Trigger an immediate out-of-band check for one service. At most one
    /// check is ever in flight per service; a trigger arriving while another
    /// is already queued coalesces with it. Unlike recurring scheduling, an
    /// explicit trigger probes archived services too.
    pub fn run_now(&self, id: i64) {
        let slot = self.slot(id);
        if slot.queued.swap(true, Ordering::SeqCst) {
            return;
        }

        let ctx = self.ctx.clone();
        let retry_delay = self.options.retry_delay;
        tokio::spawn(async move {
            loop {
                let outcome = {
                    let _guard = slot.lock.lock().await;
                    slot.queued.store(false, Ordering::SeqCst);
                    run_check_job(&ctx, id, true).await
                };
                if outcome != JobOutcome::Retry {
                    break;
                }
                tokio::time::sleep(retry_delay).await;
            }
        });
    }

    /// Trigger immediate checks for every non-archived service.
    pub fn run_all_now(&self) -> Result<(), DbError> {
        for service in self.ctx.store.get_active()? {
            self.run_now(service.id);
        }
        Ok(())
    }

    /// Cancel every recurring timer. Called on process shutdown so background
    /// work does not outlive its owner.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.write().await;
        for (_, stop) in timers.drain() {
            let _ = stop.send(());
        }
        tracing::info!("Scheduler: shut down");
    }

    /// Number of services currently holding a recurring timer.
    pub async fn scheduled_count(&self) -> usize {
        self.timers.read().await.len()
    }

    async fn schedule_service(&self, id: i64, interval_minutes: i64) {
        let secs = (interval_minutes.max(1) as u64 * 60).max(self.options.min_interval.as_secs());
        let interval = Duration::from_secs(secs);

        let (stop_tx, stop_rx) = broadcast::channel(1);
        {
            let mut timers = self.timers.write().await;
            if let Some(old) = timers.insert(id, stop_tx) {
                let _ = old.send(());
            }
        }

        let ctx = self.ctx.clone();
        let slot = self.slot(id);
        let retry_delay = self.options.retry_delay;
        tokio::spawn(async move {
            run_service_loop(ctx, slot, id, interval, retry_delay, stop_rx).await;
        });
    }

    fn slot(&self, id: i64) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Slot {
                    lock: tokio::sync::Mutex::new(()),
                    queued: AtomicBool::new(false),
                })
            })
            .clone()
    }
}

/// Recurring loop for a single service.
async fn run_service_loop(
    ctx: JobContext,
    slot: Arc<Slot>,
    id: i64,
    interval: Duration,
    retry_delay: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                // Jitter to avoid a thundering herd when many services share
                // an interval.
                let jitter = rand::random::<u64>() % 1000;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                loop {
                    let outcome = {
                        let _guard = slot.lock.lock().await;
                        run_check_job(&ctx, id, false).await
                    };
                    match outcome {
                        JobOutcome::Retry => {
                            tokio::select! {
                                _ = stop_rx.recv() => return,
                                _ = tokio::time::sleep(retry_delay) => {}
                            }
                        }
                        JobOutcome::Success | JobOutcome::Failure => break,
                    }
                }
            }
        }
    }
}

/// One complete fire: re-fetch, gate, probe, persist, log history, notify.
///
/// `explicit` marks a user-triggered check, which probes archived services;
/// a recurring fire that finds its service archived is a no-op.
async fn run_check_job(ctx: &JobContext, id: i64, explicit: bool) -> JobOutcome {
    let service = match ctx.store.get_by_id(id) {
        Ok(Some(service)) => service,
        Ok(None) => {
            tracing::debug!("Service {} gone before check, skipping", id);
            return JobOutcome::Success;
        }
        Err(e) => {
            tracing::error!("Failed to load service {}: {}", id, e);
            return JobOutcome::Failure;
        }
    };

    if service.archived && !explicit {
        return JobOutcome::Success;
    }

    if !ctx.connectivity.link_status().is_sufficient() {
        tracing::debug!("Connectivity insufficient, deferring check of {}", service.name);
        return JobOutcome::Retry;
    }

    let outcome = ctx.checker.check(&service).await;
    let status = outcome.into_status();
    let now = Utc::now().timestamp_millis();

    if let Err(e) = ctx.store.apply_check_result(id, &status, now) {
        tracing::error!(
            "Failed to persist check result for {} (was: {}): {}",
            service.name,
            status,
            e
        );
        return JobOutcome::Failure;
    }

    if let Err(e) = ctx.store.append_history(&CheckHistoryRecord {
        id: 0,
        service_name: service.name.clone(),
        timestamp: now,
        status: status.clone(),
    }) {
        tracing::error!("Failed to append history for {}: {}", service.name, e);
        return JobOutcome::Failure;
    }

    ctx.gate.on_result(&service, &status);
    tracing::debug!("Checked {} -> {}", service.name, status);
    JobOutcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Outcome;
    use crate::connectivity::{AlwaysOnline, LinkStatus};
    use crate::db::Service;
    use crate::notify::testing::{Event, RecordingNotifier};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    /// Checker double: plays back a scripted sequence of outcomes (the last
    /// one repeating) and tracks concurrent invocations.
    struct ScriptedChecker {
        script: StdMutex<VecDeque<Outcome>>,
        fallback: Outcome,
        delay: Duration,
        current: AtomicUsize,
        max_seen: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedChecker {
        fn always(outcome: Outcome) -> Arc<Self> {
            Self::scripted(Vec::new(), outcome)
        }

        fn scripted(script: Vec<Outcome>, fallback: Outcome) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                fallback,
                delay: Duration::from_millis(20),
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        async fn check(&self, _service: &Service) -> Outcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Connectivity double that comes online after a number of queries.
    struct FlakyLink {
        remaining_offline: AtomicUsize,
    }

    impl ConnectivityMonitor for FlakyLink {
        fn link_status(&self) -> LinkStatus {
            let offline = self
                .remaining_offline
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            LinkStatus {
                validated: !offline,
                downlink_kbps: if offline { 100 } else { 10_000 },
            }
        }
    }

    struct Harness {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        checker: Arc<ScriptedChecker>,
        notifier: Arc<RecordingNotifier>,
        scheduler: Scheduler,
    }

    fn harness_with(
        checker: Arc<ScriptedChecker>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Harness {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::new(
            store.clone(),
            checker.clone(),
            notifier.clone(),
            connectivity,
            SchedulerOptions {
                min_interval: Duration::from_secs(15 * 60),
                retry_delay: Duration::from_millis(20),
            },
        );
        Harness {
            _tmp: tmp,
            store,
            checker,
            notifier,
            scheduler,
        }
    }

    fn add_service(store: &Store, name: &str) -> i64 {
        let mut service = Service {
            name: name.to_string(),
            url: format!("https://{}.example.com", name),
            interval: 30,
            ..Default::default()
        };
        store.insert_service(&mut service).unwrap()
    }

    /// Poll until the predicate holds or two seconds pass.
    async fn wait_for(mut pred: impl FnMut() -> bool) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_ok_result_updates_state_history_and_clears_notification() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "web");

        h.scheduler.run_now(id);
        wait_for(|| h.store.get_by_id(id).unwrap().unwrap().status == "ok").await;

        let service = h.store.get_by_id(id).unwrap().unwrap();
        assert!(service.last_checked > 0);
        assert_eq!(service.last_checked, service.last_successful_check);

        let history = h.store.get_history(0, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].service_name, "web");
        assert_eq!(history[0].status, "ok");

        let events = h.notifier.events.lock().unwrap();
        assert_eq!(*events, vec![Event::Cancelled { id }]);
    }

    #[tokio::test]
    async fn test_failure_updates_status_keeps_last_successful_and_notifies() {
        let h = harness_with(
            ScriptedChecker::always(Outcome::Failed("503 Service Unavailable".to_string())),
            Arc::new(AlwaysOnline),
        );
        let id = add_service(&h.store, "api");

        h.scheduler.run_now(id);
        wait_for(|| !h.store.get_history(0, 10).unwrap().is_empty()).await;

        let service = h.store.get_by_id(id).unwrap().unwrap();
        assert_eq!(service.status, "503 Service Unavailable");
        assert!(service.last_checked > 0);
        assert_eq!(service.last_successful_check, 0);

        let events = h.notifier.events.lock().unwrap();
        match &events[0] {
            Event::Notified { id: nid, title, message } => {
                assert_eq!(*nid, id);
                assert_eq!(title, "Server Check");
                assert!(message.contains("503 Service Unavailable"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_at_most_one_check_in_flight_per_service() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "busy");

        for _ in 0..20 {
            h.scheduler.run_now(id);
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        wait_for(|| h.checker.current.load(Ordering::SeqCst) == 0
            && h.checker.calls.load(Ordering::SeqCst) >= 2)
        .await;

        assert_eq!(h.checker.max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_now_coalesces_queued_triggers() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "burst");

        // A burst with no gaps: one in flight, the rest collapse into at most
        // one queued run.
        for _ in 0..50 {
            h.scheduler.run_now(id);
        }
        wait_for(|| h.checker.current.load(Ordering::SeqCst) == 0
            && !h.store.get_history(0, 100).unwrap().is_empty())
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.checker.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_connectivity_gate_defers_without_recording() {
        let h = harness_with(
            ScriptedChecker::always(Outcome::Ok),
            Arc::new(FlakyLink {
                remaining_offline: AtomicUsize::new(3),
            }),
        );
        let id = add_service(&h.store, "mobile");

        h.scheduler.run_now(id);

        // While offline nothing is probed or recorded; once the link comes
        // back the short-delay retry completes the check.
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(h.checker.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.get_history(0, 10).unwrap().is_empty());
        assert_eq!(h.store.get_by_id(id).unwrap().unwrap().last_checked, 0);

        wait_for(|| h.store.get_by_id(id).unwrap().unwrap().status == "ok").await;
        assert_eq!(h.store.get_history(0, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_now_probes_archived_service() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "shelved");
        h.store.set_archived(id, true).unwrap();

        // Archived services sit outside the recurring schedule, but an
        // explicit trigger still checks them.
        h.scheduler.run_now(id);
        wait_for(|| h.store.get_by_id(id).unwrap().unwrap().status == "ok").await;

        assert_eq!(h.checker.calls.load(Ordering::SeqCst), 1);
        let history = h.store.get_history(0, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].service_name, "shelved");
    }

    #[tokio::test]
    async fn test_deleted_service_completion_is_noop() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "doomed");
        h.store.delete_service(id).unwrap();

        h.scheduler.run_now(id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.checker.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.get_history(0, 10).unwrap().is_empty());
        assert!(h.notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_successful_check_is_monotonic() {
        let h = harness_with(
            ScriptedChecker::scripted(
                vec![
                    Outcome::Ok,
                    Outcome::Failed("timed out".to_string()),
                    Outcome::Ok,
                ],
                Outcome::Ok,
            ),
            Arc::new(AlwaysOnline),
        );
        let id = add_service(&h.store, "seq");

        let mut last_seen = 0i64;
        for expected_history in 1..=3 {
            h.scheduler.run_now(id);
            wait_for(|| h.store.get_history(0, 10).unwrap().len() == expected_history).await;
            let service = h.store.get_by_id(id).unwrap().unwrap();
            assert!(service.last_successful_check >= last_seen);
            last_seen = service.last_successful_check;
        }
    }

    #[tokio::test]
    async fn test_schedule_all_is_idempotent_and_skips_archived() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let a = add_service(&h.store, "a");
        let b = add_service(&h.store, "b");
        h.store.set_archived(b, true).unwrap();

        h.scheduler.schedule_all().await.unwrap();
        assert_eq!(h.scheduler.scheduled_count().await, 1);

        h.scheduler.schedule_all().await.unwrap();
        assert_eq!(h.scheduler.scheduled_count().await, 1);

        // The recurring loop's first tick fires right away.
        wait_for(|| h.store.get_by_id(a).unwrap().unwrap().status == "ok").await;
        assert!(h.store.get_by_id(b).unwrap().unwrap().status.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_and_reschedule_manage_timers() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let id = add_service(&h.store, "a");

        h.scheduler.schedule_all().await.unwrap();
        assert_eq!(h.scheduler.scheduled_count().await, 1);

        h.scheduler.cancel_one(id).await;
        assert_eq!(h.scheduler.scheduled_count().await, 0);

        let service = h.store.get_by_id(id).unwrap().unwrap();
        h.scheduler.reschedule_one(&service).await;
        assert_eq!(h.scheduler.scheduled_count().await, 1);

        h.store.set_archived(id, true).unwrap();
        let archived = h.store.get_by_id(id).unwrap().unwrap();
        h.scheduler.reschedule_one(&archived).await;
        assert_eq!(h.scheduler.scheduled_count().await, 0);

        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_all_now_checks_every_active_service() {
        let h = harness_with(ScriptedChecker::always(Outcome::Ok), Arc::new(AlwaysOnline));
        let a = add_service(&h.store, "a");
        let b = add_service(&h.store, "b");
        let c = add_service(&h.store, "c");
        h.store.set_archived(c, true).unwrap();

        h.scheduler.run_all_now().unwrap();
        wait_for(|| h.store.get_history(0, 10).unwrap().len() == 2).await;

        assert_eq!(h.store.get_by_id(a).unwrap().unwrap().status, "ok");
        assert_eq!(h.store.get_by_id(b).unwrap().unwrap().status, "ok");
        assert!(h.store.get_by_id(c).unwrap().unwrap().status.is_empty());
    }
}
