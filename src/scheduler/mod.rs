// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cron-driven refresh scheduling.
//!
//! Each engine owns its own [`RefreshScheduler`], created at `open()` and
//! shut down at `close()`. Nothing is process-global, so any number of
//! engine instances can schedule refreshes side by side.
//!
//! # Firing rules
//!
//! - One tokio task per schedule. The task awaits each run before computing
//!   the next fire time, so two runs of the same schedule never overlap.
//! - Fire instants that pass while a run is still going are skipped (and
//!   counted), not queued.
//! - Cancellation is checked only while waiting for the next fire time. A run
//!   that has started always finishes.
//! - Concurrent runs across all schedules of one scheduler are bounded by
//!   `available_parallelism()`.

pub mod cron;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use self::cron::CronSchedule;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("no tokio runtime available to drive the scheduler")]
    NoRuntime,
    #[error("scheduler has been shut down")]
    ShutDown,
}

/// Unique identity of one registered schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleId(String);

impl ScheduleId {
    fn new(owner: &str) -> Self {
        Self(format!("{}-{}", owner, uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The job run at every fire instant.
pub type RefreshTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduleHandle {
    expression: String,
    cancel: watch::Sender<bool>,
    fired: Arc<AtomicU64>,
    // Never aborted: cancellation must let an in-flight run finish.
    _task: JoinHandle<()>,
}

pub struct RefreshScheduler {
    owner: String,
    runtime: Handle,
    permits: Arc<Semaphore>,
    schedules: DashMap<ScheduleId, ScheduleHandle>,
    shut_down: AtomicBool,
}

impl RefreshScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// `owner` prefixes every schedule id (the engine passes its instance id).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(owner: impl Into<String>) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(Self {
            owner: owner.into(),
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            schedules: DashMap::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Register `task` to run at every instant matched by `schedule`.
    pub fn schedule(
        &self,
        schedule: CronSchedule,
        task: RefreshTask,
    ) -> Result<ScheduleId, SchedulerError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }

        let id = ScheduleId::new(&self.owner);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let fired = Arc::new(AtomicU64::new(0));
        let expression = schedule.expression().to_string();

        let task = self.runtime.spawn(run_schedule(
            id.clone(),
            schedule,
            task,
            self.permits.clone(),
            cancel_rx,
            fired.clone(),
        ));

        info!(schedule_id = %id, cron = %expression, "Refresh schedule registered");
        self.schedules.insert(
            id.clone(),
            ScheduleHandle {
                expression,
                cancel: cancel_tx,
                fired,
                _task: task,
            },
        );
        Ok(id)
    }

    /// Stop future firings of `id`. Returns `false` if it was not registered.
    pub fn cancel(&self, id: &ScheduleId) -> bool {
        match self.schedules.remove(id) {
            Some((_, handle)) => {
                let _ = handle.cancel.send(true);
                info!(schedule_id = %id, cron = %handle.expression, "Refresh schedule cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every schedule and refuse new ones. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        let ids: Vec<ScheduleId> = self.schedules.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Number of registered schedules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Runs started so far for `id`.
    #[must_use]
    pub fn fire_count(&self, id: &ScheduleId) -> Option<u64> {
        self.schedules
            .get(id)
            .map(|h| h.fired.load(Ordering::Relaxed))
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for entry in self.schedules.iter() {
            let _ = entry.value().cancel.send(true);
        }
    }
}

async fn run_schedule(
    id: ScheduleId,
    schedule: CronSchedule,
    task: RefreshTask,
    permits: Arc<Semaphore>,
    mut cancel: watch::Receiver<bool>,
    fired: Arc<AtomicU64>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(&from) else {
            info!(schedule_id = %id, "Cron expression has no further fire times");
            break;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        debug!(schedule_id = %id, next = %next, ?delay, "Waiting for next refresh");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => break,
        }
        if *cancel.borrow() {
            break;
        }

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        fired.fetch_add(1, Ordering::Relaxed);
        task().await;
        drop(permit);
        last_fire = Some(next);

        let missed = schedule.fires_between(&next, &Utc::now());
        if missed > 0 {
            warn!(schedule_id = %id, missed, "Refresh overran its schedule; skipping missed firings");
            crate::metrics::record_skipped_firings(id.as_str(), missed);
        }
    }
    debug!(schedule_id = %id, "Refresh schedule loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_task(counter: Arc<AtomicUsize>) -> RefreshTask {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(
            RefreshScheduler::new("engine"),
            Err(SchedulerError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_ids_are_unique_per_registration() {
        let scheduler = RefreshScheduler::new("engine-a").unwrap();
        let cron = CronSchedule::parse("0 0 0 1 1 ?").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = scheduler.schedule(cron.clone(), counting_task(counter.clone())).unwrap();
        let b = scheduler.schedule(cron, counting_task(counter)).unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("engine-a-"));
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fires_every_second_until_cancelled() {
        let scheduler = RefreshScheduler::new("engine").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .schedule(CronSchedule::parse("* * * * * *").unwrap(), counting_task(counter.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least 2 firings, got {}", fired);
        assert!(scheduler.fire_count(&id).unwrap() >= 2);

        assert!(scheduler.cancel(&id));
        let after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
        assert!(!scheduler.cancel(&id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_never_overlap() {
        let scheduler = RefreshScheduler::new("engine").unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let task: RefreshTask = {
            let running = running.clone();
            let max_seen = max_seen.clone();
            Arc::new(move || {
                let running = running.clone();
                let max_seen = max_seen.clone();
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    // Longer than the one-second cadence
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
        };

        scheduler
            .schedule(CronSchedule::parse("* * * * * *").unwrap(), task)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(4000)).await;
        scheduler.shutdown();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_schedules() {
        let scheduler = RefreshScheduler::new("engine").unwrap();
        let cron = CronSchedule::parse("0 0 0 1 1 ?").unwrap();
        scheduler
            .schedule(cron.clone(), counting_task(Arc::new(AtomicUsize::new(0))))
            .unwrap();

        assert_eq!(scheduler.shutdown(), 1);
        assert!(scheduler.is_empty());
        assert!(matches!(
            scheduler.schedule(cron, counting_task(Arc::new(AtomicUsize::new(0)))),
            Err(SchedulerError::ShutDown)
        ));
    }
}
