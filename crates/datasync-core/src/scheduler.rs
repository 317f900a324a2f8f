// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Job scheduler
//
// Each registered job gets a trigger loop. A firing runs the job on its own
// task unless the same job is still running or the scheduler is paused;
// skipped firings are dropped, never queued.

use crate::types::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Stable identity of a job, used for the non-overlap guard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The built-in transfer job
    pub fn transfer() -> Self {
        Self::new("TransferJob")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of scheduled work
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> Result<(), AppError>;
}

/// When a job fires
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Trigger {
    /// Parse a 6 or 7 field cron expression (seconds first). Quartz-style
    /// `?` placeholders are accepted.
    pub fn cron(expression: &str) -> Result<Self, AppError> {
        let normalized = expression.trim().replace('?', "*");
        cron::Schedule::from_str(&normalized)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| {
                AppError::Scheduler(format!("Invalid cron expression {:?}: {}", expression, e))
            })
    }

    pub fn every(interval: Duration) -> Result<Self, AppError> {
        if interval.is_zero() {
            return Err(AppError::Scheduler("Interval must be positive".to_string()));
        }
        Ok(Self::Every(interval))
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&after).next(),
            Self::Every(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
        }
    }
}

/// Schedule configuration as stored in `service.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub kind: ScheduleKind,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: ScheduleKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum ScheduleKind {
    Cron {
        #[serde(rename = "Expression")]
        expression: String,
    },
    Interval {
        #[serde(rename = "Minutes")]
        minutes: u64,
    },
    Daily {
        #[serde(rename = "Hour")]
        hour: u32,
        #[serde(rename = "Minute")]
        minute: u32,
    },
    Weekly {
        #[serde(rename = "Days")]
        days: Vec<Weekday>,
        #[serde(rename = "Hour")]
        hour: u32,
        #[serde(rename = "Minute")]
        minute: u32,
    },
}

impl Default for ScheduleKind {
    fn default() -> Self {
        Self::Cron {
            expression: "0 */5 * * * *".to_string(),
        }
    }
}

impl ScheduleSettings {
    /// `None` when scheduling is disabled
    pub fn to_trigger(&self) -> Result<Option<Trigger>, AppError> {
        if !self.enabled {
            return Ok(None);
        }

        let check_time = |hour: u32, minute: u32| {
            if hour > 23 || minute > 59 {
                Err(AppError::Scheduler(format!(
                    "Invalid time of day {:02}:{:02}",
                    hour, minute
                )))
            } else {
                Ok(())
            }
        };

        let trigger = match &self.kind {
            ScheduleKind::Cron { expression } => Trigger::cron(expression)?,
            ScheduleKind::Interval { minutes } => {
                Trigger::every(Duration::from_secs(minutes.saturating_mul(60)))?
            }
            ScheduleKind::Daily { hour, minute } => {
                check_time(*hour, *minute)?;
                Trigger::cron(&format!("0 {} {} * * *", minute, hour))?
            }
            ScheduleKind::Weekly { days, hour, minute } => {
                check_time(*hour, *minute)?;
                if days.is_empty() {
                    return Err(AppError::Scheduler(
                        "Weekly schedule needs at least one day".to_string(),
                    ));
                }
                let days: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                Trigger::cron(&format!("0 {} {} * * {}", minute, hour, days.join(",")))?
            }
        };
        Ok(Some(trigger))
    }
}

/// Running-job registry. Shared with callers that run a job's work outside
/// the scheduler so both paths honour the same guard.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    running: Arc<Mutex<HashSet<JobId>>>,
}

impl JobLocks {
    /// Claim `id`; `None` when it is already running
    pub fn try_begin(&self, id: &JobId) -> Option<JobPermit> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if !running.insert(id.clone()) {
            return None;
        }
        Some(JobPermit {
            locks: self.clone(),
            id: id.clone(),
        })
    }

    pub fn is_running(&self, id: &JobId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
    }
}

/// Releases its job when dropped, including during a panic unwind
#[derive(Debug)]
pub struct JobPermit {
    locks: JobLocks,
    id: JobId,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.locks
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerOutcome {
    Started,
    SkippedBusy,
    SkippedPaused,
    UnknownJob,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStatus {
    pub id: JobId,
    pub running: bool,
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerStatus {
    pub paused: bool,
    pub jobs: Vec<JobStatus>,
}

struct Registered {
    job: Arc<dyn Job>,
    next_fire: Option<DateTime<Utc>>,
    stop: CancellationToken,
}

struct Inner {
    jobs: Mutex<HashMap<JobId, Registered>>,
    locks: JobLocks,
    paused: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Cron/interval scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(JobLocks::default())
    }
}

impl Scheduler {
    pub fn new(locks: JobLocks) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                locks,
                paused: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn locks(&self) -> &JobLocks {
        &self.inner.locks
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Registered>> {
        self.inner.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a job. With a trigger, a loop fires it until shutdown;
    /// without one it only runs through `trigger_now`. Re-registering an id
    /// replaces the previous trigger.
    pub fn register(&self, id: JobId, trigger: Option<Trigger>, job: Arc<dyn Job>) {
        let stop = self.inner.shutdown.child_token();
        let next_fire = trigger.as_ref().and_then(|t| t.next_fire(Utc::now()));

        let previous = self.jobs().insert(
            id.clone(),
            Registered {
                job,
                next_fire,
                stop: stop.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.stop.cancel();
        }

        match trigger {
            Some(trigger) => {
                tracing::info!("Scheduled job {} (next run {:?})", id, next_fire);
                let scheduler = self.clone();
                self.inner
                    .tasks
                    .spawn(async move { scheduler.trigger_loop(id, trigger, stop).await });
            }
            None => tracing::info!("Registered job {} without a trigger", id),
        }
    }

    async fn trigger_loop(self, id: JobId, trigger: Trigger, stop: CancellationToken) {
        loop {
            let Some(next) = trigger.next_fire(Utc::now()) else {
                tracing::info!("Job {} has no further fire times", id);
                break;
            };
            if let Some(registered) = self.jobs().get_mut(&id) {
                registered.next_fire = Some(next);
            }

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.fire(&id) {
                TriggerOutcome::Started => tracing::debug!("Job {} fired", id),
                TriggerOutcome::SkippedBusy => {
                    tracing::warn!("Job {} still running, skipping this trigger", id)
                }
                TriggerOutcome::SkippedPaused => {
                    tracing::info!("Scheduler paused, skipping job {}", id)
                }
                TriggerOutcome::UnknownJob => break,
            }
        }
        tracing::debug!("Trigger loop for {} stopped", id);
    }

    fn fire(&self, id: &JobId) -> TriggerOutcome {
        if self.is_paused() {
            return TriggerOutcome::SkippedPaused;
        }
        let Some(job) = self.jobs().get(id).map(|r| r.job.clone()) else {
            return TriggerOutcome::UnknownJob;
        };
        let Some(permit) = self.inner.locks.try_begin(id) else {
            return TriggerOutcome::SkippedBusy;
        };

        let id = id.clone();
        self.inner.tasks.spawn(async move {
            let _permit = permit;
            tracing::info!("Job {} started", id);
            match job.run().await {
                Ok(()) => tracing::info!("Job {} completed", id),
                Err(e) => tracing::error!("Job {} failed: {}", id, e),
            }
        });
        TriggerOutcome::Started
    }

    /// Fire a job immediately through the same guarded path as its trigger
    pub fn trigger_now(&self, id: &JobId) -> TriggerOutcome {
        if self.inner.shutdown.is_cancelled() {
            return TriggerOutcome::SkippedPaused;
        }
        self.fire(id)
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut jobs: Vec<JobStatus> = self
            .jobs()
            .iter()
            .map(|(id, registered)| JobStatus {
                id: id.clone(),
                running: self.inner.locks.is_running(id),
                next_fire: registered.next_fire,
            })
            .collect();
        jobs.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        SchedulerStatus {
            paused: self.is_paused(),
            jobs,
        }
    }

    /// Stop every trigger loop and wait for running jobs. Returns false when
    /// jobs were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        tracing::info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();

        let finished = tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_ok();
        if !finished {
            tracing::warn!("Scheduler shutdown timed out with jobs still running");
        }
        finished
    }
}
