//! engine::scheduler
//!
//! Background scheduling for the daily maintenance job and the sync retry
//! cycle.
//!
//! # Architecture
//!
//! One tokio task selects over three sources:
//!
//! - the daily deadline, computed from the configured UTC time of day
//! - the retry interval ticker
//! - the shutdown channel
//!
//! The daily job also runs once immediately at startup unless disabled.
//! A job that is still running when its next deadline passes simply runs
//! late; runs never overlap.
//!
//! # Example
//!
//! ```ignore
//! let handle = Scheduler::new(daily_job, config, clock)
//!     .with_retry(retry_job)
//!     .spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::core::clock::SharedClock;

/// A unit of scheduled work.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn run(&self);
}

/// When jobs fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// UTC time of day for the daily job.
    pub daily_at: NaiveTime,
    pub run_at_startup: bool,
    pub retry_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::MIN,
            run_at_startup: true,
            retry_interval: Duration::seconds(60),
        }
    }
}

/// The first instant strictly after `after` whose UTC time of day is `at`.
pub fn next_daily_run(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive().and_time(at).and_utc();
    if today > after {
        today
    } else {
        today + Duration::days(1)
    }
}

fn to_std(d: Duration) -> std::time::Duration {
    d.to_std().unwrap_or(std::time::Duration::ZERO)
}

/// Builder for the scheduler task.
pub struct Scheduler {
    daily: Arc<dyn ScheduledJob>,
    retry: Option<Arc<dyn ScheduledJob>>,
    config: ScheduleConfig,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(daily: Arc<dyn ScheduledJob>, config: ScheduleConfig, clock: SharedClock) -> Self {
        Self {
            daily,
            retry: None,
            config,
            clock,
        }
    }

    /// Run `job` on every retry interval tick.
    pub fn with_retry(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.retry = Some(job);
        self
    }

    /// Start the scheduler on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if self.config.run_at_startup {
            info!(job = self.daily.name(), "running startup job");
            self.daily.run().await;
        }

        let mut next = next_daily_run(self.clock.now(), self.config.daily_at);
        let mut deadline = Instant::now() + to_std(next - self.clock.now());
        info!(job = self.daily.name(), %next, "daily job scheduled");

        let period = to_std(self.config.retry_interval).max(std::time::Duration::from_millis(1));
        let mut retry = tokio::time::interval_at(Instant::now() + period, period);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    info!(job = self.daily.name(), "running daily job");
                    self.daily.run().await;
                    let from = self.clock.now().max(next);
                    let following = next_daily_run(from, self.config.daily_at);
                    deadline = Instant::now() + to_std(following - from);
                    next = following;
                }
                _ = retry.tick(), if self.retry.is_some() => {
                    if let Some(job) = &self.retry {
                        job.run().await;
                    }
                }
            }
        }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the task to finish its current job.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        let _ = self.shutdown_tx.send(true);
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
