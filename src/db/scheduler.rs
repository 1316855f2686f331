//! Background partition rotation
//!
//! Keeps the window set of every truncate-policy shard table current as
//! wall-clock time moves on. A failed pass is logged and retried on the next
//! tick; the loop only ends when its handle is stopped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::rotator::{RotationReport, Rotator};
use super::schema::provision_bucket;
use super::Driver;
use crate::config::{shard_table_name, Configuration};
use crate::errors::{Error, Result};

/// Source of "now" in epoch seconds.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> i64 + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Self(Arc::new(|| Utc::now().timestamp()))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn now(&self) -> i64 {
        (self.0)()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub partitions_created: u64,
    pub partitions_dropped: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    config: Arc<Configuration>,
    driver: Arc<dyn Driver>,
    clock: Clock,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl Scheduler {
    pub fn new(config: Arc<Configuration>, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            clock: Clock::system(),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    /// Runs the handoff provisioning pass, then spawns the rotation loop.
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> SchedulerHandle {
        if let Err(e) = self.provision_all().await {
            log::error!("Handoff provisioning pass failed: {}", e);
        }

        let stats = self.stats.clone();
        let shutdown = Arc::new(Notify::new());

        let task = match self.config.rotation_interval() {
            Some(period) => {
                log::info!("Start partition rotation every {:?}", period);
                Some(tokio::spawn(self.run_loop(period, shutdown.clone())))
            }
            None => {
                log::info!("No truncate buckets configured, partition rotation disabled");
                None
            }
        };

        SchedulerHandle {
            stats,
            shutdown,
            task,
        }
    }

    /// Creates any missing shard table and brings every truncate table to
    /// the current window set. Safe to repeat.
    pub async fn provision_all(&self) -> Result<RotationReport> {
        let now = self.clock.now();
        let result: Result<RotationReport> = async {
            let mut session = self.driver.session().await?;
            let mut report = RotationReport::default();
            for (name, bucket) in &self.config.buckets {
                let provisioned = provision_bucket(&mut *session, name, bucket, now, true).await?;
                report.created.extend(provisioned.created);
                report.dropped.extend(provisioned.dropped);
            }
            Ok(report)
        }
        .await;

        self.record(now, &result);
        result
    }

    /// Rotates every truncate table once. A table that fails does not stop
    /// the others; the first error is returned after all were attempted.
    pub async fn run_pass(&self) -> Result<RotationReport> {
        let now = self.clock.now();
        let result = self.rotate_all(now).await;
        self.record(now, &result);
        result
    }

    async fn rotate_all(&self, now: i64) -> Result<RotationReport> {
        let mut session = self.driver.session().await?;
        let mut report = RotationReport::default();
        let mut first_error: Option<Error> = None;

        for (name, bucket) in self.config.truncate_buckets() {
            let Some(rotator) = Rotator::for_policy(&bucket.eviction) else {
                continue;
            };

            for shard in 0..bucket.shard_count {
                let table = shard_table_name(name, shard);
                match rotator.rotate(&mut *session, &table, now).await {
                    Ok(rotated) => {
                        report.created.extend(rotated.created);
                        report.dropped.extend(rotated.dropped);
                    }
                    Err(e) => {
                        log::error!("Rotation of '{}' failed: {}", table, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn record(&self, now: i64, result: &Result<RotationReport>) {
        let mut stats = self.stats.lock();
        stats.passes += 1;
        stats.last_pass_at = DateTime::from_timestamp(now, 0);

        match result {
            Ok(report) => {
                stats.partitions_created += report.created.len() as u64;
                stats.partitions_dropped += report.dropped.len() as u64;
            }
            Err(_) => stats.failed_passes += 1,
        }
    }

    /// Random delay added to a tick, bounded so that period plus jitter
    /// stays below the smallest rotation window.
    pub(crate) fn jitter(&self, period: Duration) -> Duration {
        let ratio = self.config.scheduler.jitter_ratio;
        let smallest = self
            .config
            .truncate_buckets()
            .map(|(_, b)| b.eviction.partition_time_range_seconds)
            .min()
            .unwrap_or(0);

        let slack = Duration::from_secs(smallest.max(0) as u64).saturating_sub(period);
        let bound = period.mul_f64(ratio).min(slack);
        if bound.is_zero() {
            return Duration::ZERO;
        }

        bound.mul_f64(rand::rng().random_range(0.0..1.0))
    }

    async fn run_loop(self, period: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the handoff pass already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    log::info!("Partition rotation stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let jitter = self.jitter(period);
                    if !jitter.is_zero() {
                        tokio::time::sleep(jitter).await;
                    }

                    log::info!("Rotate partitions.");
                    match self.run_pass().await {
                        Ok(report) => log::debug!(
                            "Rotation pass created {} and dropped {} partition(s)",
                            report.created.len(),
                            report.dropped.len()
                        ),
                        Err(e) if e.is_retryable() => {
                            log::error!("Rotation pass failed, retrying next tick: {}", e)
                        }
                        Err(e) => log::error!(
                            "Rotation pass failed and will keep failing until the configuration is fixed: {}",
                            e
                        ),
                    }
                }
            }
        }
    }
}

/// Handle to a started scheduler. Dropping it leaves the loop running.
pub struct SchedulerHandle {
    stats: Arc<Mutex<SchedulerStats>>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                log::error!("Partition rotation task ended abnormally: {}", e);
            }
        }
    }
}
