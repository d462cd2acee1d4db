use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::collector::{CollectError, Collector};
use crate::report::ReportGenerator;
use crate::schedule::{Schedule, ScheduleError};
use crate::shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
use crate::store::SnapshotStore;
use crate::types::Config;

/// Local time of the daily retention sweep.
pub const CLEANUP_TIME: &str = "02:00";

/// Wall clock the calendar triggers are evaluated against.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Shutdown already fired; a stopped scheduler cannot be restarted.
    #[error("scheduler has been stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cluster_name: String,
    pub snapshot_interval: Duration,
    pub report_day: String,
    pub report_time: String,
    pub retention_weeks: u32,
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            snapshot_interval: config.snapshot_interval,
            report_day: config.report_day.clone(),
            report_time: config.report_time.clone(),
            retention_weeks: config.retention_weeks,
        }
    }
}

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Clone)]
struct Job {
    name: &'static str,
    run: Arc<dyn Fn() -> JobFuture + Send + Sync>,
    running: Arc<Mutex<()>>,
}

impl Job {
    fn new<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            run: Arc::new(move || Box::pin(run()) as JobFuture),
            running: Arc::new(Mutex::new(())),
        }
    }

    async fn execute(&self) {
        let _running = self.running.lock().await;
        self.run_once().await;
    }

    /// Start a run in the background unless the previous one is still in flight.
    fn spawn_or_skip(&self) -> Option<JoinHandle<()>> {
        let Ok(running) = Arc::clone(&self.running).try_lock_owned() else {
            warn!(job = self.name, "Previous run still in progress, skipping this firing");
            return None;
        };
        let job = self.clone();
        Some(tokio::spawn(async move {
            let _running = running;
            job.run_once().await;
        }))
    }

    async fn run_once(&self) {
        let started = Instant::now();
        debug!(job = self.name, "Job started");

        // Own task so a panic stays inside the job
        match tokio::spawn((self.run)()).await {
            Ok(Ok(())) => {
                debug!(job = self.name, elapsed_ms = started.elapsed().as_millis() as u64, "Job finished");
            }
            Ok(Err(e)) => {
                error!(job = self.name, error = %format!("{:#}", e), "Job failed");
            }
            Err(e) if e.is_panic() => {
                error!(job = self.name, "Job panicked");
            }
            Err(e) => {
                warn!(job = self.name, error = %e, "Job aborted");
            }
        }
    }
}

struct Trigger {
    schedule: Schedule,
    handle: JoinHandle<()>,
}

/// Owns the three trigger tasks and the shutdown flag they share.
pub struct Scheduler {
    collector: Arc<Collector>,
    reporter: Arc<dyn ReportGenerator>,
    store: SnapshotStore,
    config: SchedulerConfig,
    clock: Clock,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
    triggers: Vec<(&'static str, Trigger)>,
}

impl Scheduler {
    pub fn new(
        collector: Arc<Collector>,
        reporter: Arc<dyn ReportGenerator>,
        store: SnapshotStore,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, signal) = shutdown_channel();
        Self {
            collector,
            reporter,
            store,
            config,
            clock: Arc::new(Local::now),
            shutdown,
            signal,
            triggers: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Fires the same flag as [`Scheduler::stop`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub async fn shutdown_requested(&self) {
        self.signal.triggered().await;
    }

    /// Validate every schedule, arm all triggers, then run one collection
    /// before returning.
    ///
    /// Nothing is armed if any schedule is invalid or shutdown already fired.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.shutdown.is_triggered() {
            return Err(SchedulerError::Stopped);
        }
        if !self.triggers.is_empty() {
            warn!("Scheduler already started");
            return Ok(());
        }

        let snapshot = Schedule::interval(self.config.snapshot_interval)?;
        let report = Schedule::weekly(&self.config.report_day, &self.config.report_time)?;
        let cleanup = Schedule::daily(CLEANUP_TIME)?;

        let snapshot_job = self.snapshot_job();
        let report_job = self.report_job();
        let cleanup_job = self.cleanup_job();
        self.arm("snapshot", snapshot, snapshot_job.clone());
        self.arm("report", report, report_job);
        self.arm("cleanup", cleanup, cleanup_job);

        info!(
            cluster = %self.config.cluster_name,
            triggers = self.triggers.len(),
            "Scheduler started, running initial collection"
        );
        snapshot_job.execute().await;
        Ok(())
    }

    /// Signal shutdown and wait for every trigger. An in-flight job runs to
    /// completion first.
    pub async fn stop(&mut self) {
        info!("Stopping scheduler");
        self.shutdown.trigger();
        for (name, trigger) in self.triggers.drain(..) {
            if let Err(e) = trigger.handle.await {
                warn!(trigger = name, error = %e, "Trigger task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub fn triggers(&self) -> impl Iterator<Item = (&'static str, &Schedule)> {
        self.triggers.iter().map(|(name, t)| (*name, &t.schedule))
    }

    pub fn is_running(&self) -> bool {
        !self.triggers.is_empty() && !self.shutdown.is_triggered()
    }

    fn arm(&mut self, name: &'static str, schedule: Schedule, job: Job) {
        info!(trigger = name, schedule = %schedule, "Arming trigger");
        let signal = self.signal.clone();
        let handle = match &schedule {
            Schedule::Interval(every) => {
                let first = tokio::time::Instant::now() + *every;
                tokio::spawn(run_interval(name, first, *every, job, signal))
            }
            _ => tokio::spawn(run_calendar(name, schedule.clone(), Arc::clone(&self.clock), job, signal)),
        };
        self.triggers.push((name, Trigger { schedule, handle }));
    }

    fn snapshot_job(&self) -> Job {
        let collector = Arc::clone(&self.collector);
        let signal = self.signal.clone();
        Job::new("snapshot", move || {
            let collector = Arc::clone(&collector);
            let signal = signal.clone();
            async move {
                match collector.collect_snapshot(&signal).await {
                    Ok(_) => Ok(()),
                    Err(CollectError::Cancelled) => {
                        info!("Snapshot collection interrupted by shutdown");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        })
    }

    fn report_job(&self) -> Job {
        let reporter = Arc::clone(&self.reporter);
        let cluster_name = self.config.cluster_name.clone();
        Job::new("report", move || {
            let reporter = Arc::clone(&reporter);
            let cluster_name = cluster_name.clone();
            async move {
                info!(cluster = %cluster_name, "Generating weekly report");
                reporter.generate_weekly_report(&cluster_name).await
            }
        })
    }

    fn cleanup_job(&self) -> Job {
        let store = self.store.clone();
        let retention_weeks = self.config.retention_weeks;
        Job::new("cleanup", move || {
            let store = store.clone();
            async move {
                let deleted = store.cleanup_old_snapshots_async(retention_weeks).await?;
                info!(deleted, retention_weeks, "Cleaned up old snapshots");
                Ok(())
            }
        })
    }
}

/// Fixed cadence from `first`. A tick that lands while the previous run is
/// still in flight is dropped, not queued.
async fn run_interval(
    name: &'static str,
    first: tokio::time::Instant,
    every: Duration,
    job: Job,
    signal: ShutdownSignal,
) {
    let mut ticks = tokio::time::interval_at(first, every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;
    loop {
        tokio::select! {
            _ = ticks.tick() => {}
            _ = signal.triggered() => break,
        }
        if signal.is_triggered() {
            break;
        }
        if let Some(run) = job.spawn_or_skip() {
            in_flight = Some(run);
        }
    }
    if let Some(run) = in_flight {
        if let Err(e) = run.await {
            warn!(trigger = name, error = %e, "In-flight run ended abnormally");
        }
    }
    debug!(trigger = name, "Trigger stopped");
}

async fn run_calendar(name: &'static str, schedule: Schedule, clock: Clock, job: Job, signal: ShutdownSignal) {
    // Last slot served; a wake-up slightly ahead of the wall clock must not
    // pick the same slot twice.
    let mut served: Option<DateTime<Local>> = None;
    loop {
        let now = clock();
        let base = served.filter(|s| *s > now).unwrap_or(now);
        let Some(next) = schedule.next_after(&base) else {
            warn!(trigger = name, schedule = %schedule, "No upcoming firing, trigger disarmed");
            break;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(trigger = name, delay_secs = delay.as_secs(), next = %next, "Waiting for next firing");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = signal.triggered() => break,
        }
        served = Some(next);
        job.execute().await;
        if signal.is_triggered() {
            break;
        }
    }
    debug!(trigger = name, "Trigger stopped");
}
