// Scheduler engine: owns the active jobs and drives the timer loop

use crate::config::SchedulerConfig;
use crate::errors::{ConfigError, ExecutionError};
use crate::scheduler::clock::Clock;
use crate::scheduler::job::{Executable, JobStatus, OverlapPolicy, ScheduledJob};
use crate::telemetry;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Runtime knobs for the timer loop
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Zone used to interpret daily and cron triggers
    pub timezone: Tz,
    /// Upper bound on how long the loop sleeps between checks
    pub poll_interval: Duration,
    /// How long `stop` waits for in-flight executions
    pub stop_grace: Duration,
    pub overlap: OverlapPolicy,
}

impl EngineOptions {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            timezone: config.timezone()?,
            poll_interval: config.poll_interval(),
            stop_grace: config.stop_grace(),
            overlap: config.overlap,
        })
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            poll_interval: Duration::from_secs(60),
            stop_grace: Duration::from_secs(30),
            overlap: OverlapPolicy::Skip,
        }
    }
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle of the timer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running,
    /// Cancelled, still draining in-flight executions
    Stopping,
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    options: EngineOptions,
    clock: Arc<dyn Clock>,
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    wake: Arc<Notify>,
    /// Serializes start and stop; held only while swapping the runner
    runner: Mutex<Option<Runner>>,
    state: watch::Sender<LoopState>,
}

impl SchedulerEngine {
    pub fn new(options: EngineOptions, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(LoopState::Stopped);
        Self {
            options,
            clock,
            jobs: Arc::new(RwLock::new(Vec::new())),
            wake: Arc::new(Notify::new()),
            runner: Mutex::new(None),
            state,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add jobs to the active set. Names must be unique across the set.
    pub(crate) async fn add_jobs(&self, new_jobs: Vec<ScheduledJob>) -> Result<(), ConfigError> {
        let mut jobs = self.jobs.write().await;

        if let Some(duplicate) = new_jobs
            .iter()
            .find(|candidate| jobs.iter().any(|job| job.name() == candidate.name()))
        {
            let name = duplicate.name().to_string();
            return Err(ConfigError::for_job(
                name.clone(),
                ConfigError::DuplicateJob(name),
            ));
        }

        jobs.extend(new_jobs);
        drop(jobs);

        // A running loop may be sleeping on a later deadline
        self.wake.notify_one();
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Start the timer loop. Returns false if it was already running.
    ///
    /// A loop that is still draining after `stop` is waited out first.
    #[instrument(skip(self))]
    pub async fn start(&self) -> bool {
        let mut runner = self.runner.lock().await;
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Scheduler already running");
            return false;
        }

        let mut state = self.state.subscribe();
        if *state.borrow() == LoopState::Stopping {
            debug!("Waiting for the previous scheduler loop to drain");
            // The sender lives in self, so the channel cannot close here
            let _ = state.wait_for(|s| *s != LoopState::Stopping).await;
        }

        let now = self.clock.now();
        let jobs_count = {
            let mut jobs = self.jobs.write().await;
            for job in jobs.iter_mut() {
                job.running = 0;
                job.exhausted = false;
                job.reschedule(now, self.options.timezone);
            }
            jobs.len()
        };

        let cancel = CancellationToken::new();
        let job_loop = JobLoop {
            options: self.options,
            clock: self.clock.clone(),
            jobs: self.jobs.clone(),
            wake: self.wake.clone(),
        };
        let handle = tokio::spawn(job_loop.run(cancel.clone()));
        *runner = Some(Runner { cancel, handle });
        self.state.send_replace(LoopState::Running);

        info!(
            jobs_count = jobs_count,
            poll_interval_seconds = self.options.poll_interval.as_secs(),
            timezone = %self.options.timezone,
            "Scheduler started"
        );
        true
    }

    /// Stop the timer loop and wait for in-flight executions up to the
    /// grace period. Returns false if it was not running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> bool {
        let Runner { cancel, handle } = {
            let mut runner = self.runner.lock().await;
            let Some(taken) = runner.take() else {
                debug!("Scheduler already stopped");
                return false;
            };
            self.state.send_replace(LoopState::Stopping);
            taken
        };

        info!("Stopping scheduler");
        cancel.cancel();

        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler loop terminated abnormally");
        }

        self.state.send_replace(LoopState::Stopped);
        info!("Scheduler stopped");
        true
    }

    /// True between a successful `start` and the next `stop`
    pub async fn is_running(&self) -> bool {
        *self.state.borrow() == LoopState::Running
    }

    pub async fn status(&self) -> Vec<JobStatus> {
        self.jobs.read().await.iter().map(ScheduledJob::status).collect()
    }
}

/// Result of one isolated execution
struct Completion {
    job_id: Uuid,
    job_name: String,
    elapsed: Duration,
    result: Result<(), ExecutionError>,
}

/// State moved into the spawned loop task
struct JobLoop {
    options: EngineOptions,
    clock: Arc<dyn Clock>,
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    wake: Arc<Notify>,
}

impl JobLoop {
    async fn run(self, cancel: CancellationToken) {
        let mut in_flight: JoinSet<Completion> = JoinSet::new();

        loop {
            let wait = self.next_wait().await;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping scheduler loop");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.on_joined(joined).await;
                }
                _ = self.wake.notified() => {
                    debug!("Scheduler woken, recomputing deadlines");
                }
                _ = tokio::time::sleep(wait) => {
                    self.dispatch_due(&mut in_flight).await;
                }
            }
        }

        self.drain(&mut in_flight).await;
        info!("Scheduler loop exited");
    }

    /// Time until the nearest schedulable `next_run`, capped at the poll interval
    async fn next_wait(&self) -> Duration {
        let now = self.clock.now();
        let jobs = self.jobs.read().await;

        jobs.iter()
            .filter(|job| job.is_schedulable(self.options.overlap))
            .map(|job| (job.next_run - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .map_or(self.options.poll_interval, |wait| {
                wait.min(self.options.poll_interval)
            })
    }

    async fn dispatch_due(&self, in_flight: &mut JoinSet<Completion>) {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;

        for job in jobs
            .iter_mut()
            .filter(|job| job.is_due(now, self.options.overlap))
        {
            job.running += 1;
            // Under Skip this is provisional; completion reschedules again
            job.reschedule(now, self.options.timezone);

            let job_id = job.id;
            let job_name = job.spec.name.clone();
            info!(job_id = %job_id, job_name = %job_name, "Executing scheduled job");

            let span = info_span!("scheduled_job", job_id = %job_id, job_name = %job_name);
            in_flight.spawn(
                execute_isolated(job_id, job_name, job.executable.clone()).instrument(span),
            );
        }
    }

    async fn on_joined(&self, joined: Result<Completion, JoinError>) {
        let completion = match joined {
            Ok(completion) => completion,
            Err(e) => {
                error!(error = %e, "Scheduled job task did not complete");
                return;
            }
        };

        let Completion {
            job_id,
            job_name,
            elapsed,
            result,
        } = completion;

        telemetry::record_job_duration(&job_name, elapsed.as_secs_f64());
        match &result {
            Ok(()) => {
                telemetry::record_job_success(&job_name);
                info!(
                    job_id = %job_id,
                    job_name = %job_name,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
            }
            Err(ExecutionError::Panicked(message)) => {
                telemetry::record_job_failure(&job_name, "panic");
                error!(
                    job_id = %job_id,
                    job_name = %job_name,
                    panic = %message,
                    "Job panicked during execution"
                );
            }
            Err(e) => {
                telemetry::record_job_failure(&job_name, "error");
                error!(
                    job_id = %job_id,
                    job_name = %job_name,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job execution failed"
                );
            }
        }

        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) {
            job.running = job.running.saturating_sub(1);
            job.last_run = Some(now);
            if self.options.overlap == OverlapPolicy::Skip {
                job.reschedule(now, self.options.timezone);
            }
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<Completion>) {
        if in_flight.is_empty() {
            return;
        }

        let grace = self.options.stop_grace;
        info!(
            in_flight = in_flight.len(),
            grace_seconds = grace.as_secs(),
            "Waiting for in-flight job executions"
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                self.on_joined(joined).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                abandoned = in_flight.len(),
                grace_seconds = grace.as_secs(),
                "Job executions outlived the stop grace period and were detached"
            );
            in_flight.detach_all();
        }
    }
}

/// Run one execution, converting a panic into an error
async fn execute_isolated(
    job_id: Uuid,
    job_name: String,
    executable: Arc<dyn Executable>,
) -> Completion {
    let timer = Instant::now();
    let result = match AssertUnwindSafe(executable.execute()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ExecutionError::Panicked(panic_message(&*panic))),
    };

    Completion {
        job_id,
        job_name,
        elapsed: timer.elapsed(),
        result,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_options_default() {
        let options = EngineOptions::default();
        assert_eq!(options.timezone, chrono_tz::UTC);
        assert_eq!(options.poll_interval, Duration::from_secs(60));
        assert_eq!(options.stop_grace, Duration::from_secs(30));
        assert_eq!(options.overlap, OverlapPolicy::Skip);
    }

    #[test]
    fn test_engine_options_from_config() {
        let config = SchedulerConfig {
            timezone: "Asia/Shanghai".to_string(),
            poll_interval_seconds: 5,
            stop_grace_seconds: 1,
            overlap: OverlapPolicy::Allow,
            ..Default::default()
        };
        let options = EngineOptions::from_config(&config).unwrap();
        assert_eq!(options.timezone, chrono_tz::Asia::Shanghai);
        assert_eq!(options.poll_interval, Duration::from_secs(5));
        assert_eq!(options.stop_grace, Duration::from_secs(1));
        assert_eq!(options.overlap, OverlapPolicy::Allow);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*boxed), "owned boom");

        let boxed: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*boxed), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let engine = SchedulerEngine::new(
            EngineOptions::default(),
            Arc::new(crate::scheduler::clock::SystemClock),
        );
        assert!(!engine.is_running().await);
        assert!(!engine.stop().await);
    }

    #[tokio::test]
    async fn test_stop_twice_reports_no_change() {
        let engine = SchedulerEngine::new(
            EngineOptions::default(),
            Arc::new(crate::scheduler::clock::SystemClock),
        );
        assert!(engine.start().await);
        assert!(engine.stop().await);
        assert!(!engine.stop().await);
        assert_eq!(*engine.state.borrow(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let engine = SchedulerEngine::new(
            EngineOptions::default(),
            Arc::new(crate::scheduler::clock::SystemClock),
        );
        assert!(engine.start().await);
        assert!(!engine.start().await);
        assert!(engine.is_running().await);
        assert!(engine.stop().await);
        assert!(!engine.is_running().await);
    }
}
