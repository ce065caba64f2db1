// Scheduler module: recurring jobs driven by interval, cron and daily triggers

pub mod clock;
pub mod engine;
pub mod job;
pub mod jobs;
pub mod registry;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use engine::{EngineOptions, SchedulerEngine};
pub use job::{Executable, JobFactory, JobSpec, JobStatus, OverlapPolicy, ScheduledJob};
pub use jobs::register_default_jobs;
pub use registry::JobRegistry;

use async_trait::async_trait;

/// Control surface over a running set of scheduled jobs
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the timer loop. Returns false if already running or disabled.
    async fn start(&self) -> bool;

    /// Stop the timer loop gracefully. Returns false if not running.
    async fn stop(&self) -> bool;

    /// Snapshot of every active job
    async fn status(&self) -> Vec<JobStatus>;

    async fn is_running(&self) -> bool;
}
