// Built-in jobs

pub mod hello;

use crate::scheduler::JobRegistry;
use hello::{HelloJob, HELLO_JOB_NAME};

/// Register the factories for every built-in job
pub fn register_default_jobs(registry: &mut JobRegistry) {
    registry.register_factory(HELLO_JOB_NAME, HelloJob::new);
}
