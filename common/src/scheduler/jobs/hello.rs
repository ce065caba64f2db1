// Sample scheduled job

use crate::errors::ExecutionError;
use crate::scheduler::job::Executable;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

pub const HELLO_JOB_NAME: &str = "hello_job";

#[derive(Debug, Default, Clone)]
pub struct HelloJob;

impl HelloJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executable for HelloJob {
    async fn execute(&self) -> Result<(), ExecutionError> {
        info!(
            executed_at = %Utc::now(),
            job_type = "hello",
            "Hello scheduled job executed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        HELLO_JOB_NAME
    }

    fn description(&self) -> &str {
        "Hello world scheduled job for demonstration"
    }
}
