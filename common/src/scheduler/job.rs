// Job specs, executables and the runtime record of a scheduled job

use crate::errors::ExecutionError;
use crate::trigger::{Trigger, TriggerKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Declarative description of a recurring task, as found in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_kind: TriggerKind,
    pub schedule: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

/// What to do when a job is due while its previous execution is still running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// The job is not due again until the running execution finishes
    #[default]
    Skip,
    /// Executions may overlap; the next run is computed when one starts
    Allow,
}

/// A unit of scheduled work
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self) -> Result<(), ExecutionError>;

    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

/// Constructor registered under a job name
pub type JobFactory = Arc<dyn Fn() -> Arc<dyn Executable> + Send + Sync>;

/// Read-only snapshot of a scheduled job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Next planned start. While `running` under the skip policy this is
    /// provisional and is recomputed when the execution completes.
    pub next_run: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub running: bool,
}

/// An active job owned by the scheduler
pub struct ScheduledJob {
    pub(crate) id: Uuid,
    pub(crate) spec: JobSpec,
    pub(crate) next_run: DateTime<Utc>,
    pub(crate) last_run: Option<DateTime<Utc>>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) trigger: Trigger,
    pub(crate) executable: Arc<dyn Executable>,
    pub(crate) running: usize,
    /// Set when the trigger has no further occurrence
    pub(crate) exhausted: bool,
}

impl ScheduledJob {
    pub(crate) fn new(
        spec: JobSpec,
        trigger: Trigger,
        executable: Arc<dyn Executable>,
        next_run: DateTime<Utc>,
    ) -> Self {
        let tags = BTreeSet::from([spec.name.clone(), spec.trigger_kind.to_string()]);
        Self {
            id: Uuid::new_v4(),
            spec,
            next_run,
            last_run: None,
            tags,
            trigger,
            executable,
            running: 0,
            exhausted: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Whether the loop may start this job at `now`
    pub(crate) fn is_due(&self, now: DateTime<Utc>, overlap: OverlapPolicy) -> bool {
        self.is_schedulable(overlap) && self.next_run <= now
    }

    /// Whether the job's `next_run` should be waited on
    pub(crate) fn is_schedulable(&self, overlap: OverlapPolicy) -> bool {
        !self.exhausted && (overlap == OverlapPolicy::Allow || self.running == 0)
    }

    /// Recompute `next_run` strictly after `now`
    pub(crate) fn reschedule(&mut self, now: DateTime<Utc>, timezone: Tz) {
        match self.trigger.next_after(now, timezone) {
            Ok(next) => self.next_run = next,
            Err(e) => {
                error!(
                    job_id = %self.id,
                    job_name = %self.spec.name,
                    error = %e,
                    "Job has no further runs, retiring it"
                );
                self.exhausted = true;
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            next_run: self.next_run,
            last_run: self.last_run,
            tags: self.tags.iter().cloned().collect(),
            running: self.running > 0,
        }
    }
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("name", &self.spec.name)
            .field("next_run", &self.next_run)
            .field("last_run", &self.last_run)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Noop;

    #[async_trait]
    impl Executable for Noop {
        async fn execute(&self) -> Result<(), ExecutionError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "noop"
        }

        fn description(&self) -> &str {
            "does nothing"
        }
    }

    fn scheduled(schedule: &str) -> ScheduledJob {
        let spec = JobSpec {
            name: "noop".to_string(),
            trigger_kind: TriggerKind::Interval,
            schedule: schedule.to_string(),
            enabled: true,
            description: "does nothing".to_string(),
        };
        let trigger = Trigger::parse(spec.trigger_kind, &spec.schedule).unwrap();
        ScheduledJob::new(spec, trigger, Arc::new(Noop), Utc::now())
    }

    #[test]
    fn test_job_spec_deserializes_config_entry() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"name":"x","type":"duration","schedule":"30s","enabled":true,"description":"d"}"#,
        )
        .unwrap();
        assert_eq!(spec.trigger_kind, TriggerKind::Interval);
        assert!(spec.enabled);
    }

    #[test]
    fn test_tags_are_name_and_kind() {
        let job = scheduled("30s");
        let status = job.status();
        assert_eq!(status.tags, vec!["duration".to_string(), "noop".to_string()]);
        assert!(!status.running);
        assert_eq!(status.last_run, None);
    }

    #[test]
    fn test_skip_policy_blocks_running_job() {
        let mut job = scheduled("30s");
        let now = job.next_run;
        assert!(job.is_due(now, OverlapPolicy::Skip));

        job.running = 1;
        assert!(!job.is_due(now, OverlapPolicy::Skip));
        assert!(job.is_due(now, OverlapPolicy::Allow));
    }

    #[test]
    fn test_reschedule_moves_next_run_forward() {
        let mut job = scheduled("30s");
        let now = Utc::now();
        job.reschedule(now, chrono_tz::UTC);
        assert_eq!(job.next_run, now + Duration::seconds(30));
        assert!(!job.is_due(now, OverlapPolicy::Skip));
    }

    #[test]
    fn test_overlap_policy_default_is_skip() {
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Skip);
        let policy: OverlapPolicy = serde_json::from_str("\"allow\"").unwrap();
        assert_eq!(policy, OverlapPolicy::Allow);
    }
}
