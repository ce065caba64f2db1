// Job registry: job factories by name, validated into scheduled jobs

use crate::config::SchedulerConfig;
use crate::errors::ConfigError;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::engine::{EngineOptions, SchedulerEngine};
use crate::scheduler::job::{Executable, JobFactory, JobSpec, JobStatus, ScheduledJob};
use crate::scheduler::Scheduler;
use crate::trigger::Trigger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Job factories keyed by name plus the engine that runs the jobs built from them
pub struct JobRegistry {
    enabled: bool,
    factories: HashMap<String, JobFactory>,
    engine: SchedulerEngine,
}

impl JobRegistry {
    pub fn new(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.enabled,
            factories: HashMap::new(),
            engine: SchedulerEngine::new(EngineOptions::from_config(config)?, clock),
        })
    }

    /// Register a constructor under `name`. A later registration replaces an earlier one.
    pub fn register_factory<F, E>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Executable + 'static,
    {
        let factory: JobFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Executable>);
        self.register_factory_arc(name, factory);
    }

    pub fn register_factory_arc(&mut self, name: impl Into<String>, factory: JobFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(job_name = %name, "Job factory replaced by a later registration");
        } else {
            info!(job_name = %name, "Job factory registered");
        }
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Validate `specs` and schedule every enabled one.
    ///
    /// Either every enabled spec becomes an active job or none does. Returns
    /// the number of jobs added.
    #[instrument(skip_all, fields(specs = specs.len()))]
    pub async fn initialize(&self, specs: &[JobSpec]) -> Result<usize, ConfigError> {
        if !self.enabled {
            info!("Scheduler is disabled, skipping job initialization");
            return Ok(0);
        }

        let now = self.engine.now();
        let mut names = HashSet::new();
        let mut prepared = Vec::new();

        for spec in specs {
            if !spec.enabled {
                info!(job_name = %spec.name, "Job is disabled, skipping");
                continue;
            }

            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::for_job(
                    spec.name.clone(),
                    ConfigError::DuplicateJob(spec.name.clone()),
                ));
            }

            let job = self
                .prepare(spec, now)
                .map_err(|e| ConfigError::for_job(spec.name.clone(), e))?;
            prepared.push(job);
        }

        let count = prepared.len();
        self.engine.add_jobs(prepared).await?;

        info!(jobs_count = count, "Scheduled jobs initialized");
        Ok(count)
    }

    fn prepare(&self, spec: &JobSpec, now: DateTime<Utc>) -> Result<ScheduledJob, ConfigError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| ConfigError::MissingJobFactory(spec.name.clone()))?;

        let trigger = Trigger::parse(spec.trigger_kind, &spec.schedule)?;
        let next_run = trigger.next_after(now, self.engine.options().timezone)?;
        let executable = factory();

        info!(
            job_name = %spec.name,
            job_type = %spec.trigger_kind,
            schedule = %spec.schedule,
            description = %spec.description,
            next_run = %next_run,
            "Job initialized successfully"
        );

        Ok(ScheduledJob::new(spec.clone(), trigger, executable, next_run))
    }

    pub async fn job_count(&self) -> usize {
        self.engine.job_count().await
    }
}

#[async_trait]
impl Scheduler for JobRegistry {
    async fn start(&self) -> bool {
        if !self.enabled {
            info!("Scheduler is disabled, not starting");
            return false;
        }
        self.engine.start().await
    }

    async fn stop(&self) -> bool {
        self.engine.stop().await
    }

    async fn status(&self) -> Vec<JobStatus> {
        self.engine.status().await
    }

    async fn is_running(&self) -> bool {
        self.engine.is_running().await
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("JobRegistry")
            .field("enabled", &self.enabled)
            .field("factories", &names)
            .finish()
    }
}
