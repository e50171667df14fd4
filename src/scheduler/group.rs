use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::task::TaskTracker;

use crate::error::{Result, RtotError};
use crate::scheduler::job::{lock, Job, JobId, JobState};
use crate::scheduler::store::{JobStore, StoreKind};
use crate::worker::ScriptRunner;

/// Name of the group the server populates at startup.
pub const MAIN_GROUP: &str = "main";

/// A job store plus the id counter scoped to it, and the executions it started.
#[derive(Debug)]
pub struct JobGroup {
    name: String,
    next_id: AtomicU64,
    store: Arc<dyn JobStore>,
    runner: ScriptRunner,
    executions: TaskTracker,
}

impl JobGroup {
    pub fn new(name: impl Into<String>, store: Arc<dyn JobStore>, runner: ScriptRunner) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(0),
            store,
            runner,
            executions: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runner(&self) -> &ScriptRunner {
        &self.runner
    }

    /// Assign the next id to `job` and insert it. Ids are never reused.
    ///
    /// A job that already has an id (it belongs to this or another group) is
    /// refused with `JobAlreadyAdded`.
    pub fn add(&self, job: Arc<Job>) -> Result<JobId> {
        if let Some(id) = job.id() {
            return Err(RtotError::JobAlreadyAdded(id));
        }
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if !job.assign_id(id) {
            return Err(RtotError::JobAlreadyAdded(job.id().unwrap_or(id)));
        }
        self.store.add(job)
    }

    /// Run the job on its own task. The execution is watched by the group so
    /// a failed task is logged and [`JobGroup::shutdown`] can wait for it.
    pub fn start(&self, job: Arc<Job>) {
        let execution = self.runner.spawn(job);
        let group = self.name.clone();
        self.executions.spawn(async move {
            let job_id = execution.job().id().unwrap_or_default();
            match execution.wait().await {
                Ok(Some(outcome)) => tracing::debug!(
                    group = %group,
                    job_id = %job_id,
                    exit = outcome.failure().unwrap_or("success"),
                    "Execution finished"
                ),
                Ok(None) => {}
                Err(e) => tracing::error!(
                    group = %group,
                    job_id = %job_id,
                    error = %e,
                    "Execution task failed"
                ),
            }
        });
    }

    /// Executions started through [`JobGroup::start`] that have not finished.
    pub fn active_executions(&self) -> usize {
        self.executions.len()
    }

    /// Kill every running job and wait for all started executions to end.
    pub async fn shutdown(&self) {
        self.executions.close();
        for job in self.store.get_all(Some(JobState::Running)) {
            let id = job.id().unwrap_or_default();
            match self.runner.kill(&job) {
                Ok(()) | Err(RtotError::NoSuchProcess(_)) => {}
                Err(e) => tracing::warn!(
                    group = %self.name,
                    job_id = %id,
                    error = %e,
                    "Kill on shutdown failed"
                ),
            }
        }
        self.executions.wait().await;
    }

    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.store.get(id)
    }

    pub fn get_all(&self, state: Option<JobState>) -> Vec<Arc<Job>> {
        self.store.get_all(state)
    }

    /// Signal the job's process. `JobNotFound` if the id is unknown,
    /// `NoSuchProcess` if nothing is running.
    pub fn kill(&self, id: JobId) -> Result<()> {
        let job = self.store.get(id).ok_or(RtotError::JobNotFound(id))?;
        self.runner.kill(&job)
    }

    /// Clean up the job's artifact and drop it from the store. Returns whether
    /// the job was present.
    pub fn remove(&self, id: JobId) -> bool {
        if let Some(job) = self.store.get(id) {
            if let Err(e) = self.runner.cleanup(&job) {
                tracing::warn!(group = %self.name, job_id = %id, error = %e, "Job cleanup failed");
            }
        }
        self.store.remove(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Named job groups, built once at startup and shared with handlers.
#[derive(Debug, Default)]
pub struct JobGroups {
    groups: Mutex<HashMap<String, Arc<JobGroup>>>,
}

impl JobGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the group `name` backed by a fresh `kind` store.
    pub fn create(&self, name: &str, kind: StoreKind, runner: ScriptRunner) -> Arc<JobGroup> {
        let group = Arc::new(JobGroup::new(name, kind.build(), runner));
        if lock(&self.groups)
            .insert(name.to_string(), Arc::clone(&group))
            .is_some()
        {
            tracing::warn!(group = name, "Replaced existing job group");
        }
        group
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobGroup>> {
        lock(&self.groups).get(name).cloned()
    }

    pub fn main(&self) -> Result<Arc<JobGroup>> {
        self.get(MAIN_GROUP)
            .ok_or_else(|| RtotError::JobGroupNotFound(MAIN_GROUP.to_string()))
    }

    pub fn all(&self) -> Vec<Arc<JobGroup>> {
        lock(&self.groups).values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.groups).keys().cloned().collect();
        names.sort();
        names
    }
}
