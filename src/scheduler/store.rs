use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::{Result, RtotError};
use crate::scheduler::job::{lock, Job, JobId, JobState};

/// Keyed storage for the jobs of one group.
///
/// Implementations own membership only. Removing an entry never touches the
/// job's artifact; that is the group's responsibility.
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Insert a job and return its id. A job that already carries an id is
    /// stored under it; otherwise the store assigns its next sequential id.
    /// An occupied id is never overwritten: that is `DuplicateJobId`.
    fn add(&self, job: Arc<Job>) -> Result<JobId>;

    fn get(&self, id: JobId) -> Option<Arc<Job>>;

    /// Snapshot of stored jobs, optionally restricted to one state.
    fn get_all(&self, state: Option<JobState>) -> Vec<Arc<Job>>;

    /// Delete the entry. Returns whether it was present.
    fn remove(&self, id: JobId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend selector used when a job group is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
}

impl StoreKind {
    pub fn build(&self) -> Arc<dyn JobStore> {
        match self {
            StoreKind::Memory => Arc::new(MemoryJobStore::new()),
        }
    }
}

impl FromStr for StoreKind {
    type Err = RtotError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreKind::Memory),
            other => Err(RtotError::InvalidStoreKind(other.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    jobs: HashMap<JobId, Arc<Job>>,
    next_id: u64,
}

/// In-process job store behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    entries: Mutex<Entries>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn add(&self, job: Arc<Job>) -> Result<JobId> {
        let mut entries = lock(&self.entries);
        let id = job.id_or_assign(JobId(entries.next_id));
        match entries.jobs.entry(id) {
            Entry::Occupied(_) => return Err(RtotError::DuplicateJobId(id)),
            Entry::Vacant(slot) => {
                slot.insert(job);
            }
        }
        entries.next_id = entries.next_id.max(id.0 + 1);
        Ok(id)
    }

    fn get(&self, id: JobId) -> Option<Arc<Job>> {
        lock(&self.entries).jobs.get(&id).cloned()
    }

    fn get_all(&self, state: Option<JobState>) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = {
            let entries = lock(&self.entries);
            entries
                .jobs
                .values()
                .filter(|job| state.map_or(true, |s| job.state() == s))
                .cloned()
                .collect()
        };
        jobs.sort_by_key(|job| job.id());
        jobs
    }

    fn remove(&self, id: JobId) -> bool {
        lock(&self.entries).jobs.remove(&id).is_some()
    }

    fn len(&self) -> usize {
        lock(&self.entries).jobs.len()
    }
}
