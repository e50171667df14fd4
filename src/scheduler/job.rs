use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{Result, RtotError};

/// Group-scoped job identifier, assigned when the job is inserted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state. Only ever moves forward: `New` -> `Running` -> `Complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    New,
    Running,
    Complete,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Running => "running",
            JobState::Complete => "complete",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state {0:?}")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobState::New),
            "running" => Ok(JobState::Running),
            "complete" => Ok(JobState::Complete),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// How a completed job's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure(String),
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return ExitOutcome::Success;
        }
        let message = match (status.code(), status.signal()) {
            (Some(code), _) => format!("exit status {}", code),
            (None, Some(9)) => "signal: killed".to_string(),
            (None, Some(15)) => "signal: terminated".to_string(),
            (None, Some(sig)) => format!("signal: {}", sig),
            (None, None) => "exit status unknown".to_string(),
        };
        ExitOutcome::Failure(message)
    }

    pub fn spawn_failure(err: &std::io::Error) -> Self {
        ExitOutcome::Failure(format!("failed to start: {}", err))
    }

    /// Failure description, `None` for a successful run.
    pub fn failure(&self) -> Option<&str> {
        match self {
            ExitOutcome::Success => None,
            ExitOutcome::Failure(msg) => Some(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Fields mutated by the job's own execution. Guarded as one unit so a reader
/// never sees `Complete` alongside partially captured output.
#[derive(Debug, Default)]
struct Progress {
    state: JobState,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit: Option<ExitOutcome>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    process_live: bool,
}

/// Point-in-time copy of a job's execution fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub stdout: String,
    pub stderr: String,
    pub exit: Option<ExitOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One submitted script and its execution record.
///
/// The job owns its on-disk artifact until [`Job::take_artifact`] hands it to
/// cleanup; if that never happens the artifact is removed when the job drops.
#[derive(Debug)]
pub struct Job {
    id: OnceLock<JobId>,
    script_path: PathBuf,
    created_at: DateTime<Utc>,
    progress: Mutex<Progress>,
    artifact: Mutex<Option<TempPath>>,
    kill_switch: CancellationToken,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Job {
    pub(crate) fn from_artifact(artifact: TempPath) -> Self {
        Self {
            id: OnceLock::new(),
            script_path: artifact.to_path_buf(),
            created_at: Utc::now(),
            progress: Mutex::new(Progress::default()),
            artifact: Mutex::new(Some(artifact)),
            kill_switch: CancellationToken::new(),
        }
    }

    /// The assigned id, or `None` if the job has not been inserted into a group.
    pub fn id(&self) -> Option<JobId> {
        self.id.get().copied()
    }

    /// Sets the id. Returns false if one was already assigned.
    pub(crate) fn assign_id(&self, id: JobId) -> bool {
        self.id.set(id).is_ok()
    }

    /// The existing id, or `id` if none was assigned yet.
    pub(crate) fn id_or_assign(&self, id: JobId) -> JobId {
        *self.id.get_or_init(|| id)
    }

    pub fn href(&self) -> String {
        format!("/{}", self.id().unwrap_or_default())
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> JobState {
        lock(&self.progress).state
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let progress = lock(&self.progress);
        JobSnapshot {
            id: self.id().unwrap_or_default(),
            state: progress.state,
            stdout: String::from_utf8_lossy(&progress.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&progress.stderr).into_owned(),
            exit: progress.exit.clone(),
            created_at: self.created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
        }
    }

    /// `New` -> `Running`. Returns false if the job already left `New`.
    ///
    /// The process counts as live from here on, so a kill requested while the
    /// child is still being spawned is honoured as soon as it exists.
    pub(crate) fn mark_running(&self) -> bool {
        let mut progress = lock(&self.progress);
        if progress.state != JobState::New {
            return false;
        }
        progress.state = JobState::Running;
        progress.started_at = Some(Utc::now());
        progress.process_live = true;
        true
    }

    pub(crate) fn set_process_live(&self, live: bool) {
        lock(&self.progress).process_live = live;
    }

    pub(crate) fn append_output(&self, stream: OutputStream, chunk: &[u8]) {
        let mut progress = lock(&self.progress);
        match stream {
            OutputStream::Stdout => progress.stdout.extend_from_slice(chunk),
            OutputStream::Stderr => progress.stderr.extend_from_slice(chunk),
        }
    }

    /// `Running` -> `Complete`, recording the outcome. Returns false if the job
    /// was not running.
    pub(crate) fn finish(&self, outcome: ExitOutcome) -> bool {
        let mut progress = lock(&self.progress);
        if progress.state != JobState::Running {
            return false;
        }
        progress.state = JobState::Complete;
        progress.exit = Some(outcome);
        progress.completed_at = Some(Utc::now());
        progress.process_live = false;
        true
    }

    /// Asks the running process to terminate. Fails with `NoSuchProcess` when
    /// there is no live process to signal.
    pub(crate) fn request_kill(&self) -> Result<()> {
        let progress = lock(&self.progress);
        if progress.state != JobState::Running
            || !progress.process_live
            || self.kill_switch.is_cancelled()
        {
            return Err(RtotError::NoSuchProcess(self.id().unwrap_or_default()));
        }
        self.kill_switch.cancel();
        Ok(())
    }

    pub(crate) fn kill_requested(&self) -> WaitForCancellationFuture<'_> {
        self.kill_switch.cancelled()
    }

    /// Hands over the artifact for removal. Only the first call gets it.
    pub(crate) fn take_artifact(&self) -> Option<TempPath> {
        lock(&self.artifact).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        let file = tempfile::NamedTempFile::new().unwrap();
        Job::from_artifact(file.into_temp_path())
    }

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [JobState::New, JobState::Running, JobState::Complete] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("done".parse::<JobState>().is_err());
        assert!("".parse::<JobState>().is_err());
    }

    #[test]
    fn job_state_orders_forward() {
        assert!(JobState::New < JobState::Running);
        assert!(JobState::Running < JobState::Complete);
    }

    #[test]
    fn new_job_has_only_created_at() {
        let job = test_job();
        let snap = job.snapshot();
        assert_eq!(snap.state, JobState::New);
        assert!(snap.started_at.is_none());
        assert!(snap.completed_at.is_none());
        assert!(snap.exit.is_none());
        assert!(job.id().is_none());
    }

    #[test]
    fn id_is_assigned_once() {
        let job = test_job();
        assert!(job.assign_id(JobId(3)));
        assert!(!job.assign_id(JobId(4)));
        assert_eq!(job.id(), Some(JobId(3)));
        assert_eq!(job.href(), "/3");
    }

    #[test]
    fn transitions_cannot_skip_or_regress() {
        let job = test_job();
        assert!(!job.finish(ExitOutcome::Success));
        assert_eq!(job.state(), JobState::New);

        assert!(job.mark_running());
        assert!(!job.mark_running());
        assert_eq!(job.state(), JobState::Running);

        assert!(job.finish(ExitOutcome::Success));
        assert!(!job.finish(ExitOutcome::Success));
        assert!(!job.mark_running());
        assert_eq!(job.state(), JobState::Complete);

        let snap = job.snapshot();
        assert!(snap.started_at.is_some());
        assert!(snap.completed_at.is_some());
        assert_eq!(snap.exit, Some(ExitOutcome::Success));
    }

    #[test]
    fn kill_is_accepted_as_soon_as_running() {
        let job = test_job();
        assert!(matches!(
            job.request_kill(),
            Err(RtotError::NoSuchProcess(_))
        ));

        job.mark_running();
        assert!(job.request_kill().is_ok());
        assert!(job.kill_switch.is_cancelled());
        // Second signal is not delivered twice
        assert!(job.request_kill().is_err());
    }

    #[test]
    fn kill_after_process_exit_is_no_such_process() {
        let job = test_job();
        job.mark_running();
        job.set_process_live(false);
        assert!(job.request_kill().is_err());

        job.finish(ExitOutcome::Success);
        assert!(job.request_kill().is_err());
    }

    #[test]
    fn id_or_assign_keeps_existing_id() {
        let job = test_job();
        assert_eq!(job.id_or_assign(JobId(2)), JobId(2));
        assert_eq!(job.id_or_assign(JobId(7)), JobId(2));
    }

    #[test]
    fn artifact_is_taken_once() {
        let job = test_job();
        assert!(job.take_artifact().is_some());
        assert!(job.take_artifact().is_none());
    }

    #[test]
    fn exit_outcome_formats_codes_and_signals() {
        assert_eq!(
            ExitOutcome::from_status(ExitStatus::from_raw(0)),
            ExitOutcome::Success
        );
        assert_eq!(
            ExitOutcome::from_status(ExitStatus::from_raw(1 << 8)).failure(),
            Some("exit status 1")
        );
        assert_eq!(
            ExitOutcome::from_status(ExitStatus::from_raw(9)).failure(),
            Some("signal: killed")
        );
        assert_eq!(
            ExitOutcome::from_status(ExitStatus::from_raw(15)).failure(),
            Some("signal: terminated")
        );
    }

    #[test]
    fn output_is_appended_per_stream() {
        let job = test_job();
        job.append_output(OutputStream::Stdout, b"hel");
        job.append_output(OutputStream::Stdout, b"lo\n");
        job.append_output(OutputStream::Stderr, b"oops");
        let snap = job.snapshot();
        assert_eq!(snap.stdout, "hello\n");
        assert_eq!(snap.stderr, "oops");
    }
}
