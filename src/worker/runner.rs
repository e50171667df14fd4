use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{Result, RtotError};
use crate::scheduler::job::OutputStream;
use crate::scheduler::{ExitOutcome, Job};

/// Interpreter line used for scripts that do not bring their own `#!`.
pub const DEFAULT_SHELL: &str = "/bin/bash";

const ARTIFACT_PREFIX: &str = "rtot";
const READ_CHUNK: usize = 8 * 1024;

const ETXTBSY: i32 = 26;
const SPAWN_ATTEMPTS: u64 = 5;

/// Turns script bodies into executable artifacts and runs them.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
    artifact_dir: Option<PathBuf>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl ScriptRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            artifact_dir: None,
        }
    }

    /// Create artifacts under `dir` instead of the system temp directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Prepend the default interpreter line unless the body already has one.
    pub fn normalize_script(&self, body: &[u8]) -> Vec<u8> {
        if body.starts_with(b"#!") {
            return body.to_vec();
        }
        let mut script = format!("#!{}\n", self.shell).into_bytes();
        script.extend_from_slice(body);
        script
    }

    /// Write `body` to a fresh executable artifact and wrap it in a `New` job.
    pub fn create(&self, body: &[u8]) -> Result<Job> {
        let script = self.normalize_script(body);

        let mut builder = tempfile::Builder::new();
        builder.prefix(ARTIFACT_PREFIX);
        let mut file = match &self.artifact_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(RtotError::ArtifactCreation)?;

        file.write_all(&script)
            .map_err(RtotError::ArtifactCreation)?;
        file.as_file()
            .set_permissions(Permissions::from_mode(0o755))
            .map_err(RtotError::ArtifactCreation)?;

        // Closing the write handle before exec avoids ETXTBSY.
        let job = Job::from_artifact(file.into_temp_path());
        tracing::debug!(script_path = %job.script_path().display(), "Created job artifact");
        Ok(job)
    }

    /// Execute the job's artifact to completion.
    ///
    /// Spawn and exit failures are recorded on the job, never returned. A job
    /// that has already left `New` is left untouched.
    pub async fn run(&self, job: &Job) {
        let job_id = job.id().unwrap_or_default();
        if !job.mark_running() {
            tracing::warn!(job_id = %job_id, state = %job.state(), "Job already started");
            return;
        }

        tracing::info!(
            job_id = %job_id,
            script_path = %job.script_path().display(),
            "Starting job"
        );

        // A kill requested during the spawn is already on the token and is
        // picked up by `wait_for_exit`.
        let mut child = match spawn_artifact(job.script_path()).await {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job failed to start");
                job.finish(ExitOutcome::spawn_failure(&e));
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, _, status) = tokio::join!(
            capture(stdout, job, OutputStream::Stdout),
            capture(stderr, job, OutputStream::Stderr),
            wait_for_exit(&mut child, job),
        );

        let outcome = match status {
            Ok(status) => ExitOutcome::from_status(status),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed waiting on job process");
                ExitOutcome::Failure(format!("wait failed: {}", e))
            }
        };

        tracing::info!(
            job_id = %job_id,
            exit = outcome.failure().unwrap_or("success"),
            "Job completed"
        );
        job.finish(outcome);
    }

    /// Run the job on its own task. The submitting caller is not blocked.
    pub fn spawn(&self, job: Arc<Job>) -> Execution {
        let runner = self.clone();
        let task_job = Arc::clone(&job);
        let handle = tokio::spawn(async move {
            runner.run(&task_job).await;
        });
        Execution { job, handle }
    }

    /// Signal the job's live process. `NoSuchProcess` if it never started or
    /// already exited.
    pub fn kill(&self, job: &Job) -> Result<()> {
        job.request_kill()?;
        tracing::info!(job_id = %job.id().unwrap_or_default(), "Killing job process");
        Ok(())
    }

    /// Delete the job's artifact. Later calls are no-ops.
    pub fn cleanup(&self, job: &Job) -> Result<()> {
        let Some(artifact) = job.take_artifact() else {
            return Ok(());
        };
        match artifact.close() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RtotError::Cleanup(e)),
        }
        tracing::debug!(
            job_id = %job.id().unwrap_or_default(),
            script_path = %job.script_path().display(),
            "Removed job artifact"
        );
        Ok(())
    }
}

/// Handle to a job running on its own task.
///
/// Dropping it detaches the task; the job keeps running.
#[must_use = "dropping an Execution leaves its task unobserved"]
#[derive(Debug)]
pub struct Execution {
    job: Arc<Job>,
    handle: JoinHandle<()>,
}

impl Execution {
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task and return the recorded outcome, `None` if the job
    /// had already been started elsewhere and this task did nothing.
    pub async fn wait(self) -> Result<Option<ExitOutcome>> {
        self.handle.await?;
        Ok(self.job.snapshot().exit)
    }
}

/// Exec the artifact. A concurrent fork elsewhere in the process can briefly
/// hold a copy of the artifact's write handle, so ETXTBSY is retried.
async fn spawn_artifact(path: &Path) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        let spawned = Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                tokio::time::sleep(Duration::from_millis(10 * attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn wait_for_exit(child: &mut Child, job: &Job) -> std::io::Result<ExitStatus> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = job.kill_requested() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Job process already gone");
            }
            child.wait().await
        }
    };
    job.set_process_live(false);
    status
}

async fn capture<R>(reader: Option<R>, job: &Job, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => job.append_output(stream, &buf[..n]),
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id().unwrap_or_default(),
                    stream = ?stream,
                    error = %e,
                    "Failed reading job output"
                );
                break;
            }
        }
    }
}
