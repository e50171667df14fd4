//! Caller-selected views of jobs for API responses.
//!
//! `id`, `href` and `state` are always present. The optional keys are chosen
//! with a comma-separated field list; unknown names are ignored. Selected
//! keys are still left out while they have nothing to show: empty output,
//! timestamps not yet reached, and `exit` for a job that did not fail.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::job::{Job, JobId, JobSnapshot, JobState};

/// Field list used when the caller does not pass one.
pub const DEFAULT_FIELDS: &str = "out,err,create,start,complete";

/// Optional record keys a caller may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFields {
    pub out: bool,
    pub err: bool,
    pub exit: bool,
    pub create: bool,
    pub start: bool,
    pub complete: bool,
}

impl JobFields {
    pub const fn none() -> Self {
        Self {
            out: false,
            err: false,
            exit: false,
            create: false,
            start: false,
            complete: false,
        }
    }

    pub const fn all() -> Self {
        Self {
            out: true,
            err: true,
            exit: true,
            create: true,
            start: true,
            complete: true,
        }
    }

    pub fn defaults() -> Self {
        Self::parse(DEFAULT_FIELDS)
    }

    pub fn parse(list: &str) -> Self {
        let mut fields = Self::none();
        for name in list.split(',') {
            match name.trim() {
                "out" => fields.out = true,
                "err" => fields.err = true,
                "exit" => fields.exit = true,
                "create" => fields.create = true,
                "start" => fields.start = true,
                "complete" => fields.complete = true,
                _ => {}
            }
        }
        fields
    }
}

impl FromStr for JobFields {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// One projected job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub href: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<String>,
}

impl JobRecord {
    pub fn from_snapshot(snap: &JobSnapshot, fields: JobFields) -> Self {
        Self {
            id: snap.id,
            href: format!("/{}", snap.id),
            state: snap.state,
            out: non_empty(fields.out, &snap.stdout),
            err: non_empty(fields.err, &snap.stderr),
            exit: snap
                .exit
                .as_ref()
                .and_then(|exit| exit.failure())
                .filter(|_| fields.exit)
                .map(str::to_string),
            create: timestamp(fields.create, Some(snap.created_at)),
            start: timestamp(fields.start, snap.started_at),
            complete: timestamp(fields.complete, snap.completed_at),
        }
    }
}

fn non_empty(selected: bool, value: &str) -> Option<String> {
    (selected && !value.is_empty()).then(|| value.to_string())
}

fn timestamp(selected: bool, at: Option<DateTime<Utc>>) -> Option<String> {
    at.filter(|_| selected)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

impl Job {
    /// Render this job with the requested optional keys. The job's execution
    /// fields are read under one lock, so the record is never torn.
    pub fn project(&self, fields: JobFields) -> JobRecord {
        JobRecord::from_snapshot(&self.snapshot(), fields)
    }
}

/// The `{"jobs": [...]}` body shared by single-job and list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsEnvelope {
    pub jobs: Vec<JobRecord>,
}

impl JobsEnvelope {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(job: &Job, fields: JobFields) -> Self {
        Self {
            jobs: vec![job.project(fields)],
        }
    }

    pub fn from_jobs(jobs: &[Arc<Job>], fields: JobFields) -> Self {
        Self {
            jobs: jobs.iter().map(|job| job.project(fields)).collect(),
        }
    }
}
