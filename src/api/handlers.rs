use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::error::RtotError;
use crate::scheduler::{Job, JobFields, JobGroup, JobId, JobState, JobsEnvelope};

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub state: Option<String>,
    pub fields: Option<String>,
}

impl JobsQuery {
    /// An explicit `fields` parameter wins, even when empty.
    fn fields(&self, default: JobFields) -> JobFields {
        self.fields
            .as_deref()
            .map(JobFields::parse)
            .unwrap_or(default)
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "links": {
            "jobs": "/jobs{?state}",
            "jobs.by_id": "/jobs/{jobs.id}",
            "ping": "/ping",
        }
    }))
}

pub async fn ping(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "still here",
        "uptime": format!("{:?}", state.started_at.elapsed()),
    }))
}

pub async fn die(State(state): State<AppState>) -> StatusCode {
    tracing::info!("Shutdown requested");
    state.shutdown.cancel();
    StatusCode::NO_CONTENT
}

pub async fn create_job(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JobsEnvelope>)> {
    let group = state.groups.main()?;
    let job = Arc::new(group.runner().create(&body)?);
    let id = group.add(Arc::clone(&job))?;

    // Rendered before the run starts so the caller sees the `new` state.
    let envelope = JobsEnvelope::single(&job, query.fields(state.default_fields));

    tracing::info!(
        job_id = %id,
        script_path = %job.script_path().display(),
        "Job created"
    );
    group.start(job);

    Ok((StatusCode::CREATED, Json(envelope)))
}

pub async fn all_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<JobsEnvelope>> {
    let group = state.groups.main()?;
    let jobs = jobs_in_state(&group, query.state.as_deref());
    Ok(Json(JobsEnvelope::from_jobs(
        &jobs,
        query.fields(state.default_fields),
    )))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Response> {
    let id = parse_job_id(&raw_id)?;
    let group = state.groups.main()?;

    let Some(job) = id.and_then(|id| group.get(id)) else {
        return Ok((StatusCode::NOT_FOUND, Json(JobsEnvelope::empty())).into_response());
    };

    let record = job.project(query.fields(state.default_fields));
    let status = if record.state == JobState::Complete {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        [(LOCATION, record.href.clone())],
        Json(JobsEnvelope {
            jobs: vec![record],
        }),
    )
        .into_response())
}

pub async fn delete_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<StatusCode> {
    let group = state.groups.main()?;
    for job in jobs_in_state(&group, query.state.as_deref()) {
        if let Some(id) = job.id() {
            kill_and_remove(&group, id);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_job_id(&raw_id)?.ok_or(ApiError::NoSuchJob)?;
    let group = state.groups.main()?;
    if !kill_and_remove(&group, id) {
        return Err(ApiError::NoSuchJob);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Jobs matching the `state` parameter. Empty or absent means all; a name
/// that is not a state matches nothing.
fn jobs_in_state(group: &JobGroup, state: Option<&str>) -> Vec<Arc<Job>> {
    match state.filter(|s| !s.is_empty()) {
        None => group.get_all(None),
        Some(raw) => match raw.parse::<JobState>() {
            Ok(state) => group.get_all(Some(state)),
            Err(_) => Vec::new(),
        },
    }
}

/// Kill the job if it is still running, then remove it. A process that has
/// already exited is not an error here.
fn kill_and_remove(group: &JobGroup, id: JobId) -> bool {
    match group.kill(id) {
        Ok(()) | Err(RtotError::NoSuchProcess(_)) | Err(RtotError::JobNotFound(_)) => {}
        Err(e) => tracing::debug!(job_id = %id, error = %e, "Kill failed, removing anyway"),
    }
    group.remove(id)
}

/// `Ok(None)` for a well-formed id that can never exist (negative).
fn parse_job_id(raw: &str) -> ApiResult<Option<JobId>> {
    if let Ok(id) = raw.parse::<u64>() {
        return Ok(Some(JobId(id)));
    }
    match raw.parse::<i64>() {
        Ok(_) => Ok(None),
        Err(_) => Err(ApiError::InvalidJobId(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_job_id_accepts_integers() {
        assert_eq!(parse_job_id("0").unwrap(), Some(JobId(0)));
        assert_eq!(parse_job_id("42").unwrap(), Some(JobId(42)));
        assert_eq!(parse_job_id("-1").unwrap(), None);
    }

    #[test]
    fn parse_job_id_rejects_garbage() {
        for raw in ["abc", "1.5", "", "0x10"] {
            assert!(matches!(
                parse_job_id(raw),
                Err(ApiError::InvalidJobId(token)) if token == raw
            ));
        }
    }

    #[test]
    fn explicit_empty_fields_means_minimal() {
        let query = JobsQuery {
            state: None,
            fields: Some(String::new()),
        };
        assert_eq!(query.fields(JobFields::defaults()), JobFields::none());
        assert_eq!(
            JobsQuery::default().fields(JobFields::defaults()),
            JobFields::defaults()
        );
    }
}
