use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::RtotError;

/// Handler error, rendered as a JSON body with the matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid job number {0:?}")]
    InvalidJobId(String),

    #[error("not authorized")]
    Unauthorized,

    #[error("no such job")]
    NoSuchJob,

    #[error(transparent)]
    Core(#[from] RtotError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidJobId(token) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "invalid job number",
                    "message": format!("what is {:?}?", token),
                }),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "not authorized",
                    "message": "phooey!",
                }),
            ),
            ApiError::NoSuchJob | ApiError::Core(RtotError::JobNotFound(_)) => {
                (StatusCode::NOT_FOUND, json!({ "error": "no such job" }))
            }
            ApiError::Core(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
