use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::error::ApiError;
use crate::api::AppState;

/// Scheme prefix of the `Authorization` header value.
pub const AUTH_SCHEME: &str = "rtot";

/// Reject requests whose `Authorization` header is not exactly
/// `rtot <secret>`.
pub async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = format!("{} {}", AUTH_SCHEME, state.config.secret);
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == expected.as_bytes());

    if !authorized {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

pub async fn log_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    tracing::info!(
        method = %request.method(),
        path = %request.uri().path(),
        "started"
    );

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!(
        code = status.as_u16(),
        status = status.canonical_reason().unwrap_or(""),
        duration = ?start.elapsed(),
        "completed"
    );
    response
}
