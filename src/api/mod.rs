//! HTTP surface for submitting and polling jobs.
//!
//! Every route except `GET /ping` requires `Authorization: rtot <secret>`.
//! Job bodies use the `{"jobs": [...]}` envelope from
//! [`JobsEnvelope`](crate::scheduler::JobsEnvelope).

pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::ServerConfig;
use crate::scheduler::{JobFields, JobGroups};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_HEADER: &str = "rtot-version";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub groups: Arc<JobGroups>,
    pub default_fields: JobFields,
    pub started_at: Instant,
    /// Cancelled by `DELETE /` to stop the server.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        groups: Arc<JobGroups>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            default_fields: JobFields::parse(&config.default_job_fields),
            config,
            groups,
            started_at: Instant::now(),
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(handlers::root).delete(handlers::die))
        .route(
            "/jobs",
            post(handlers::create_job)
                .get(handlers::all_jobs)
                .delete(handlers::delete_jobs),
        )
        .route(
            "/jobs/{id}",
            get(handlers::get_job).delete(handlers::delete_job),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_secret,
        ));

    Router::new()
        .route("/ping", get(handlers::ping))
        .merge(protected)
        .layer(CatchPanicLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(VERSION),
        ))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
