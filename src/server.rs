use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{router, AppState};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::{JobGroups, MAIN_GROUP};

/// How long shutdown waits for killed executions to be reaped.
const EXECUTION_GRACE: Duration = Duration::from_secs(5);

/// Owns the job registry and serves the HTTP API.
pub struct Server {
    pub config: Arc<ServerConfig>,
    pub groups: Arc<JobGroups>,
    shutdown: CancellationToken,
}

impl Server {
    /// Build the registry and its `main` group from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let groups = Arc::new(JobGroups::new());
        groups.create(MAIN_GROUP, config.store_kind, config.runner());

        Self {
            config: Arc::new(config),
            groups,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        router(AppState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.groups),
            self.shutdown.clone(),
        ))
    }

    /// Bind and serve until the shutdown token is cancelled.
    ///
    /// In-flight requests are drained, then every group kills its running jobs
    /// and waits (bounded) for their executions to finish.
    pub async fn run(self) -> Result<()> {
        let app = self.router();
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "Serving");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        for group in self.groups.all() {
            let active = group.active_executions();
            if tokio::time::timeout(EXECUTION_GRACE, group.shutdown())
                .await
                .is_err()
            {
                tracing::warn!(
                    group = %group.name(),
                    active_executions = group.active_executions(),
                    "Executions still running at shutdown"
                );
            }
            tracing::info!(
                group = %group.name(),
                stopped_executions = active,
                remaining_jobs = group.len(),
                "Job group stopped"
            );
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}
