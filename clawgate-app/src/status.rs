//! HTTP status endpoint: `GET /status` -> JSON.

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clawgate_core::{MetricsSnapshot, SessionRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub uptime_secs: u64,
    pub backend: String,
    pub active_sessions: usize,
    pub sessions: Vec<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct StatusServer {
    registry: Arc<SessionRegistry>,
    started: Instant,
}

impl StatusServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            started: Instant::now(),
        }
    }

    pub fn report(&self) -> StatusReport {
        let sessions = self.registry.keys();
        StatusReport {
            uptime_secs: self.started.elapsed().as_secs(),
            backend: self.registry.backend_name().to_string(),
            active_sessions: sessions.len(),
            sessions,
            metrics: self.registry.metrics().snapshot(),
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/status", get(status_handler))
            .with_state(self)
    }

    /// Serve on `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        info!("Status server listening on http://{}/status", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        info!("Status server stopped");
        Ok(())
    }
}

async fn status_handler(State(server): State<StatusServer>) -> Json<StatusReport> {
    Json(server.report())
}
