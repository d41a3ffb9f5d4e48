use crate::config::Config;
use crate::status::StatusServer;
use anyhow::{Context, Result};
use clawgate_interfaces::{TerminalTransport, Transport};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Serve the terminal transport and the status endpoint until input ends
/// or Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let registry = super::registry(config);
    let (bus, handler) = super::gateway_bus(config, registry.clone());
    let events = super::spawn_event_logger(&bus, &cancel);

    let status = if config.status.enabled {
        let addr = config.status_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status server on {}", addr))?;
        let server = StatusServer::new(registry.clone());
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(listener, cancel).await {
                error!(error = %e, "Status server failed");
            }
        }))
    } else {
        None
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    let transport = TerminalTransport::stdio();
    info!(transport = transport.name(), backend = registry.backend_name(), "Gateway running");
    let outcome = transport.run(cancel.clone(), handler).await;

    cancel.cancel();
    bus.close();
    registry.close();
    if let Some(status) = status {
        let _ = status.await;
    }
    let _ = events.await;

    outcome.context("Terminal transport failed")
}
