use crate::config::Config;
use crate::repl::Repl;
use anyhow::Result;
use clawgate_core::BusWorker;
use tokio_util::sync::CancellationToken;
use tracing::info_span;

pub async fn run(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let registry = super::registry(config);
    let (bus, handler) = super::gateway_bus(config, registry.clone());

    let events = super::spawn_event_logger(&bus, &cancel);
    let worker = tokio::spawn(
        BusWorker::new(bus.clone(), handler)
            .with_span(info_span!("bus_worker", transport = "cli"))
            .run(cancel.clone()),
    );

    let outcome = Repl::new(bus.clone(), registry.clone()).run(&cancel).await;

    cancel.cancel();
    bus.close();
    registry.close();
    let _ = worker.await;
    let _ = events.await;
    outcome
}
