use crate::config::Config;
use anyhow::{Context, Result};
use clawgate_core::LocalSession;
use tokio_util::sync::CancellationToken;
use tracing::info_span;

/// Send a single prompt through a fresh session and print the reply.
pub async fn run(config: &Config, text: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut session = LocalSession::start_with_span(
        super::backend(config),
        config.session_options(),
        &cancel,
        info_span!("prompt", agent = %config.agent),
    )
    .await
    .context("Failed to start session")?;

    let outcome = session.prompt(&cancel, text).await;
    session.close().await;

    let result = outcome.context("Prompt failed")?;
    println!("{}", result.text);
    Ok(())
}
