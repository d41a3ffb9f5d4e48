//! Heartbeat drain loop.
//!
//! One loop per heartbeat-enabled [`SessionInstance`]. It sleeps until the
//! wake signal fires or the heartbeat interval elapses, then drains the whole
//! pending queue serially before sleeping again.

use crate::error::SessionError;
use crate::session::{QueuedPrompt, SessionInstance};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, Instrument};

impl SessionInstance {
    /// Drive the pending queue until `cancel` fires or a prompt fails.
    ///
    /// Cancellation is a clean exit: `Ok(())`, and anything still queued is
    /// failed with `Closed`. A backend failure halts the loop for good and is
    /// returned; queued waiters then get `HeartbeatStopped`. Returns
    /// immediately when heartbeat mode is off.
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) -> Result<(), SessionError> {
        let Some(period) = self.options().heartbeat else {
            return Ok(());
        };
        let span = self.span.clone();

        async move {
            info!(interval_ms = period.as_millis() as u64, "Heartbeat loop started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.close_heartbeat();
                        info!("Heartbeat loop cancelled");
                        return Ok(());
                    }
                    _ = self.wake.notified() => trace!("Heartbeat woken"),
                    _ = ticker.tick() => trace!("Heartbeat tick"),
                }

                match self.drain(&cancel).await {
                    Ok(0) => {}
                    Ok(drained) => debug!(drained, "Drained pending prompts"),
                    Err(SessionError::Cancelled) => {
                        self.close_heartbeat();
                        info!("Heartbeat loop cancelled mid-drain");
                        return Ok(());
                    }
                    Err(e) => {
                        self.halt_heartbeat();
                        error!(error = %e, "Heartbeat loop halted; queued prompts for this session will be rejected");
                        return Err(e);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Execute every queued prompt in FIFO order.
    ///
    /// Items whose waiter has already gone away are skipped. The first
    /// failure is delivered to its waiter and returned, leaving the rest of
    /// the queue untouched.
    async fn drain(&self, cancel: &CancellationToken) -> Result<usize, SessionError> {
        let mut executed = 0;

        loop {
            let Some(item) = self.state.lock().pending.pop_front() else {
                break;
            };

            if item.reply.as_ref().is_some_and(|slot| slot.is_closed()) {
                debug!("Skipping prompt abandoned by its caller");
                self.metrics.prompt_abandoned();
                continue;
            }

            let outcome = self.prompt(cancel, &item.text).await;
            executed += 1;
            let failure = outcome.as_ref().err().cloned();

            if let Some(slot) = item.reply {
                // The waiter may have been cancelled meanwhile; its result is dropped.
                let _ = slot.send(outcome);
            }

            if let Some(e) = failure {
                self.metrics.drain_batch(executed);
                return Err(e);
            }
        }

        if executed > 0 {
            self.metrics.drain_batch(executed);
        }
        Ok(executed)
    }

    fn halt_heartbeat(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.heartbeat_halted = true;
            std::mem::take(&mut state.pending)
        };
        self.metrics.heartbeat_halted();
        fail_all(pending, || SessionError::HeartbeatStopped);
    }

    /// Mark the loop as gone and fail everything still queued. Later
    /// enqueues are rejected with `Closed`.
    fn close_heartbeat(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.heartbeat_closed = true;
            std::mem::take(&mut state.pending)
        };
        fail_all(pending, || SessionError::Closed);
    }
}

fn fail_all(pending: VecDeque<QueuedPrompt>, error: impl Fn() -> SessionError) {
    for item in pending {
        if let Some(slot) = item.reply {
            let _ = slot.send(Err(error()));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use crate::error::SessionError;
    use crate::session::{SessionInstance, SessionOptions};
    use clawgate_providers::EchoBackend;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn heartbeat_session(interval: Duration) -> Arc<SessionInstance> {
        let session = Arc::new(SessionInstance::new(
            Arc::new(EchoBackend::new()),
            SessionOptions::default().with_heartbeat(interval),
        ));
        session.start(&CancellationToken::new()).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_disabled_heartbeat_returns_immediately() {
        let session = Arc::new(SessionInstance::new(
            Arc::new(EchoBackend::new()),
            SessionOptions::default(),
        ));
        session.run_heartbeat(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_gets_result() {
        let session = heartbeat_session(Duration::from_secs(60)).await;
        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn(session.clone().run_heartbeat(cancel.clone()));

        let result = session
            .enqueue_and_wait(&CancellationToken::new(), "ping")
            .await
            .unwrap();
        assert_eq!(result.text, "ok:ping");
        assert_eq!(session.transcript().len(), 2);

        cancel.cancel();
        assert!(loop_handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_timer_drains_fire_and_forget_items() {
        let session = heartbeat_session(Duration::from_millis(20)).await;
        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn(session.clone().run_heartbeat(cancel.clone()));

        session.enqueue("background").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.pending_len(), 0);
        assert_eq!(session.transcript().len(), 2);

        cancel.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_fails_queued_waiters_with_closed() {
        let session = heartbeat_session(Duration::from_secs(60)).await;
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .enqueue_and_wait(&CancellationToken::new(), "never")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The loop is cancelled before it ever runs a cycle.
        let cancel = CancellationToken::new();
        cancel.cancel();
        session.clone().run_heartbeat(cancel).await.unwrap();

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(SessionError::Closed)));
    }
}
