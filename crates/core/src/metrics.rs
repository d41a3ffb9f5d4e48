//! Runtime counters.
//!
//! Every recording updates an in-process snapshot (served by the status
//! endpoint) and forwards to the `metrics` facade for whatever recorder the
//! host installs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct RuntimeMetrics {
    sessions_created: AtomicU64,
    prompts: AtomicU64,
    prompt_failures: AtomicU64,
    queued_prompts: AtomicU64,
    abandoned_prompts: AtomicU64,
    heartbeat_halts: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("clawgate_sessions_created", 1);
    }

    pub fn prompt_completed(&self, latency: Duration) {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!("clawgate_prompt_latency_ms", latency.as_secs_f64() * 1000.0);
    }

    pub fn prompt_failed(&self) {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        self.prompt_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("clawgate_prompt_failures", 1);
    }

    pub fn prompt_queued(&self) {
        self.queued_prompts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prompt_abandoned(&self) {
        self.abandoned_prompts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("clawgate_prompts_abandoned", 1);
    }

    pub fn drain_batch(&self, size: usize) {
        metrics::histogram!("clawgate_heartbeat_batch_size", size as f64);
    }

    pub fn heartbeat_halted(&self) {
        self.heartbeat_halts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("clawgate_heartbeat_halts", 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            prompts: self.prompts.load(Ordering::Relaxed),
            prompt_failures: self.prompt_failures.load(Ordering::Relaxed),
            queued_prompts: self.queued_prompts.load(Ordering::Relaxed),
            abandoned_prompts: self.abandoned_prompts.load(Ordering::Relaxed),
            heartbeat_halts: self.heartbeat_halts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub prompts: u64,
    pub prompt_failures: u64,
    pub queued_prompts: u64,
    pub abandoned_prompts: u64,
    pub heartbeat_halts: u64,
}

impl MetricsSnapshot {
    pub fn prompt_success_rate(&self) -> f64 {
        if self.prompts == 0 {
            return 1.0;
        }
        1.0 - (self.prompt_failures as f64 / self.prompts as f64)
    }
}
