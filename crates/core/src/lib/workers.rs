use crate::store::Datastore;
use crate::worker_logs::WorkerLogRepository;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

pub mod challenge;
pub mod strategies;
pub mod upload;

/// A long-running control loop: one task invoked repeatedly at a
/// strategy-defined interval. Cancellation is cooperative and only honoured
/// between ticks; an in-flight tick always runs to completion.
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    fn tick(&mut self) -> impl Future<Output = ()> + Send;
}

pub async fn run_periodic<T: PeriodicTask>(mut task: T, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(worker = task.name(), "Worker started");
    loop {
        task.tick().await;

        tokio::select! {
            _ = tokio::time::sleep(task.interval()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!(worker = task.name(), "Worker stopped");
                    return;
                }
            }
        }
    }
}

/// Mirrors worker messages to both the logger and the durable worker log.
pub struct WorkerLogger<S: Datastore> {
    worker: &'static str,
    repository: Arc<WorkerLogRepository<S>>,
}

impl<S: Datastore> WorkerLogger<S> {
    pub fn new(worker: &'static str, repository: Arc<WorkerLogRepository<S>>) -> Self {
        Self { worker, repository }
    }

    pub async fn info(&self, message: &str, extras: Value) {
        tracing::info!(worker = self.worker, extras = %extras, "{message}");
        self.persist("info", message, extras).await;
    }

    pub async fn error(&self, message: &str, extras: Value) {
        tracing::error!(worker = self.worker, extras = %extras, "{message}");
        self.persist("error", message, extras).await;
    }

    async fn persist(&self, level: &str, message: &str, extras: Value) {
        if let Err(e) = self.repository.store_log(level, message, extras).await {
            tracing::warn!(worker = self.worker, "Failed to persist worker log: {e:?}");
        }
    }
}
