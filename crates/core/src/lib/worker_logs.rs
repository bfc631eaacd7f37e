use crate::repository::RepositoryError;
use crate::store::{Datastore, FindQuery, SortOrder};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub const WORKER_LOGS_COLLECTION: &str = "workerLogs";

/// Append-only audit trail of worker activity. Every tick-level message the
/// workers emit through tracing is also persisted here; retention is handled
/// outside the node.
pub struct WorkerLogRepository<S: Datastore> {
    store: Arc<S>,
}

impl<S: Datastore> WorkerLogRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn store_log(
        &self,
        level: &str,
        message: &str,
        extras: Value,
    ) -> Result<(), RepositoryError> {
        let id = format!("{:032x}", rand::random::<u128>());
        let document = json!({
            "timestamp": Utc::now().timestamp(),
            "level": level,
            "message": message,
            "extras": extras,
        });
        self.store.insert(WORKER_LOGS_COLLECTION, &id, document).await?;
        Ok(())
    }

    pub async fn latest_logs(&self, limit: u64) -> Result<Vec<Value>, RepositoryError> {
        let query = FindQuery::filtered(json!({}))
            .sorted_by("timestamp", SortOrder::Descending)
            .paginate(0, limit);
        Ok(self.store.find(WORKER_LOGS_COLLECTION, &query).await?)
    }
}
