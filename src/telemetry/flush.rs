use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::batcher::FlushBatch;
use crate::store::{DurableStore, RecordsByKind, StoreError};
use crate::telemetry::session::SessionId;

/// Turns batches into single atomic store writes.
#[derive(Clone)]
pub struct FlushExecutor {
    store: Arc<dyn DurableStore>,
    write_timeout: Option<Duration>,
}

impl FlushExecutor {
    pub fn new(store: Arc<dyn DurableStore>, write_timeout: Option<Duration>) -> Self {
        Self { store, write_timeout }
    }

    /// Writes the batch under its own session id. Returns the number of
    /// records persisted. On error nothing from the batch was persisted.
    pub async fn write(&self, batch: &FlushBatch) -> Result<usize, StoreError> {
        let records = RecordsByKind::group(batch.events());
        debug!(
            "Flushing {} events for {} (clicks={}, treeBuilding={}, pageVisits={})",
            records.len(),
            batch.session_id(),
            records.clicks.len(),
            records.tree_nodes.len(),
            records.page_visits.len()
        );
        self.append(batch.session_id(), &records).await?;
        Ok(records.len())
    }

    /// Single append with the configured timeout applied.
    pub async fn append(&self, session_id: &SessionId, records: &RecordsByKind) -> Result<(), StoreError> {
        match self.write_timeout {
            None => self.store.atomic_append(session_id, records).await,
            Some(limit) => tokio::time::timeout(limit, self.store.atomic_append(session_id, records))
                .await
                .map_err(|_| StoreError::Timeout(limit.as_millis() as u64))?,
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }
}
