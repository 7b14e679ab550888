//! Durable store boundary.
//!
//! The pipeline needs exactly two operations: upsert a session record and
//! atomically append a group of event records under a session. It never reads
//! back through this trait.

pub mod error;
pub mod file;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::telemetry::event::{EventKind, TelemetryEvent};
use crate::telemetry::session::{SessionId, SessionRecord};

pub use error::StoreError;
pub use file::{FileStore, SessionExport};
pub use http::HttpStore;
pub use memory::{MemoryStore, StoreOp};

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Creates or replaces the session record. `ServerTimestamp` placeholders
    /// are resolved by the store; the stored record is returned.
    async fn create_or_update(
        &self,
        session_id: &SessionId,
        record: &SessionRecord,
    ) -> Result<SessionRecord, StoreError>;

    /// Persists every record in `records` or none of them.
    async fn atomic_append(
        &self,
        session_id: &SessionId,
        records: &RecordsByKind,
    ) -> Result<(), StoreError>;
}

/// Event records split into their per-kind destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordsByKind {
    #[serde(default)]
    pub clicks: Vec<TelemetryEvent>,
    #[serde(default, rename = "treeBuilding")]
    pub tree_nodes: Vec<TelemetryEvent>,
    #[serde(default, rename = "pageVisits")]
    pub page_visits: Vec<TelemetryEvent>,
}

impl RecordsByKind {
    /// Groups events by kind, preserving relative order within each kind.
    pub fn group<'a>(events: impl IntoIterator<Item = &'a TelemetryEvent>) -> Self {
        let mut out = Self::default();
        for event in events {
            out.push(event.clone());
        }
        out
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        match event.kind() {
            EventKind::Click => self.clicks.push(event),
            EventKind::TreeNode => self.tree_nodes.push(event),
            EventKind::PageVisit => self.page_visits.push(event),
        }
    }

    pub fn extend(&mut self, other: RecordsByKind) {
        self.clicks.extend(other.clicks);
        self.tree_nodes.extend(other.tree_nodes);
        self.page_visits.extend(other.page_visits);
    }

    pub fn len(&self) -> usize {
        self.clicks.len() + self.tree_nodes.len() + self.page_visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
