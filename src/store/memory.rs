use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{DurableStore, RecordsByKind, StoreError};
use crate::host::clock::{Clock, SystemClock};
use crate::telemetry::session::{SessionId, SessionRecord};

/// Every call that reached the store, successful or not, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    SessionWrite {
        session_id: SessionId,
        record: SessionRecord,
        ok: bool,
    },
    Append {
        session_id: SessionId,
        records: RecordsByKind,
        ok: bool,
    },
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<SessionId, SessionRecord>,
    committed: HashMap<SessionId, RecordsByKind>,
    ops: Vec<StoreOp>,
    fail_appends: bool,
    fail_next_appends: usize,
    fail_session_writes: bool,
}

/// In-memory store with failure injection. Appends are all-or-nothing.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            clock,
        }
    }

    /// Every append fails until switched back off.
    pub fn fail_appends(&self, failing: bool) {
        self.lock().fail_appends = failing;
    }

    /// The next `n` appends fail, then the store recovers.
    pub fn fail_next_appends(&self, n: usize) {
        self.lock().fail_next_appends = n;
    }

    pub fn fail_session_writes(&self, failing: bool) {
        self.lock().fail_session_writes = failing;
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    /// Append attempts (including failed ones) in arrival order.
    pub fn append_attempts(&self) -> Vec<(SessionId, RecordsByKind, bool)> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                StoreOp::Append { session_id, records, ok } => {
                    Some((session_id.clone(), records.clone(), *ok))
                }
                _ => None,
            })
            .collect()
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionRecord> {
        self.lock().sessions.get(id).cloned()
    }

    pub fn committed(&self, id: &SessionId) -> RecordsByKind {
        self.lock().committed.get(id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn create_or_update(
        &self,
        session_id: &SessionId,
        record: &SessionRecord,
    ) -> Result<SessionRecord, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let ok = !inner.fail_session_writes;
        inner.ops.push(StoreOp::SessionWrite {
            session_id: session_id.clone(),
            record: record.clone(),
            ok,
        });

        if !ok {
            return Err(StoreError::Unavailable("session write rejected".to_string()));
        }

        let stored = record.resolved(now);
        inner.sessions.insert(session_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn atomic_append(
        &self,
        session_id: &SessionId,
        records: &RecordsByKind,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let ok = if inner.fail_appends {
            false
        } else if inner.fail_next_appends > 0 {
            inner.fail_next_appends -= 1;
            false
        } else {
            true
        };

        inner.ops.push(StoreOp::Append {
            session_id: session_id.clone(),
            records: records.clone(),
            ok,
        });

        if !ok {
            return Err(StoreError::Unavailable("append rejected".to_string()));
        }

        inner
            .committed
            .entry(session_id.clone())
            .or_default()
            .extend(records.clone());
        Ok(())
    }
}
