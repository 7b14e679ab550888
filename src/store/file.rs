use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{DurableStore, RecordsByKind, StoreError};
use crate::host::clock::{Clock, SystemClock};
use crate::telemetry::event::TelemetryEvent;
use crate::telemetry::session::{SessionId, SessionRecord};

const SESSIONS_DIR: &str = "sessions";
const SESSION_FILE: &str = "session.json";
const BATCHES_FILE: &str = "batches.jsonl";

/// Directory-backed store.
///
/// Layout: `<root>/sessions/<id>/session.json` holds the session record,
/// replaced via tmp file + rename. `<root>/sessions/<id>/batches.jsonl` gets one
/// line per append, so a batch is either a complete line or a torn tail that
/// readers skip. That is what makes an append all-or-nothing here. A failed
/// append truncates the log back to its previous length, and an append that
/// finds a torn tail starts on a new line.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    // Serializes writers within this process.
    write_lock: Arc<Mutex<()>>,
}

/// Everything persisted for one session, read back for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub session_id: SessionId,
    pub session: SessionRecord,
    pub clicks: Vec<TelemetryEvent>,
    pub tree_nodes: Vec<TelemetryEvent>,
    pub page_visits: Vec<TelemetryEvent>,
    /// Lines in the batch log that could not be parsed (torn writes).
    pub skipped_lines: usize,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(id.as_str())
    }

    /// Session ids with a record on disk, sorted.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        let dir = self.root.join(SESSIONS_DIR);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if fs::try_exists(entry.path().join(SESSION_FILE)).await? {
                ids.push(SessionId::from(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Reads a session back, events sorted by timestamp within each kind.
    pub async fn load_session(&self, id: &SessionId) -> Result<SessionExport, StoreError> {
        let dir = self.session_dir(id);
        let session_path = dir.join(SESSION_FILE);
        if !fs::try_exists(&session_path).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let session: SessionRecord = serde_json::from_str(&fs::read_to_string(&session_path).await?)?;

        let mut all = RecordsByKind::default();
        let mut skipped_lines = 0;
        let batches_path = dir.join(BATCHES_FILE);
        if fs::try_exists(&batches_path).await? {
            let content = fs::read_to_string(&batches_path).await?;
            for (n, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RecordsByKind>(line) {
                    Ok(batch) => all.extend(batch),
                    Err(e) => {
                        warn!("Skipping unreadable batch line {} in session {}: {}", n + 1, id, e);
                        skipped_lines += 1;
                    }
                }
            }
        }

        for events in [&mut all.clicks, &mut all.tree_nodes, &mut all.page_visits] {
            events.sort_by_key(|e| e.timestamp);
        }

        Ok(SessionExport {
            session_id: id.clone(),
            session,
            clicks: all.clicks,
            tree_nodes: all.tree_nodes,
            page_visits: all.page_visits,
            skipped_lines,
        })
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn create_or_update(
        &self,
        session_id: &SessionId,
        record: &SessionRecord,
    ) -> Result<SessionRecord, StoreError> {
        let stored = record.resolved(self.clock.now());
        let json = serde_json::to_vec_pretty(&stored)?;

        let _guard = self.write_lock.lock().await;
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!("{}.tmp", SESSION_FILE));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dir.join(SESSION_FILE)).await?;

        debug!("Session record written: {}", session_id);
        Ok(stored)
    }

    async fn atomic_append(
        &self,
        session_id: &SessionId,
        records: &RecordsByKind,
    ) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(records)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join(BATCHES_FILE))
            .await?;
        let len = file.metadata().await?.len();

        // A torn tail has no newline; start a fresh line so this batch parses.
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!("Batch log for session {} ends mid-line; starting a new line", session_id);
                line.insert(0, b'\n');
            }
        }

        if let Err(e) = write_synced(&mut file, &line).await {
            if let Err(undo) = file.set_len(len).await {
                warn!("Could not roll back partial append for session {}: {}", session_id, undo);
            }
            return Err(e.into());
        }

        debug!("Appended {} records for session {}", records.len(), session_id);
        Ok(())
    }
}

async fn write_synced(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.sync_data().await
}
