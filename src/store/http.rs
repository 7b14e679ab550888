use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{DurableStore, RecordsByKind, StoreError};
use crate::telemetry::session::{SessionId, SessionRecord};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a remote document store.
///
/// Wire contract:
/// - `PUT  {base}/sessions/{id}` with the session record as JSON; the response
///   body is the stored record with server timestamps filled in.
/// - `POST {base}/sessions/{id}/batches` with `{clicks, treeBuilding,
///   pageVisits}`; the server commits the whole body in one transaction.
///
/// Any non-2xx status is a failed write.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Fails if the TLS backend cannot be initialised.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn session_url(&self, id: &SessionId) -> String {
        format!("{}/sessions/{}", self.base_url, id)
    }

    pub fn batches_url(&self, id: &SessionId) -> String {
        format!("{}/batches", self.session_url(id))
    }
}

#[async_trait]
impl DurableStore for HttpStore {
    async fn create_or_update(
        &self,
        session_id: &SessionId,
        record: &SessionRecord,
    ) -> Result<SessionRecord, StoreError> {
        let response = self
            .client
            .put(self.session_url(session_id))
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Rejected {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json::<SessionRecord>().await?)
    }

    async fn atomic_append(
        &self,
        session_id: &SessionId,
        records: &RecordsByKind,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.batches_url(session_id))
            .json(records)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
