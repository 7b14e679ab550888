use thiserror::Error;

/// Failures at the durable-store boundary. None of these ever reach an event
/// producer; the service logs them and decides between requeue and discard.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected write with status {status}")]
    Rejected { status: u16 },

    #[error("store write timed out after {0} ms")]
    Timeout(u64),

    #[error("session {0} not found")]
    NotFound(String),
}
