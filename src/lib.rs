pub mod host;
pub mod report;
pub mod store;
pub mod telemetry;

// Re-export the pieces most callers need
pub use host::{HostLifecycle, ManualClock, ManualScheduler, SignalHub, TokioScheduler, Visibility};
pub use store::{DurableStore, FileStore, HttpStore, MemoryStore, RecordsByKind, StoreError};
pub use telemetry::config::TelemetryConfig;
pub use telemetry::event::{ClickPayload, EventKind, EventPayload, PageVisit, TelemetryEvent, TreeNodeEdit};
pub use telemetry::page_visit::PageVisitTracker;
pub use telemetry::service::{FlushReason, TelemetryService};
pub use telemetry::session::{SessionId, SessionRecord};
