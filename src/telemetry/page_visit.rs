use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::event::PageVisit;
use super::service::TelemetryService;
use crate::host::clock::{elapsed_ms, Clock};

#[derive(Debug, Clone)]
struct OpenVisit {
    page: String,
    entered_at: DateTime<Utc>,
}

/// Measures dwell time per view.
///
/// Visits are written straight to the store when the view is left, not
/// through the batching queue, so a failed write is not retried. The record's
/// timestamp is the service clock at the moment of leaving; the store does not
/// assign its own time to visits.
pub struct PageVisitTracker {
    service: TelemetryService,
    clock: Arc<dyn Clock>,
    current: Option<OpenVisit>,
}

impl PageVisitTracker {
    pub fn new(service: TelemetryService) -> Self {
        let clock = service.clock();
        Self {
            service,
            clock,
            current: None,
        }
    }

    /// Enters `page`, closing out the previous view first. Re-entering the
    /// page already open keeps the original entry time.
    pub async fn enter(&mut self, page: impl Into<String>) {
        let page = page.into();
        if self.current.as_ref().is_some_and(|v| v.page == page) {
            return;
        }
        self.leave().await;

        debug!("Entered page {}", page);
        self.current = Some(OpenVisit {
            page,
            entered_at: self.clock.now(),
        });
    }

    /// Leaves the current view and emits its visit record.
    pub async fn leave(&mut self) -> Option<PageVisit> {
        let open = self.current.take()?;
        let visit = PageVisit {
            duration_ms: elapsed_ms(open.entered_at, self.clock.now()),
            page: open.page,
        };
        self.service.record_page_visit(visit.clone()).await;
        Some(visit)
    }

    pub fn current_page(&self) -> Option<&str> {
        self.current.as_ref().map(|v| v.page.as_str())
    }
}
