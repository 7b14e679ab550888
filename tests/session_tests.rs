use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use session_telemetry::host::Clock;
use session_telemetry::store::StoreOp;
use session_telemetry::telemetry::event::{ClickPayload, TelemetryEvent};
use session_telemetry::telemetry::session::ServerTime;
use session_telemetry::{
    ManualClock, ManualScheduler, MemoryStore, SessionId, SignalHub, TelemetryConfig, TelemetryService, Visibility,
};

struct Harness {
    service: TelemetryService,
    store: MemoryStore,
    scheduler: ManualScheduler,
    hub: SignalHub,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let store = MemoryStore::with_clock(clock.clone());
    let scheduler = ManualScheduler::new();
    let hub = SignalHub::new();
    let service = TelemetryService::builder(Arc::new(store.clone()))
        .config(TelemetryConfig::default())
        .clock(clock.clone())
        .scheduler(Arc::new(scheduler.clone()))
        .lifecycle(Arc::new(hub.clone()))
        .build()
        .expect("valid config");
    Harness { service, store, scheduler, hub, clock }
}

fn click(text: &str) -> ClickPayload {
    ClickPayload::new("BUTTON", "/character").with_class("continue-button").with_text(text)
}

#[tokio::test]
async fn test_start_writes_open_record() {
    let h = harness();
    let id = h.service.start(Some("p-17".to_string())).await.expect("logging enabled");

    assert!(h.service.is_active());
    assert_eq!(h.service.session_id(), Some(id.clone()));

    let stored = h.store.session(&id).expect("session record written");
    assert_eq!(stored.participant_id.as_deref(), Some("p-17"));
    assert_eq!(stored.start_time, ServerTime::At(h.clock.now()));
    assert!(stored.end_time.is_none(), "New session must be open");

    // The service keeps the acknowledged record, not its own draft
    let local = h.service.session_record().expect("active record");
    assert_eq!(local.start_time, stored.start_time);
}

#[tokio::test]
async fn test_end_drains_then_closes() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");

    h.service.enqueue_click(click("Continue"));
    h.service.enqueue_click(click("Back"));
    h.service.end().await;

    // 1. Ordering at the store: open, drain, close
    let ops = h.store.ops();
    assert_eq!(ops.len(), 3, "Expected open, append, close; got {:?}", ops);
    assert!(matches!(&ops[0], StoreOp::SessionWrite { record, .. } if record.end_time.is_none()));
    assert!(matches!(&ops[1], StoreOp::Append { records, ok: true, .. } if records.clicks.len() == 2));
    assert!(matches!(
        &ops[2],
        StoreOp::SessionWrite { record, .. } if record.end_time == Some(ServerTime::ServerTimestamp)
    ));

    // 2. Session is gone locally and closed remotely
    assert!(!h.service.is_active());
    assert_eq!(h.service.session_id(), None);
    let stored = h.store.session(&id).expect("record");
    assert!(stored.end_time.and_then(|t| t.as_datetime()).is_some(), "End time resolved by store");
}

#[tokio::test]
async fn test_end_without_session_is_noop() {
    let h = harness();
    h.service.end().await;
    assert!(h.store.ops().is_empty());
    assert_eq!(h.service.stats().sessions_ended, 0);
}

#[tokio::test]
async fn test_failed_teardown_flush_discards_and_still_closes() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");

    h.store.fail_appends(true);
    h.service.enqueue_click(click("one"));
    h.service.enqueue_click(click("two"));
    h.service.end().await;

    assert!(!h.service.is_active(), "Session closes even when the final flush fails");
    assert_eq!(h.service.pending_len(), 0, "Leftovers are not carried over");
    assert_eq!(h.service.stats().events_discarded, 2);
    assert!(h.store.session(&id).and_then(|r| r.end_time).is_some(), "End time still written");
    assert!(h.store.committed(&id).is_empty());
}

#[tokio::test]
async fn test_restart_ends_previous_session() {
    let h = harness();
    let alice = h.service.start(Some("alice".to_string())).await.expect("logging enabled");
    for text in ["a", "b", "c"] {
        h.service.enqueue_click(click(text));
    }

    h.clock.advance(Duration::from_secs(2));
    let bob = h.service.start(Some("bob".to_string())).await.expect("logging enabled");

    assert_ne!(alice, bob);
    assert_eq!(h.service.session_id(), Some(bob.clone()));
    assert_eq!(h.store.committed(&alice).clicks.len(), 3, "Alice's events land under alice");
    assert!(h.store.committed(&bob).is_empty());
    assert!(h.store.session(&alice).and_then(|r| r.end_time).is_some(), "Alice's session closed");
    assert!(h.store.session(&bob).is_some_and(|r| r.end_time.is_none()));

    let stats = h.service.stats();
    assert_eq!(stats.sessions_started, 2);
    assert_eq!(stats.sessions_ended, 1);
}

#[tokio::test]
async fn test_start_survives_store_failure() {
    let h = harness();
    h.store.fail_session_writes(true);

    let id = h.service.start(None).await.expect("logging enabled");
    assert!(h.service.is_active(), "Local session stays active");
    assert_eq!(
        h.service.session_record().map(|r| r.start_time),
        Some(ServerTime::ServerTimestamp),
        "Unacknowledged draft is kept"
    );

    h.service.enqueue_click(click("x"));
    h.service.flush().await;
    assert_eq!(h.store.committed(&id).clicks.len(), 1, "Events still flow under the id");
}

#[tokio::test]
async fn test_hidden_visibility_triggers_flush() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");
    h.service.enqueue_click(click("x"));

    h.hub.set_visibility(Visibility::Visible);
    h.service.settle().await;
    assert!(h.store.committed(&id).is_empty(), "Becoming visible is not a trigger");

    h.hub.set_visibility(Visibility::Hidden);
    h.service.settle().await;
    assert_eq!(h.store.committed(&id).clicks.len(), 1);
}

#[tokio::test]
async fn test_before_terminate_triggers_flush() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");
    h.service.enqueue_click(click("x"));
    h.service.enqueue_click(click("y"));

    h.hub.emit_before_terminate();
    assert_eq!(h.service.pending_len(), 0, "Snapshot taken inside the signal handler");

    h.service.settle().await;
    assert_eq!(h.store.committed(&id).clicks.len(), 2);
}

#[tokio::test]
async fn test_no_timers_or_listeners_leak() {
    let h = harness();

    h.service.start(None).await.expect("logging enabled");
    assert_eq!(h.scheduler.active_timers(), 1);
    assert_eq!(h.hub.subscriber_count(), 2);

    h.service.start(None).await.expect("logging enabled");
    assert_eq!(h.scheduler.active_timers(), 1, "Replaced session's timer is cancelled");
    assert_eq!(h.hub.subscriber_count(), 2);

    h.service.end().await;
    assert_eq!(h.scheduler.active_timers(), 0);
    assert_eq!(h.hub.subscriber_count(), 0);

    // Signals after teardown reach nobody
    h.hub.emit_before_terminate();
    h.scheduler.advance(Duration::from_secs(30));
    h.service.settle().await;
    assert_eq!(h.service.stats().flush_attempts, 0);
}

#[tokio::test]
async fn test_shutdown_ends_session() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");
    h.service.enqueue_click(click("x"));

    h.service.shutdown().await;
    assert!(!h.service.is_active());
    assert_eq!(h.store.committed(&id).clicks.len(), 1);
}

#[tokio::test]
async fn test_session_id_format() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let id = SessionId::generate(now);

    let (prefix, suffix) = id.as_str().split_once('-').expect("dash separator");
    assert_eq!(suffix.len(), 6);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(i64::from_str_radix(prefix, 36).ok(), Some(now.timestamp_millis()));

    assert_ne!(SessionId::generate(now), id, "Same instant still yields distinct ids");
}

#[tokio::test]
async fn test_server_time_wire_format() {
    let placeholder = serde_json::to_value(ServerTime::ServerTimestamp).unwrap();
    assert_eq!(placeholder, serde_json::json!("serverTimestamp"));

    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let back: ServerTime = serde_json::from_value(serde_json::to_value(ServerTime::At(at)).unwrap()).unwrap();
    assert_eq!(back, ServerTime::At(at));

    let parsed: ServerTime = serde_json::from_str("\"serverTimestamp\"").unwrap();
    assert_eq!(parsed, ServerTime::ServerTimestamp);
}

#[tokio::test]
async fn test_event_wire_shape() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let event = TelemetryEvent::new(
        at,
        session_telemetry::EventPayload::Click(
            ClickPayload::new("DIV", "/first_puzzle").with_cell(Some("1"), 2, 3, "puzzle-cell"),
        ),
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "click");
    assert_eq!(value["page"], "/first_puzzle");
    assert_eq!(value["cellRow"], "2");
    assert_eq!(value["puzzleNumber"], "1");
    assert!(value.get("text").is_none(), "Absent text is omitted");

    let back: TelemetryEvent = serde_json::from_value(value).unwrap();
    assert_eq!(back, event);
}

#[tokio::test]
async fn test_click_text_truncated() {
    let long = "x".repeat(80);
    let payload = ClickPayload::new("BUTTON", "/").with_text(&long);
    assert_eq!(payload.text.map(|t| t.chars().count()), Some(50));
}

/// Holds every append until the test opens the gate.
struct GatedStore {
    inner: MemoryStore,
    gate: Arc<tokio::sync::Semaphore>,
    entered: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl session_telemetry::DurableStore for GatedStore {
    async fn create_or_update(
        &self,
        session_id: &SessionId,
        record: &session_telemetry::SessionRecord,
    ) -> Result<session_telemetry::SessionRecord, session_telemetry::StoreError> {
        self.inner.create_or_update(session_id, record).await
    }

    async fn atomic_append(
        &self,
        session_id: &SessionId,
        records: &session_telemetry::RecordsByKind,
    ) -> Result<(), session_telemetry::StoreError> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await;
        self.inner.atomic_append(session_id, records).await
    }
}

#[tokio::test]
async fn test_enqueue_during_teardown_is_flushed() {
    let store = MemoryStore::new();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let entered = Arc::new(tokio::sync::Notify::new());
    let service = TelemetryService::builder(Arc::new(GatedStore {
        inner: store.clone(),
        gate: gate.clone(),
        entered: entered.clone(),
    }))
    .scheduler(Arc::new(ManualScheduler::new()))
    .build()
    .expect("valid config");

    let id = service.start(None).await.expect("logging enabled");
    service.enqueue_click(click("a"));

    // 1. Teardown write is held open
    let ending = {
        let service = service.clone();
        tokio::spawn(async move { service.end().await })
    };
    entered.notified().await;

    // 2. Session is still active, so this is accepted
    assert!(service.is_active());
    service.enqueue_click(click("b"));

    // 3. Release the store and let end() finish
    gate.add_permits(16);
    ending.await.expect("end task");

    assert!(!service.is_active());
    assert_eq!(store.committed(&id).clicks.len(), 2, "Event accepted mid-teardown must be written");
    let stats = service.stats();
    assert_eq!(stats.events_discarded, 0, "Nothing lost when every write succeeded");
    assert_eq!(stats.flush_failures, 0);
    assert!(store.session(&id).and_then(|r| r.end_time).is_some());
}

#[tokio::test]
async fn test_disabled_logging_refuses_start() {
    let h = harness();
    h.service.set_enabled(false).await;

    assert!(!h.service.is_enabled());
    assert_eq!(h.service.start(Some("p-1".to_string())).await, None);
    assert!(!h.service.is_active());
    assert!(h.store.ops().is_empty(), "Disabled start never reaches the store");

    h.service.set_enabled(true).await;
    assert!(h.service.start(None).await.is_some());
}

#[tokio::test]
async fn test_disabling_logging_ends_session() {
    let h = harness();
    let id = h.service.start(None).await.expect("logging enabled");
    h.service.enqueue_click(click("x"));

    h.service.set_enabled(false).await;

    assert!(!h.service.is_active(), "Turning logging off closes the session");
    assert_eq!(h.store.committed(&id).clicks.len(), 1, "Pending events drained first");
    assert!(h.store.session(&id).and_then(|r| r.end_time).is_some());
    assert_eq!(h.scheduler.active_timers(), 0);
}
