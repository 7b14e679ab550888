use std::sync::Arc;
use std::time::Duration;

use session_telemetry::telemetry::batcher::BatcherState;
use session_telemetry::telemetry::config::ConfigError;
use session_telemetry::telemetry::event::{ClickPayload, EventPayload, TreeNodeEdit};
use session_telemetry::{ManualScheduler, MemoryStore, SignalHub, TelemetryConfig, TelemetryService};

fn harness(config: TelemetryConfig) -> (TelemetryService, MemoryStore, ManualScheduler) {
    let store = MemoryStore::new();
    let scheduler = ManualScheduler::new();
    let service = TelemetryService::builder(Arc::new(store.clone()))
        .config(config)
        .scheduler(Arc::new(scheduler.clone()))
        .lifecycle(Arc::new(SignalHub::new()))
        .build()
        .expect("valid config");
    (service, store, scheduler)
}

fn click(n: usize) -> ClickPayload {
    ClickPayload::new("BUTTON", "/").with_text(&format!("click-{}", n))
}

fn click_text(payload: &EventPayload) -> Option<String> {
    match payload {
        EventPayload::Click(c) => c.text.clone(),
        _ => None,
    }
}

#[tokio::test]
async fn test_threshold_flush_takes_snapshot_immediately() {
    let (service, store, _scheduler) = harness(TelemetryConfig::default());
    let id = service.start(Some("p1".to_string())).await.expect("logging enabled");

    // 1. Below threshold: nothing written
    for n in 0..9 {
        service.enqueue_click(click(n));
    }
    service.settle().await;
    assert_eq!(service.pending_len(), 9, "Nine events should still be queued");
    assert!(store.append_attempts().is_empty(), "No write below the batch size");

    // 2. The tenth event empties the queue before enqueue returns
    service.enqueue_click(click(9));
    assert_eq!(service.pending_len(), 0, "Snapshot should be taken synchronously");

    // 3. Exactly one append, in enqueue order
    service.settle().await;
    let attempts = store.append_attempts();
    assert_eq!(attempts.len(), 1, "Exactly one write for one full batch");
    let (session, records, ok) = &attempts[0];
    assert_eq!(session, &id);
    assert!(ok);
    let texts: Vec<String> = records.clicks.iter().filter_map(|e| click_text(&e.payload)).collect();
    let expected: Vec<String> = (0..10).map(|n| format!("click-{}", n)).collect();
    assert_eq!(texts, expected, "Batch should preserve enqueue order");
}

#[tokio::test]
async fn test_timer_during_flight_does_not_double_write() {
    let (service, store, scheduler) = harness(TelemetryConfig::default());
    service.start(None).await.expect("logging enabled");

    for n in 0..10 {
        service.enqueue_click(click(n));
    }
    assert_eq!(service.state(), BatcherState::FlushPending);

    // Arrives while the threshold flush is still in flight
    service.enqueue_click(click(10));
    scheduler.advance(Duration::from_millis(5000));

    service.settle().await;
    assert_eq!(store.append_attempts().len(), 1, "Timer tick must not start a second flush");
    assert_eq!(service.pending_len(), 1, "Event enqueued mid-flight waits for the next flush");
    assert_eq!(service.state(), BatcherState::Active);
}

#[tokio::test]
async fn test_timer_flushes_partial_batch() {
    let (service, store, scheduler) = harness(TelemetryConfig::default());
    let id = service.start(None).await.expect("logging enabled");

    for n in 0..3 {
        service.enqueue_click(click(n));
    }

    scheduler.advance(Duration::from_millis(4999));
    service.settle().await;
    assert!(store.append_attempts().is_empty(), "Timer should not fire early");

    scheduler.advance(Duration::from_millis(1));
    service.settle().await;
    assert_eq!(store.committed(&id).clicks.len(), 3, "Timer tick should flush the partial batch");

    // Empty queue: further ticks write nothing
    scheduler.advance(Duration::from_millis(15000));
    service.settle().await;
    assert_eq!(store.append_attempts().len(), 1);
}

#[tokio::test]
async fn test_failed_flush_requeues_same_events() {
    let (service, store, _scheduler) = harness(TelemetryConfig::default());
    let id = service.start(None).await.expect("logging enabled");

    service.enqueue_click(click(0));
    service.enqueue_tree_node_edit(TreeNodeEdit::new("/second_scenario/puzzle", "left-cloud", "a guess"));
    service.enqueue_click(click(1));
    let before = service.pending_events();

    store.fail_appends(true);
    service.flush().await;

    assert_eq!(service.pending_events(), before, "Failed batch should be restored unchanged");
    let stats = service.stats();
    assert_eq!(stats.flush_failures, 1);
    assert_eq!(stats.events_requeued, 3);
    assert_eq!(stats.events_persisted, 0);

    // Store recovers: next trigger delivers everything once
    store.fail_appends(false);
    service.flush().await;
    assert_eq!(service.pending_len(), 0);
    let committed = store.committed(&id);
    assert_eq!(committed.clicks.len(), 2);
    assert_eq!(committed.tree_nodes.len(), 1);
    assert_eq!(service.stats().events_persisted, 3);
}

#[tokio::test]
async fn test_failed_batch_goes_ahead_of_newer_events() {
    let (service, store, _scheduler) = harness(TelemetryConfig::default());
    service.start(None).await.expect("logging enabled");

    store.fail_next_appends(1);
    for n in 0..10 {
        service.enqueue_click(click(n));
    }
    // Enqueued while the failing write is outstanding
    service.enqueue_click(click(10));
    service.enqueue_click(click(11));

    service.settle().await;

    let texts: Vec<String> = service
        .pending_events()
        .iter()
        .filter_map(|e| click_text(&e.payload))
        .collect();
    let expected: Vec<String> = (0..12).map(|n| format!("click-{}", n)).collect();
    assert_eq!(texts, expected, "Restored batch must precede newer events");
}

#[tokio::test]
async fn test_empty_flush_is_noop() {
    let (service, store, _scheduler) = harness(TelemetryConfig::default());
    service.start(None).await.expect("logging enabled");

    service.flush().await;
    service.flush().await;
    service.trigger_flush();
    service.settle().await;

    assert!(store.append_attempts().is_empty(), "Empty queue should never reach the store");
    assert_eq!(service.stats().flush_attempts, 0);
}

#[tokio::test]
async fn test_events_without_session_are_dropped() {
    let (service, store, _scheduler) = harness(TelemetryConfig::default());

    service.enqueue_click(click(0));
    service.enqueue_tree_node_edit(TreeNodeEdit::new("/", "final-deduction", "x"));

    assert_eq!(service.state(), BatcherState::Idle);
    assert_eq!(service.pending_len(), 0);
    assert_eq!(service.stats().events_dropped_inactive, 2);
    assert!(store.ops().is_empty(), "Nothing should reach the store without a session");
}

#[tokio::test]
async fn test_queue_cap_evicts_oldest() {
    let config = TelemetryConfig::default().with_max_queue_len(5);
    let (service, _store, _scheduler) = harness(config);
    service.start(None).await.expect("logging enabled");

    for n in 0..7 {
        service.enqueue_click(click(n));
    }

    let texts: Vec<String> = service
        .pending_events()
        .iter()
        .filter_map(|e| click_text(&e.payload))
        .collect();
    let expected: Vec<String> = (2..7).map(|n| format!("click-{}", n)).collect();
    assert_eq!(texts, expected, "Oldest events should be evicted first");
    assert_eq!(service.stats().events_discarded, 2);
}

#[tokio::test]
async fn test_custom_batch_size() {
    let config = TelemetryConfig::default().with_batch_size(3);
    let (service, store, _scheduler) = harness(config);
    let id = service.start(None).await.expect("logging enabled");

    for n in 0..7 {
        service.enqueue_click(click(n));
        service.settle().await;
    }

    assert_eq!(store.append_attempts().len(), 2, "Two full batches of three");
    assert_eq!(store.committed(&id).clicks.len(), 6);
    assert_eq!(service.pending_len(), 1);
}

#[tokio::test]
async fn test_builder_rejects_zero_batch_size() {
    let result = TelemetryService::builder(Arc::new(MemoryStore::new()))
        .config(TelemetryConfig::default().with_batch_size(0))
        .build();
    assert!(matches!(result, Err(ConfigError::Zero("batch_size"))));
}

#[tokio::test]
async fn test_write_timeout_counts_as_failure() {
    use async_trait::async_trait;
    use session_telemetry::store::{DurableStore, RecordsByKind, StoreError};
    use session_telemetry::{SessionId, SessionRecord};

    struct StallingStore;

    #[async_trait]
    impl DurableStore for StallingStore {
        async fn create_or_update(
            &self,
            _id: &SessionId,
            record: &SessionRecord,
        ) -> Result<SessionRecord, StoreError> {
            Ok(record.clone())
        }

        async fn atomic_append(&self, _id: &SessionId, _records: &RecordsByKind) -> Result<(), StoreError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    let service = TelemetryService::builder(Arc::new(StallingStore))
        .config(TelemetryConfig::default().with_write_timeout(Duration::from_millis(20)))
        .scheduler(Arc::new(ManualScheduler::new()))
        .build()
        .expect("valid config");
    service.start(None).await.expect("logging enabled");

    service.enqueue_click(click(0));
    service.flush().await;

    assert_eq!(service.pending_len(), 1, "Timed-out batch should be requeued");
    assert_eq!(service.stats().flush_failures, 1);
}
