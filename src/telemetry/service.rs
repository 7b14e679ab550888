use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::batcher::{BatcherState, EventBatcher, FlushBatch};
use super::config::{ConfigError, TelemetryConfig};
use super::event::{EventPayload, PageVisit, TelemetryEvent};
use super::flush::FlushExecutor;
use super::metrics::{PipelineCounters, PipelineStats};
use super::session::{HostMetadata, SessionId, SessionRecord};
use crate::host::cancel::{Subscription, TimerHandle};
use crate::host::clock::{Clock, SystemClock};
use crate::host::lifecycle::{HostLifecycle, SignalHub};
use crate::host::scheduler::{Scheduler, TokioScheduler};
use crate::store::{DurableStore, RecordsByKind};

/// What asked for a flush. All of them go through the same code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Threshold,
    Timer,
    BeforeTerminate,
    Hidden,
    Manual,
    Teardown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlushReason::Threshold => "threshold",
            FlushReason::Timer => "timer",
            FlushReason::BeforeTerminate => "before-terminate",
            FlushReason::Hidden => "visibility-hidden",
            FlushReason::Manual => "manual",
            FlushReason::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Session telemetry service: session manager, event batcher and flush
/// triggers behind one cheaply clonable handle.
///
/// Never surfaces an error to its callers. Store failures are logged and
/// either retried (batched events) or accepted as loss (teardown, page visits).
#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<Inner>,
}

struct Inner {
    config: TelemetryConfig,
    executor: FlushExecutor,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    lifecycle: Arc<dyn HostLifecycle>,
    host: HostMetadata,
    enabled: AtomicBool,
    state: Mutex<ServiceState>,
    flush_idle: Notify,
    tracker: TaskTracker,
    counters: PipelineCounters,
}

struct ServiceState {
    session: Option<ActiveSession>,
    batcher: EventBatcher,
}

struct ActiveSession {
    id: SessionId,
    record: SessionRecord,
    timer: TimerHandle,
    triggers: Vec<Subscription>,
}

enum DrainStep {
    /// Another flush is writing; wait for it.
    Busy,
    Write(FlushBatch),
    /// Session taken; carries the count of events that could not be delivered.
    Closed(ActiveSession, usize),
    Gone,
}

pub struct TelemetryServiceBuilder {
    store: Arc<dyn DurableStore>,
    config: TelemetryConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    lifecycle: Arc<dyn HostLifecycle>,
    host: HostMetadata,
}

impl TelemetryServiceBuilder {
    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn HostLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn host_metadata(mut self, host: HostMetadata) -> Self {
        self.host = host;
        self
    }

    pub fn build(self) -> Result<TelemetryService, ConfigError> {
        self.config.validate()?;
        Ok(self.into_service())
    }

    fn into_service(self) -> TelemetryService {
        let batcher = EventBatcher::new(self.config.batch_size, self.config.max_queue_len);
        TelemetryService {
            inner: Arc::new(Inner {
                executor: FlushExecutor::new(self.store, self.config.write_timeout),
                config: self.config,
                clock: self.clock,
                scheduler: self.scheduler,
                lifecycle: self.lifecycle,
                host: self.host,
                enabled: AtomicBool::new(true),
                state: Mutex::new(ServiceState { session: None, batcher }),
                flush_idle: Notify::new(),
                tracker: TaskTracker::new(),
                counters: PipelineCounters::default(),
            }),
        }
    }
}

impl TelemetryService {
    /// Service with default config, system clock, tokio timers and a private
    /// signal hub nobody emits on.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::builder(store).into_service()
    }

    pub fn builder(store: Arc<dyn DurableStore>) -> TelemetryServiceBuilder {
        TelemetryServiceBuilder {
            store,
            config: TelemetryConfig::default(),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            lifecycle: Arc::new(SignalHub::new()),
            host: HostMetadata::detect(),
        }
    }

    // === Session Manager ===

    /// Opens a new session and returns its id. An already active session is
    /// ended first (flushed and closed), never silently kept. Returns `None`
    /// without touching the store while logging is disabled.
    pub async fn start(&self, participant_id: Option<String>) -> Option<SessionId> {
        if !self.is_enabled() {
            info!("Logging is disabled. Session not started.");
            return None;
        }
        if self.is_active() {
            warn!("Session already active. Ending previous session.");
            self.end().await;
        }

        let inner = &self.inner;
        let id = SessionId::generate(inner.clock.now());
        let draft = SessionRecord::open(participant_id, inner.host.clone());

        let record = match inner.executor.store().create_or_update(&id, &draft).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to persist start of session {}: {}", id, e);
                draft
            }
        };

        let weak = Arc::downgrade(inner);
        let timer = inner
            .scheduler
            .schedule_repeating(inner.config.flush_interval, Inner::trigger_callback(&weak, FlushReason::Timer));
        let triggers = vec![
            inner
                .lifecycle
                .on_before_terminate(Inner::trigger_callback(&weak, FlushReason::BeforeTerminate)),
            inner
                .lifecycle
                .on_hidden_visibility(Inner::trigger_callback(&weak, FlushReason::Hidden)),
        ];

        let displaced = inner.lock_state().session.replace(ActiveSession {
            id: id.clone(),
            record,
            timer,
            triggers,
        });
        if let Some(old) = displaced {
            // Only reachable when two starts race; the loser's timer and
            // listeners are released as `old` drops here.
            warn!("Session {} replaced by {} without teardown", old.id, id);
        }

        inner.counters.sessions_started(1);
        info!("Logging session started: {}", id);
        Some(id)
    }

    /// Drains pending events, stamps the end time and releases the timer and
    /// lifecycle listeners.
    ///
    /// Events enqueued while a teardown write is outstanding are drained too:
    /// the session is only taken once the queue is empty and nothing is in
    /// flight. If a teardown write fails the session still closes and the
    /// undelivered events are dropped.
    pub async fn end(&self) {
        if !self.is_active() {
            warn!("No active session to end.");
            return;
        }

        let inner = &self.inner;
        let mut write_failed = false;
        let (session, leftover) = loop {
            match inner.drain_step(write_failed) {
                DrainStep::Busy => inner.wait_for_flush_idle().await,
                DrainStep::Write(batch) => {
                    if !inner.run_flush(batch).await {
                        write_failed = true;
                    }
                }
                DrainStep::Closed(session, leftover) => break (session, leftover),
                // A concurrent end() got here first.
                DrainStep::Gone => return,
            }
        };

        if leftover > 0 {
            error!(
                "Final flush for session {} failed; discarding {} undelivered events",
                session.id, leftover
            );
            inner.counters.events_discarded(leftover as u64);
        }

        let ActiveSession { id, record, timer, triggers } = session;
        if let Err(e) = inner.executor.store().create_or_update(&id, &record.closed()).await {
            error!("Failed to persist end of session {}: {}", id, e);
        }

        timer.cancel();
        drop(triggers);

        inner.counters.sessions_ended(1);
        info!("Logging session ended: {}", id);
    }

    /// Turns logging on or off. Turning it off ends the active session.
    pub async fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!("Logging {}", if enabled { "enabled" } else { "disabled" });
        }
        if !enabled && self.is_active() {
            self.end().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock_state().session.as_ref().map(|s| s.id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Session record as last acknowledged by the store.
    pub fn session_record(&self) -> Option<SessionRecord> {
        self.inner.lock_state().session.as_ref().map(|s| s.record.clone())
    }

    // === Event Batcher ===

    /// Queues an event for the active session. Never blocks: when the batch
    /// size is reached the snapshot is taken here and the write runs in the
    /// background.
    pub fn enqueue(&self, event: TelemetryEvent) {
        let kind = event.kind();
        let outcome = {
            let mut state = self.inner.lock_state();
            if state.session.is_none() {
                None
            } else {
                Some(state.batcher.push(event))
            }
        };

        let Some(outcome) = outcome else {
            warn!("No active session. {} event not logged.", kind);
            self.inner.counters.events_dropped_inactive(1);
            return;
        };

        self.inner.counters.events_enqueued(1);
        if outcome.evicted > 0 {
            warn!("Queue cap reached; evicted {} oldest events", outcome.evicted);
            self.inner.counters.events_discarded(outcome.evicted as u64);
        }
        if outcome.should_flush {
            self.inner.trigger_flush(FlushReason::Threshold);
        }
    }

    /// Flushes pending events and waits for the write. No-op when nothing is
    /// pending or another flush is already in flight.
    pub async fn flush(&self) {
        self.inner.flush_now(FlushReason::Manual).await;
    }

    /// Fire-and-forget flush: the snapshot is taken immediately, the write is
    /// spawned on the current runtime.
    pub fn trigger_flush(&self) {
        self.inner.trigger_flush(FlushReason::Manual);
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().batcher.len()
    }

    pub fn pending_events(&self) -> Vec<TelemetryEvent> {
        self.inner.lock_state().batcher.pending().cloned().collect()
    }

    pub fn state(&self) -> BatcherState {
        let state = self.inner.lock_state();
        if state.session.is_none() {
            BatcherState::Idle
        } else if state.batcher.in_flight() {
            BatcherState::FlushPending
        } else {
            BatcherState::Active
        }
    }

    // === Page visits ===

    /// Writes a page visit straight to the store, bypassing the queue. No
    /// requeue on failure. Returns whether the record was persisted.
    ///
    /// The event is stamped with this service's clock, not a store time.
    pub async fn record_page_visit(&self, visit: PageVisit) -> bool {
        let Some(session_id) = self.session_id() else {
            warn!("No active session. Page visit not logged.");
            self.inner.counters.events_dropped_inactive(1);
            return false;
        };

        let mut records = RecordsByKind::default();
        records.push(self.stamp(EventPayload::PageVisit(visit)));

        match self.inner.executor.append(&session_id, &records).await {
            Ok(()) => {
                self.inner.counters.page_visits_written(1);
                true
            }
            Err(e) => {
                error!("Failed to write page visit for session {}: {}", session_id, e);
                self.inner.counters.page_visit_failures(1);
                false
            }
        }
    }

    // === Misc ===

    pub(crate) fn stamp(&self, payload: EventPayload) -> TelemetryEvent {
        TelemetryEvent::new(self.inner.clock.now(), payload)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.counters.snapshot()
    }

    /// Waits until every background flush spawned so far has finished.
    pub async fn settle(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
        self.inner.wait_for_flush_idle().await;
    }

    /// Ends the active session (if any) and waits for background writes.
    pub async fn shutdown(&self) {
        if self.is_active() {
            self.end().await;
        }
        self.settle().await;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn trigger_callback(weak: &Weak<Inner>, reason: FlushReason) -> Arc<dyn Fn() + Send + Sync> {
        let weak = weak.clone();
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.trigger_flush(reason);
            }
        })
    }

    /// Synchronous snapshot-and-clear. `None` when there is no session, the
    /// queue is empty, or a flush is already in flight.
    fn begin_flush(&self, reason: FlushReason) -> Option<FlushBatch> {
        let mut state = self.lock_state();
        let session_id = state.session.as_ref()?.id.clone();
        let batch = state.batcher.begin_flush(&session_id)?;
        debug!("Flush ({}) took {} events for {}", reason, batch.len(), session_id);
        Some(batch)
    }

    fn trigger_flush(self: &Arc<Self>, reason: FlushReason) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; {} flush skipped", reason);
            return;
        };
        if let Some(batch) = self.begin_flush(reason) {
            let inner = Arc::clone(self);
            self.tracker.spawn_on(
                async move {
                    inner.run_flush(batch).await;
                },
                &handle,
            );
        }
    }

    /// One step of the teardown drain, decided under a single lock so no event
    /// can slip in between the last snapshot and taking the session.
    fn drain_step(&self, give_up: bool) -> DrainStep {
        let mut state = self.lock_state();
        if state.batcher.in_flight() {
            return DrainStep::Busy;
        }
        let Some(id) = state.session.as_ref().map(|s| s.id.clone()) else {
            return DrainStep::Gone;
        };
        if !give_up {
            if let Some(batch) = state.batcher.begin_flush(&id) {
                debug!("Flush ({}) took {} events for {}", FlushReason::Teardown, batch.len(), id);
                return DrainStep::Write(batch);
            }
        }
        let leftover = state.batcher.discard_all();
        match state.session.take() {
            Some(session) => DrainStep::Closed(session, leftover),
            None => DrainStep::Gone,
        }
    }

    async fn flush_now(&self, reason: FlushReason) {
        if let Some(batch) = self.begin_flush(reason) {
            self.run_flush(batch).await;
        }
    }

    async fn run_flush(&self, batch: FlushBatch) -> bool {
        let mut in_flight = InFlight { inner: self, batch: Some(batch) };
        self.counters.flush_attempts(1);

        let result = match in_flight.batch.as_ref() {
            Some(batch) => self.executor.write(batch).await,
            None => return false,
        };

        match result {
            Ok(written) => {
                self.counters.events_persisted(written as u64);
                in_flight.complete();
                true
            }
            Err(e) => {
                warn!("Error flushing log queue: {}", e);
                self.counters.flush_failures(1);
                in_flight.restore();
                false
            }
        }
    }

    /// Requeues a failed batch if its session is still the active one;
    /// otherwise the events have nowhere to go and are dropped.
    fn restore_batch(&self, batch: FlushBatch) {
        let count = batch.len() as u64;
        let batch_session = batch.session_id().clone();

        let outcome = {
            let mut state = self.lock_state();
            let owned = state.session.as_ref().is_some_and(|s| s.id == batch_session);
            let outcome = if owned {
                Some(state.batcher.requeue(batch))
            } else {
                None
            };
            state.batcher.finish_flush();
            outcome
        };
        self.flush_idle.notify_waiters();

        match outcome {
            Some(evicted) => {
                self.counters.events_requeued(count);
                debug!("Requeued {} events for {}", count, batch_session);
                if evicted > 0 {
                    warn!("Queue cap reached; evicted {} oldest events", evicted);
                    self.counters.events_discarded(evicted as u64);
                }
            }
            None => {
                error!(
                    "Session {} closed before its batch could be retried; dropping {} events",
                    batch_session, count
                );
                self.counters.events_discarded(count);
            }
        }
    }

    fn finish_flush(&self) {
        self.lock_state().batcher.finish_flush();
        self.flush_idle.notify_waiters();
    }

    async fn wait_for_flush_idle(&self) {
        loop {
            let idle = self.flush_idle.notified();
            if !self.lock_state().batcher.in_flight() {
                return;
            }
            idle.await;
        }
    }
}

/// Owns a batch while its write is outstanding. If the flush future is
/// dropped mid-write the batch goes back on the queue.
struct InFlight<'a> {
    inner: &'a Inner,
    batch: Option<FlushBatch>,
}

impl InFlight<'_> {
    fn complete(&mut self) {
        if self.batch.take().is_some() {
            self.inner.finish_flush();
        }
    }

    fn restore(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.inner.restore_batch(batch);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.batch.is_some() {
            warn!("Flush cancelled mid-write; returning batch to the queue");
            self.restore();
        }
    }
}
