use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// No session; nothing is accepted.
    Idle,
    /// Session open, accepting events, timer running.
    Active,
    /// A snapshot has been taken and its write is in flight.
    FlushPending,
}

/// Immutable snapshot of the queue handed to one flush attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushBatch {
    session_id: SessionId,
    events: Vec<TelemetryEvent>,
}

impl FlushBatch {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Queue reached the batch size; caller should start a flush.
    pub should_flush: bool,
    /// Oldest events dropped to stay under the queue cap.
    pub evicted: usize,
}

/// Ordered buffer of events awaiting a durable write, plus the re-entrancy
/// flag that keeps at most one snapshot in flight.
///
/// Purely synchronous: the service holds it behind a lock that is never kept
/// across an await, so snapshot-and-clear is atomic with respect to enqueue.
#[derive(Debug)]
pub struct EventBatcher {
    queue: VecDeque<TelemetryEvent>,
    batch_size: usize,
    max_len: Option<usize>,
    in_flight: bool,
}

impl EventBatcher {
    pub fn new(batch_size: usize, max_len: Option<usize>) -> Self {
        Self {
            queue: VecDeque::with_capacity(batch_size.max(1)),
            batch_size: batch_size.max(1),
            max_len,
            in_flight: false,
        }
    }

    pub fn push(&mut self, event: TelemetryEvent) -> Enqueued {
        self.queue.push_back(event);
        let evicted = self.enforce_cap();
        Enqueued {
            should_flush: self.queue.len() >= self.batch_size,
            evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.queue.iter()
    }

    /// Takes the whole queue as a batch, unless it is empty or another batch is
    /// already in flight. The queue is left empty for new events.
    pub fn begin_flush(&mut self, session_id: &SessionId) -> Option<FlushBatch> {
        if self.in_flight || self.queue.is_empty() {
            return None;
        }
        self.in_flight = true;
        let events: Vec<TelemetryEvent> = std::mem::take(&mut self.queue).into();
        Some(FlushBatch {
            session_id: session_id.clone(),
            events,
        })
    }

    pub fn finish_flush(&mut self) {
        self.in_flight = false;
    }

    /// Puts a failed batch back ahead of anything enqueued since it was taken.
    /// Returns how many events the queue cap evicted as a result.
    pub fn requeue(&mut self, batch: FlushBatch) -> usize {
        let mut restored: VecDeque<TelemetryEvent> = batch.events.into();
        restored.append(&mut self.queue);
        self.queue = restored;
        self.enforce_cap()
    }

    pub fn discard_all(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }

    fn enforce_cap(&mut self) -> usize {
        let Some(max) = self.max_len else {
            return 0;
        };
        let mut evicted = 0;
        while self.queue.len() > max {
            self.queue.pop_front();
            evicted += 1;
        }
        evicted
    }
}
