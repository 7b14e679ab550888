use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancel::TimerHandle;

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Repeating-timer capability. Injected so the flush cadence can run on real
/// time in production and on virtual time in tests.
pub trait Scheduler: Send + Sync {
    /// Runs `callback` every `period` until the returned handle is cancelled or
    /// dropped. The first run happens one full `period` after scheduling.
    fn schedule_repeating(&self, period: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Timers backed by the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration, callback: TimerCallback) -> TimerHandle {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available; periodic timer not started");
            return TimerHandle::noop();
        };

        let token = CancellationToken::new();
        let child = token.clone();

        handle.spawn(async move {
            let mut cadence = interval_at(Instant::now() + period, period);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = cadence.tick() => callback(),
                }
            }
            debug!("Periodic timer stopped");
        });

        TimerHandle::new(move || token.cancel())
    }
}

struct ManualTask {
    period: Duration,
    next_due: Duration,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualInner {
    now: Duration,
    next_id: u64,
    tasks: BTreeMap<u64, ManualTask>,
}

/// Virtual-time scheduler. Nothing fires until [`ManualScheduler::advance`].
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves virtual time forward, firing every timer that comes due, in due
    /// order. Callbacks run outside the scheduler lock.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now + by;

        loop {
            let due = {
                let mut inner = self.lock();
                let next = inner
                    .tasks
                    .iter()
                    .filter(|(_, t)| t.next_due <= target)
                    .min_by_key(|(id, t)| (t.next_due, **id))
                    .map(|(id, _)| *id);

                let fired = next.and_then(|id| inner.tasks.get_mut(&id)).map(|task| {
                    let fired_at = task.next_due;
                    task.next_due += task.period;
                    (fired_at, Arc::clone(&task.callback))
                });

                match fired {
                    Some((fired_at, callback)) => {
                        inner.now = fired_at;
                        Some(callback)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };

            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    pub fn active_timers(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, period: Duration, callback: TimerCallback) -> TimerHandle {
        // A zero period would spin advance() forever.
        let period = period.max(Duration::from_millis(1));
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let next_due = inner.now + period;
            inner.tasks.insert(id, ManualTask { period, next_due, callback });
            id
        };

        let weak = Arc::downgrade(&self.inner);
        TimerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().unwrap_or_else(|e| e.into_inner()).tasks.remove(&id);
            }
        })
    }
}
