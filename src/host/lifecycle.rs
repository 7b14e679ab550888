use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cancel::Subscription;

pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Host-level signals that the process may be about to disappear.
pub trait HostLifecycle: Send + Sync {
    /// Host is about to suspend or terminate.
    fn on_before_terminate(&self, callback: SignalCallback) -> Subscription;

    /// Host visibility changed to hidden (backgrounded tab, minimised window).
    fn on_hidden_visibility(&self, callback: SignalCallback) -> Subscription;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    BeforeTerminate,
    Hidden,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: BTreeMap<u64, (Signal, SignalCallback)>,
}

/// In-process lifecycle source. Whoever owns the host (a driver loop, a UI
/// shell, a test) calls the `emit_*` methods; subscribers are invoked
/// synchronously in registration order.
#[derive(Clone, Default)]
pub struct SignalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_before_terminate(&self) {
        self.emit(Signal::BeforeTerminate);
    }

    /// Only a change *to* hidden notifies anyone.
    pub fn set_visibility(&self, visibility: Visibility) {
        if visibility == Visibility::Hidden {
            self.emit(Signal::Hidden);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Forwards Ctrl-C to before-terminate subscribers until the task is aborted.
    pub fn bridge_ctrl_c(&self) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl-C received; signalling before-terminate");
                        hub.emit_before_terminate();
                    }
                    Err(e) => {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                        break;
                    }
                }
            }
        })
    }

    fn subscribe(&self, signal: Signal, callback: SignalCallback) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, (signal, callback));
            id
        };
        debug!("Lifecycle listener {} registered for {:?}", id, signal);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().unwrap_or_else(|e| e.into_inner()).listeners.remove(&id);
            }
        })
    }

    fn emit(&self, signal: Signal) {
        // Snapshot first: a callback may unsubscribe (or subscribe) re-entrantly.
        let targets: Vec<SignalCallback> = self
            .lock()
            .listeners
            .values()
            .filter(|(s, _)| *s == signal)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in targets {
            callback();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HostLifecycle for SignalHub {
    fn on_before_terminate(&self, callback: SignalCallback) -> Subscription {
        self.subscribe(Signal::BeforeTerminate, callback)
    }

    fn on_hidden_visibility(&self, callback: SignalCallback) -> Subscription {
        self.subscribe(Signal::Hidden, callback)
    }
}
