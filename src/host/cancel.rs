use std::fmt;

/// A registration that can be torn down exactly once.
///
/// Returned by timers and signal subscriptions. Cancelling is idempotent, and
/// dropping the handle cancels it, so a session can never leak a timer or a
/// listener past its own lifetime.
pub struct CancelHandle {
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

pub type TimerHandle = CancelHandle;
pub type Subscription = CancelHandle;

impl CancelHandle {
    pub fn new(on_cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Handle with nothing behind it (registration failed or was never made).
    pub fn noop() -> Self {
        Self { on_cancel: None }
    }

    pub fn cancel(mut self) {
        self.fire();
    }

    pub fn is_noop(&self) -> bool {
        self.on_cancel.is_none()
    }

    fn fire(&mut self) {
        if let Some(f) = self.on_cancel.take() {
            f();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.on_cancel.is_some())
            .finish()
    }
}
