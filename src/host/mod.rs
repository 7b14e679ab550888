//! Host capabilities the pipeline consumes: wall clock, repeating timers and
//! lifecycle signals. All of them are traits so the core never depends on a
//! particular runtime environment.

pub mod cancel;
pub mod clock;
pub mod lifecycle;
pub mod scheduler;

pub use cancel::{CancelHandle, Subscription, TimerHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::{HostLifecycle, SignalCallback, SignalHub, Visibility};
pub use scheduler::{ManualScheduler, Scheduler, TimerCallback, TokioScheduler};
