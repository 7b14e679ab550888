//! Session telemetry pipeline.
//!
//! # DELIVERY MODEL
//! Producers enqueue; the queue is flushed on size threshold, on the periodic
//! timer, on before-terminate and on visibility-hidden. All four go through one
//! flush path guarded so that at most one batch is in flight.
//!
//! A failed batch is put back at the head of the queue and retried on the next
//! trigger. Nothing here ever returns an error to a producer.
//!
//! # PAGE VISITS
//! Page-visit records skip the queue and are written immediately, one per
//! visit, with no retry.

pub mod batcher;
pub mod config;
pub mod event;
pub mod flush;
pub mod metrics;
pub mod page_visit;
pub mod producer;
pub mod service;
pub mod session;
