//! Threaded roles: the fan-out worker pool and the pipeline producer and consumers.

pub mod base;
pub mod consumer;
pub mod pool;
pub mod producer;

pub use base::{WorkItem, WorkResult, WorkerType};
pub use pool::WorkerPool;
