//! Cooperative single-threaded concurrency: named tasks gathered on one execution context.

pub mod cooperative;
pub mod task;

pub use cooperative::{CooperativeScheduler, GatherReport, suspend_for, yield_now};
pub use task::{CooperativeTask, TaskFuture, TaskResult, TaskState};
