use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::{ConveyorError, ConveyorResult};

/// Lifecycle of a task owned by the cooperative scheduler.
///
/// A task moves `Pending -> Running`, then alternates between `Suspended` and `Running` at
/// its own yield points until it reaches `Completed` or `Failed`, which are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Scheduled but never polled.
    Pending,
    /// Currently being polled.
    Running,
    /// Parked at a yield point.
    Suspended,
    /// Finished with a value.
    Completed,
    /// Finished with an error, a panic or a cancellation.
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Boxed future driven by the cooperative scheduler.
///
/// It does not need to be `Send`: every task runs on the scheduler's single thread.
pub type TaskFuture<'a, T> = Pin<Box<dyn Future<Output = ConveyorResult<T>> + 'a>>;

/// A named pending computation handed to the scheduler.
pub struct CooperativeTask<'a, T> {
    name: String,
    future: TaskFuture<'a, T>,
}

impl<'a, T> CooperativeTask<'a, T> {
    pub fn new<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ConveyorResult<T>> + 'a,
    {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, TaskFuture<'a, T>) {
        (self.name, self.future)
    }
}

impl<T> fmt::Debug for CooperativeTask<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Terminal outcome of one task, reported in scheduling order.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) outcome: ConveyorResult<T>,
}

impl<T> TaskResult<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the task in the scheduled list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn outcome(&self) -> &ConveyorResult<T> {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ConveyorError> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> ConveyorResult<T> {
        self.outcome
    }
}
