use std::fmt;

use crate::error::{ConveyorError, ConveyorResult};

/// Classification of the threads spawned by conveyor components.
///
/// Used for thread names and tracing spans.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// The single pipeline producer.
    Producer,
    /// A pipeline consumer.
    Consumer {
        /// Zero-based consumer index.
        index: usize,
    },
    /// A fan-out pool worker.
    Pool {
        /// Zero-based worker index.
        index: usize,
    },
}

impl WorkerType {
    /// Returns the thread name for this worker.
    pub fn thread_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::Producer => write!(f, "producer"),
            WorkerType::Consumer { index } => write!(f, "consumer-{index}"),
            WorkerType::Pool { index } => write!(f, "pool-worker-{index}"),
        }
    }
}

/// A unit of fan-out work: the caller's request descriptor and its submission index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<D> {
    index: usize,
    descriptor: D,
}

impl<D> WorkItem<D> {
    pub(crate) fn new(index: usize, descriptor: D) -> Self {
        Self { index, descriptor }
    }

    /// Position of the item in the submitted list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub(crate) fn into_result<T>(self, outcome: ConveyorResult<T>) -> WorkResult<D, T> {
        WorkResult {
            index: self.index,
            descriptor: self.descriptor,
            outcome,
        }
    }
}

/// The single result produced for a [`WorkItem`].
///
/// A failed outcome is data, not an error of the pool: it belongs to this item only.
#[derive(Debug)]
pub struct WorkResult<D, T> {
    index: usize,
    descriptor: D,
    outcome: ConveyorResult<T>,
}

impl<D, T> WorkResult<D, T> {
    /// Position of the originating item in the submitted list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn outcome(&self) -> &ConveyorResult<T> {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the payload of a successful result.
    pub fn payload(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// Returns the cause of a failed result.
    pub fn error(&self) -> Option<&ConveyorError> {
        self.outcome.as_ref().err()
    }

    pub fn into_parts(self) -> (D, ConveyorResult<T>) {
        (self.descriptor, self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn worker_type_names_threads() {
        assert_eq!(WorkerType::Producer.thread_name(), "producer");
        assert_eq!(WorkerType::Consumer { index: 1 }.thread_name(), "consumer-1");
        assert_eq!(WorkerType::Pool { index: 4 }.thread_name(), "pool-worker-4");
    }

    #[test]
    fn result_keeps_index_and_descriptor() {
        let ok = WorkItem::new(3, "a").into_result(Ok(10));
        assert_eq!(ok.index(), 3);
        assert_eq!(*ok.descriptor(), "a");
        assert_eq!(ok.payload(), Some(&10));
        assert!(ok.is_success());

        let failed: WorkResult<_, u8> = WorkItem::new(4, "b").into_result(Err(
            ConveyorError::from((ErrorKind::WorkItemFailed, "fetch failed")),
        ));
        assert_eq!(failed.error().map(|err| err.kind()), Some(ErrorKind::WorkItemFailed));
        assert_eq!(failed.into_parts().0, "b");
    }
}
