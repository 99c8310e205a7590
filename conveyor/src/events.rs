//! Progress events for the presentation layer.
//!
//! Worker threads and cooperative tasks never touch presentation state directly. Each
//! component emits [`ProgressEvent`]s into an unbounded queue that the presentation layer
//! drains on its own schedule. Emission never blocks and is always performed after any
//! internal lock has been released, so a slow consumer of events cannot stall the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::RunId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An item was appended to the channel.
    Enqueued,
    /// An item was removed from the channel and processed.
    Dequeued,
    /// The producer created every item and closed the channel.
    ProducerFinished,
    /// A consumer exited, either at end of stream or on a stop request.
    ConsumerStopped,
    /// A work item produced a successful result.
    WorkSucceeded,
    /// A work item produced a failed result.
    WorkFailed,
    /// A cooperative task completed.
    TaskCompleted,
    /// A cooperative task failed or was cancelled.
    TaskFailed,
}

/// Aggregate state at the moment an event was emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Current value of the shared counter.
    pub counter_value: i64,
    /// Items currently held by the channel.
    pub channel_occupancy: usize,
    /// Capacity of the channel.
    pub channel_capacity: usize,
    /// Units (items, results or tasks) completed so far.
    pub completed: u64,
    /// Units expected in total.
    pub total: u64,
}

/// A single observable state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Run that emitted the event, when the emitter belongs to one.
    pub run_id: Option<RunId>,
    /// What happened.
    pub kind: EventKind,
    /// Item sequence, work item index or task index the event is about.
    pub subject_id: u64,
    /// Aggregate state after the transition.
    pub snapshot: AggregateSnapshot,
    /// Wall-clock time of emission.
    pub emitted_at: DateTime<Utc>,
}

/// Cloneable emitter of [`ProgressEvent`]s.
///
/// A disabled sink drops every event, which lets components emit unconditionally.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    run_id: Option<RunId>,
}

impl EventSink {
    /// Returns a sink that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns a copy of this sink that tags events with `run_id`.
    pub fn with_run_id(&self, run_id: RunId) -> Self {
        Self {
            tx: self.tx.clone(),
            run_id: Some(run_id),
        }
    }

    /// Returns `true` if events are delivered somewhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Emits an event. Never blocks; events are dropped once the stream is gone.
    pub fn emit(&self, kind: EventKind, subject_id: u64, snapshot: AggregateSnapshot) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = ProgressEvent {
            run_id: self.run_id,
            kind,
            subject_id,
            snapshot,
            emitted_at: Utc::now(),
        };

        if tx.send(event).is_err() {
            trace!(?kind, subject_id, "event stream closed, dropping progress event");
        }
    }
}

/// Receiving end of the progress event queue, owned by the presentation layer.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once every sink has been dropped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Blocking variant of [`EventStream::recv`] for presentation threads.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.blocking_recv()
    }

    /// Returns every event currently queued without waiting.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Creates a connected sink and stream.
pub fn create_event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx: Some(tx),
            run_id: None,
        },
        EventStream { rx },
    )
}
