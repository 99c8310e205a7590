use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Monotonically increasing sequence number assigned by a producer.
pub type Sequence = u64;

/// Identifier of a single pipeline run, attached to logs and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of payload flowing from a producer to a consumer.
///
/// Items are immutable once built: the sequence is assigned at creation and fields are only
/// readable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<P> {
    sequence: Sequence,
    payload: P,
}

impl<P> Item<P> {
    /// Creates an item with the given producer-assigned sequence.
    pub fn new(sequence: Sequence, payload: P) -> Self {
        Self { sequence, payload }
    }

    /// Returns the sequence assigned by the producer.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Returns the payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Consumes the item, returning its payload.
    pub fn into_payload(self) -> P {
        self.payload
    }
}
