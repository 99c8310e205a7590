//! Metric names recorded by conveyor components.

/// Label for the outcome of a work result or a cooperative task.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label value for successful outcomes.
pub const OUTCOME_SUCCESS: &str = "success";

/// Label value for failed outcomes.
pub const OUTCOME_FAILURE: &str = "failure";

// Channel metrics

/// Counter for items appended to a bounded channel.
pub const CONVEYOR_ITEMS_ENQUEUED_TOTAL: &str = "conveyor_items_enqueued_total";

/// Counter for items removed from a bounded channel.
pub const CONVEYOR_ITEMS_DEQUEUED_TOTAL: &str = "conveyor_items_dequeued_total";

/// Gauge for the number of items currently held by a bounded channel.
pub const CONVEYOR_CHANNEL_OCCUPANCY: &str = "conveyor_channel_occupancy";

/// Counter for `get` calls that timed out on an empty channel.
pub const CONVEYOR_GET_TIMEOUTS_TOTAL: &str = "conveyor_get_timeouts_total";

// Counter metrics

/// Counter for guarded updates that found the lock already held.
pub const CONVEYOR_COUNTER_CONTENDED_TOTAL: &str = "conveyor_counter_contended_total";

// Worker pool and scheduler metrics

/// Counter for work results, labeled by outcome.
pub const CONVEYOR_WORK_RESULTS_TOTAL: &str = "conveyor_work_results_total";

/// Counter for cooperative tasks reaching a terminal state, labeled by outcome.
pub const CONVEYOR_TASKS_COMPLETED_TOTAL: &str = "conveyor_tasks_completed_total";

/// Histogram of gather durations in seconds.
pub const CONVEYOR_GATHER_DURATION_SECONDS: &str = "conveyor_gather_duration_seconds";
