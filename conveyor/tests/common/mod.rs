#![allow(dead_code)]

use std::time::{Duration, Instant};

use conveyor::events::{EventKind, ProgressEvent};
use conveyor_config::shared::PipelineConfig;

/// Pipeline config with a short poll interval so stop requests are observed quickly.
pub fn fast_pipeline_config(item_count: u64) -> PipelineConfig {
    PipelineConfig {
        capacity: 5,
        item_count,
        consumer_count: 2,
        get_timeout_ms: 50,
        race_window_us: 0,
        ..PipelineConfig::default()
    }
}

/// Counts the events of the given kind.
pub fn count_kind(events: &[ProgressEvent], kind: EventKind) -> usize {
    events.iter().filter(|event| event.kind == kind).count()
}

/// Polls `condition` until it holds or `timeout` elapses. Returns whether it held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    condition()
}
