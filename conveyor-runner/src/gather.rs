//! The cooperative gather experiment: three independent waits of 2, 3 and 4 time units.

use std::time::Duration;

use conveyor::scheduler::{CooperativeTask, suspend_for};

/// Name and length, in time units, of every wait.
const WAITS: [(&str, u32); 3] = [("download", 2), ("parse", 3), ("upload", 4)];

/// Builds one task per wait, each suspending for its share of `unit`.
pub fn gather_tasks(unit: Duration) -> Vec<CooperativeTask<'static, String>> {
    WAITS
        .into_iter()
        .map(|(name, units)| {
            CooperativeTask::new(name, async move {
                suspend_for(unit * units).await;
                Ok(format!("{name} finished after {units} units"))
            })
        })
        .collect()
}

/// Time the same waits take when run one after the other.
pub fn sequential_duration(unit: Duration) -> Duration {
    WAITS.iter().map(|(_, units)| unit * *units).sum()
}
