use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Configuration for a producer/consumer pipeline run and its fan-out pool.
///
/// Every field has a default so a partial configuration file (or none at all, when the
/// struct is built with [`PipelineConfig::default`]) is valid.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Capacity of the bounded channel between producer and consumers.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Width of the fan-out worker pool.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Total number of items the producer creates.
    #[serde(default = "default_item_count")]
    pub item_count: u64,
    /// Whether the shared counter is updated through the lock or through the racy path.
    #[serde(default = "default_use_lock")]
    pub use_lock: bool,
    /// Number of consumer threads draining the channel.
    #[serde(default = "default_consumer_count")]
    pub consumer_count: usize,
    /// Milliseconds a consumer waits on an empty channel before re-checking the stop signal.
    #[serde(default = "default_get_timeout_ms")]
    pub get_timeout_ms: u64,
    /// Microseconds injected between the read and the write of an unguarded counter update.
    #[serde(default = "default_race_window_us")]
    pub race_window_us: u64,
    /// Milliseconds of simulated work per produced item.
    #[serde(default)]
    pub produce_delay_ms: u64,
    /// Milliseconds of simulated work per consumed item.
    #[serde(default)]
    pub consume_delay_ms: u64,
}

impl PipelineConfig {
    /// Default channel capacity.
    pub const DEFAULT_CAPACITY: usize = 5;

    /// Default fan-out pool width.
    pub const DEFAULT_WORKER_COUNT: usize = 5;

    /// Default number of produced items.
    pub const DEFAULT_ITEM_COUNT: u64 = 20;

    /// Default number of consumers.
    pub const DEFAULT_CONSUMER_COUNT: usize = 2;

    /// Default consumer poll interval in milliseconds.
    pub const DEFAULT_GET_TIMEOUT_MS: u64 = 1000;

    /// Default injected race window in microseconds.
    pub const DEFAULT_RACE_WINDOW_US: u64 = 10;

    /// Validates that every size and interval is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::ZeroValue { field: "capacity" });
        }

        if self.worker_count == 0 {
            return Err(ValidationError::ZeroValue {
                field: "worker_count",
            });
        }

        if self.consumer_count == 0 {
            return Err(ValidationError::ZeroValue {
                field: "consumer_count",
            });
        }

        if self.get_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "get_timeout_ms",
            });
        }

        Ok(())
    }

    /// Returns the consumer poll interval.
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    /// Returns the injected race window of the unguarded counter path.
    pub fn race_window(&self) -> Duration {
        Duration::from_micros(self.race_window_us)
    }

    /// Returns the simulated production delay.
    pub fn produce_delay(&self) -> Duration {
        Duration::from_millis(self.produce_delay_ms)
    }

    /// Returns the simulated consumption delay.
    pub fn consume_delay(&self) -> Duration {
        Duration::from_millis(self.consume_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            worker_count: default_worker_count(),
            item_count: default_item_count(),
            use_lock: default_use_lock(),
            consumer_count: default_consumer_count(),
            get_timeout_ms: default_get_timeout_ms(),
            race_window_us: default_race_window_us(),
            produce_delay_ms: 0,
            consume_delay_ms: 0,
        }
    }
}

fn default_capacity() -> usize {
    PipelineConfig::DEFAULT_CAPACITY
}

fn default_worker_count() -> usize {
    PipelineConfig::DEFAULT_WORKER_COUNT
}

fn default_item_count() -> u64 {
    PipelineConfig::DEFAULT_ITEM_COUNT
}

fn default_use_lock() -> bool {
    true
}

fn default_consumer_count() -> usize {
    PipelineConfig::DEFAULT_CONSUMER_COUNT
}

fn default_get_timeout_ms() -> u64 {
    PipelineConfig::DEFAULT_GET_TIMEOUT_MS
}

fn default_race_window_us() -> u64 {
    PipelineConfig::DEFAULT_RACE_WINDOW_US
}
