use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Configuration for the shared-counter race experiment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RaceConfig {
    /// Number of `+1` callers per trial; the same number of `-1` callers runs alongside.
    #[serde(default = "default_contenders")]
    pub contenders: usize,
    /// Number of trials to run.
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Microseconds injected between the read and the write of an unguarded update.
    #[serde(default = "default_race_window_us")]
    pub race_window_us: u64,
    /// Whether callers go through the lock.
    #[serde(default)]
    pub use_lock: bool,
    /// Stops after the first trial whose final value is not zero.
    #[serde(default)]
    pub stop_on_first_deviation: bool,
}

impl RaceConfig {
    /// Default number of contenders per sign.
    pub const DEFAULT_CONTENDERS: usize = 500;

    /// Default number of trials.
    pub const DEFAULT_TRIALS: usize = 100;

    /// Validates that contenders and trials are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.contenders == 0 {
            return Err(ValidationError::ZeroValue {
                field: "race.contenders",
            });
        }

        if self.trials == 0 {
            return Err(ValidationError::ZeroValue {
                field: "race.trials",
            });
        }

        Ok(())
    }

    /// Returns the injected race window.
    pub fn race_window(&self) -> Duration {
        Duration::from_micros(self.race_window_us)
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            contenders: default_contenders(),
            trials: default_trials(),
            race_window_us: default_race_window_us(),
            use_lock: false,
            stop_on_first_deviation: false,
        }
    }
}

fn default_contenders() -> usize {
    RaceConfig::DEFAULT_CONTENDERS
}

fn default_trials() -> usize {
    RaceConfig::DEFAULT_TRIALS
}

fn default_race_window_us() -> u64 {
    10
}
