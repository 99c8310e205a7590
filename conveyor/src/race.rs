//! The shared-counter race experiment.
//!
//! Each trial spawns `contenders` callers adding `+1` and as many adding `-1` to one
//! [`GuardedCounter`]. Every caller parks on a start gate until all of them are spawned, so
//! their read-modify-write sequences overlap as much as possible. A correct counter ends every
//! trial at zero.

use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::Instant;

use conveyor_config::shared::RaceConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::counter::{AccessMode, GuardedCounter};
use crate::error::ConveyorResult;

/// Outcome of [`run_race_experiment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceReport {
    /// Path the callers used.
    pub mode: AccessMode,
    /// Trials actually run.
    pub trials: usize,
    /// Trials whose final value was not zero.
    pub deviating_trials: usize,
    /// Final counter value of each trial, in trial order.
    pub final_values: Vec<i64>,
}

impl RaceReport {
    /// Returns `true` if at least one trial lost an update.
    pub fn has_deviation(&self) -> bool {
        self.deviating_trials > 0
    }

    /// Returns the final value furthest from zero.
    pub fn worst_deviation(&self) -> i64 {
        self.final_values
            .iter()
            .copied()
            .max_by_key(|value| value.unsigned_abs())
            .unwrap_or(0)
    }
}

/// Runs the race experiment described by `config`.
pub fn run_race_experiment(config: &RaceConfig) -> ConveyorResult<RaceReport> {
    config.validate()?;

    let mode = AccessMode::from_use_lock(config.use_lock);
    let counter = GuardedCounter::new(config.race_window());

    info!(
        ?mode,
        contenders = config.contenders,
        trials = config.trials,
        race_window_us = config.race_window_us,
        "starting race experiment"
    );

    let started = Instant::now();
    let mut final_values = Vec::with_capacity(config.trials);
    let mut deviating_trials = 0;

    for trial in 0..config.trials {
        counter.reset();
        run_trial(&counter, config.contenders, mode)?;

        let value = counter.read();
        final_values.push(value);

        if value != 0 {
            deviating_trials += 1;
            debug!(trial, value, "trial deviated from zero");

            if config.stop_on_first_deviation {
                break;
            }
        }
    }

    let report = RaceReport {
        mode,
        trials: final_values.len(),
        deviating_trials,
        final_values,
    };

    if report.has_deviation() {
        warn!(
            ?mode,
            deviating_trials = report.deviating_trials,
            trials = report.trials,
            worst = report.worst_deviation(),
            "lost updates detected"
        );
    } else {
        info!(
            ?mode,
            trials = report.trials,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "every trial ended at zero"
        );
    }

    Ok(report)
}

fn run_trial(counter: &GuardedCounter, contenders: usize, mode: AccessMode) -> ConveyorResult<()> {
    // Callers take a read lock before updating; holding the write lock keeps them parked
    // until every caller exists.
    let gate = RwLock::new(());

    thread::scope(|scope| {
        let opened = gate.write().unwrap_or_else(PoisonError::into_inner);

        for index in 0..contenders * 2 {
            let delta = if index % 2 == 0 { 1 } else { -1 };
            let gate = &gate;

            let spawned = thread::Builder::new()
                .name(format!("contender-{index}"))
                .spawn_scoped(scope, move || {
                    drop(gate.read().unwrap_or_else(PoisonError::into_inner));
                    counter.apply(delta, mode);
                });

            if let Err(err) = spawned {
                // Open the gate so callers already spawned can finish before the scope joins.
                drop(opened);
                return Err(err.into());
            }
        }

        drop(opened);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_trials_always_end_at_zero() {
        let config = RaceConfig {
            contenders: 50,
            trials: 5,
            race_window_us: 0,
            use_lock: true,
            stop_on_first_deviation: false,
        };

        let report = run_race_experiment(&config).unwrap();
        assert_eq!(report.mode, AccessMode::Guarded);
        assert_eq!(report.trials, 5);
        assert_eq!(report.final_values, vec![0; 5]);
        assert!(!report.has_deviation());
    }

    #[test]
    fn zero_trials_are_rejected() {
        let config = RaceConfig {
            trials: 0,
            ..RaceConfig::default()
        };

        let err = run_race_experiment(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn worst_deviation_picks_largest_magnitude() {
        let report = RaceReport {
            mode: AccessMode::Unguarded,
            trials: 3,
            deviating_trials: 2,
            final_values: vec![3, 0, -7],
        };

        assert_eq!(report.worst_deviation(), -7);
    }
}
