//! Shared integer with a guarded and a deliberately racy update path.
//!
//! Both paths perform the same read, gap, write sequence. [`AccessMode::Guarded`] runs it
//! under a mutex and never loses an update. [`AccessMode::Unguarded`] runs it without the
//! mutex: the gap between the read and the write lets concurrent callers overwrite each
//! other's results, which is the lost-update defect the race experiment reproduces.
//!
//! The value itself is an atomic integer so the racy path stays free of undefined behavior.
//! The read and the write are separate atomic operations, so the sequence as a whole is not
//! atomic.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::metrics::CONVEYOR_COUNTER_CONTENDED_TOTAL;

/// Selects how an update reaches the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// The update holds the lock for the whole read-modify-write.
    Guarded,
    /// The update skips the lock and may lose concurrent updates.
    Unguarded,
}

impl AccessMode {
    /// Maps the `use_lock` configuration toggle to an access mode.
    pub fn from_use_lock(use_lock: bool) -> Self {
        if use_lock {
            AccessMode::Guarded
        } else {
            AccessMode::Unguarded
        }
    }
}

/// Counters describing how a [`GuardedCounter`] was used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDiagnostics {
    /// Current value.
    pub value: i64,
    /// Updates that went through the lock.
    pub safe_updates: u64,
    /// Updates that bypassed the lock.
    pub unsafe_updates: u64,
    /// Guarded updates that found the lock already held.
    pub contended_acquisitions: u64,
}

/// A shared integer exposing a safe and an intentionally unsafe update path.
#[derive(Debug)]
pub struct GuardedCounter {
    value: AtomicI64,
    lock: Mutex<()>,
    race_window: Duration,
    safe_updates: AtomicU64,
    unsafe_updates: AtomicU64,
    contended_acquisitions: AtomicU64,
}

impl GuardedCounter {
    /// Creates a counter at zero.
    ///
    /// `race_window` is the gap injected between reading and writing the value. A zero window
    /// yields to the scheduler instead of sleeping.
    pub fn new(race_window: Duration) -> Self {
        Self {
            value: AtomicI64::new(0),
            lock: Mutex::new(()),
            race_window,
            safe_updates: AtomicU64::new(0),
            unsafe_updates: AtomicU64::new(0),
            contended_acquisitions: AtomicU64::new(0),
        }
    }

    /// Adds `delta` under the lock and returns the new value.
    pub fn increment(&self, delta: i64) -> i64 {
        let _guard = self.acquire();
        let updated = self.read_modify_write(delta);
        self.safe_updates.fetch_add(1, Ordering::Relaxed);

        updated
    }

    /// Adds `delta` without the lock and returns the value this caller wrote.
    ///
    /// Concurrent callers may overwrite each other, so the final value can differ from the
    /// sum of all deltas.
    pub fn increment_unsafe(&self, delta: i64) -> i64 {
        let updated = self.read_modify_write(delta);
        self.unsafe_updates.fetch_add(1, Ordering::Relaxed);

        updated
    }

    /// Dispatches to [`GuardedCounter::increment`] or [`GuardedCounter::increment_unsafe`].
    pub fn apply(&self, delta: i64, mode: AccessMode) -> i64 {
        match mode {
            AccessMode::Guarded => self.increment(delta),
            AccessMode::Unguarded => self.increment_unsafe(delta),
        }
    }

    /// Reads the value under the lock.
    pub fn read(&self) -> i64 {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.value.load(Ordering::SeqCst)
    }

    /// Returns the value and usage counters.
    pub fn diagnostics(&self) -> CounterDiagnostics {
        CounterDiagnostics {
            value: self.read(),
            safe_updates: self.safe_updates.load(Ordering::Relaxed),
            unsafe_updates: self.unsafe_updates.load(Ordering::Relaxed),
            contended_acquisitions: self.contended_acquisitions.load(Ordering::Relaxed),
        }
    }

    /// Zeroes the value and the usage counters.
    ///
    /// Must not race with updates; the race experiment calls it between trials.
    pub fn reset(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.value.store(0, Ordering::SeqCst);
        self.safe_updates.store(0, Ordering::Relaxed);
        self.unsafe_updates.store(0, Ordering::Relaxed);
        self.contended_acquisitions.store(0, Ordering::Relaxed);
    }

    /// Returns the injected gap between read and write.
    pub fn race_window(&self) -> Duration {
        self.race_window
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.contended_acquisitions.fetch_add(1, Ordering::Relaxed);
                counter!(CONVEYOR_COUNTER_CONTENDED_TOTAL).increment(1);

                self.lock.lock().unwrap_or_else(PoisonError::into_inner)
            }
        }
    }

    fn read_modify_write(&self, delta: i64) -> i64 {
        let observed = self.value.load(Ordering::SeqCst);

        if self.race_window.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.race_window);
        }

        let updated = observed + delta;
        self.value.store(updated, Ordering::SeqCst);

        updated
    }
}

impl Default for GuardedCounter {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_updates_sum_deltas() {
        let counter = GuardedCounter::default();
        assert_eq!(counter.increment(3), 3);
        assert_eq!(counter.apply(-1, AccessMode::Guarded), 2);
        assert_eq!(counter.read(), 2);

        let diagnostics = counter.diagnostics();
        assert_eq!(diagnostics.value, 2);
        assert_eq!(diagnostics.safe_updates, 2);
        assert_eq!(diagnostics.unsafe_updates, 0);
    }

    #[test]
    fn single_caller_unsafe_updates_do_not_lose_anything() {
        let counter = GuardedCounter::default();
        for _ in 0..10 {
            counter.apply(1, AccessMode::Unguarded);
        }

        assert_eq!(counter.read(), 10);
        assert_eq!(counter.diagnostics().unsafe_updates, 10);
    }

    #[test]
    fn concurrent_guarded_updates_balance_out() {
        let counter = GuardedCounter::new(Duration::from_micros(10));

        thread::scope(|scope| {
            for i in 0..64 {
                let counter = &counter;
                let delta = if i % 2 == 0 { 1 } else { -1 };
                scope.spawn(move || counter.increment(delta));
            }
        });

        let diagnostics = counter.diagnostics();
        assert_eq!(diagnostics.value, 0);
        assert_eq!(diagnostics.safe_updates, 64);
        assert!(diagnostics.contended_acquisitions <= 64);
    }

    #[test]
    fn reset_zeroes_value_and_diagnostics() {
        let counter = GuardedCounter::default();
        counter.increment(5);
        counter.increment_unsafe(5);
        counter.reset();

        assert_eq!(counter.diagnostics(), CounterDiagnostics::default());
    }

    #[test]
    fn access_mode_follows_use_lock() {
        assert_eq!(AccessMode::from_use_lock(true), AccessMode::Guarded);
        assert_eq!(AccessMode::from_use_lock(false), AccessMode::Unguarded);
    }
}
