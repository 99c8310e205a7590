use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, info_span, warn};

use crate::bail;
use crate::channel::{BoundedChannel, Sent};
use crate::concurrency::shutdown::ShutdownRx;
use crate::conveyor_error;
use crate::error::{ConveyorError, ConveyorResult, ErrorKind, panic_message};
use crate::events::{AggregateSnapshot, EventKind, EventSink};
use crate::metrics::{CONVEYOR_WORK_RESULTS_TOTAL, OUTCOME_FAILURE, OUTCOME_LABEL, OUTCOME_SUCCESS};
use crate::workers::base::{WorkItem, WorkResult, WorkerType};

/// How often the feeding thread re-checks the stop signal while the backlog is full.
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A fixed number of threads draining a list of independent work items.
///
/// Items are fed through a [`BoundedChannel`] sized to the pool, so at most `worker_count`
/// items are buffered and `worker_count` run at once. Every submitted item produces exactly
/// one [`WorkResult`], whether its handler succeeded, failed, panicked or never ran because a
/// stop was requested.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    worker_count: usize,
    events: EventSink,
}

impl WorkerPool {
    /// Creates a pool of `worker_count` workers.
    pub fn new(worker_count: usize) -> ConveyorResult<Self> {
        if worker_count == 0 {
            bail!(
                ErrorKind::InvalidConfig,
                "Worker pool needs at least one worker"
            );
        }

        Ok(Self {
            worker_count,
            events: EventSink::disabled(),
        })
    }

    /// Emits a progress event after each result.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs `handler` over every item and returns one result per item, sorted by submission
    /// index.
    pub fn run<D, T, F>(&self, items: Vec<D>, handler: F) -> ConveyorResult<Vec<WorkResult<D, T>>>
    where
        D: Send,
        T: Send,
        F: Fn(&D) -> ConveyorResult<T> + Sync,
    {
        self.execute(items, handler, None)
    }

    /// Like [`WorkerPool::run`], but stops starting new items once `shutdown_rx` observes a
    /// stop request. Items that never started produce a [`ErrorKind::Cancelled`] result.
    pub fn run_until<D, T, F>(
        &self,
        items: Vec<D>,
        handler: F,
        shutdown_rx: &ShutdownRx,
    ) -> ConveyorResult<Vec<WorkResult<D, T>>>
    where
        D: Send,
        T: Send,
        F: Fn(&D) -> ConveyorResult<T> + Sync,
    {
        self.execute(items, handler, Some(shutdown_rx))
    }

    fn execute<D, T, F>(
        &self,
        items: Vec<D>,
        handler: F,
        shutdown_rx: Option<&ShutdownRx>,
    ) -> ConveyorResult<Vec<WorkResult<D, T>>>
    where
        D: Send,
        T: Send,
        F: Fn(&D) -> ConveyorResult<T> + Sync,
    {
        let total = items.len() as u64;
        let backlog = BoundedChannel::new(self.worker_count)?;
        let progress = Progress {
            events: &self.events,
            backlog: &backlog,
            completed: AtomicU64::new(0),
            total,
        };

        info!(
            worker_count = self.worker_count,
            items = total,
            "starting worker pool"
        );

        let mut results = thread::scope(|scope| -> ConveyorResult<Vec<WorkResult<D, T>>> {
            let mut handles = Vec::with_capacity(self.worker_count);
            for index in 0..self.worker_count {
                let worker_type = WorkerType::Pool { index };
                let spawned = thread::Builder::new()
                    .name(worker_type.thread_name())
                    .spawn_scoped(scope, {
                        let progress = &progress;
                        let handler = &handler;
                        move || {
                            let span = info_span!("pool_worker", worker_id = index);
                            let _enter = span.enter();
                            work(progress, handler, shutdown_rx)
                        }
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        // Workers already running exit once the empty backlog is closed.
                        backlog.close();
                        return Err(err.into());
                    }
                }
            }

            let fed = feed(items, &progress, shutdown_rx);
            backlog.close();
            let mut results = fed?;

            let mut errors = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(worker_results) => results.extend(worker_results),
                    Err(payload) => errors.push(conveyor_error!(
                        ErrorKind::WorkerPanic,
                        "Pool worker panicked outside of a handler",
                        panic_message(payload.as_ref())
                    )),
                }
            }

            if !errors.is_empty() {
                return Err(errors.into());
            }

            Ok(results)
        })?;

        results.sort_by_key(|result| result.index());

        let failed = results.iter().filter(|result| !result.is_success()).count();
        info!(results = results.len(), failed, "worker pool finished");

        Ok(results)
    }
}

struct Progress<'a, D> {
    events: &'a EventSink,
    backlog: &'a BoundedChannel<WorkItem<D>>,
    completed: AtomicU64,
    total: u64,
}

impl<D> Progress<'_, D> {
    fn record<T>(&self, result: &WorkResult<D, T>) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

        let (kind, outcome) = if result.is_success() {
            (EventKind::WorkSucceeded, OUTCOME_SUCCESS)
        } else {
            (EventKind::WorkFailed, OUTCOME_FAILURE)
        };
        counter!(CONVEYOR_WORK_RESULTS_TOTAL, OUTCOME_LABEL => outcome).increment(1);

        self.events.emit(
            kind,
            result.index() as u64,
            AggregateSnapshot {
                counter_value: 0,
                channel_occupancy: self.backlog.len(),
                channel_capacity: self.backlog.capacity(),
                completed,
                total: self.total,
            },
        );
    }
}

/// Feeds every item into the backlog from the calling thread.
///
/// Returns the cancelled results of items that were never fed because a stop was requested.
fn feed<D, T>(
    items: Vec<D>,
    progress: &Progress<'_, D>,
    shutdown_rx: Option<&ShutdownRx>,
) -> ConveyorResult<Vec<WorkResult<D, T>>> {
    let mut cancelled = Vec::new();
    let mut stopped = false;

    for (index, descriptor) in items.into_iter().enumerate() {
        let item = WorkItem::new(index, descriptor);

        let unfed = match shutdown_rx {
            _ if stopped => Some(item),
            None => {
                progress.backlog.put(item)?;
                None
            }
            Some(shutdown_rx) => offer(progress.backlog, item, shutdown_rx)?,
        };

        if let Some(item) = unfed {
            if !stopped {
                warn!(index, "stop requested, cancelling unstarted work items");
                stopped = true;
            }

            let result = item.into_result(Err(cancelled_error()));
            progress.record(&result);
            cancelled.push(result);
        }
    }

    Ok(cancelled)
}

/// Puts `item` into the backlog, polling the stop signal while it is full.
///
/// Hands the item back if a stop is requested before it was stored.
fn offer<D>(
    backlog: &BoundedChannel<WorkItem<D>>,
    mut item: WorkItem<D>,
    shutdown_rx: &ShutdownRx,
) -> ConveyorResult<Option<WorkItem<D>>> {
    loop {
        if shutdown_rx.is_shutdown_requested() {
            return Ok(Some(item));
        }

        match backlog.put_timeout(item, FEED_POLL_INTERVAL)? {
            Sent::Stored => return Ok(None),
            Sent::Timeout(returned) => item = returned,
        }
    }
}

/// Worker loop: drains the backlog until it is closed and empty.
fn work<D, T, F>(
    progress: &Progress<'_, D>,
    handler: &F,
    shutdown_rx: Option<&ShutdownRx>,
) -> Vec<WorkResult<D, T>>
where
    F: Fn(&D) -> ConveyorResult<T>,
{
    let mut results = Vec::new();

    while let Some(item) = progress.backlog.get_blocking() {
        let stop_requested = shutdown_rx.is_some_and(ShutdownRx::is_shutdown_requested);

        let outcome = if stop_requested {
            Err(cancelled_error())
        } else {
            debug!(index = item.index(), "running work item");
            match panic::catch_unwind(AssertUnwindSafe(|| handler(item.descriptor()))) {
                Ok(outcome) => outcome,
                Err(payload) => Err(conveyor_error!(
                    ErrorKind::WorkerPanic,
                    "Work item handler panicked",
                    panic_message(payload.as_ref())
                )),
            }
        };

        if let Err(err) = &outcome {
            debug!(index = item.index(), error = %err, "work item failed");
        }

        let result = item.into_result(outcome);
        progress.record(&result);
        results.push(result);
    }

    results
}

fn cancelled_error() -> ConveyorError {
    conveyor_error!(
        ErrorKind::Cancelled,
        "Work item cancelled before it started"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    #[test]
    fn zero_workers_are_rejected() {
        let err = WorkerPool::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn empty_input_yields_no_results() {
        let pool = WorkerPool::new(3).unwrap();
        let results = pool.run(Vec::<u32>::new(), |n| Ok(*n)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn results_are_sorted_by_submission_index() {
        let pool = WorkerPool::new(4).unwrap();
        let results = pool.run((0..20u64).collect(), |n| Ok(n * 2)).unwrap();

        let payloads: Vec<_> = results.iter().filter_map(|r| r.payload().copied()).collect();
        assert_eq!(payloads, (0..20u64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_handler_fails_only_its_item() {
        let pool = WorkerPool::new(2).unwrap();
        let results = pool
            .run(vec![1, 2, 3], |n| {
                if *n == 2 {
                    panic!("bad item");
                }
                Ok(*n)
            })
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(results[2].is_success());
        let err = results[1].error().unwrap();
        assert_eq!(err.kind(), ErrorKind::WorkerPanic);
        assert_eq!(err.detail(), Some("bad item"));
    }

    #[test]
    fn pre_requested_stop_cancels_every_item() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown();

        let pool = WorkerPool::new(2).unwrap();
        let results = pool.run_until((0..10).collect(), |n: &i32| Ok(*n), &shutdown_rx).unwrap();

        assert_eq!(results.len(), 10);
        assert!(
            results
                .iter()
                .all(|r| r.error().map(|err| err.kind()) == Some(ErrorKind::Cancelled))
        );
    }
}
