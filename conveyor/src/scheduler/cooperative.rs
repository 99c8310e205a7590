//! Single-threaded gather of named asynchronous tasks.
//!
//! [`CooperativeScheduler`] polls every task from one future: a task only gives control back
//! at its own yield points ([`suspend_for`], [`yield_now`] or any other pending `.await`), at
//! which point another ready task is polled. Independent waits therefore overlap, and the
//! whole gather takes about as long as the longest wait rather than their sum.
//!
//! Failures never short-circuit the gather. A task that fails, panics or is cancelled is
//! recorded as failed in its own slot while its siblings keep running.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, histogram};
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::conveyor_error;
use crate::error::{ConveyorError, ConveyorResult, ErrorKind, panic_message};
use crate::events::{AggregateSnapshot, EventKind, EventSink};
use crate::metrics::{
    CONVEYOR_GATHER_DURATION_SECONDS, CONVEYOR_TASKS_COMPLETED_TOTAL, OUTCOME_FAILURE,
    OUTCOME_LABEL, OUTCOME_SUCCESS,
};
use crate::scheduler::task::{CooperativeTask, TaskResult, TaskState};

/// Suspends the calling task for `duration`, letting the scheduler poll its siblings.
pub async fn suspend_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Gives control back to the scheduler once without waiting for anything.
pub async fn yield_now() {
    tokio::task::yield_now().await;
}

/// Results of a gather, in the order the tasks were scheduled.
#[derive(Debug)]
pub struct GatherReport<T> {
    pub results: Vec<TaskResult<T>>,
    /// Time from the first poll to the last task reaching a terminal state.
    pub elapsed: Duration,
}

impl<T> GatherReport<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
struct TaskSlot {
    name: String,
    state: TaskState,
}

/// Runs a fixed set of tasks to completion in one execution context.
///
/// The scheduler is not `Sync`. Task states can be inspected with
/// [`CooperativeScheduler::state`] from another future polled alongside the gather.
#[derive(Debug, Default)]
pub struct CooperativeScheduler {
    slots: RefCell<Vec<TaskSlot>>,
    events: EventSink,
}

impl CooperativeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a progress event whenever a task reaches a terminal state.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Polls every task until all are terminal and returns their results in scheduling order.
    pub async fn run_all<'a, T>(&self, tasks: Vec<CooperativeTask<'a, T>>) -> GatherReport<T> {
        self.gather(tasks, std::future::pending()).await
    }

    /// Like [`CooperativeScheduler::run_all`], but cancels every unfinished task once a stop is
    /// requested. Cancelled tasks fail with [`ErrorKind::Cancelled`]; finished results are kept.
    pub async fn run_all_until<'a, T>(
        &self,
        tasks: Vec<CooperativeTask<'a, T>>,
        mut shutdown_rx: ShutdownRx,
    ) -> GatherReport<T> {
        self.gather(tasks, async move { shutdown_rx.wait_for_shutdown().await })
            .await
    }

    /// Builds a single-threaded runtime and drives [`CooperativeScheduler::run_all`] on it.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn block_on_all<'a, T>(
        &self,
        tasks: Vec<CooperativeTask<'a, T>>,
    ) -> ConveyorResult<GatherReport<T>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| {
                conveyor_error!(
                    ErrorKind::RuntimeInit,
                    "Failed to build the scheduler runtime",
                    err,
                    source: err
                )
            })?;

        Ok(runtime.block_on(self.run_all(tasks)))
    }

    /// Returns the current state of the most recently scheduled task called `name`.
    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.slots
            .borrow()
            .iter()
            .rev()
            .find(|slot| slot.name == name)
            .map(|slot| slot.state)
    }

    /// Returns the name and state of every task of the current or last gather.
    pub fn states(&self) -> Vec<(String, TaskState)> {
        self.slots
            .borrow()
            .iter()
            .map(|slot| (slot.name.clone(), slot.state))
            .collect()
    }

    async fn gather<'a, T, S>(&self, tasks: Vec<CooperativeTask<'a, T>>, stop: S) -> GatherReport<T>
    where
        S: Future<Output = ()>,
    {
        let started = Instant::now();

        let (names, futures): (Vec<_>, Vec<_>) =
            tasks.into_iter().map(CooperativeTask::into_parts).unzip();
        *self.slots.borrow_mut() = names
            .iter()
            .map(|name| TaskSlot {
                name: name.clone(),
                state: TaskState::Pending,
            })
            .collect();

        info!(tasks = names.len(), "starting cooperative gather");

        let outcomes = RefCell::new(futures.iter().map(|_| None).collect::<Vec<_>>());
        let tracked = futures
            .into_iter()
            .enumerate()
            .map(|(index, future)| TrackedTask {
                future,
                index,
                scheduler: self,
                outcomes: &outcomes,
                done: false,
            });
        let all = join_all(tracked);

        tokio::select! {
            biased;

            _ = stop => {
                warn!("stop requested, cancelling unfinished tasks");
            }
            _ = all => {}
        }

        let results = outcomes
            .into_inner()
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(index, (outcome, name))| {
                let outcome = outcome.unwrap_or_else(|| {
                    let cancelled = Err(conveyor_error!(
                        ErrorKind::Cancelled,
                        "Task cancelled before completion",
                        name
                    ));
                    self.finish(index, &cancelled);
                    cancelled
                });

                TaskResult {
                    name,
                    index,
                    outcome,
                }
            })
            .collect::<Vec<_>>();

        let elapsed = started.elapsed();
        histogram!(CONVEYOR_GATHER_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let report = GatherReport { results, elapsed };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = elapsed.as_millis() as u64,
            "cooperative gather finished"
        );

        report
    }

    fn set_state(&self, index: usize, state: TaskState) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(index) {
            slot.state = state;
        }
    }

    fn finish<T>(&self, index: usize, outcome: &ConveyorResult<T>) {
        let (state, kind, label) = match outcome {
            Ok(_) => (TaskState::Completed, EventKind::TaskCompleted, OUTCOME_SUCCESS),
            Err(_) => (TaskState::Failed, EventKind::TaskFailed, OUTCOME_FAILURE),
        };
        self.set_state(index, state);

        let (completed, total) = {
            let slots = self.slots.borrow();
            let completed = slots.iter().filter(|slot| slot.state.is_terminal()).count();
            (completed as u64, slots.len() as u64)
        };

        match outcome {
            Ok(_) => debug!(index, "task completed"),
            Err(err) => debug!(index, error = %err, "task failed"),
        }

        counter!(CONVEYOR_TASKS_COMPLETED_TOTAL, OUTCOME_LABEL => label).increment(1);
        self.events.emit(
            kind,
            index as u64,
            AggregateSnapshot {
                completed,
                total,
                ..AggregateSnapshot::default()
            },
        );
    }
}

pin_project! {
    /// Polls one task, mirroring every transition into the scheduler's slots and storing
    /// the terminal outcome.
    struct TrackedTask<'s, F, T> {
        #[pin]
        future: F,
        index: usize,
        scheduler: &'s CooperativeScheduler,
        outcomes: &'s RefCell<Vec<Option<ConveyorResult<T>>>>,
        done: bool,
    }
}

impl<F, T> Future for TrackedTask<'_, F, T>
where
    F: Future<Output = ConveyorResult<T>>,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(());
        }

        this.scheduler.set_state(*this.index, TaskState::Running);

        let future = this.future;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => {
                this.scheduler.set_state(*this.index, TaskState::Suspended);
                return Poll::Pending;
            }
            Ok(Poll::Ready(outcome)) => outcome,
            Err(payload) => Err(task_panic(payload.as_ref())),
        };

        *this.done = true;
        this.scheduler.finish(*this.index, &outcome);
        if let Some(slot) = this.outcomes.borrow_mut().get_mut(*this.index) {
            *slot = Some(outcome);
        }

        Poll::Ready(())
    }
}

fn task_panic(payload: &(dyn std::any::Any + Send)) -> ConveyorError {
    conveyor_error!(
        ErrorKind::TaskPanic,
        "Cooperative task panicked",
        panic_message(payload)
    )
}
