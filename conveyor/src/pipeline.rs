use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use conveyor_config::shared::PipelineConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span};

use crate::bail;
use crate::channel::{BoundedChannel, ChannelStats};
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::conveyor_error;
use crate::counter::{AccessMode, CounterDiagnostics, GuardedCounter};
use crate::error::{ConveyorError, ConveyorResult, ErrorKind, panic_message};
use crate::events::{AggregateSnapshot, EventKind, EventSink};
use crate::types::{Item, RunId};
use crate::workers::base::WorkerType;
use crate::workers::consumer::run_consumer;
use crate::workers::producer::{Payload, run_producer};

/// Final tallies of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Items the producer stored in the channel.
    pub produced: u64,
    /// Items consumers removed and processed.
    pub consumed: u64,
    /// Items left in the channel.
    pub resident: u64,
    /// Final value of the shared counter.
    pub counter_value: i64,
    /// Value the counter would hold without lost updates.
    pub expected_counter_value: i64,
    /// Whether a stop cut the run short.
    pub stopped_early: bool,
    /// Time between `start` and the last role exiting.
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Number of counter updates lost to the unguarded path.
    pub fn lost_updates(&self) -> i64 {
        self.expected_counter_value - self.counter_value
    }
}

/// Cloneable handle requesting a running pipeline to stop.
#[derive(Debug, Clone)]
pub struct StopHandle(ShutdownTx);

impl StopHandle {
    /// Asks every role to exit at its next poll point. Idempotent and never blocks.
    pub fn request_stop(&self) {
        self.0.shutdown();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.is_shutdown_requested()
    }
}

/// Shared tallies updated by the roles.
#[derive(Debug, Default)]
pub(crate) struct Tallies {
    produced: AtomicU64,
    consumed: AtomicU64,
    active_roles: AtomicUsize,
}

impl Tallies {
    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub(crate) fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    fn active_roles(&self) -> usize {
        self.active_roles.load(Ordering::SeqCst)
    }
}

/// Marks a role as active for as long as it lives, including when the role panics.
struct ActiveRole(Arc<Tallies>);

impl ActiveRole {
    fn enter(tallies: Arc<Tallies>) -> Self {
        tallies.active_roles.fetch_add(1, Ordering::SeqCst);
        Self(tallies)
    }
}

impl Drop for ActiveRole {
    fn drop(&mut self) {
        self.0.active_roles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a producer or consumer role needs, owned by the role's thread.
#[derive(Debug, Clone)]
pub(crate) struct RoleContext {
    pub(crate) channel: BoundedChannel<Item<Payload>>,
    pub(crate) counter: Arc<GuardedCounter>,
    pub(crate) mode: AccessMode,
    pub(crate) events: EventSink,
    pub(crate) shutdown_rx: ShutdownRx,
    pub(crate) tallies: Arc<Tallies>,
    pub(crate) item_count: u64,
    pub(crate) poll_interval: Duration,
    pub(crate) produce_delay: Duration,
    pub(crate) consume_delay: Duration,
}

impl RoleContext {
    /// Returns the aggregate state as seen right now.
    ///
    /// Every read takes and releases its own lock, so the snapshot can be emitted without
    /// holding any.
    pub(crate) fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            counter_value: self.counter.read(),
            channel_occupancy: self.channel.len(),
            channel_capacity: self.channel.capacity(),
            completed: self.tallies.consumed(),
            total: self.item_count,
        }
    }

    pub(crate) fn emit(&self, kind: EventKind, subject_id: u64) {
        if self.events.is_enabled() {
            self.events.emit(kind, subject_id, self.snapshot());
        }
    }
}

#[derive(Debug)]
struct RoleHandle {
    worker_type: WorkerType,
    handle: JoinHandle<ConveyorResult<()>>,
}

impl RoleHandle {
    fn wait(self) -> ConveyorResult<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => Err(conveyor_error!(
                ErrorKind::RolePanic,
                "Pipeline role panicked",
                format!("{}: {}", self.worker_type, panic_message(payload.as_ref()))
            )),
        }
    }
}

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        roles: Vec<RoleHandle>,
        started_at: Instant,
    },
}

/// A producer/consumer run over one [`BoundedChannel`] and one [`GuardedCounter`].
///
/// The producer adds `+1` to the counter for every stored item and each consumer adds `-1`
/// for every processed item, so a run without lost updates ends with the counter equal to
/// the number of items left in the channel.
#[derive(Debug)]
pub struct Pipeline {
    run_id: RunId,
    config: PipelineConfig,
    context: RoleContext,
    shutdown_tx: ShutdownTx,
    state: PipelineState,
}

impl Pipeline {
    /// Builds a pipeline from a validated configuration. Events are tagged with a fresh
    /// [`RunId`].
    pub fn new(config: PipelineConfig, events: EventSink) -> ConveyorResult<Self> {
        config.validate()?;

        let run_id = RunId::new();
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let context = RoleContext {
            channel: BoundedChannel::new(config.capacity)?,
            counter: Arc::new(GuardedCounter::new(config.race_window())),
            mode: AccessMode::from_use_lock(config.use_lock),
            events: events.with_run_id(run_id),
            shutdown_rx,
            tallies: Arc::new(Tallies::default()),
            item_count: config.item_count,
            poll_interval: config.get_timeout(),
            produce_delay: config.produce_delay(),
            consume_delay: config.consume_delay(),
        };

        Ok(Self {
            run_id,
            config,
            context,
            shutdown_tx,
            state: PipelineState::NotStarted,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns a handle that can stop the pipeline from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.shutdown_tx.clone())
    }

    /// Spawns the producer and `consumer_count` consumers.
    pub fn start(&mut self) -> ConveyorResult<()> {
        if !matches!(self.state, PipelineState::NotStarted) {
            bail!(ErrorKind::AlreadyStarted, "Pipeline was already started");
        }

        info!(
            run_id = %self.run_id,
            capacity = self.config.capacity,
            consumers = self.config.consumer_count,
            items = self.config.item_count,
            use_lock = self.config.use_lock,
            "starting pipeline"
        );

        let started_at = Instant::now();
        let mut roles = Vec::with_capacity(self.config.consumer_count + 1);

        let spawned = self.spawn_roles(&mut roles);

        if let Err(err) = spawned {
            error!(run_id = %self.run_id, error = %err, "failed to spawn pipeline roles");

            self.shutdown_tx.shutdown();
            self.context.channel.close();
            for role in roles {
                let _ = role.wait();
            }

            return Err(err);
        }

        self.state = PipelineState::Started { roles, started_at };

        Ok(())
    }

    /// Asks every role to exit at its next poll point. Idempotent.
    pub fn request_stop(&self) {
        info!(run_id = %self.run_id, "stop requested");
        self.shutdown_tx.shutdown();
    }

    /// Returns `true` between `start` and the moment every role has exited.
    pub fn is_running(&self) -> bool {
        matches!(self.state, PipelineState::Started { .. })
            && self.context.tallies.active_roles() > 0
    }

    /// Returns the current aggregate state.
    ///
    /// A channel pinned at capacity across several snapshots while `completed` stays flat
    /// means consumers are stuck.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.context.snapshot()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.context.channel.stats()
    }

    pub fn counter_diagnostics(&self) -> CounterDiagnostics {
        self.context.counter.diagnostics()
    }

    /// Waits for every role to exit and returns the final tallies.
    ///
    /// Role failures are aggregated into one error. A pipeline that was never started
    /// returns an empty report.
    pub fn wait(self) -> ConveyorResult<PipelineReport> {
        let PipelineState::Started { roles, started_at } = self.state else {
            info!(run_id = %self.run_id, "pipeline was not started, nothing to wait for");

            return Ok(PipelineReport::default());
        };

        let mut errors: Vec<ConveyorError> = Vec::new();
        for role in roles {
            let worker_type = role.worker_type;
            if let Err(err) = role.wait() {
                error!(
                    run_id = %self.run_id,
                    role = %worker_type,
                    error = %err,
                    "pipeline role failed"
                );
                errors.push(err);
                // Remaining roles must not outlive a failed sibling.
                self.shutdown_tx.shutdown();
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        let produced = self.context.tallies.produced();
        let consumed = self.context.tallies.consumed();
        let report = PipelineReport {
            produced,
            consumed,
            resident: self.context.channel.len() as u64,
            counter_value: self.context.counter.read(),
            expected_counter_value: produced as i64 - consumed as i64,
            stopped_early: produced < self.config.item_count || consumed < produced,
            elapsed: started_at.elapsed(),
        };

        info!(
            run_id = %self.run_id,
            produced = report.produced,
            consumed = report.consumed,
            resident = report.resident,
            counter_value = report.counter_value,
            lost_updates = report.lost_updates(),
            stopped_early = report.stopped_early,
            "pipeline finished"
        );

        Ok(report)
    }

    /// Requests a stop and waits for every role to exit.
    pub fn shutdown_and_wait(self) -> ConveyorResult<PipelineReport> {
        self.request_stop();
        self.wait()
    }

    fn spawn_roles(&self, roles: &mut Vec<RoleHandle>) -> ConveyorResult<()> {
        roles.push(self.spawn_role(WorkerType::Producer, run_producer)?);

        for index in 0..self.config.consumer_count {
            let consumer = self.spawn_role(WorkerType::Consumer { index }, move |context| {
                run_consumer(context, index);
                Ok(())
            })?;
            roles.push(consumer);
        }

        Ok(())
    }

    fn spawn_role<F>(&self, worker_type: WorkerType, role: F) -> ConveyorResult<RoleHandle>
    where
        F: FnOnce(&RoleContext) -> ConveyorResult<()> + Send + 'static,
    {
        let context = self.context.clone();
        let active = ActiveRole::enter(Arc::clone(&context.tallies));
        let span = info_span!("pipeline_role", run_id = %self.run_id, role = %worker_type);

        let handle = thread::Builder::new()
            .name(worker_type.thread_name())
            .spawn(move || {
                let _active = active;
                let _enter = span.enter();
                role(&context)
            })?;

        Ok(RoleHandle {
            worker_type,
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_channel;

    fn config() -> PipelineConfig {
        PipelineConfig {
            capacity: 2,
            item_count: 6,
            consumer_count: 2,
            get_timeout_ms: 20,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            capacity: 0,
            ..PipelineConfig::default()
        };

        let err = Pipeline::new(config, EventSink::disabled()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn waiting_on_unstarted_pipeline_returns_empty_report() {
        let pipeline = Pipeline::new(config(), EventSink::disabled()).unwrap();
        assert!(!pipeline.is_running());

        let report = pipeline.wait().unwrap();
        assert_eq!(report, PipelineReport::default());
    }

    #[test]
    fn starting_twice_fails() {
        let mut pipeline = Pipeline::new(config(), EventSink::disabled()).unwrap();
        pipeline.start().unwrap();

        let err = pipeline.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyStarted);

        pipeline.wait().unwrap();
    }

    #[test]
    fn run_to_completion_drains_every_item() {
        let (events, mut stream) = create_event_channel();
        let mut pipeline = Pipeline::new(config(), events).unwrap();
        let run_id = pipeline.run_id();
        pipeline.start().unwrap();

        let report = pipeline.wait().unwrap();
        assert_eq!(report.produced, 6);
        assert_eq!(report.consumed, 6);
        assert_eq!(report.resident, 0);
        assert_eq!(report.counter_value, 0);
        assert_eq!(report.lost_updates(), 0);
        assert!(!report.stopped_early);

        let events = stream.drain();
        let count = |kind| events.iter().filter(|event| event.kind == kind).count();
        assert_eq!(count(EventKind::Enqueued), 6);
        assert_eq!(count(EventKind::Dequeued), 6);
        assert_eq!(count(EventKind::ProducerFinished), 1);
        assert_eq!(count(EventKind::ConsumerStopped), 2);
        assert!(events.iter().all(|event| event.run_id == Some(run_id)));
    }

    #[test]
    fn lost_updates_is_expected_minus_actual() {
        let report = PipelineReport {
            counter_value: 3,
            expected_counter_value: 5,
            ..PipelineReport::default()
        };
        assert_eq!(report.lost_updates(), 2);
    }
}
