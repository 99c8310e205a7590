mod common;

use std::thread;
use std::time::{Duration, Instant};

use conveyor::error::ErrorKind;
use conveyor::events::{EventKind, EventSink, create_event_channel};
use conveyor::pipeline::Pipeline;
use conveyor_config::shared::PipelineConfig;
use conveyor_telemetry::tracing::init_test_tracing;

use crate::common::{count_kind, fast_pipeline_config, wait_until};

#[test]
fn guarded_run_reports_counter_equal_to_expected() {
    init_test_tracing();

    let config = PipelineConfig {
        item_count: 300,
        consumer_count: 4,
        race_window_us: 10,
        use_lock: true,
        ..fast_pipeline_config(300)
    };

    let (events, mut stream) = create_event_channel();
    let mut pipeline = Pipeline::new(config, events).unwrap();
    pipeline.start().unwrap();

    let report = pipeline.wait().unwrap();

    assert_eq!(report.produced, 300);
    assert_eq!(report.consumed, 300);
    assert_eq!(report.resident, 0);
    assert_eq!(report.counter_value, report.expected_counter_value);
    assert_eq!(report.lost_updates(), 0);
    assert!(!report.stopped_early);

    let events = stream.drain();
    assert_eq!(count_kind(&events, EventKind::Enqueued), 300);
    assert_eq!(count_kind(&events, EventKind::Dequeued), 300);
    assert_eq!(count_kind(&events, EventKind::ConsumerStopped), 4);
    assert!(
        events
            .iter()
            .all(|event| event.snapshot.channel_occupancy <= event.snapshot.channel_capacity)
    );
}

#[test]
fn consumers_stop_within_one_poll_interval_of_a_stop_request() {
    init_test_tracing();

    // Slow consumers keep the channel full so the producer is parked on backpressure.
    let config = PipelineConfig {
        consume_delay_ms: 5,
        ..fast_pipeline_config(100_000)
    };
    let poll_interval = config.get_timeout();

    let mut pipeline = Pipeline::new(config, EventSink::disabled()).unwrap();
    pipeline.start().unwrap();
    assert!(pipeline.is_running());

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.snapshot().channel_occupancy == pipeline.config().capacity
    }));

    let stop_handle = pipeline.stop_handle();
    let requested_at = Instant::now();
    stop_handle.request_stop();
    stop_handle.request_stop();
    assert!(stop_handle.is_stop_requested());

    assert!(wait_until(poll_interval * 10, || !pipeline.is_running()));
    let stopped_after = requested_at.elapsed();

    let report = pipeline.wait().unwrap();

    // One poll interval plus the item a consumer was processing, with scheduling slack.
    assert!(stopped_after < poll_interval * 4, "stopped after {stopped_after:?}");
    assert!(report.stopped_early);
    assert!(report.produced < 100_000);
    assert_eq!(report.produced, report.consumed + report.resident);
    assert_eq!(report.counter_value, report.expected_counter_value);
}

#[test]
fn stop_releases_consumers_waiting_on_an_empty_channel() {
    init_test_tracing();

    // A slow producer leaves consumers blocked in `get` most of the time.
    let config = PipelineConfig {
        produce_delay_ms: 200,
        ..fast_pipeline_config(1_000)
    };

    let mut pipeline = Pipeline::new(config, EventSink::disabled()).unwrap();
    pipeline.start().unwrap();
    thread::sleep(Duration::from_millis(30));

    let requested_at = Instant::now();
    let report = pipeline.shutdown_and_wait().unwrap();

    assert!(requested_at.elapsed() < Duration::from_secs(2));
    assert!(report.stopped_early);
    assert!(report.produced <= 1);
}

#[test]
fn natural_completion_ends_is_running_without_a_stop() {
    init_test_tracing();

    let (events, mut stream) = create_event_channel();
    let mut pipeline = Pipeline::new(fast_pipeline_config(20), events).unwrap();
    assert!(!pipeline.is_running());

    pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !pipeline.is_running()));

    let err = pipeline.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyStarted);

    let report = pipeline.wait().unwrap();
    assert_eq!(report.consumed, 20);
    assert!(!report.stopped_early);

    let events = stream.drain();
    assert_eq!(count_kind(&events, EventKind::ProducerFinished), 1);
    let finished = events
        .iter()
        .find(|event| event.kind == EventKind::ProducerFinished)
        .unwrap();
    assert_eq!(finished.subject_id, 20);
}

#[test]
fn unguarded_run_accounts_for_every_update() {
    init_test_tracing();

    let config = PipelineConfig {
        consumer_count: 4,
        race_window_us: 20,
        use_lock: false,
        ..fast_pipeline_config(200)
    };

    let mut pipeline = Pipeline::new(config, EventSink::disabled()).unwrap();
    pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(10), || !pipeline.is_running()));

    let diagnostics = pipeline.counter_diagnostics();
    let report = pipeline.wait().unwrap();

    assert_eq!(report.produced, 200);
    assert_eq!(report.produced, report.consumed + report.resident);
    assert_eq!(report.expected_counter_value, 0);
    assert_eq!(
        report.lost_updates(),
        report.expected_counter_value - report.counter_value
    );
    assert_eq!(diagnostics.value, report.counter_value);
    assert_eq!(diagnostics.safe_updates, 0);
    assert_eq!(diagnostics.unsafe_updates, report.produced + report.consumed);
    assert_eq!(diagnostics.contended_acquisitions, 0);
}
