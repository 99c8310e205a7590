mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use conveyor::concurrency::shutdown::create_shutdown_channel;
use conveyor::conveyor_error;
use conveyor::error::ErrorKind;
use conveyor::events::{EventKind, create_event_channel};
use conveyor::workers::WorkerPool;
use conveyor_telemetry::tracing::init_test_tracing;

use crate::common::count_kind;

/// Tracks how many handlers run at the same time.
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn every_item_yields_exactly_one_result_even_when_some_fail() {
    init_test_tracing();

    let (events, mut stream) = create_event_channel();
    let pool = WorkerPool::new(5).unwrap().with_events(events);
    let concurrency = Concurrency::default();

    // Every item whose index is a multiple of 4 fails: 0, 4, ..., 36 is ten items.
    let targets: Vec<String> = (0..37).map(|i| format!("https://site-{i}.test")).collect();
    let results = pool
        .run(targets, |target| {
            concurrency.enter();
            thread::sleep(Duration::from_millis(2));
            concurrency.exit();

            let index: usize = target
                .trim_start_matches("https://site-")
                .trim_end_matches(".test")
                .parse()
                .unwrap();
            if index % 4 == 0 {
                return Err(conveyor_error!(
                    ErrorKind::WorkItemFailed,
                    "Fetch failed",
                    format!("{target} timed out")
                ));
            }

            Ok(target.len())
        })
        .unwrap();

    assert_eq!(results.len(), 37);
    let indices: HashSet<_> = results.iter().map(|result| result.index()).collect();
    assert_eq!(indices, (0..37).collect::<HashSet<_>>());

    let failed: Vec<_> = results.iter().filter(|result| !result.is_success()).collect();
    assert_eq!(failed.len(), 10);
    assert!(failed.iter().all(|result| result.index() % 4 == 0));
    assert!(
        failed
            .iter()
            .all(|result| result.error().unwrap().kind() == ErrorKind::WorkItemFailed)
    );

    assert!(concurrency.peak.load(Ordering::SeqCst) <= 5);

    let events = stream.drain();
    assert_eq!(count_kind(&events, EventKind::WorkSucceeded), 27);
    assert_eq!(count_kind(&events, EventKind::WorkFailed), 10);
    assert_eq!(
        events.iter().map(|event| event.snapshot.completed).max(),
        Some(37)
    );
}

#[test]
fn stop_mid_run_cancels_unstarted_items_and_keeps_completeness() {
    init_test_tracing();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let pool = WorkerPool::new(2).unwrap();
    let started = AtomicUsize::new(0);

    let results = pool
        .run_until(
            (0..50).collect::<Vec<u32>>(),
            |n| {
                if started.fetch_add(1, Ordering::SeqCst) + 1 == 4 {
                    shutdown_tx.shutdown();
                }
                thread::sleep(Duration::from_millis(5));
                Ok(*n)
            },
            &shutdown_rx,
        )
        .unwrap();

    assert_eq!(results.len(), 50);

    let cancelled = results
        .iter()
        .filter(|result| result.error().map(|err| err.kind()) == Some(ErrorKind::Cancelled))
        .count();
    let succeeded = results.iter().filter(|result| result.is_success()).count();

    assert_eq!(cancelled + succeeded, 50);
    assert!(succeeded >= 4);
    assert!(cancelled > 0);
    assert_eq!(succeeded, started.load(Ordering::SeqCst));
}
