//! Simulated I/O-bound fetches for the fan-out experiment.
//!
//! No network is touched: each fetch sleeps for a random latency and fails with a configured
//! probability, which is enough to exercise the worker pool's completeness guarantees. The
//! same targets are first fetched one at a time and then through the pool, so the run reports
//! how much the pool saves over a serial loop.

use std::thread;
use std::time::{Duration, Instant};

use conveyor::concurrency::shutdown::ShutdownRx;
use conveyor::error::{ConveyorResult, ErrorKind};
use conveyor::workers::{WorkResult, WorkerPool};
use conveyor::{bail, conveyor_error};
use rand::Rng;
use serde::Serialize;
use tracing::info;

/// A simulated fetch target.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub url: String,
}

/// Simulated response.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub content_length: usize,
    pub latency_ms: u64,
}

/// Per-target line of the fan-out summary.
#[derive(Debug, Serialize)]
pub struct FetchLine {
    pub index: usize,
    pub url: String,
    pub response: Option<FetchResponse>,
    pub error: Option<String>,
}

impl From<WorkResult<FetchTarget, FetchResponse>> for FetchLine {
    fn from(result: WorkResult<FetchTarget, FetchResponse>) -> Self {
        let index = result.index();
        let (target, outcome) = result.into_parts();
        let (response, error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(err) => {
                let message = err.detail().unwrap_or(err.description());
                (None, Some(format!("{:?}: {message}", err.kind())))
            }
        };

        Self {
            index,
            url: target.url,
            response,
            error,
        }
    }
}

pub fn build_targets(count: usize) -> Vec<FetchTarget> {
    (0..count)
        .map(|i| FetchTarget {
            url: format!("https://site-{i}.example.test/"),
        })
        .collect()
}

/// Parses a probability in `[0, 1]`, rejecting NaN and infinities.
pub fn parse_failure_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|err| format!("`{value}` is not a number: {err}"))?;

    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("`{value}` is not a probability between 0 and 1"));
    }

    Ok(rate)
}

/// Simulates fetching a [`FetchTarget`].
#[derive(Debug, Clone, Copy)]
pub struct SimulatedFetcher {
    failure_rate: f64,
    max_latency_ms: u64,
}

impl SimulatedFetcher {
    /// Creates a fetcher failing with probability `failure_rate`, which must lie in `[0, 1]`.
    pub fn new(failure_rate: f64, max_latency_ms: u64) -> ConveyorResult<Self> {
        if !(0.0..=1.0).contains(&failure_rate) {
            bail!(
                ErrorKind::InvalidConfig,
                "Failure rate must be a probability",
                format!("got {failure_rate}")
            );
        }

        Ok(Self {
            failure_rate,
            max_latency_ms,
        })
    }

    pub fn fetch(&self, target: &FetchTarget) -> ConveyorResult<FetchResponse> {
        let mut rng = rand::thread_rng();
        let latency_ms = rng.gen_range(0..=self.max_latency_ms);
        thread::sleep(Duration::from_millis(latency_ms));

        if rng.gen_bool(self.failure_rate) {
            return Err(conveyor_error!(
                ErrorKind::WorkItemFailed,
                "Simulated fetch failed",
                format!("{} did not answer within {latency_ms}ms", target.url)
            ));
        }

        Ok(FetchResponse {
            status: 200,
            content_length: rng.gen_range(512..64 * 1024),
            latency_ms,
        })
    }
}

/// Wall-clock time of the serial baseline and of the pooled run over the same items.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FanoutTiming {
    pub serial: Duration,
    pub pooled: Duration,
}

impl FanoutTiming {
    /// How many times faster the pooled run was.
    pub fn speedup(&self) -> f64 {
        self.serial.as_secs_f64() / self.pooled.as_secs_f64().max(f64::EPSILON)
    }
}

/// Runs `handler` over `items` on a single worker, then on `pool`, and times both runs.
///
/// Only the pooled results are returned. A stop request cuts both runs short.
pub fn run_with_serial_baseline<D, T, F>(
    pool: &WorkerPool,
    items: Vec<D>,
    handler: F,
    shutdown_rx: &ShutdownRx,
) -> ConveyorResult<(Vec<WorkResult<D, T>>, FanoutTiming)>
where
    D: Clone + Send,
    T: Send,
    F: Fn(&D) -> ConveyorResult<T> + Sync,
{
    info!(items = items.len(), "running serial baseline");
    let started = Instant::now();
    WorkerPool::new(1)?.run_until(items.clone(), &handler, shutdown_rx)?;
    let serial = started.elapsed();

    let started = Instant::now();
    let results = pool.run_until(items, &handler, shutdown_rx)?;
    let pooled = started.elapsed();

    Ok((results, FanoutTiming { serial, pooled }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor::concurrency::shutdown::create_shutdown_channel;

    #[test]
    fn certain_failure_and_certain_success() {
        let target = &build_targets(1)[0];

        let failing = SimulatedFetcher::new(1.0, 0).unwrap();
        let err = failing.fetch(target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkItemFailed);

        let succeeding = SimulatedFetcher::new(0.0, 1).unwrap();
        let response = succeeding.fetch(target).unwrap();
        assert_eq!(response.status, 200);
        assert!(response.latency_ms <= 1);
    }

    #[test]
    fn non_probability_failure_rates_are_rejected() {
        for rate in [f64::NAN, f64::INFINITY, -0.1, 1.5] {
            let err = SimulatedFetcher::new(rate, 10).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        }

        assert_eq!(parse_failure_rate("0.25"), Ok(0.25));
        assert!(parse_failure_rate("NaN").is_err());
        assert!(parse_failure_rate("inf").is_err());
        assert!(parse_failure_rate("2").is_err());
        assert!(parse_failure_rate("often").is_err());
    }

    #[test]
    fn pooled_run_beats_the_serial_baseline() {
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let pool = WorkerPool::new(4).unwrap();

        let (results, timing) = run_with_serial_baseline(
            &pool,
            build_targets(8),
            |_target| {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            },
            &shutdown_rx,
        )
        .unwrap();

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|result| result.is_success()));
        assert!(timing.serial >= Duration::from_millis(400));
        assert!(timing.pooled < timing.serial);
        assert!(timing.speedup() > 1.5, "speedup was {}", timing.speedup());
    }

    #[test]
    fn stop_cuts_both_runs_short() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown();
        let pool = WorkerPool::new(2).unwrap();

        let (results, _) =
            run_with_serial_baseline(&pool, build_targets(5), |_target| Ok(()), &shutdown_rx)
                .unwrap();

        assert_eq!(results.len(), 5);
        assert!(
            results
                .iter()
                .all(|result| result.error().map(|err| err.kind()) == Some(ErrorKind::Cancelled))
        );
    }
}
