//! Conveyor runner binary.
//!
//! Loads configuration, initializes telemetry and runs one experiment. The runner is only a
//! presentation layer: it drains progress events and prints final tallies, while every bit of
//! synchronization lives in the `conveyor` crate.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use conveyor::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use conveyor::events::create_event_channel;
use conveyor::pipeline::{Pipeline, StopHandle};
use conveyor::race::run_race_experiment;
use conveyor::scheduler::CooperativeScheduler;
use conveyor::workers::WorkerPool;
use conveyor_config::shared::RunnerConfig;
use conveyor_config::{LoadConfigError, load_runner_config};
use conveyor_telemetry::metrics::init_metrics_handle;
use conveyor_telemetry::tracing::init_tracing;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{Cli, Command, FanoutArgs, GatherArgs};
use crate::fanout::{
    FanoutTiming, FetchLine, SimulatedFetcher, build_targets, run_with_serial_baseline,
};
use crate::gather::{gather_tasks, sequential_duration};
use crate::output::{OutputFormat, print_events, print_json};

mod cli;
mod fanout;
mod gather;
mod output;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default()?;
    cli.command.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let metrics_handle = runtime.block_on(async { init_metrics_handle() })?;
    let format = OutputFormat::from_json_flag(cli.json);

    runtime.block_on(async_main(cli.command, config, format))?;

    if cli.metrics {
        println!("{}", metrics_handle.render());
    }

    Ok(())
}

/// Loads the layered configuration, falling back to defaults when no `configuration`
/// directory exists next to the binary's working directory.
fn load_config_or_default() -> anyhow::Result<RunnerConfig> {
    match load_runner_config() {
        Ok(config) => Ok(config),
        Err(LoadConfigError::MissingConfigurationDirectory(path)) => {
            eprintln!(
                "configuration directory `{}` not found, using defaults",
                path.display()
            );
            Ok(RunnerConfig::default())
        }
        Err(err) => Err(err).context("failed to load configuration"),
    }
}

async fn async_main(
    command: Command,
    config: RunnerConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Command::Pipeline(_) => run_pipeline(config, format).await,
        Command::Race(_) => run_race(config, format).await,
        Command::Fanout(args) => run_fanout(config, args, format).await,
        Command::Gather(args) => run_gather(args, format).await,
    }
}

async fn run_pipeline(config: RunnerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let (events, stream) = create_event_channel();
    let mut pipeline = Pipeline::new(config.pipeline, events)?;
    info!(run_id = %pipeline.run_id(), "pipeline created");

    let printer = tokio::spawn(print_events(stream, format));
    let stop_on_ctrl_c = tokio::spawn(stop_pipeline_on_ctrl_c(pipeline.stop_handle()));

    pipeline.start()?;
    let report = tokio::task::spawn_blocking(move || pipeline.wait()).await??;

    stop_on_ctrl_c.abort();
    printer.await?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!();
            println!("produced:        {}", report.produced);
            println!("consumed:        {}", report.consumed);
            println!("left in channel: {}", report.resident);
            println!(
                "counter:         {} (expected {}, lost updates {})",
                report.counter_value,
                report.expected_counter_value,
                report.lost_updates()
            );
            println!("stopped early:   {}", report.stopped_early);
            println!("elapsed:         {:?}", report.elapsed);
        }
    }

    Ok(())
}

async fn stop_pipeline_on_ctrl_c(stop_handle: StopHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("ctrl-c received, stopping pipeline");
        stop_handle.request_stop();
    }
}

async fn stop_on_ctrl_c(shutdown_tx: ShutdownTx) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("ctrl-c received, stopping");
        shutdown_tx.shutdown();
    }
}

async fn run_race(config: RunnerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let race = config.race;
    let report = tokio::task::spawn_blocking(move || run_race_experiment(&race)).await??;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("mode:             {:?}", report.mode);
            println!("trials:           {}", report.trials);
            println!("deviating trials: {}", report.deviating_trials);
            println!("worst deviation:  {}", report.worst_deviation());
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct FanoutSummary {
    targets: usize,
    succeeded: usize,
    failed: usize,
    timing: FanoutTiming,
    results: Vec<FetchLine>,
}

async fn run_fanout(
    config: RunnerConfig,
    args: FanoutArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (events, stream) = create_event_channel();
    let pool = WorkerPool::new(config.pipeline.worker_count)?.with_events(events);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let printer = tokio::spawn(print_events(stream, format));
    let stop = tokio::spawn(stop_on_ctrl_c(shutdown_tx));

    let fetcher = SimulatedFetcher::new(args.failure_rate, args.max_latency_ms)?;
    let targets = build_targets(args.targets);

    let (results, timing) = tokio::task::spawn_blocking(move || {
        let outcome = run_with_serial_baseline(
            &pool,
            targets,
            |target| fetcher.fetch(target),
            &shutdown_rx,
        );
        // Dropping the pool drops its event sink, which ends the printer.
        drop(pool);
        outcome
    })
    .await??;

    stop.abort();
    printer.await?;

    let lines: Vec<FetchLine> = results.into_iter().map(FetchLine::from).collect();
    let failed = lines.iter().filter(|line| line.error.is_some()).count();
    let summary = FanoutSummary {
        targets: lines.len(),
        succeeded: lines.len() - failed,
        failed,
        timing,
        results: lines,
    };

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            println!();
            for line in &summary.results {
                match (&line.response, &line.error) {
                    (Some(response), _) => println!(
                        "{:>3} {} -> {} ({} bytes, {}ms)",
                        line.index,
                        line.url,
                        response.status,
                        response.content_length,
                        response.latency_ms
                    ),
                    (None, Some(error)) => {
                        println!("{:>3} {} -> {}", line.index, line.url, error)
                    }
                    (None, None) => {}
                }
            }
            println!(
                "{} targets, {} succeeded, {} failed",
                summary.targets, summary.succeeded, summary.failed
            );
            println!(
                "serial: {:?}, pool: {:?} ({:.1}x faster)",
                timing.serial,
                timing.pooled,
                timing.speedup()
            );
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct GatherSummary {
    elapsed: Duration,
    sequential: Duration,
    tasks: Vec<GatherLine>,
}

#[derive(Debug, Serialize)]
struct GatherLine {
    name: String,
    value: Option<String>,
    error: Option<String>,
}

async fn run_gather(args: GatherArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (events, stream) = create_event_channel();
    let scheduler = CooperativeScheduler::new().with_events(events);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let printer = tokio::spawn(print_events(stream, format));
    let stop = tokio::spawn(stop_on_ctrl_c(shutdown_tx));

    let unit = Duration::from_millis(args.unit_ms);
    let report = scheduler
        .run_all_until(gather_tasks(unit), shutdown_rx)
        .await;
    let sequential = sequential_duration(unit);

    stop.abort();
    // The scheduler owns the last event sink.
    drop(scheduler);
    printer.await?;

    let lines: Vec<GatherLine> = report
        .results
        .iter()
        .map(|result| GatherLine {
            name: result.name().to_string(),
            value: result.value().cloned(),
            error: result.error().map(ToString::to_string),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&GatherSummary {
            elapsed: report.elapsed,
            sequential,
            tasks: lines,
        }),
        OutputFormat::Text => {
            println!();
            for line in &lines {
                match (&line.value, &line.error) {
                    (Some(value), _) => println!("{}: {}", line.name, value),
                    (None, Some(error)) => println!("{}: failed: {}", line.name, error),
                    (None, None) => {}
                }
            }
            println!(
                "gather finished in {:?} (vs {:?} sequential)",
                report.elapsed, sequential
            );
        }
    }

    Ok(())
}
