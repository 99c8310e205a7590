use clap::{Args, Parser, Subcommand};
use conveyor_config::shared::RunnerConfig;

use crate::fanout::parse_failure_rate;

/// Runs the conveyor concurrency experiments.
///
/// Settings come from `configuration/` (selected by `APP_ENVIRONMENT`) and `APP_*`
/// environment variables; flags override both.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Print progress events and the final report as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,

    /// Render the recorded Prometheus metrics after the run.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Producer/consumer pipeline over a bounded channel. Ctrl-C stops it gracefully.
    Pipeline(PipelineArgs),
    /// Shared-counter race experiment.
    Race(RaceArgs),
    /// Fan-out of simulated fetches, serially and then over the worker pool.
    Fanout(FanoutArgs),
    /// Cooperative gather of three waits of 2, 3 and 4 time units.
    Gather(GatherArgs),
}

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Channel capacity.
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Items the producer creates.
    #[arg(long)]
    pub items: Option<u64>,

    /// Consumer threads.
    #[arg(long)]
    pub consumers: Option<usize>,

    /// Update the counter without the lock.
    #[arg(long)]
    pub unsafe_counter: bool,

    /// Milliseconds of simulated work per produced item.
    #[arg(long)]
    pub produce_delay_ms: Option<u64>,

    /// Milliseconds of simulated work per consumed item.
    #[arg(long)]
    pub consume_delay_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RaceArgs {
    /// `+1` callers per trial; as many `-1` callers run alongside.
    #[arg(long)]
    pub contenders: Option<usize>,

    /// Number of trials.
    #[arg(long)]
    pub trials: Option<usize>,

    /// Route updates through the lock.
    #[arg(long)]
    pub use_lock: bool,

    /// Microseconds between the read and the write of an update.
    #[arg(long)]
    pub race_window_us: Option<u64>,

    /// Stop at the first trial that does not end at zero.
    #[arg(long)]
    pub stop_on_first_deviation: bool,
}

#[derive(Args, Debug)]
pub struct FanoutArgs {
    /// Number of simulated fetch targets.
    #[arg(long, default_value_t = 37)]
    pub targets: usize,

    /// Worker pool width.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Probability that a simulated fetch fails, between 0 and 1.
    #[arg(long, default_value_t = 0.25, value_parser = parse_failure_rate)]
    pub failure_rate: f64,

    /// Upper bound of the simulated fetch latency in milliseconds.
    #[arg(long, default_value_t = 300)]
    pub max_latency_ms: u64,
}

#[derive(Args, Debug)]
pub struct GatherArgs {
    /// Length of one time unit in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub unit_ms: u64,
}

impl Command {
    /// Applies the flags of this command on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut RunnerConfig) {
        match self {
            Command::Pipeline(args) => {
                let pipeline = &mut config.pipeline;
                if let Some(capacity) = args.capacity {
                    pipeline.capacity = capacity;
                }
                if let Some(items) = args.items {
                    pipeline.item_count = items;
                }
                if let Some(consumers) = args.consumers {
                    pipeline.consumer_count = consumers;
                }
                if args.unsafe_counter {
                    pipeline.use_lock = false;
                }
                if let Some(delay) = args.produce_delay_ms {
                    pipeline.produce_delay_ms = delay;
                }
                if let Some(delay) = args.consume_delay_ms {
                    pipeline.consume_delay_ms = delay;
                }
            }
            Command::Race(args) => {
                let race = &mut config.race;
                if let Some(contenders) = args.contenders {
                    race.contenders = contenders;
                }
                if let Some(trials) = args.trials {
                    race.trials = trials;
                }
                if let Some(window) = args.race_window_us {
                    race.race_window_us = window;
                }
                race.use_lock |= args.use_lock;
                race.stop_on_first_deviation |= args.stop_on_first_deviation;
            }
            Command::Fanout(args) => {
                if let Some(workers) = args.workers {
                    config.pipeline.worker_count = workers;
                }
            }
            Command::Gather(_) => {}
        }
    }
}
