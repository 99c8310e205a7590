//! Bounded-buffer pipeline with cooperative shutdown and contention diagnostics.
//!
//! Two concurrency models live side by side and never share state:
//!
//! - the preemptive model runs on OS threads: [`channel::BoundedChannel`],
//!   [`counter::GuardedCounter`], [`workers::WorkerPool`] and the producer/consumer
//!   [`pipeline::Pipeline`];
//! - the cooperative model polls futures from one task: [`scheduler::CooperativeScheduler`].
//!
//! Components report progress through [`events::EventSink`] and never touch presentation
//! state themselves.

mod macros;

pub mod channel;
pub mod concurrency;
pub mod counter;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod race;
pub mod scheduler;
pub mod types;
pub mod workers;
