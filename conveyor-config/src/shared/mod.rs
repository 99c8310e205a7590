//! Shared configuration types for conveyor runs.

mod base;
mod pipeline;
mod race;
mod runner;

pub use base::ValidationError;
pub use pipeline::PipelineConfig;
pub use race::RaceConfig;
pub use runner::RunnerConfig;
