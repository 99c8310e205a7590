//! Configuration loading and shared configuration types for conveyor runs.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{
    ConfigLayer, LoadConfigError, configuration_layers, load_runner_config, load_runner_config_from,
};
