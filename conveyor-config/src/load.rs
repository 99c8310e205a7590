//! Layered loading of [`RunnerConfig`].
//!
//! A run is configured from up to three layers, later ones winning:
//!
//! 1. `configuration/base.{yaml,yml,json}` (required),
//! 2. `configuration/{dev,prod}.{yaml,yml,json}` picked by `APP_ENVIRONMENT` (optional),
//! 3. `APP_`-prefixed environment variables, nested with `__` (`APP_PIPELINE__CAPACITY=8`).
//!
//! Every file is parsed on its own before the layers are merged so a syntax error names the
//! file it came from. Validation is left to the caller, which may still override values.

use std::io;
use std::path::{Path, PathBuf};

use config::{File, FileFormat};
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::RunnerConfig;

/// Name of the directory holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Stem of the required base file.
const BASE_STEM: &str = "base";

/// File extensions tried for every layer, in order.
const EXTENSIONS: [(&str, FileFormat); 3] = [
    ("yaml", FileFormat::Yaml),
    ("yml", FileFormat::Yaml),
    ("json", FileFormat::Json),
];

/// Errors raised while loading a [`RunnerConfig`].
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("no base configuration (base.yaml, base.yml or base.json) in `{0}`")]
    MissingBaseFile(PathBuf),

    #[error("failed to parse `{path}`: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("failed to build the runner configuration: {0}")]
    Merge(#[source] config::ConfigError),
}

/// One configuration file taking part in a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub path: PathBuf,
    pub format: FileFormat,
}

impl ConfigLayer {
    fn source(&self) -> File<config::FileSourceFile, FileFormat> {
        File::from(self.path.as_path()).format(self.format)
    }
}

/// Loads the runner configuration rooted at the working directory, with the environment taken
/// from `APP_ENVIRONMENT`.
pub fn load_runner_config() -> Result<RunnerConfig, LoadConfigError> {
    let root = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_runner_config_from(&root, environment)
}

/// Loads the runner configuration from `root/configuration` for `environment`.
pub fn load_runner_config_from(
    root: &Path,
    environment: Environment,
) -> Result<RunnerConfig, LoadConfigError> {
    let mut builder = config::Config::builder();
    for layer in configuration_layers(root, environment)? {
        config::Config::builder()
            .add_source(layer.source())
            .build()
            .map_err(|source| LoadConfigError::InvalidFile {
                path: layer.path.clone(),
                source,
            })?;

        builder = builder.add_source(layer.source());
    }

    let variables = config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true);

    builder
        .add_source(variables)
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(LoadConfigError::Merge)
}

/// Returns the files a load for `environment` would read, base first.
pub fn configuration_layers(
    root: &Path,
    environment: Environment,
) -> Result<Vec<ConfigLayer>, LoadConfigError> {
    let directory = root.join(CONFIGURATION_DIR);
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(directory));
    }

    let base = find_layer(&directory, BASE_STEM)
        .ok_or_else(|| LoadConfigError::MissingBaseFile(directory.clone()))?;

    Ok(std::iter::once(base)
        .chain(find_layer(&directory, environment.as_str()))
        .collect())
}

fn find_layer(directory: &Path, stem: &str) -> Option<ConfigLayer> {
    EXTENSIONS.iter().find_map(|(extension, format)| {
        let path = directory.join(format!("{stem}.{extension}"));
        path.is_file().then(|| ConfigLayer {
            path,
            format: *format,
        })
    })
}
