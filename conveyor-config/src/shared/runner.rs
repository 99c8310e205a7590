use serde::{Deserialize, Serialize};

use crate::shared::{PipelineConfig, RaceConfig, ValidationError};

/// Root configuration loaded by the runner binary.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Pipeline and fan-out settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Race experiment settings.
    #[serde(default)]
    pub race: RaceConfig,
}

impl RunnerConfig {
    /// Validates every nested section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        self.race.validate()
    }
}
