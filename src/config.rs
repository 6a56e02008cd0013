//! Training configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default.
//!
//! ```json
//! { "learning_rate": 0.01, "epochs": 100, "seed": 42, "log_every": 10 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    /// SGD step size.
    pub learning_rate: f32,
    /// Number of update steps performed by `training::fit`.
    pub epochs: usize,
    /// Seed for the graph context generator. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Log the loss every `log_every` steps; 0 disables progress logging.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epochs: 100,
            seed: None,
            log_every: 10,
        }
    }
}

impl TrainConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "learning_rate",
                reason: format!("must be a positive finite number, got {}", self.learning_rate),
            });
        }
        Ok(())
    }
}
