//! Run configuration for an in-process block.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{OrchestraErr, Result};

/// Everything a single-block run needs; deserializable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Independent master/worker trees to run side by side.
    pub num_blocks: usize,
    /// Members per block: one master plus `block_size - 1` workers.
    pub block_size: usize,
    /// Accepted updates required before a master aggregates; 1 is pure
    /// asynchronous mode.
    pub num_sync_workers: usize,
    /// Local epoch budget per worker.
    pub epochs: usize,
    pub batch_size: usize,
    /// A root master validates every this many completed time steps.
    pub validate_every: u64,
    pub learning_rate: f32,
    /// Where the best model seen is checkpointed.
    pub checkpoint: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_blocks: 1,
            block_size: 3,
            num_sync_workers: 1,
            epochs: 2,
            batch_size: 16,
            validate_every: 4,
            learning_rate: 0.05,
            checkpoint: PathBuf::from("best_model.json"),
        }
    }
}

impl RunConfig {
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.num_blocks == 0 {
            return Err(OrchestraErr::InvalidConfig {
                what: "at least one block is required",
            });
        }
        if self.block_size < 2 {
            return Err(OrchestraErr::InvalidConfig {
                what: "block size must fit a master and at least one worker",
            });
        }
        if self.num_sync_workers == 0 || self.num_sync_workers > self.block_size - 1 {
            return Err(OrchestraErr::InvalidConfig {
                what: "num_sync_workers must be between 1 and the worker count",
            });
        }
        if self.epochs == 0 {
            return Err(OrchestraErr::InvalidConfig {
                what: "epochs must be positive",
            });
        }
        if self.batch_size == 0 {
            return Err(OrchestraErr::InvalidConfig {
                what: "batch size must be positive",
            });
        }
        if self.validate_every == 0 {
            return Err(OrchestraErr::InvalidConfig {
                what: "validate_every must be positive",
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(OrchestraErr::InvalidConfig {
                what: "learning rate must be a positive finite number",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let mut cfg = RunConfig::default();
        cfg.num_sync_workers = cfg.block_size; // more than the worker count
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.block_size = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.learning_rate = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_as_json() {
        let cfg = RunConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.block_size, cfg.block_size);
        assert_eq!(back.checkpoint, cfg.checkpoint);
    }
}
