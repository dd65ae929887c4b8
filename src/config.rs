use serde::{Deserialize, Serialize};

use crate::error::{ExpansionError, Result};

/// Starting labeling of an engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialLabeling {
    /// Every site starts at label 0.
    #[default]
    Zero,
    /// Every site starts at its cheapest unary label.
    BestUnary,
}

/// All tunable parameters of an expansion run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    // Parallelism: 1 selects the sequential path over the whole grid.
    pub workers: usize,
    /// Side of the square blocks for the parallel path; 0 lets the engine choose.
    pub block_size: usize,

    // Termination
    pub max_passes: usize,

    pub initial: InitialLabeling,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            block_size: 0,
            max_passes: 100,
            initial: InitialLabeling::Zero,
        }
    }
}

impl ExpansionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ExpansionError::malformed("worker count must be at least 1"));
        }
        if self.max_passes == 0 {
            return Err(ExpansionError::malformed("max_passes must be at least 1"));
        }
        Ok(())
    }

    pub fn is_parallel(&self) -> bool {
        self.workers > 1
    }
}
