// Execution configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Knobs shared by queues, executors and the pipeline driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Canonical rows per batch. A shorter batch ends a stream.
    pub batch_size_rows: usize,
    /// Queue capacity in batches (not rows).
    pub queue_capacity: usize,
    /// Byte budget for the memory pool; `None` means unbounded.
    pub memory_budget_bytes: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size_rows: 8192,
            queue_capacity: 16,
            memory_budget_bytes: None,
        }
    }
}

impl ExecutionConfig {
    /// Config with the given batch size and defaults elsewhere.
    pub fn with_batch_size(batch_size_rows: usize) -> Self {
        Self {
            batch_size_rows,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size_rows == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_size_rows must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
