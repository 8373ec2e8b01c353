// Public API for the join engine

pub mod config;
pub mod error;
pub mod execution;
pub mod expr;
pub mod memory;
pub mod planner;

pub use config::ExecutionConfig;
pub use error::{EngineError, Result};
pub use execution::operators::{BinaryOperatorExecutor, JoinPhase};
pub use execution::{BatchQueue, BatchSource, ColumnBatch, JoinPipeline, MemorySource};
pub use memory::MemoryPool;
pub use planner::{BinaryOperatorSpec, JoinAlgorithm, JoinKind};
