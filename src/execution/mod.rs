pub mod batch;
pub mod driver;
pub mod operators;
pub mod queue;

pub use batch::ColumnBatch;
pub use driver::{run_pipelines_parallel, BatchSource, JoinPipeline, MemorySource};
pub use queue::BatchQueue;
