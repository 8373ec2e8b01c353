// Pipeline driver: feeds binary operators from batch sources

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use rayon::prelude::*;

use crate::config::ExecutionConfig;
use crate::error::{EngineError, Result};
use crate::execution::batch::{ColumnBatch, SchemaRef};
use crate::execution::operators::{BinaryOperatorExecutor, JoinPhase};
use crate::execution::queue::BatchQueue;
use crate::memory::MemoryPool;
use crate::planner::physical_plan::BinaryOperatorSpec;

/// Upstream producer of batches for one operator input
pub trait BatchSource: Send {
    fn schema(&self) -> SchemaRef;

    /// Next batch of any size, or `None` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<ColumnBatch>>;
}

/// Source over batches already in memory
#[derive(Debug)]
pub struct MemorySource {
    schema: SchemaRef,
    batches: VecDeque<ColumnBatch>,
}

impl MemorySource {
    pub fn new(schema: SchemaRef, batches: Vec<ColumnBatch>) -> Self {
        Self {
            schema,
            batches: batches.into(),
        }
    }

    /// Source over Arrow record batches sharing `schema`
    pub fn from_arrow(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self::new(schema, batches.into_iter().map(ColumnBatch::from).collect())
    }
}

impl BatchSource for MemorySource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<ColumnBatch>> {
        Ok(self.batches.pop_front())
    }
}

/// One operator input: a source, a staging area and the bounded queue.
///
/// Upstream batches are coalesced so the queue only ever receives whole
/// multiples of the batch size, followed by exactly one short (possibly
/// empty) batch once the source is exhausted.
struct InputFeed {
    name: &'static str,
    source: Box<dyn BatchSource>,
    queue: BatchQueue,
    staged: Vec<ColumnBatch>,
    staged_rows: usize,
    batch_size: usize,
    ended: bool,
}

impl InputFeed {
    fn new(
        name: &'static str,
        source: Box<dyn BatchSource>,
        capacity: usize,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            name,
            source,
            queue: BatchQueue::new(capacity, batch_size)?,
            staged: Vec::new(),
            staged_rows: 0,
            batch_size,
            ended: false,
        })
    }

    /// Pull from the source until the queue is full or the input has ended.
    fn fill(&mut self) -> Result<()> {
        while !self.ended && !self.queue.is_full() {
            match self.source.next_batch()? {
                Some(batch) => self.stage(batch)?,
                None => {
                    let terminal = match self.take_staged()? {
                        Some(rest) => rest,
                        None => ColumnBatch::new_empty(self.source.schema()),
                    };
                    tracing::debug!(input = self.name, rows = terminal.num_rows(), "input ended");
                    self.queue.add(terminal)?;
                    self.ended = true;
                }
            }
        }
        Ok(())
    }

    fn stage(&mut self, batch: ColumnBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.staged_rows += batch.num_rows();
        self.staged.push(batch);
        if self.staged_rows < self.batch_size {
            return Ok(());
        }

        let Some(combined) = self.take_staged()? else {
            return Ok(());
        };
        let full_rows = combined.num_rows() / self.batch_size * self.batch_size;
        let remainder = combined.num_rows() - full_rows;
        if remainder > 0 {
            self.staged_rows = remainder;
            self.staged.push(combined.slice(full_rows, remainder)?);
            self.queue.add(combined.slice(0, full_rows)?)?;
        } else {
            self.queue.add(combined)?;
        }
        Ok(())
    }

    fn take_staged(&mut self) -> Result<Option<ColumnBatch>> {
        self.staged_rows = 0;
        let staged = std::mem::take(&mut self.staged);
        match staged.len() {
            0 => Ok(None),
            1 => Ok(staged.into_iter().next()),
            _ => ColumnBatch::concat(&staged).map(Some),
        }
    }

    /// Next queued batch, refilling from the source first when needed.
    fn next(&mut self) -> Result<ColumnBatch> {
        if self.queue.is_empty() {
            self.fill()?;
        }
        self.queue.remove().ok_or_else(|| {
            EngineError::InvalidState(format!("{} input drained past its final batch", self.name))
        })
    }

    fn close(&mut self) {
        self.staged.clear();
        self.staged_rows = 0;
        self.queue.close();
    }
}

/// Drives one binary operator from two sources to completion.
///
/// Output is drained whenever the executor can produce; otherwise the left
/// input is fed while the build side is open, then the right input. The
/// pipeline stops after the short batch that ends the output stream.
pub struct JoinPipeline {
    executor: Box<dyn BinaryOperatorExecutor>,
    left: InputFeed,
    right: InputFeed,
    batch_size: usize,
}

impl JoinPipeline {
    /// Create a new pipeline for the described operator
    ///
    /// # Errors
    /// Invalid configuration, source schemas that disagree with the operator and
    /// executor construction errors.
    pub fn try_new(
        spec: &BinaryOperatorSpec,
        left: Box<dyn BatchSource>,
        right: Box<dyn BatchSource>,
        config: &ExecutionConfig,
        pool: Arc<MemoryPool>,
    ) -> Result<Self> {
        config.validate()?;
        check_source_schema("left", &left.schema(), &spec.left_schema)?;
        check_source_schema("right", &right.schema(), &spec.right_schema)?;

        let executor = spec.create_executor(pool)?;
        let batch_size = executor.batch_size();
        Ok(Self {
            executor,
            left: InputFeed::new("left", left, config.queue_capacity, batch_size)?,
            right: InputFeed::new("right", right, config.queue_capacity, batch_size)?,
            batch_size,
        })
    }

    pub fn output_schema(&mut self) -> Result<SchemaRef> {
        self.executor.output_schema()
    }

    /// Run to completion and collect every output batch, the terminal one included.
    pub fn run(mut self) -> Result<Vec<ColumnBatch>> {
        let mut batches = Vec::new();
        self.run_with_sink(|batch| {
            batches.push(batch);
            Ok(())
        })?;
        Ok(batches)
    }

    /// Run to completion, handing each output batch to `sink` as it is produced.
    ///
    /// On any error the executor and both queues are closed before the error
    /// is returned.
    pub fn run_with_sink<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(ColumnBatch) -> Result<()>,
    {
        let _span = tracing::info_span!("join_pipeline", batch_size = self.batch_size).entered();
        let result = self.drive(&mut sink);
        if let Err(error) = &result {
            tracing::warn!(error = %error, "join pipeline aborted");
        }
        self.cancel();
        result
    }

    fn drive<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(ColumnBatch) -> Result<()>,
    {
        let mut emitted = 0usize;
        loop {
            if self.executor.can_produce() {
                if let Some(batch) = self.executor.produce()? {
                    let terminal = batch.num_rows() < self.batch_size;
                    emitted += 1;
                    sink(batch)?;
                    if terminal {
                        tracing::debug!(batches = emitted, "join pipeline finished");
                        return Ok(());
                    }
                    continue;
                }
            }

            if self.executor.need_consume_left() {
                let batch = self.left.next()?;
                self.executor.consume_left(batch)?;
            } else if self.executor.need_consume_right() {
                let batch = self.right.next()?;
                self.executor.consume_right(batch)?;
            } else if self.executor.phase() == JoinPhase::Done {
                return Err(EngineError::InvalidState(
                    "executor finished without a terminal batch".to_string(),
                ));
            } else {
                return Err(EngineError::InvalidState(format!(
                    "executor stalled in phase {:?}",
                    self.executor.phase()
                )));
            }
        }
    }

    /// Stop driving and release everything the pipeline holds. Idempotent.
    pub fn cancel(&mut self) {
        self.executor.close();
        self.left.close();
        self.right.close();
    }
}

fn check_source_schema(side: &str, actual: &SchemaRef, expected: &SchemaRef) -> Result<()> {
    let matches = actual.fields().len() == expected.fields().len()
        && actual
            .fields()
            .iter()
            .zip(expected.fields().iter())
            .all(|(a, e)| a.data_type() == e.data_type());
    if matches {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "{side} source schema does not match the operator's {side} schema"
        )))
    }
}

/// Run independent pipelines on the rayon pool, one result per pipeline in order.
pub fn run_pipelines_parallel(pipelines: Vec<JoinPipeline>) -> Vec<Result<Vec<ColumnBatch>>> {
    pipelines.into_par_iter().map(JoinPipeline::run).collect()
}
