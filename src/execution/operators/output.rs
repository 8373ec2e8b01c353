// Re-slices operator results to the canonical output batch size

use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::execution::batch::{ColumnBatch, SchemaRef};

/// Collects result rows and releases them as full batches of `batch_size`
/// rows, followed by one short terminal batch once `finish` is called.
#[derive(Debug)]
pub struct OutputBuffer {
    schema: SchemaRef,
    batch_size: usize,
    pending: Vec<ColumnBatch>,
    pending_rows: usize,
    ready: VecDeque<ColumnBatch>,
    next_sequence: u64,
    finished: bool,
}

impl OutputBuffer {
    pub fn new(schema: SchemaRef, batch_size: usize) -> Self {
        Self {
            schema,
            batch_size,
            pending: Vec::new(),
            pending_rows: 0,
            ready: VecDeque::new(),
            next_sequence: 0,
            finished: false,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Append result rows; full batches become ready immediately.
    pub fn push(&mut self, batch: ColumnBatch) -> Result<()> {
        if self.finished {
            return Err(EngineError::InvalidState(
                "push after output was finished".to_string(),
            ));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.pending_rows += batch.num_rows();
        self.pending.push(batch);
        if self.pending_rows < self.batch_size {
            return Ok(());
        }

        let combined = self.take_pending()?;
        for chunk in combined.partition(self.batch_size)? {
            if chunk.num_rows() == self.batch_size {
                self.emit(chunk);
            } else {
                self.pending_rows = chunk.num_rows();
                self.pending.push(chunk);
            }
        }
        Ok(())
    }

    /// Emit whatever is pending as the terminal batch (possibly empty).
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let tail = if self.pending.is_empty() {
            ColumnBatch::new_empty(self.schema.clone())
        } else {
            self.take_pending()?
        };
        debug_assert!(tail.num_rows() < self.batch_size);
        self.emit(tail);
        self.finished = true;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ColumnBatch> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drop buffered and ready batches.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_rows = 0;
        self.ready.clear();
    }

    fn take_pending(&mut self) -> Result<ColumnBatch> {
        self.pending_rows = 0;
        let pending = std::mem::take(&mut self.pending);
        if pending.len() == 1 {
            return Ok(pending.into_iter().next().unwrap_or_else(|| {
                ColumnBatch::new_empty(self.schema.clone())
            }));
        }
        ColumnBatch::concat(&pending)
    }

    fn emit(&mut self, batch: ColumnBatch) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        tracing::trace!(sequence, rows = batch.num_rows(), "output batch ready");
        self.ready.push_back(batch.with_sequence_number(sequence));
    }
}
