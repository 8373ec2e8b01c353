// Bounded batch queue with repartitioning

use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::execution::batch::ColumnBatch;

/// Bounded FIFO between an upstream producer and a binary operator.
///
/// Every added batch is cut into chunks of `target_rows` rows and each chunk
/// gets the next sequence number. Capacity counts queued batches, not rows,
/// and is only checked before an `add`: a single add may overshoot it.
#[derive(Debug)]
pub struct BatchQueue {
    batches: VecDeque<ColumnBatch>,
    capacity: usize,
    target_rows: usize,
    next_sequence: u64,
}

impl BatchQueue {
    pub fn new(capacity: usize, target_rows: usize) -> Result<Self> {
        if capacity == 0 || target_rows == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "queue capacity ({capacity}) and target rows ({target_rows}) must be positive"
            )));
        }
        Ok(Self {
            batches: VecDeque::with_capacity(capacity),
            capacity,
            target_rows,
            next_sequence: 0,
        })
    }

    /// Partition `batch` and enqueue the chunks.
    ///
    /// The producer must check [`BatchQueue::is_full`] first; adding to a full
    /// queue is rejected and the batch is released.
    pub fn add(&mut self, batch: ColumnBatch) -> Result<()> {
        if self.is_full() {
            return Err(EngineError::InvalidState(format!(
                "add on full queue ({} batches queued)",
                self.batches.len()
            )));
        }
        for chunk in batch.partition(self.target_rows)? {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            tracing::trace!(sequence, rows = chunk.num_rows(), "enqueue batch");
            self.batches.push_back(chunk.with_sequence_number(sequence));
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.batches.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn target_rows(&self) -> usize {
        self.target_rows
    }

    /// Pop the oldest batch; the caller takes ownership.
    pub fn remove(&mut self) -> Option<ColumnBatch> {
        self.batches.pop_front()
    }

    /// Release every queued batch. Used when a pipeline is torn down early.
    pub fn close(&mut self) {
        if !self.batches.is_empty() {
            tracing::debug!(dropped = self.batches.len(), "closing non-empty batch queue");
        }
        self.batches.drain(..).for_each(ColumnBatch::close);
    }
}
