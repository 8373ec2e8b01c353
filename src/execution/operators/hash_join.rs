// Hash join: build on the left input, probe with the right

use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, UInt32Array};
use arrow::datatypes::{Field, Schema};
use arrow_select::interleave::interleave;
use arrow_select::take::take;

use crate::error::{EngineError, Result};
use crate::execution::batch::{flattened_schema, ColumnBatch, SchemaRef};
use crate::execution::operators::join_index::{
    check_key_types, extract_keys, JoinIndex, JoinIndexBuilder, RowRef,
};
use crate::execution::operators::output::OutputBuffer;
use crate::execution::operators::{BinaryOperatorExecutor, JoinPhase, OperatorState};
use crate::memory::MemoryPool;
use crate::planner::physical_plan::JoinKind;

/// Equi-join executor.
///
/// Left batches are retained as they arrive (dictionary columns untouched)
/// and their keys recorded; the hash table is built once the left input
/// ends. Right batches are flattened and probed one at a time. Output rows
/// are left columns followed by right columns.
pub struct HashJoinExecutor {
    kind: JoinKind,
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    batch_size: usize,
    pool: Arc<MemoryPool>,
    state: OperatorState,
    schema: Option<SchemaRef>,
    retained: Vec<ColumnBatch>,
    builder: Option<JoinIndexBuilder>,
    index: Option<JoinIndex>,
    output: Option<OutputBuffer>,
    /// Next retained batch to scan for unmatched rows while flushing
    flush_cursor: usize,
}

impl HashJoinExecutor {
    /// Create a new hash join executor
    ///
    /// # Arguments
    /// * `left_keys` / `right_keys` - Key column positions, compared pairwise
    /// * `batch_size` - Canonical rows per batch on inputs and output
    ///
    /// # Errors
    /// Returns `ArgumentMismatch` if a key pair cannot be compared, and
    /// `InvalidArgument` for bad key positions or a zero batch size.
    pub fn try_new(
        kind: JoinKind,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        batch_size: usize,
        pool: Arc<MemoryPool>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        check_key_types(&left_schema, &left_keys, &right_schema, &right_keys)?;

        Ok(Self {
            kind,
            left_schema,
            right_schema,
            left_keys,
            right_keys,
            batch_size,
            pool,
            state: OperatorState::default(),
            schema: None,
            retained: Vec::new(),
            builder: Some(JoinIndexBuilder::default()),
            index: None,
            output: None,
            flush_cursor: 0,
        })
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    /// Bytes reserved for retained build batches
    pub fn retained_bytes(&self) -> usize {
        self.retained.iter().map(ColumnBatch::reserved_bytes).sum()
    }

    fn build_schema(&self) -> SchemaRef {
        let pad_left = self.kind.preserves_probe();
        let pad_right = self.kind.preserves_build();
        let right = flattened_schema(&self.right_schema);

        let mut fields: Vec<Field> = self
            .left_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_nullable(f.is_nullable() || pad_left))
            .collect();
        fields.extend(
            right
                .fields()
                .iter()
                .map(|f| f.as_ref().clone().with_nullable(f.is_nullable() || pad_right)),
        );
        Arc::new(Schema::new(fields))
    }

    fn build_batch(&mut self, batch: ColumnBatch) -> Result<()> {
        check_arity(&batch, &self.left_schema, "left")?;
        let ends_input = batch.num_rows() < self.batch_size;
        if !batch.is_empty() {
            let key_columns = self
                .left_keys
                .iter()
                .map(|&i| batch.column(i).cloned())
                .collect::<Result<Vec<_>>>()?;
            let keys = extract_keys(&key_columns, batch.num_rows())?;

            let mut batch = batch;
            batch.reserve(&self.pool)?;
            let builder = self.builder.as_mut().ok_or_else(|| {
                EngineError::InvalidState("join index builder already consumed".to_string())
            })?;
            builder.add_batch(keys);
            self.retained.push(batch);
        }
        if ends_input {
            self.finish_build()?;
        }
        Ok(())
    }

    fn finish_build(&mut self) -> Result<()> {
        let _span = tracing::debug_span!(
            "hash_join_build",
            kind = ?self.kind,
            batches = self.retained.len(),
            reserved_bytes = self.retained_bytes(),
        )
        .entered();

        let builder = self.builder.take().ok_or_else(|| {
            EngineError::InvalidState("join index builder already consumed".to_string())
        })?;
        self.index = Some(builder.finish(self.kind.preserves_build()));
        let schema = self.output_schema()?;
        self.output = Some(OutputBuffer::new(schema, self.batch_size));
        self.state.advance(JoinPhase::Probing)
    }

    fn probe_batch(&mut self, batch: ColumnBatch) -> Result<()> {
        check_arity(&batch, &self.right_schema, "right")?;
        let ends_input = batch.num_rows() < self.batch_size;
        if !batch.is_empty() {
            let probe = batch.flatten(&self.pool)?;
            let joined = self.join_rows(&probe)?;
            probe.close();
            if let Some(joined) = joined {
                self.output_mut()?.push(joined)?;
            }
        }
        if ends_input {
            self.state.advance(JoinPhase::Flushing)?;
        }
        Ok(())
    }

    /// Matches for one flattened probe batch, fully materialized.
    fn join_rows(&mut self, probe: &ColumnBatch) -> Result<Option<ColumnBatch>> {
        let key_columns = self
            .right_keys
            .iter()
            .map(|&i| probe.column(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        let keys = extract_keys(&key_columns, probe.num_rows())?;
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("probe before build".to_string()))?;

        let mut left_rows: Vec<Option<RowRef>> = Vec::new();
        let mut right_rows: Vec<Option<u32>> = Vec::new();
        for (row, key) in keys.iter().enumerate() {
            let matches = key.as_ref().map_or(&[][..], |k| index.probe(k));
            if matches.is_empty() {
                if self.kind.preserves_probe() {
                    left_rows.push(None);
                    right_rows.push(Some(row as u32));
                }
                continue;
            }
            for &found in matches {
                left_rows.push(Some(found));
                right_rows.push(Some(row as u32));
            }
        }

        let _span = tracing::debug_span!(
            "hash_join_probe",
            probe_rows = probe.num_rows(),
            output_rows = left_rows.len(),
            sequence = probe.sequence_number(),
        )
        .entered();

        if left_rows.is_empty() {
            return Ok(None);
        }

        let mut columns = self.gather_left(&left_rows)?;
        let right_indices = UInt32Array::from(right_rows);
        for column in probe.columns() {
            columns.push(take(column.as_ref(), &right_indices, None)?);
        }
        let joined = ColumnBatch::try_new(self.output_schema()?, columns)?;

        if self.kind.preserves_build() {
            if let Some(index) = self.index.as_mut() {
                for found in left_rows.into_iter().flatten() {
                    index.mark_matched(found);
                }
            }
        }
        Ok(Some(joined))
    }

    /// Left columns for the given build rows; `None` becomes a NULL row.
    fn gather_left(&self, rows: &[Option<RowRef>]) -> Result<Vec<ArrayRef>> {
        let null_source = self.retained.len();
        let indices: Vec<(usize, usize)> = rows
            .iter()
            .map(|r| r.map_or((null_source, 0), |r| (r.batch, r.row)))
            .collect();

        self.left_schema
            .fields()
            .iter()
            .enumerate()
            .map(|(c, field)| {
                let padding = new_null_array(field.data_type(), 1);
                let mut sources: Vec<&dyn Array> = self
                    .retained
                    .iter()
                    .map(|b| b.columns()[c].as_ref())
                    .collect();
                sources.push(padding.as_ref());
                Ok(interleave(&sources, &indices)?)
            })
            .collect()
    }

    /// Unmatched rows of one retained batch, right columns NULL.
    fn unmatched_build_rows(&self, batch_index: usize) -> Result<Option<ColumnBatch>> {
        let (Some(index), Some(batch)) = (self.index.as_ref(), self.retained.get(batch_index))
        else {
            return Ok(None);
        };
        let rows = index.unmatched_rows(batch_index);
        if rows.is_empty() {
            return Ok(None);
        }

        let indices = UInt32Array::from(rows);
        let mut columns = batch
            .columns()
            .iter()
            .map(|c| take(c.as_ref(), &indices, None))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let schema = self.schema.clone().unwrap_or_else(|| self.build_schema());
        for field in schema.fields().iter().skip(columns.len()) {
            columns.push(new_null_array(field.data_type(), indices.len()));
        }
        Ok(Some(ColumnBatch::try_new(schema, columns)?))
    }

    fn flush(&mut self) -> Result<Option<ColumnBatch>> {
        loop {
            let output = self.output_mut()?;
            if let Some(batch) = output.pop() {
                if output.is_finished() && !output.has_ready() {
                    self.release();
                    self.state.finish();
                }
                return Ok(Some(batch));
            }

            if self.kind.preserves_build() && self.flush_cursor < self.retained.len() {
                let padded = self.unmatched_build_rows(self.flush_cursor)?;
                self.flush_cursor += 1;
                if let Some(padded) = padded {
                    self.output_mut()?.push(padded)?;
                }
                continue;
            }
            self.output_mut()?.finish()?;
        }
    }

    fn output_mut(&mut self) -> Result<&mut OutputBuffer> {
        self.output
            .as_mut()
            .ok_or_else(|| EngineError::InvalidState("output buffer not initialized".to_string()))
    }

    /// Drop the build side. Buffered output is kept.
    fn release(&mut self) {
        if !self.retained.is_empty() || self.index.is_some() {
            tracing::debug!(
                batches = self.retained.len(),
                reserved_bytes = self.retained_bytes(),
                "releasing hash join build side"
            );
        }
        self.retained.clear();
        self.builder = None;
        self.index = None;
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        tracing::warn!(error = %error, phase = ?self.state.phase(), "hash join failed");
        self.close();
        error.into_join_failure()
    }
}

/// Reject input batches whose column count differs from the declared schema.
pub(crate) fn check_arity(batch: &ColumnBatch, schema: &Schema, side: &str) -> Result<()> {
    if batch.num_columns() != schema.fields().len() {
        return Err(EngineError::InvalidArgument(format!(
            "{} input has {} columns, expected {}",
            side,
            batch.num_columns(),
            schema.fields().len()
        )));
    }
    Ok(())
}

impl BinaryOperatorExecutor for HashJoinExecutor {
    fn need_consume_left(&self) -> bool {
        self.state.need_left()
    }

    fn consume_left(&mut self, batch: ColumnBatch) -> Result<()> {
        self.state.ensure(JoinPhase::Building, "consume_left")?;
        let result = self.build_batch(batch);
        result.map_err(|e| self.fail(e))
    }

    fn need_consume_right(&self) -> bool {
        self.state.need_right() && self.index.is_some()
    }

    fn consume_right(&mut self, batch: ColumnBatch) -> Result<()> {
        self.state.ensure(JoinPhase::Probing, "consume_right")?;
        let result = self.probe_batch(batch);
        result.map_err(|e| self.fail(e))
    }

    fn can_produce(&self) -> bool {
        match self.state.phase() {
            JoinPhase::Probing => self.output.as_ref().is_some_and(OutputBuffer::has_ready),
            JoinPhase::Flushing => true,
            JoinPhase::Building | JoinPhase::Done => false,
        }
    }

    fn produce(&mut self) -> Result<Option<ColumnBatch>> {
        match self.state.phase() {
            JoinPhase::Building | JoinPhase::Done => Ok(None),
            JoinPhase::Probing => Ok(self.output.as_mut().and_then(OutputBuffer::pop)),
            JoinPhase::Flushing => {
                let result = self.flush();
                result.map_err(|e| self.fail(e))
            }
        }
    }

    fn output_schema(&mut self) -> Result<SchemaRef> {
        if self.schema.is_none() {
            self.schema = Some(self.build_schema());
        }
        self.schema
            .clone()
            .ok_or_else(|| EngineError::InvalidState("output schema unavailable".to_string()))
    }

    fn phase(&self) -> JoinPhase {
        self.state.phase()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn close(&mut self) {
        self.release();
        if let Some(output) = self.output.as_mut() {
            output.clear();
        }
        self.output = None;
        self.state.finish();
    }
}
