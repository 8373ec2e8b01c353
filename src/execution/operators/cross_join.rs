// Cross join with an output-expression list

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::datatypes::{Field, Schema};
use arrow_select::take::take;

use crate::error::{EngineError, Result};
use crate::execution::batch::{flattened_schema, ColumnBatch, SchemaRef};
use crate::execution::operators::filter::FilterOperator;
use crate::execution::operators::hash_join::check_arity;
use crate::execution::operators::output::OutputBuffer;
use crate::execution::operators::{BinaryOperatorExecutor, JoinPhase, OperatorState};
use crate::expr::{projected_schema, NamedExpr, ScalarExpr};
use crate::memory::MemoryPool;
use crate::planner::physical_plan::JoinKind;

/// Pairs every left row with every right row.
///
/// The left input is flattened and materialized into one dense build batch
/// when it ends. Each right batch then yields the left-major Cartesian
/// product in chunks of at most `batch_size` pairs; an optional condition
/// drops pairs (NULL counts as false) and the output list is evaluated over
/// the survivors. Expression column positions index the flattened left
/// schema followed by the flattened right schema.
pub struct CrossJoinExecutor {
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    pair_schema: SchemaRef,
    condition: Option<FilterOperator>,
    output_exprs: Vec<NamedExpr>,
    batch_size: usize,
    pool: Arc<MemoryPool>,
    state: OperatorState,
    schema: Option<SchemaRef>,
    pending_left: Vec<ColumnBatch>,
    build_rows: Option<ColumnBatch>,
    output: Option<OutputBuffer>,
}

impl CrossJoinExecutor {
    /// Create a new cross join executor
    ///
    /// # Errors
    /// Outer join kinds, a non-boolean condition, invalid output expressions
    /// and a zero batch size are rejected.
    pub fn try_new(
        kind: JoinKind,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
        condition: Option<ScalarExpr>,
        output_exprs: Vec<NamedExpr>,
        batch_size: usize,
        pool: Arc<MemoryPool>,
    ) -> Result<Self> {
        if kind != JoinKind::Inner {
            return Err(EngineError::InvalidArgument(format!(
                "cross join only supports inner joins, got {kind:?}"
            )));
        }
        if batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }

        let pair_schema = pair_schema(&left_schema, &right_schema);
        let condition = condition
            .map(|predicate| FilterOperator::new(predicate, pair_schema.clone()))
            .transpose()?;
        let schema = projected_schema(&output_exprs, &pair_schema)?;

        Ok(Self {
            left_schema,
            right_schema,
            pair_schema,
            condition,
            output_exprs,
            batch_size,
            pool,
            state: OperatorState::default(),
            schema: Some(schema),
            pending_left: Vec::new(),
            build_rows: None,
            output: None,
        })
    }

    /// Rows in the materialized build side, once the left input has ended.
    pub fn build_row_count(&self) -> Option<usize> {
        self.build_rows.as_ref().map(ColumnBatch::num_rows)
    }

    fn build_batch(&mut self, batch: ColumnBatch) -> Result<()> {
        check_arity(&batch, &self.left_schema, "left")?;
        let ends_input = batch.num_rows() < self.batch_size;
        if !batch.is_empty() {
            let mut flat = batch.flatten(&self.pool)?;
            if flat.reserved_bytes() == 0 {
                flat.reserve(&self.pool)?;
            }
            self.pending_left.push(flat);
        }
        if ends_input {
            self.finish_build()?;
        }
        Ok(())
    }

    fn finish_build(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_left);
        let mut build_rows = match pending.len() {
            0 => ColumnBatch::new_empty(flattened_schema(&self.left_schema)),
            1 => pending.into_iter().next().ok_or_else(|| {
                EngineError::InvalidState("missing build batch".to_string())
            })?,
            _ => {
                let merged = ColumnBatch::concat(&pending)?;
                drop(pending);
                merged
            }
        };
        if build_rows.num_rows() > u32::MAX as usize {
            return Err(EngineError::InvalidArgument(format!(
                "cross join build side has {} rows, more than can be indexed",
                build_rows.num_rows()
            )));
        }
        if build_rows.reserved_bytes() == 0 && !build_rows.is_empty() {
            build_rows.reserve(&self.pool)?;
        }
        tracing::debug!(
            rows = build_rows.num_rows(),
            reserved_bytes = build_rows.reserved_bytes(),
            "cross join build rows materialized"
        );
        self.build_rows = Some(build_rows);

        let schema = self.output_schema()?;
        self.output = Some(OutputBuffer::new(schema, self.batch_size));
        self.state.advance(JoinPhase::Probing)
    }

    fn probe_batch(&mut self, batch: ColumnBatch) -> Result<()> {
        check_arity(&batch, &self.right_schema, "right")?;
        let ends_input = batch.num_rows() < self.batch_size;
        let has_build_rows = self.build_rows.as_ref().is_some_and(|b| !b.is_empty());
        if !batch.is_empty() && has_build_rows {
            let probe = batch.flatten(&self.pool)?;
            let joined = self.pair_rows(&probe)?;
            probe.close();
            let output = self.output_mut()?;
            for chunk in joined {
                output.push(chunk)?;
            }
        }
        if ends_input {
            self.state.advance(JoinPhase::Flushing)?;
        }
        Ok(())
    }

    /// Evaluated output for every (build row, probe row) pair, left-major.
    fn pair_rows(&self, probe: &ColumnBatch) -> Result<Vec<ColumnBatch>> {
        let build = self
            .build_rows
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("probe before build".to_string()))?;
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| EngineError::InvalidState("output schema unavailable".to_string()))?;

        let right_rows = probe.num_rows();
        let total = build.num_rows().checked_mul(right_rows).ok_or_else(|| {
            EngineError::InvalidArgument("cross join pair count overflows".to_string())
        })?;

        let _span = tracing::debug_span!(
            "cross_join_probe",
            build_rows = build.num_rows(),
            probe_rows = right_rows,
            pairs = total,
            sequence = probe.sequence_number(),
        )
        .entered();

        let mut chunks = Vec::with_capacity(total.div_ceil(self.batch_size));
        let mut start = 0;
        while start < total {
            let end = (start + self.batch_size).min(total);
            let left_indices =
                UInt32Array::from_iter_values((start..end).map(|p| (p / right_rows) as u32));
            let right_indices =
                UInt32Array::from_iter_values((start..end).map(|p| (p % right_rows) as u32));

            let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.pair_schema.fields().len());
            for column in build.columns() {
                columns.push(take(column.as_ref(), &left_indices, None)?);
            }
            for column in probe.columns() {
                columns.push(take(column.as_ref(), &right_indices, None)?);
            }
            let pairs = ColumnBatch::try_new(self.pair_schema.clone(), columns)?;
            let pairs = match &self.condition {
                Some(condition) => condition.execute(&pairs)?,
                None => pairs,
            };

            if !pairs.is_empty() {
                let evaluated = self
                    .output_exprs
                    .iter()
                    .map(|e| e.expr.evaluate(&pairs))
                    .collect::<Result<Vec<_>>>()?;
                chunks.push(ColumnBatch::try_new(schema.clone(), evaluated)?);
            }
            start = end;
        }
        Ok(chunks)
    }

    fn flush(&mut self) -> Result<Option<ColumnBatch>> {
        let output = self.output_mut()?;
        if !output.has_ready() {
            output.finish()?;
        }
        let batch = output.pop();
        if output.is_finished() && !output.has_ready() {
            self.release();
            self.state.finish();
        }
        Ok(batch)
    }

    fn output_mut(&mut self) -> Result<&mut OutputBuffer> {
        self.output
            .as_mut()
            .ok_or_else(|| EngineError::InvalidState("output buffer not initialized".to_string()))
    }

    fn release(&mut self) {
        if let Some(build) = self.build_rows.take() {
            tracing::debug!(
                rows = build.num_rows(),
                reserved_bytes = build.reserved_bytes(),
                "releasing cross join build rows"
            );
            build.close();
        }
        self.pending_left.clear();
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        tracing::warn!(error = %error, phase = ?self.state.phase(), "cross join failed");
        self.close();
        error.into_join_failure()
    }
}

/// Flattened left fields followed by flattened right fields.
fn pair_schema(left: &Schema, right: &Schema) -> SchemaRef {
    let left = flattened_schema(left);
    let right = flattened_schema(right);
    let fields: Vec<Field> = left
        .fields()
        .iter()
        .chain(right.fields().iter())
        .map(|f| f.as_ref().clone())
        .collect();
    Arc::new(Schema::new(fields))
}

impl BinaryOperatorExecutor for CrossJoinExecutor {
    fn need_consume_left(&self) -> bool {
        self.state.need_left()
    }

    fn consume_left(&mut self, batch: ColumnBatch) -> Result<()> {
        self.state.ensure(JoinPhase::Building, "consume_left")?;
        let result = self.build_batch(batch);
        result.map_err(|e| self.fail(e))
    }

    fn need_consume_right(&self) -> bool {
        self.state.need_right() && self.build_rows.is_some()
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
            self.schema = Some(projected_schema(&self.output_exprs, &self.pair_schema)?);
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
