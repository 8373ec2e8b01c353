// Batch/vector data structure

use arrow::array::{make_array, Array, ArrayRef, MutableArrayData};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch as ArrowRecordBatch;
use std::sync::Arc;
pub use arrow::datatypes::{Schema, SchemaRef};

use crate::error::{EngineError, Result};
use crate::memory::{MemoryPool, MemoryReservation};

/// ColumnBatch wraps Arrow's columnar data for vectorized execution.
///
/// A batch is moved through the pipeline by value. Whoever holds it last
/// closes it (or drops it), which releases any memory reserved for it.
/// Dictionary-encoded columns are regular Arrow `Dictionary` columns; their
/// value arrays are the only buffers shared between batches.
#[derive(Debug)]
pub struct ColumnBatch {
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    num_rows: usize,
    sequence_number: u64,
    reservation: Option<MemoryReservation>,
}

impl ColumnBatch {
    /// Create a new ColumnBatch from a schema and columns
    ///
    /// # Arguments
    /// * `schema` - The schema describing the columns
    /// * `columns` - Vector of Arrow arrays, one per column
    ///
    /// # Errors
    /// Returns an error if the number of columns doesn't match the schema,
    /// or if column lengths are inconsistent
    pub fn try_new(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<Self> {
        if schema.fields().len() != columns.len() {
            return Err(EngineError::InvalidArgument(format!(
                "Schema has {} fields but {} columns provided",
                schema.fields().len(),
                columns.len()
            )));
        }

        // Check that all columns have the same length
        let num_rows = columns.first().map(|col| col.len()).unwrap_or(0);
        for (idx, col) in columns.iter().enumerate() {
            if col.len() != num_rows {
                return Err(EngineError::InvalidArgument(format!(
                    "Column {} has length {} but expected {}",
                    idx,
                    col.len(),
                    num_rows
                )));
            }
        }

        Ok(Self {
            schema,
            columns,
            num_rows,
            sequence_number: 0,
            reservation: None,
        })
    }

    /// Zero-row batch with the given schema
    pub fn new_empty(schema: SchemaRef) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| arrow::array::new_empty_array(f.data_type()))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
            sequence_number: 0,
            reservation: None,
        }
    }

    /// Create a new ColumnBatch from an ArrowRecordBatch
    pub fn from_arrow(batch: ArrowRecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            columns: batch.columns().to_vec(),
            num_rows: batch.num_rows(),
            sequence_number: 0,
            reservation: None,
        }
    }

    /// Convert this batch to an Arrow RecordBatch
    pub fn to_arrow(&self) -> Result<ArrowRecordBatch> {
        Ok(ArrowRecordBatch::try_new(
            self.schema.clone(),
            self.columns.clone(),
        )?)
    }

    /// Get the schema of this batch
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Get the number of rows in this batch
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Get the number of columns in this batch
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Get a reference to the columns
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    /// Get a specific column by index
    pub fn column(&self, index: usize) -> Result<&ArrayRef> {
        self.columns.get(index).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "Column index {} out of bounds (batch has {} columns)",
                index,
                self.columns.len()
            ))
        })
    }

    /// Get a column by name (first match; names may repeat after a join)
    pub fn column_by_name(&self, name: &str) -> Option<&ArrayRef> {
        let index = self.schema.fields().iter().position(|f| f.name() == name)?;
        self.columns.get(index)
    }

    /// Project the batch to the given column positions
    pub fn select_columns(&self, indices: &[usize]) -> Result<Self> {
        let schema = Arc::new(self.schema.project(indices)?);
        let columns = indices
            .iter()
            .map(|&i| self.column(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::try_new(schema, columns)?.with_sequence_number(self.sequence_number))
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn with_sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Check if the batch is empty (has zero rows)
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Bytes held by the column buffers, dictionaries included.
    pub fn memory_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.get_array_memory_size())
            .sum()
    }

    /// Bytes currently reserved against a pool for this batch.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.as_ref().map_or(0, MemoryReservation::size)
    }

    /// Account this batch's storage against `pool`.
    pub fn reserve(&mut self, pool: &Arc<MemoryPool>) -> Result<()> {
        self.reservation = None;
        self.reservation = Some(pool.try_reserve(self.memory_size())?);
        Ok(())
    }

    /// Positions of dictionary-encoded columns
    pub fn dictionary_columns(&self) -> Vec<usize> {
        self.schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f.data_type(), DataType::Dictionary(_, _)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_dictionaries(&self) -> bool {
        self.schema
            .fields()
            .iter()
            .any(|f| matches!(f.data_type(), DataType::Dictionary(_, _)))
    }

    /// Copy rows `offset..offset + length` into a batch with independent storage.
    ///
    /// Unlike an Arrow slice this does not keep the parent buffers alive, so the
    /// result can outlive the source batch without pinning its memory. Dictionary
    /// value arrays are the exception: they stay shared.
    pub fn slice(&self, offset: usize, length: usize) -> Result<Self> {
        let end = offset.checked_add(length).filter(|end| *end <= self.num_rows);
        if end.is_none() {
            return Err(EngineError::InvalidArgument(format!(
                "Slice range [{}, +{}) out of bounds for batch with {} rows",
                offset, length, self.num_rows
            )));
        }

        let copied_columns: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|col| copy_range(col, offset, length))
            .collect();

        Ok(Self::try_new(self.schema.clone(), copied_columns)?
            .with_sequence_number(self.sequence_number))
    }

    /// Split into consecutive chunks of `target_rows` rows; the last chunk may be
    /// shorter. An empty batch yields a single empty chunk.
    pub fn partition(self, target_rows: usize) -> Result<Vec<Self>> {
        if target_rows == 0 {
            return Err(EngineError::InvalidArgument(
                "partition target must be positive".to_string(),
            ));
        }
        if self.num_rows <= target_rows {
            return Ok(vec![self]);
        }

        let mut chunks = Vec::with_capacity(self.num_rows.div_ceil(target_rows));
        let mut offset = 0;
        while offset < self.num_rows {
            let length = target_rows.min(self.num_rows - offset);
            chunks.push(self.slice(offset, length)?);
            offset += length;
        }
        Ok(chunks)
    }

    /// Resolve every dictionary column to its plain values.
    ///
    /// The flattened batch is reserved against `pool`. A batch without
    /// dictionaries is returned as is.
    pub fn flatten(self, pool: &Arc<MemoryPool>) -> Result<Self> {
        if !self.has_dictionaries() {
            return Ok(self);
        }

        let mut fields = Vec::with_capacity(self.columns.len());
        let mut columns = Vec::with_capacity(self.columns.len());
        for (field, column) in self.schema.fields().iter().zip(&self.columns) {
            match field.data_type() {
                DataType::Dictionary(_, value_type) => {
                    columns.push(cast(column, value_type)?);
                    fields.push(field.as_ref().clone().with_data_type(value_type.as_ref().clone()));
                }
                _ => {
                    columns.push(column.clone());
                    fields.push(field.as_ref().clone());
                }
            }
        }

        let mut flattened = Self::try_new(Arc::new(Schema::new(fields)), columns)?
            .with_sequence_number(self.sequence_number);
        flattened.reserve(pool)?;
        tracing::trace!(
            rows = flattened.num_rows,
            bytes = flattened.reserved_bytes(),
            "flattened dictionary batch"
        );
        Ok(flattened)
    }

    /// Concatenate multiple batches together
    /// All batches must have the same schema
    pub fn concat(batches: &[Self]) -> Result<Self> {
        if batches.is_empty() {
            return Err(EngineError::InvalidArgument(
                "Cannot concatenate empty batch list".to_string(),
            ));
        }

        // Verify all batches have the same schema
        let first_schema = batches[0].schema();
        for (idx, batch) in batches.iter().enumerate().skip(1) {
            if batch.schema() != first_schema {
                return Err(EngineError::InvalidArgument(format!(
                    "Batch {} has different schema than first batch",
                    idx
                )));
            }
        }

        let num_columns = first_schema.fields().len();
        let mut concatenated_columns = Vec::with_capacity(num_columns);

        for col_idx in 0..num_columns {
            // Use Arrow's concat: it expects &[&dyn Array]
            let refs: Vec<&dyn Array> = batches
                .iter()
                .map(|batch| batch.columns[col_idx].as_ref())
                .collect();
            concatenated_columns.push(arrow::compute::concat(&refs)?);
        }

        let total_rows: usize = batches.iter().map(|b| b.num_rows).sum();

        Self::try_new(first_schema.clone(), concatenated_columns).map(|batch| {
            debug_assert_eq!(batch.num_rows, total_rows);
            batch
        })
    }

    /// Release the batch's storage and memory reservation.
    ///
    /// Taking `self` makes a second close impossible to express.
    pub fn close(self) {
        tracing::trace!(
            sequence = self.sequence_number,
            rows = self.num_rows,
            "closing batch"
        );
        drop(self);
    }
}

/// Copy a row range of `array` into freshly allocated buffers.
fn copy_range(array: &ArrayRef, offset: usize, length: usize) -> ArrayRef {
    let data = array.to_data();
    let mut mutable = MutableArrayData::new(vec![&data], false, length);
    mutable.extend(0, offset, offset + length);
    make_array(mutable.freeze())
}

/// Schema with every dictionary field replaced by its value type.
pub fn flattened_schema(schema: &Schema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Dictionary(_, value_type) => {
                f.as_ref().clone().with_data_type(value_type.as_ref().clone())
            }
            _ => f.as_ref().clone(),
        })
        .collect();
    Arc::new(Schema::new(fields))
}

impl From<ArrowRecordBatch> for ColumnBatch {
    fn from(batch: ArrowRecordBatch) -> Self {
        Self::from_arrow(batch)
    }
}

impl TryFrom<ColumnBatch> for ArrowRecordBatch {
    type Error = EngineError;

    fn try_from(batch: ColumnBatch) -> Result<Self> {
        batch.to_arrow()
    }
}
