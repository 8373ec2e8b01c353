// Build-side hash index for the hash join

use std::collections::HashMap;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema, UInt64Type};

use crate::error::{EngineError, Result};

/// Comparable value of one key column.
///
/// Integers of every width share one representation so an `Int32` key can
/// match an `Int64` key. Floats are stored by bit pattern after folding
/// `-0.0` into `0.0`; NaN has no key and never matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i128),
    Float(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl KeyValue {
    fn float(value: f64) -> Option<Self> {
        if value.is_nan() {
            return None;
        }
        Some(KeyValue::Float((value + 0.0).to_bits()))
    }
}

/// Composite join key. Rows with a NULL in any key column have no key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKey(pub Vec<KeyValue>);

/// Location of a build row: retained batch and row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRef {
    pub batch: usize,
    pub row: usize,
}

/// Groups of key types that may be joined with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Integer,
    Float,
    Boolean,
    Bytes,
}

impl KeyFamily {
    /// Family of a key column type; dictionaries are keyed by their values.
    pub fn of(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Some(KeyFamily::Integer),
            DataType::Float32 | DataType::Float64 => Some(KeyFamily::Float),
            DataType::Boolean => Some(KeyFamily::Boolean),
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
                Some(KeyFamily::Bytes)
            }
            DataType::Dictionary(_, value_type) => Self::of(value_type),
            _ => None,
        }
    }
}

/// Validate key positions on both sides and that each pair can be compared.
pub fn check_key_types(
    left: &Schema,
    left_keys: &[usize],
    right: &Schema,
    right_keys: &[usize],
) -> Result<()> {
    if left_keys.is_empty() || left_keys.len() != right_keys.len() {
        return Err(EngineError::InvalidArgument(format!(
            "hash join needs matching non-empty key lists, got {} left and {} right",
            left_keys.len(),
            right_keys.len()
        )));
    }
    for (&l, &r) in left_keys.iter().zip(right_keys) {
        let left_type = key_field_type(left, l, "left")?;
        let right_type = key_field_type(right, r, "right")?;
        let left_family = KeyFamily::of(left_type).ok_or_else(|| unsupported(left_type))?;
        let right_family = KeyFamily::of(right_type).ok_or_else(|| unsupported(right_type))?;
        if left_family != right_family {
            return Err(EngineError::ArgumentMismatch {
                function: "hash_join".to_string(),
                left: left_type.clone(),
                right: right_type.clone(),
            });
        }
    }
    Ok(())
}

fn key_field_type<'a>(schema: &'a Schema, index: usize, side: &str) -> Result<&'a DataType> {
    schema
        .fields()
        .get(index)
        .map(|f| f.data_type())
        .ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "{} join key column {} out of bounds ({} columns)",
                side,
                index,
                schema.fields().len()
            ))
        })
}

fn unsupported(data_type: &DataType) -> EngineError {
    EngineError::UnsupportedType {
        function: "hash_join".to_string(),
        input_types: vec![data_type.clone()],
    }
}

/// Extract one optional key per row from the key columns.
pub fn extract_keys(key_columns: &[ArrayRef], num_rows: usize) -> Result<Vec<Option<JoinKey>>> {
    let per_column = key_columns
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>>>()?;

    let keys = (0..num_rows)
        .map(|row| {
            per_column
                .iter()
                .map(|values| values[row].clone())
                .collect::<Option<Vec<_>>>()
                .map(JoinKey)
        })
        .collect();
    Ok(keys)
}

fn column_values(column: &ArrayRef) -> Result<Vec<Option<KeyValue>>> {
    let column = match column.data_type() {
        DataType::Dictionary(_, value_type) => cast(column, value_type)?,
        _ => column.clone(),
    };

    let values = match column.data_type() {
        DataType::UInt64 => column
            .as_primitive::<UInt64Type>()
            .iter()
            .map(|v| v.map(|v| KeyValue::Int(i128::from(v))))
            .collect(),
        data_type => match KeyFamily::of(data_type) {
            Some(KeyFamily::Integer) => cast(&column, &DataType::Int64)?
                .as_primitive::<Int64Type>()
                .iter()
                .map(|v| v.map(|v| KeyValue::Int(i128::from(v))))
                .collect(),
            Some(KeyFamily::Float) => cast(&column, &DataType::Float64)?
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.and_then(KeyValue::float))
                .collect(),
            Some(KeyFamily::Boolean) => column
                .as_boolean()
                .iter()
                .map(|v| v.map(KeyValue::Bool))
                .collect(),
            Some(KeyFamily::Bytes) => bytes_values(&column),
            None => return Err(unsupported(data_type)),
        },
    };
    Ok(values)
}

fn bytes_values(column: &ArrayRef) -> Vec<Option<KeyValue>> {
    let owned = |v: Option<&[u8]>| v.map(|b| KeyValue::Bytes(b.to_vec()));
    match column.data_type() {
        DataType::Utf8 => column
            .as_string::<i32>()
            .iter()
            .map(|v| owned(v.map(str::as_bytes)))
            .collect(),
        DataType::LargeUtf8 => column
            .as_string::<i64>()
            .iter()
            .map(|v| owned(v.map(str::as_bytes)))
            .collect(),
        DataType::Binary => column.as_binary::<i32>().iter().map(owned).collect(),
        _ => column.as_binary::<i64>().iter().map(owned).collect(),
    }
}

/// Accumulates build rows until the left input ends.
#[derive(Debug, Default)]
pub struct JoinIndexBuilder {
    entries: Vec<(JoinKey, RowRef)>,
    batch_rows: Vec<usize>,
}

impl JoinIndexBuilder {
    /// Record the keys of retained batch `batch` (batches are added in order).
    pub fn add_batch(&mut self, keys: Vec<Option<JoinKey>>) {
        let batch = self.batch_rows.len();
        self.batch_rows.push(keys.len());
        self.entries.extend(
            keys.into_iter()
                .enumerate()
                .filter_map(|(row, key)| key.map(|k| (k, RowRef { batch, row }))),
        );
    }

    pub fn num_batches(&self) -> usize {
        self.batch_rows.len()
    }

    /// Build the lookup table. `track_matches` keeps per-row matched flags.
    pub fn finish(self, track_matches: bool) -> JoinIndex {
        let mut map: HashMap<JoinKey, Vec<RowRef>> = HashMap::new();
        let keyed_rows = self.entries.len();
        for (key, row) in self.entries {
            map.entry(key).or_default().push(row);
        }
        let matched = if track_matches {
            self.batch_rows.iter().map(|&n| vec![false; n]).collect()
        } else {
            Vec::new()
        };
        tracing::debug!(
            batches = self.batch_rows.len(),
            keyed_rows,
            distinct_keys = map.len(),
            "join index built"
        );
        JoinIndex { map, matched }
    }
}

/// Finalized build side: key to build rows, plus matched flags when tracked.
#[derive(Debug)]
pub struct JoinIndex {
    map: HashMap<JoinKey, Vec<RowRef>>,
    matched: Vec<Vec<bool>>,
}

impl JoinIndex {
    pub fn probe(&self, key: &JoinKey) -> &[RowRef] {
        self.map.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn distinct_keys(&self) -> usize {
        self.map.len()
    }

    pub fn mark_matched(&mut self, row: RowRef) {
        if let Some(flag) = self
            .matched
            .get_mut(row.batch)
            .and_then(|rows| rows.get_mut(row.row))
        {
            *flag = true;
        }
    }

    /// Rows of retained batch `batch` that never matched, in row order.
    pub fn unmatched_rows(&self, batch: usize) -> Vec<u32> {
        self.matched
            .get(batch)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .filter(|(_, &matched)| !matched)
                    .map(|(row, _)| row as u32)
                    .collect()
            })
            .unwrap_or_default()
    }
}
