// Typed literals and literal-folded predicates

use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array,
    Int32Array, Int64Array, Scalar, StringArray,
};
use arrow::buffer::BooleanBuffer;
use arrow::compute::{cast, not};
use arrow::datatypes::DataType;
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::expr::compare::{
    compare, full_match_regex, like_pattern, ordered, CompareOp, ElementKind,
};

/// Literal values in expressions
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarLiteral {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
}

impl ScalarLiteral {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarLiteral::Null => DataType::Null,
            ScalarLiteral::Boolean(_) => DataType::Boolean,
            ScalarLiteral::Int32(_) => DataType::Int32,
            ScalarLiteral::Int64(_) => DataType::Int64,
            ScalarLiteral::Float32(_) => DataType::Float32,
            ScalarLiteral::Float64(_) => DataType::Float64,
            ScalarLiteral::Utf8(_) => DataType::Utf8,
            ScalarLiteral::Binary(_) => DataType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarLiteral::Null)
    }

    /// The literal repeated `len` times
    pub fn to_array(&self, len: usize) -> ArrayRef {
        match self {
            ScalarLiteral::Null => new_null_array(&DataType::Null, len),
            ScalarLiteral::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            ScalarLiteral::Int32(v) => Arc::new(Int32Array::from(vec![*v; len])),
            ScalarLiteral::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
            ScalarLiteral::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
            ScalarLiteral::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
            ScalarLiteral::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            ScalarLiteral::Binary(v) => Arc::new(BinaryArray::from(vec![v.as_slice(); len])),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarLiteral::Int32(_)
                | ScalarLiteral::Int64(_)
                | ScalarLiteral::Float32(_)
                | ScalarLiteral::Float64(_)
        )
    }
}

/// Comparison of a column against a literal bound at construction.
///
/// `not_equal` is `equal` with `negate` set; negation flips valid rows only.
/// The literal applies only where its tag fits the column: numeric literals
/// fit any numeric column (widened to `Float64` when the kinds differ),
/// booleans fit booleans and byte strings fit byte strings. Other pairings
/// evaluate to `false` on every valid row.
#[derive(Debug, Clone)]
pub struct LiteralPredicate {
    literal: ScalarLiteral,
    op: CompareOp,
    negate: bool,
    pattern: Option<Regex>,
}

impl LiteralPredicate {
    pub fn new(literal: ScalarLiteral, op: CompareOp, negate: bool) -> Result<Self> {
        let pattern = match (&literal, op) {
            (ScalarLiteral::Utf8(p), CompareOp::Like) => Some(full_match_regex(p)?),
            (ScalarLiteral::Binary(p), CompareOp::Like) => {
                let p = std::str::from_utf8(p).map_err(|_| EngineError::InvalidUtf8 { row: 0 })?;
                Some(full_match_regex(p)?)
            }
            _ => None,
        };
        Ok(Self {
            literal,
            op,
            negate,
            pattern,
        })
    }

    pub fn equal(literal: ScalarLiteral) -> Self {
        Self {
            literal,
            op: CompareOp::Eq,
            negate: false,
            pattern: None,
        }
    }

    pub fn not_equal(literal: ScalarLiteral) -> Self {
        Self {
            negate: true,
            ..Self::equal(literal)
        }
    }

    pub fn literal(&self) -> &ScalarLiteral {
        &self.literal
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn evaluate(&self, input: &ArrayRef) -> Result<BooleanArray> {
        let result = self.evaluate_positive(input)?;
        if self.negate {
            Ok(not(&result)?)
        } else {
            Ok(result)
        }
    }

    fn evaluate_positive(&self, input: &ArrayRef) -> Result<BooleanArray> {
        if self.literal.is_null() {
            return Ok(BooleanArray::new_null(input.len()));
        }
        let input_kind = ElementKind::of(input.data_type());

        if let Some(regex) = &self.pattern {
            return match input_kind {
                Some(kind) if kind.is_bytes() => like_pattern(input, regex),
                _ => Ok(no_match(input)),
            };
        }
        if self.op == CompareOp::Like {
            return Ok(no_match(input));
        }

        match (&self.literal, input.data_type()) {
            (ScalarLiteral::Boolean(_), DataType::Boolean) => {
                ordered(self.op, input, &Scalar::new(self.literal.to_array(1)))
            }
            (literal, _) if literal.is_numeric() => match input_kind {
                Some(kind) if kind.is_numeric() => {
                    compare(self.op, input, &literal.to_array(input.len()))
                }
                _ => Ok(no_match(input)),
            },
            (ScalarLiteral::Utf8(v), DataType::Utf8) => {
                ordered(self.op, input, &Scalar::new(StringArray::from(vec![v.as_str()])))
            }
            (ScalarLiteral::Utf8(v), DataType::Binary) => ordered(
                self.op,
                input,
                &Scalar::new(BinaryArray::from(vec![v.as_bytes()])),
            ),
            (ScalarLiteral::Binary(v), DataType::Binary | DataType::Utf8) => {
                let bytes = cast(input, &DataType::Binary)?;
                ordered(
                    self.op,
                    &bytes,
                    &Scalar::new(BinaryArray::from(vec![v.as_slice()])),
                )
            }
            _ => Ok(no_match(input)),
        }
    }
}

/// `false` on every row, keeping the input's nulls.
fn no_match(input: &ArrayRef) -> BooleanArray {
    BooleanArray::new(BooleanBuffer::new_unset(input.len()), input.nulls().cloned())
}
