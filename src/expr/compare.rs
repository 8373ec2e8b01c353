// Element-wise comparison kernels
//
// Same-kind operands go straight to the typed kernel. Numeric operands of
// different kinds are both widened to Float64. Floats compare as IEEE 754:
// -0.0 equals 0.0 and NaN is unordered, so only NotEq holds against it.
// A NULL-typed operand makes every row unknown.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, BooleanBufferBuilder, Datum, PrimitiveArray,
};
use arrow::buffer::NullBuffer;
use arrow::compute::cast;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int32Type, Int64Type,
};
use arrow_ord::cmp;
use regex::Regex;

use crate::error::{EngineError, Result};

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,    // ==
    NotEq, // !=
    Lt,    // <
    LtEq,  // <=
    Gt,    // >
    GtEq,  // >=
    /// Full-match regular expression: the right operand is the pattern.
    Like,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::NotEq => "not_eq",
            CompareOp::Lt => "lt",
            CompareOp::LtEq => "lt_eq",
            CompareOp::Gt => "gt",
            CompareOp::GtEq => "gt_eq",
            CompareOp::Like => "like",
        }
    }
}

/// Column element types the kernels understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int32,
    Int64,
    Float32,
    Float64,
    /// UTF-8 text, compared as raw bytes.
    Utf8,
    Binary,
}

impl ElementKind {
    pub fn of(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int32 => Some(ElementKind::Int32),
            DataType::Int64 => Some(ElementKind::Int64),
            DataType::Float32 => Some(ElementKind::Float32),
            DataType::Float64 => Some(ElementKind::Float64),
            DataType::Utf8 => Some(ElementKind::Utf8),
            DataType::Binary => Some(ElementKind::Binary),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        match self {
            ElementKind::Int32 | ElementKind::Int64 | ElementKind::Float32 | ElementKind::Float64 => {
                true
            }
            ElementKind::Utf8 | ElementKind::Binary => false,
        }
    }

    pub fn is_bytes(self) -> bool {
        !self.is_numeric()
    }
}

/// How a comparison over two operand types is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Typed(ElementKind),
    WidenToFloat64,
    UnifyToBinary,
    Like,
    /// One side is the untyped NULL literal
    Unknown,
}

fn classify(op: CompareOp, left: &DataType, right: &DataType) -> Result<Dispatch> {
    let unsupported = || EngineError::UnsupportedType {
        function: op.name().to_string(),
        input_types: vec![left.clone(), right.clone()],
    };
    if *left == DataType::Null || *right == DataType::Null {
        return Ok(Dispatch::Unknown);
    }
    let (Some(left_kind), Some(right_kind)) = (ElementKind::of(left), ElementKind::of(right))
    else {
        return Err(unsupported());
    };

    if op == CompareOp::Like {
        return if left_kind.is_bytes() && right_kind.is_bytes() {
            Ok(Dispatch::Like)
        } else {
            Err(unsupported())
        };
    }
    if left_kind == right_kind {
        return Ok(Dispatch::Typed(left_kind));
    }
    if left_kind.is_numeric() && right_kind.is_numeric() {
        return Ok(Dispatch::WidenToFloat64);
    }
    if left_kind.is_bytes() && right_kind.is_bytes() {
        return Ok(Dispatch::UnifyToBinary);
    }
    Err(EngineError::ArgumentMismatch {
        function: op.name().to_string(),
        left: left.clone(),
        right: right.clone(),
    })
}

/// Check at plan time that `op` can compare the two operand types.
pub fn check_operands(op: CompareOp, left: &DataType, right: &DataType) -> Result<()> {
    classify(op, left, right).map(|_| ())
}

/// Compare two equal-length columns row by row.
pub fn compare(op: CompareOp, left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
    if left.len() != right.len() {
        return Err(EngineError::InvalidArgument(format!(
            "{} operands have different lengths: {} vs {}",
            op.name(),
            left.len(),
            right.len()
        )));
    }

    match classify(op, left.data_type(), right.data_type())? {
        Dispatch::Typed(kind) => typed_kernel(op, kind, left, right),
        Dispatch::WidenToFloat64 => {
            let left = cast(left, &DataType::Float64)?;
            let right = cast(right, &DataType::Float64)?;
            typed_kernel(op, ElementKind::Float64, &left, &right)
        }
        Dispatch::UnifyToBinary => {
            let left = cast(left, &DataType::Binary)?;
            let right = cast(right, &DataType::Binary)?;
            typed_kernel(op, ElementKind::Binary, &left, &right)
        }
        Dispatch::Like => like(left, right),
        Dispatch::Unknown => Ok(BooleanArray::new_null(left.len())),
    }
}

fn typed_kernel(
    op: CompareOp,
    kind: ElementKind,
    left: &ArrayRef,
    right: &ArrayRef,
) -> Result<BooleanArray> {
    match kind {
        ElementKind::Int32 => ordered(
            op,
            left.as_primitive::<Int32Type>(),
            right.as_primitive::<Int32Type>(),
        ),
        ElementKind::Int64 => ordered(
            op,
            left.as_primitive::<Int64Type>(),
            right.as_primitive::<Int64Type>(),
        ),
        ElementKind::Float32 => ieee_float(
            op,
            left.as_primitive::<Float32Type>(),
            right.as_primitive::<Float32Type>(),
            |v: f32| v + 0.0,
            f32::is_nan,
        ),
        ElementKind::Float64 => ieee_float(
            op,
            left.as_primitive::<Float64Type>(),
            right.as_primitive::<Float64Type>(),
            |v: f64| v + 0.0,
            f64::is_nan,
        ),
        ElementKind::Utf8 => ordered(op, left.as_string::<i32>(), right.as_string::<i32>()),
        ElementKind::Binary => ordered(op, left.as_binary::<i32>(), right.as_binary::<i32>()),
    }
}

/// Apply an ordering operator through Arrow's comparison kernels.
pub(crate) fn ordered(op: CompareOp, left: &dyn Datum, right: &dyn Datum) -> Result<BooleanArray> {
    let result = match op {
        CompareOp::Eq => cmp::eq(left, right),
        CompareOp::NotEq => cmp::neq(left, right),
        CompareOp::Lt => cmp::lt(left, right),
        CompareOp::LtEq => cmp::lt_eq(left, right),
        CompareOp::Gt => cmp::gt(left, right),
        CompareOp::GtEq => cmp::gt_eq(left, right),
        CompareOp::Like => {
            return Err(EngineError::InvalidArgument(
                "like is not an ordering comparison".to_string(),
            ))
        }
    };
    Ok(result?)
}

/// Float comparison with IEEE 754 semantics on top of Arrow's total-order
/// kernels: adding `0.0` folds `-0.0` into `0.0`, and rows with a NaN operand
/// are rewritten to `NotEq` only.
fn ieee_float<T, C, N>(
    op: CompareOp,
    left: &PrimitiveArray<T>,
    right: &PrimitiveArray<T>,
    canonical: C,
    is_nan: N,
) -> Result<BooleanArray>
where
    T: ArrowPrimitiveType,
    C: Fn(T::Native) -> T::Native,
    N: Fn(T::Native) -> bool,
{
    let left: PrimitiveArray<T> = left.unary(&canonical);
    let right: PrimitiveArray<T> = right.unary(&canonical);
    let result = ordered(op, &left, &right)?;

    let nan_at = |row: usize| is_nan(left.value(row)) || is_nan(right.value(row));
    if !(0..left.len()).any(|row| nan_at(row)) {
        return Ok(result);
    }
    let mut values = BooleanBufferBuilder::new(left.len());
    for row in 0..left.len() {
        values.append(if nan_at(row) {
            op == CompareOp::NotEq
        } else {
            result.value(row)
        });
    }
    Ok(BooleanArray::new(values.finish(), result.nulls().cloned()))
}

/// Compile `pattern` so that it must match the whole text.
pub(crate) fn full_match_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!(r"\A(?:{pattern})\z")).map_err(|source| EngineError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Raw bytes at `row` of a Utf8 or Binary column.
fn bytes_at(array: &dyn Array, row: usize) -> &[u8] {
    match array.data_type() {
        DataType::Utf8 => array.as_string::<i32>().value(row).as_bytes(),
        _ => array.as_binary::<i32>().value(row),
    }
}

pub(crate) fn text_at(array: &dyn Array, row: usize) -> Result<&str> {
    std::str::from_utf8(bytes_at(array, row)).map_err(|_| EngineError::InvalidUtf8 { row })
}

fn like(left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
    let nulls = NullBuffer::union(left.nulls(), right.nulls());
    let mut values = BooleanBufferBuilder::new(left.len());
    let mut patterns: HashMap<&str, Regex> = HashMap::new();

    for row in 0..left.len() {
        if nulls.as_ref().is_some_and(|n| n.is_null(row)) {
            values.append(false);
            continue;
        }
        let text = text_at(left.as_ref(), row)?;
        let pattern = text_at(right.as_ref(), row)?;
        let regex = match patterns.entry(pattern) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(full_match_regex(pattern)?),
        };
        values.append(regex.is_match(text));
    }

    Ok(BooleanArray::new(values.finish(), nulls))
}

/// Match every row of a byte-string column against one compiled pattern.
pub(crate) fn like_pattern(input: &ArrayRef, regex: &Regex) -> Result<BooleanArray> {
    let nulls = input.nulls().cloned();
    let mut values = BooleanBufferBuilder::new(input.len());
    for row in 0..input.len() {
        if nulls.as_ref().is_some_and(|n| n.is_null(row)) {
            values.append(false);
            continue;
        }
        values.append(regex.is_match(text_at(input.as_ref(), row)?));
    }
    Ok(BooleanArray::new(values.finish(), nulls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{
        new_null_array, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array,
        Int64Array, StringArray,
    };
    use std::sync::Arc;

    fn arr<A: Array + 'static>(a: A) -> ArrayRef {
        Arc::new(a)
    }

    #[test]
    fn not_equal_propagates_nulls() {
        let left = arr(Int32Array::from(vec![Some(1), None, Some(3)]));
        let right = arr(Int32Array::from(vec![Some(1), Some(2), None]));
        let result = compare(CompareOp::NotEq, &left, &right).unwrap();

        assert!(result.is_valid(0));
        assert!(!result.value(0));
        assert!(result.is_null(1));
        assert!(result.is_null(2));
    }

    #[test]
    fn validity_is_and_of_inputs() {
        let left = arr(Int64Array::from(vec![Some(1), None, Some(3), None]));
        let right = arr(Int64Array::from(vec![Some(1), Some(2), None, None]));
        for op in [CompareOp::Eq, CompareOp::Lt, CompareOp::GtEq] {
            let result = compare(op, &left, &right).unwrap();
            for i in 0..4 {
                assert_eq!(result.is_valid(i), left.is_valid(i) && right.is_valid(i));
            }
        }
    }

    #[test]
    fn int32_against_float64_widens() {
        let ints = arr(Int32Array::from(vec![1, 2, 3, -4]));
        let floats = arr(Float64Array::from(vec![1.0, 2.5, 2.0, -4.0]));

        let widened = cast(&ints, &DataType::Float64).unwrap();
        for op in [CompareOp::Eq, CompareOp::Lt, CompareOp::Gt, CompareOp::LtEq] {
            let mixed = compare(op, &ints, &floats).unwrap();
            let direct = compare(op, &widened, &floats).unwrap();
            assert_eq!(mixed, direct);
        }
        let eq = compare(CompareOp::Eq, &ints, &floats).unwrap();
        assert_eq!(eq, BooleanArray::from(vec![true, false, false, true]));
    }

    #[test]
    fn strings_compare_bytes() {
        let left = arr(StringArray::from(vec!["apple", "b", "cat"]));
        let right = arr(StringArray::from(vec!["apple", "a", "dog"]));
        let lt = compare(CompareOp::Lt, &left, &right).unwrap();
        assert_eq!(lt, BooleanArray::from(vec![false, false, true]));

        let binary = arr(BinaryArray::from(vec![b"apple".as_ref(), b"b", b"cow"]));
        let eq = compare(CompareOp::Eq, &left, &binary).unwrap();
        assert_eq!(eq, BooleanArray::from(vec![true, true, false]));
    }

    #[test]
    fn like_is_full_regex_match() {
        let text = arr(StringArray::from(vec!["abc", "abc", "xabc"]));
        let patterns = arr(StringArray::from(vec!["a.c", "a.*", "a.c"]));
        let result = compare(CompareOp::Like, &text, &patterns).unwrap();
        assert_eq!(result, BooleanArray::from(vec![true, true, false]));
    }

    #[test]
    fn like_rejects_bad_pattern_and_numbers() {
        let text = arr(StringArray::from(vec!["abc"]));
        let bad = arr(StringArray::from(vec!["a(b"]));
        assert!(matches!(
            compare(CompareOp::Like, &text, &bad),
            Err(EngineError::InvalidPattern { .. })
        ));

        let ints = arr(Int32Array::from(vec![1]));
        assert!(matches!(
            compare(CompareOp::Like, &ints, &ints),
            Err(EngineError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn like_skips_null_rows() {
        let text = arr(StringArray::from(vec![Some("abc"), None]));
        let patterns = arr(StringArray::from(vec![None, Some("(")]));
        let result = compare(CompareOp::Like, &text, &patterns).unwrap();
        assert_eq!(result.null_count(), 2);
    }

    #[test]
    fn cross_kind_non_numeric_is_mismatch() {
        let ints = arr(Int32Array::from(vec![1]));
        let text = arr(StringArray::from(vec!["1"]));
        assert!(matches!(
            compare(CompareOp::Eq, &ints, &text),
            Err(EngineError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn unsupported_type_names_function_and_inputs() {
        let flags = arr(BooleanArray::from(vec![true]));
        match compare(CompareOp::Lt, &flags, &flags) {
            Err(EngineError::UnsupportedType {
                function,
                input_types,
            }) => {
                assert_eq!(function, "lt");
                assert_eq!(input_types, vec![DataType::Boolean, DataType::Boolean]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn signed_zeros_are_equal() {
        let zero = arr(Int32Array::from(vec![0]));
        let neg = arr(Float64Array::from(vec![-0.0]));
        let pos = arr(Float64Array::from(vec![0.0]));
        assert!(compare(CompareOp::Eq, &zero, &neg).unwrap().value(0));
        assert!(compare(CompareOp::Eq, &pos, &neg).unwrap().value(0));
        assert!(!compare(CompareOp::Lt, &neg, &pos).unwrap().value(0));
        assert!(compare(CompareOp::GtEq, &neg, &pos).unwrap().value(0));

        let neg32 = arr(Float32Array::from(vec![-0.0_f32]));
        let pos32 = arr(Float32Array::from(vec![0.0_f32]));
        assert!(!compare(CompareOp::NotEq, &neg32, &pos32).unwrap().value(0));
    }

    #[test]
    fn nan_is_unordered() {
        let left = arr(Float64Array::from(vec![Some(f64::NAN), Some(f64::NAN), Some(1.0), None]));
        let right = arr(Float64Array::from(vec![Some(f64::NAN), Some(1.0), Some(f64::NAN), Some(f64::NAN)]));
        for op in [CompareOp::Eq, CompareOp::Lt, CompareOp::LtEq, CompareOp::Gt, CompareOp::GtEq] {
            let result = compare(op, &left, &right).unwrap();
            assert_eq!(result, BooleanArray::from(vec![Some(false), Some(false), Some(false), None]));
        }
        let neq = compare(CompareOp::NotEq, &left, &right).unwrap();
        assert_eq!(neq, BooleanArray::from(vec![Some(true), Some(true), Some(true), None]));
    }

    #[test]
    fn null_typed_operand_is_unknown() {
        let ints = arr(Int32Array::from(vec![Some(1), None, Some(3)]));
        let nulls = new_null_array(&DataType::Null, 3);
        let result = compare(CompareOp::Eq, &ints, &nulls).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.null_count(), 3);
        assert!(check_operands(CompareOp::Lt, &DataType::Null, &DataType::Utf8).is_ok());
    }

    #[test]
    fn length_mismatch_rejected() {
        let a = arr(Int32Array::from(vec![1, 2]));
        let b = arr(Int32Array::from(vec![1]));
        assert!(compare(CompareOp::Eq, &a, &b).is_err());
    }
}
