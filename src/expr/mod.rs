// Scalar expressions evaluated over column batches

pub mod compare;
pub mod literal;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute::{and_kleene, is_not_null, is_null, not, or_kleene};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::error::{EngineError, Result};
use crate::execution::batch::ColumnBatch;

pub use compare::{compare, CompareOp, ElementKind};
pub use literal::{LiteralPredicate, ScalarLiteral};

/// Physical scalar expression.
///
/// Columns are referenced by position. For join operators the positions
/// index the left schema followed by the right schema.
#[derive(Debug, Clone)]
pub enum ScalarExpr {
    Column(usize),
    Literal(ScalarLiteral),
    /// Column-against-column comparison: left op right
    Compare {
        op: CompareOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    /// Comparison against a literal folded at construction
    CompareLiteral {
        input: Box<ScalarExpr>,
        predicate: LiteralPredicate,
    },
    And(Box<ScalarExpr>, Box<ScalarExpr>),
    Or(Box<ScalarExpr>, Box<ScalarExpr>),
    Not(Box<ScalarExpr>),
    IsNull(Box<ScalarExpr>),
    IsNotNull(Box<ScalarExpr>),
}

impl ScalarExpr {
    /// Result type of this expression over `schema`, validating operand types.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            ScalarExpr::Column(index) => Ok(field_at(schema, *index)?.data_type().clone()),
            ScalarExpr::Literal(value) => Ok(value.data_type()),
            ScalarExpr::Compare { op, left, right } => {
                let left = left.data_type(schema)?;
                let right = right.data_type(schema)?;
                compare::check_operands(*op, &left, &right)?;
                Ok(DataType::Boolean)
            }
            ScalarExpr::CompareLiteral { input, .. } => {
                input.data_type(schema)?;
                Ok(DataType::Boolean)
            }
            ScalarExpr::And(left, right) | ScalarExpr::Or(left, right) => {
                expect_boolean(left, schema)?;
                expect_boolean(right, schema)?;
                Ok(DataType::Boolean)
            }
            ScalarExpr::Not(input) => {
                expect_boolean(input, schema)?;
                Ok(DataType::Boolean)
            }
            ScalarExpr::IsNull(input) | ScalarExpr::IsNotNull(input) => {
                input.data_type(schema)?;
                Ok(DataType::Boolean)
            }
        }
    }

    pub fn nullable(&self, schema: &Schema) -> Result<bool> {
        match self {
            ScalarExpr::Column(index) => Ok(field_at(schema, *index)?.is_nullable()),
            ScalarExpr::Literal(value) => Ok(value.is_null()),
            ScalarExpr::Compare { left, right, .. }
            | ScalarExpr::And(left, right)
            | ScalarExpr::Or(left, right) => Ok(left.nullable(schema)? || right.nullable(schema)?),
            ScalarExpr::CompareLiteral { input, predicate } => {
                Ok(input.nullable(schema)? || predicate.literal().is_null())
            }
            ScalarExpr::Not(input) => input.nullable(schema),
            ScalarExpr::IsNull(_) | ScalarExpr::IsNotNull(_) => Ok(false),
        }
    }

    /// Evaluate against every row of `batch`
    pub fn evaluate(&self, batch: &ColumnBatch) -> Result<ArrayRef> {
        match self {
            ScalarExpr::Column(index) => Ok(batch.column(*index)?.clone()),
            ScalarExpr::Literal(value) => Ok(value.to_array(batch.num_rows())),
            ScalarExpr::Compare { op, left, right } => {
                let left = left.evaluate(batch)?;
                let right = right.evaluate(batch)?;
                Ok(Arc::new(compare(*op, &left, &right)?))
            }
            ScalarExpr::CompareLiteral { input, predicate } => {
                let input = input.evaluate(batch)?;
                Ok(Arc::new(predicate.evaluate(&input)?))
            }
            ScalarExpr::And(left, right) => {
                let left = left.evaluate_predicate(batch)?;
                let right = right.evaluate_predicate(batch)?;
                Ok(Arc::new(and_kleene(&left, &right)?))
            }
            ScalarExpr::Or(left, right) => {
                let left = left.evaluate_predicate(batch)?;
                let right = right.evaluate_predicate(batch)?;
                Ok(Arc::new(or_kleene(&left, &right)?))
            }
            ScalarExpr::Not(input) => Ok(Arc::new(not(&input.evaluate_predicate(batch)?)?)),
            ScalarExpr::IsNull(input) => Ok(Arc::new(is_null(input.evaluate(batch)?.as_ref())?)),
            ScalarExpr::IsNotNull(input) => {
                Ok(Arc::new(is_not_null(input.evaluate(batch)?.as_ref())?))
            }
        }
    }

    /// Evaluate to a boolean mask; nulls mean "unknown".
    pub fn evaluate_predicate(&self, batch: &ColumnBatch) -> Result<BooleanArray> {
        let array = self.evaluate(batch)?;
        array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "expression yields {} where a boolean is required",
                    array.data_type()
                ))
            })
    }
}

fn field_at(schema: &Schema, index: usize) -> Result<&Field> {
    schema.fields().get(index).map(|f| f.as_ref()).ok_or_else(|| {
        EngineError::InvalidArgument(format!(
            "column index {} out of bounds (schema has {} fields)",
            index,
            schema.fields().len()
        ))
    })
}

fn expect_boolean(expr: &ScalarExpr, schema: &Schema) -> Result<()> {
    match expr.data_type(schema)? {
        DataType::Boolean => Ok(()),
        other => Err(EngineError::InvalidArgument(format!(
            "expected a boolean operand, found {other}"
        ))),
    }
}

/// Output column: an expression and the name it is published under.
#[derive(Debug, Clone)]
pub struct NamedExpr {
    pub expr: ScalarExpr,
    pub name: String,
}

impl NamedExpr {
    pub fn new(expr: ScalarExpr, name: impl Into<String>) -> Self {
        Self {
            expr,
            name: name.into(),
        }
    }

    pub fn field(&self, schema: &Schema) -> Result<Field> {
        Ok(Field::new(
            self.name.as_str(),
            self.expr.data_type(schema)?,
            self.expr.nullable(schema)?,
        ))
    }
}

/// Schema produced by evaluating `exprs` over `input`.
pub fn projected_schema(exprs: &[NamedExpr], input: &Schema) -> Result<SchemaRef> {
    let fields = exprs
        .iter()
        .map(|e| e.field(input))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

// Helper functions for building expressions more easily

/// Helper to create a column reference expression
pub fn col(index: usize) -> ScalarExpr {
    ScalarExpr::Column(index)
}

pub fn lit(value: ScalarLiteral) -> ScalarExpr {
    ScalarExpr::Literal(value)
}

/// Extension trait for building expressions
pub trait ExprBuilder {
    fn eq(&self, other: ScalarExpr) -> ScalarExpr;
    fn neq(&self, other: ScalarExpr) -> ScalarExpr;
    fn gt(&self, other: ScalarExpr) -> ScalarExpr;
    fn ge(&self, other: ScalarExpr) -> ScalarExpr;
    fn lt(&self, other: ScalarExpr) -> ScalarExpr;
    fn le(&self, other: ScalarExpr) -> ScalarExpr;
    fn like(&self, pattern: ScalarExpr) -> ScalarExpr;
    fn and(&self, other: ScalarExpr) -> ScalarExpr;
    fn or(&self, other: ScalarExpr) -> ScalarExpr;
    /// Fold a literal comparison into the expression.
    fn matches(&self, predicate: LiteralPredicate) -> ScalarExpr;
}

impl ScalarExpr {
    fn compare_with(&self, op: CompareOp, other: ScalarExpr) -> ScalarExpr {
        ScalarExpr::Compare {
            op,
            left: Box::new(self.clone()),
            right: Box::new(other),
        }
    }
}

impl ExprBuilder for ScalarExpr {
    fn eq(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::Eq, other)
    }

    fn neq(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::NotEq, other)
    }

    fn gt(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::Gt, other)
    }

    fn ge(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::GtEq, other)
    }

    fn lt(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::Lt, other)
    }

    fn le(&self, other: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::LtEq, other)
    }

    fn like(&self, pattern: ScalarExpr) -> ScalarExpr {
        self.compare_with(CompareOp::Like, pattern)
    }

    fn and(&self, other: ScalarExpr) -> ScalarExpr {
        ScalarExpr::And(Box::new(self.clone()), Box::new(other))
    }

    fn or(&self, other: ScalarExpr) -> ScalarExpr {
        ScalarExpr::Or(Box::new(self.clone()), Box::new(other))
    }

    fn matches(&self, predicate: LiteralPredicate) -> ScalarExpr {
        ScalarExpr::CompareLiteral {
            input: Box::new(self.clone()),
            predicate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, Int64Array, StringArray};

    fn batch() -> ColumnBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Int64, false),
            Field::new("s", DataType::Utf8, false),
        ]));
        ColumnBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(5)])),
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["abc", "abd", "zzz"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn kleene_and_keeps_false_over_null() {
        let b = batch();
        // a == b is [true, null, false]; b > 1 is [false, true, true]
        let expr = col(0).eq(col(1)).and(col(1).gt(lit(ScalarLiteral::Int64(1))));
        let mask = expr.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![Some(false), None, Some(false)]));

        let expr = col(0).eq(col(1)).or(col(1).gt(lit(ScalarLiteral::Int64(1))));
        let mask = expr.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![Some(true), Some(true), Some(true)]));
    }

    #[test]
    fn null_tests_are_never_null() {
        let b = batch();
        let mask = ScalarExpr::IsNull(Box::new(col(0))).evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![false, true, false]));
        assert!(!ScalarExpr::IsNull(Box::new(col(0))).nullable(b.schema()).unwrap());
    }

    #[test]
    fn literal_predicate_inside_tree() {
        let b = batch();
        let expr = col(2).matches(
            LiteralPredicate::new(ScalarLiteral::Utf8("ab.".to_string()), CompareOp::Like, false)
                .unwrap(),
        );
        let mask = expr.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![true, true, false]));
    }

    #[test]
    fn data_type_validates_operands() {
        let b = batch();
        assert_eq!(col(0).lt(col(1)).data_type(b.schema()).unwrap(), DataType::Boolean);
        assert!(matches!(
            col(0).eq(col(2)).data_type(b.schema()),
            Err(EngineError::ArgumentMismatch { .. })
        ));
        assert!(col(7).data_type(b.schema()).is_err());
        assert!(ScalarExpr::Not(Box::new(col(0))).data_type(b.schema()).is_err());
    }

    #[test]
    fn comparison_with_null_literal_is_unknown() {
        let b = batch();
        let expr = col(0).eq(lit(ScalarLiteral::Null));
        assert_eq!(expr.data_type(b.schema()).unwrap(), DataType::Boolean);
        assert!(expr.nullable(b.schema()).unwrap());

        let mask = expr.evaluate_predicate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![None::<bool>; 3]));
    }

    #[test]
    fn projected_schema_names_and_types() {
        let b = batch();
        let exprs = vec![
            NamedExpr::new(col(2), "s"),
            NamedExpr::new(col(0).le(col(1)), "a_le_b"),
        ];
        let schema = projected_schema(&exprs, b.schema()).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).name(), "a_le_b");
        assert!(schema.field(1).is_nullable());
    }
}
