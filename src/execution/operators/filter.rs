// Vectorized filtering

use arrow::array::ArrayRef;
use arrow::compute::filter;
use arrow::datatypes::DataType;

use crate::error::{EngineError, Result};
use crate::execution::batch::{ColumnBatch, SchemaRef};
use crate::expr::ScalarExpr;

/// Filter operator that applies a predicate expression to filter rows
/// Uses vectorized execution with Arrow's compute kernels
#[derive(Debug, Clone)]
pub struct FilterOperator {
    predicate: ScalarExpr,
    schema: SchemaRef,
}

impl FilterOperator {
    /// Create a new Filter operator
    ///
    /// # Arguments
    /// * `predicate` - Boolean expression deciding which rows survive
    /// * `input_schema` - Schema of the input data (also the output schema)
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the predicate does not yield booleans
    pub fn new(predicate: ScalarExpr, input_schema: SchemaRef) -> Result<Self> {
        let data_type = predicate.data_type(&input_schema)?;
        if data_type != DataType::Boolean {
            return Err(EngineError::InvalidArgument(format!(
                "filter predicate must be boolean, found {data_type}"
            )));
        }
        Ok(Self {
            predicate,
            schema: input_schema,
        })
    }

    pub fn predicate(&self) -> &ScalarExpr {
        &self.predicate
    }

    /// Keep rows where the predicate is true; NULL counts as false.
    pub fn execute(&self, input: &ColumnBatch) -> Result<ColumnBatch> {
        let mask = self.predicate.evaluate_predicate(input)?;

        let filtered_columns = input
            .columns()
            .iter()
            .map(|col| filter(col, &mask))
            .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;

        Ok(ColumnBatch::try_new(self.schema.clone(), filtered_columns)?
            .with_sequence_number(input.sequence_number()))
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit, ExprBuilder, ScalarLiteral};
    use arrow::array::{Array, Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn create_test_batch() -> ColumnBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, false),
        ]));
        ColumnBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), Some(5), None, Some(9)])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_filter_drops_false_and_null() {
        let batch = create_test_batch();
        let predicate = col(0).gt(lit(ScalarLiteral::Int32(3)));
        let filter = FilterOperator::new(predicate, batch.schema().clone()).unwrap();

        let result = filter.execute(&batch).unwrap();
        assert_eq!(result.num_rows(), 2);
        let names = result
            .column(1)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(0), "b");
        assert_eq!(names.value(1), "d");
    }

    #[test]
    fn test_non_boolean_predicate_rejected() {
        let batch = create_test_batch();
        assert!(FilterOperator::new(col(0), batch.schema().clone()).is_err());
    }

    #[test]
    fn test_filter_everything_out() {
        let batch = create_test_batch();
        let predicate = col(1).eq(lit(ScalarLiteral::Utf8("zzz".to_string())));
        let filter = FilterOperator::new(predicate, batch.schema().clone()).unwrap();
        let result = filter.execute(&batch).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.num_columns(), 2);
    }
}
