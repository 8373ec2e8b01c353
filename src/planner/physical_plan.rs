// Physical description of binary join operators

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use serde::{Deserialize, Serialize};

use crate::config::ExecutionConfig;
use crate::error::{EngineError, Result};
use crate::execution::operators::{BinaryOperatorExecutor, CrossJoinExecutor, HashJoinExecutor};
use crate::expr::{NamedExpr, ScalarExpr};
use crate::memory::MemoryPool;

/// Which unmatched rows a join keeps.
///
/// The left input is the build side and the right input is the probe side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinKind {
    #[default]
    Inner,
    /// Keep unmatched left rows, right columns NULL
    LeftOuter,
    /// Keep unmatched right rows, left columns NULL
    RightOuter,
    FullOuter,
}

impl JoinKind {
    /// Unmatched build (left) rows are emitted after the probe side ends.
    pub fn preserves_build(self) -> bool {
        matches!(self, JoinKind::LeftOuter | JoinKind::FullOuter)
    }

    /// Unmatched probe (right) rows are emitted as they are probed.
    pub fn preserves_probe(self) -> bool {
        matches!(self, JoinKind::RightOuter | JoinKind::FullOuter)
    }
}

/// How the two inputs are combined
#[derive(Debug, Clone)]
pub enum JoinAlgorithm {
    /// Equi-join on key column positions (left positions, right positions)
    Hash {
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
    },
    /// Cartesian product, optionally filtered, then projected.
    /// Column positions index the left schema followed by the right schema.
    Cross {
        condition: Option<ScalarExpr>,
        output: Vec<NamedExpr>,
    },
}

/// Everything needed to instantiate a binary operator executor
#[derive(Debug, Clone)]
pub struct BinaryOperatorSpec {
    pub kind: JoinKind,
    pub algorithm: JoinAlgorithm,
    pub left_schema: SchemaRef,
    pub right_schema: SchemaRef,
    pub batch_size_rows: usize,
}

impl BinaryOperatorSpec {
    /// Hash join description using the configured batch size
    pub fn hash_join(
        kind: JoinKind,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            kind,
            algorithm: JoinAlgorithm::Hash {
                left_keys,
                right_keys,
            },
            left_schema,
            right_schema,
            batch_size_rows: config.batch_size_rows,
        }
    }

    /// Inner cross join description using the configured batch size
    pub fn cross_join(
        left_schema: SchemaRef,
        right_schema: SchemaRef,
        condition: Option<ScalarExpr>,
        output: Vec<NamedExpr>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            kind: JoinKind::Inner,
            algorithm: JoinAlgorithm::Cross { condition, output },
            left_schema,
            right_schema,
            batch_size_rows: config.batch_size_rows,
        }
    }

    /// Instantiate the described executor.
    ///
    /// # Errors
    /// Propagates construction errors: incompatible key types, invalid
    /// expressions, unsupported join kinds or a zero batch size.
    pub fn create_executor(
        &self,
        pool: Arc<MemoryPool>,
    ) -> Result<Box<dyn BinaryOperatorExecutor>> {
        if self.batch_size_rows == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_size_rows must be positive".to_string(),
            ));
        }
        tracing::debug!(kind = ?self.kind, batch_size = self.batch_size_rows, "creating join executor");

        match &self.algorithm {
            JoinAlgorithm::Hash {
                left_keys,
                right_keys,
            } => Ok(Box::new(HashJoinExecutor::try_new(
                self.kind,
                self.left_schema.clone(),
                self.right_schema.clone(),
                left_keys.clone(),
                right_keys.clone(),
                self.batch_size_rows,
                pool,
            )?)),
            JoinAlgorithm::Cross { condition, output } => Ok(Box::new(CrossJoinExecutor::try_new(
                self.kind,
                self.left_schema.clone(),
                self.right_schema.clone(),
                condition.clone(),
                output.clone(),
                self.batch_size_rows,
                pool,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;
    use crate::execution::operators::JoinPhase;
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema(name: &str, data_type: DataType) -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new(name, data_type, false)]))
    }

    #[test]
    fn join_kind_preservation() {
        assert!(!JoinKind::Inner.preserves_build());
        assert!(!JoinKind::Inner.preserves_probe());
        assert!(JoinKind::LeftOuter.preserves_build());
        assert!(JoinKind::RightOuter.preserves_probe());
        assert!(JoinKind::FullOuter.preserves_build() && JoinKind::FullOuter.preserves_probe());
    }

    #[test]
    fn creates_both_executor_kinds() {
        let config = ExecutionConfig::with_batch_size(4);
        let hash = BinaryOperatorSpec::hash_join(
            JoinKind::LeftOuter,
            schema("a", DataType::Int32),
            schema("b", DataType::Int64),
            vec![0],
            vec![0],
            &config,
        );
        let mut executor = hash.create_executor(MemoryPool::unbounded()).unwrap();
        assert_eq!(executor.batch_size(), 4);
        assert_eq!(executor.phase(), JoinPhase::Building);
        assert_eq!(executor.output_schema().unwrap().fields().len(), 2);

        let cross = BinaryOperatorSpec::cross_join(
            schema("a", DataType::Int32),
            schema("b", DataType::Int64),
            None,
            vec![NamedExpr::new(col(1), "b")],
            &config,
        );
        let mut executor = cross.create_executor(MemoryPool::unbounded()).unwrap();
        assert_eq!(executor.output_schema().unwrap().field(0).name(), "b");
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let mut spec = BinaryOperatorSpec::cross_join(
            schema("a", DataType::Int32),
            schema("b", DataType::Int64),
            None,
            vec![NamedExpr::new(col(0), "a")],
            &ExecutionConfig::default(),
        );
        spec.kind = JoinKind::FullOuter;
        assert!(spec.create_executor(MemoryPool::unbounded()).is_err());

        spec.kind = JoinKind::Inner;
        spec.batch_size_rows = 0;
        assert!(matches!(
            spec.create_executor(MemoryPool::unbounded()),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
