// Engine error taxonomy

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use thiserror::Error;

/// Errors raised by the join engine.
///
/// Classification:
/// - [`EngineError::UnsupportedType`] / [`EngineError::ArgumentMismatch`]: a comparison
///   was planned over types the kernels do not handle. Never retried.
/// - [`EngineError::JoinExecution`]: build or probe failed; the executor already
///   released its index and buffered output when this is returned.
/// - [`EngineError::InvalidState`]: the operator protocol was driven out of order.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A comparison kernel was invoked on an element type outside its closed set.
    #[error("unsupported type for {function}: input types {input_types:?}")]
    UnsupportedType {
        function: String,
        input_types: Vec<DataType>,
    },

    /// Non-numeric operands of different element types.
    #[error("argument mismatch for {function}: {left} vs {right}")]
    ArgumentMismatch {
        function: String,
        left: DataType,
        right: DataType,
    },

    /// Any failure while building or probing a join.
    #[error("join execution failed: {source}")]
    JoinExecution {
        #[source]
        source: Box<EngineError>,
    },

    #[error("invalid LIKE pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("value at row {row} is not valid UTF-8")]
    InvalidUtf8 { row: usize },

    /// Protocol misuse: consuming in the wrong phase, adding to a full queue, ...
    #[error("invalid operator state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("memory budget exhausted: requested {requested} bytes, {available} available")]
    ResourceExhausted { requested: usize, available: usize },

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl EngineError {
    /// Wrap `self` as a join failure, unless it already is one.
    pub fn into_join_failure(self) -> Self {
        match self {
            err @ EngineError::JoinExecution { .. } => err,
            other => EngineError::JoinExecution {
                source: Box::new(other),
            },
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
