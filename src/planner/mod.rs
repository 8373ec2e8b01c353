pub mod physical_plan;

pub use physical_plan::{BinaryOperatorSpec, JoinAlgorithm, JoinKind};
