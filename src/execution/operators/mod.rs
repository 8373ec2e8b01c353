pub mod cross_join;
pub mod filter;
pub mod hash_join;
pub mod join_index;
pub mod output;

// Export operators for use by the driver
pub use cross_join::CrossJoinExecutor;
pub use filter::FilterOperator;
pub use hash_join::HashJoinExecutor;

use crate::error::{EngineError, Result};
use crate::execution::batch::{ColumnBatch, SchemaRef};

/// Lifecycle of a binary operator. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JoinPhase {
    /// Consuming the left input into the build structure.
    Building,
    /// Consuming the right input and producing matches.
    Probing,
    /// Right input ended; emitting deferred rows and the final batch.
    Flushing,
    Done,
}

/// Phase bookkeeping shared by the binary executors.
#[derive(Debug, Clone)]
pub struct OperatorState {
    phase: JoinPhase,
}

impl Default for OperatorState {
    fn default() -> Self {
        Self {
            phase: JoinPhase::Building,
        }
    }
}

impl OperatorState {
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    pub fn need_left(&self) -> bool {
        self.phase == JoinPhase::Building
    }

    /// Right input is wanted only once the build side is finalized.
    pub fn need_right(&self) -> bool {
        self.phase == JoinPhase::Probing
    }

    /// Move to `next`, refusing to revisit or stay in a phase.
    pub fn advance(&mut self, next: JoinPhase) -> Result<()> {
        if next <= self.phase {
            return Err(EngineError::InvalidState(format!(
                "cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        tracing::debug!(from = ?self.phase, to = ?next, "operator phase transition");
        self.phase = next;
        Ok(())
    }

    /// Jump to `Done` from wherever we are (close and failure paths).
    pub fn finish(&mut self) {
        if self.phase != JoinPhase::Done {
            tracing::debug!(from = ?self.phase, "operator finished");
            self.phase = JoinPhase::Done;
        }
    }

    /// Error unless the operator is in `expected`.
    pub fn ensure(&self, expected: JoinPhase, operation: &str) -> Result<()> {
        if self.phase != expected {
            return Err(EngineError::InvalidState(format!(
                "{} called in phase {:?}, expected {:?}",
                operation, self.phase, expected
            )));
        }
        Ok(())
    }
}

/// Push/pull protocol for two-input operators.
///
/// The driver alternates between the consume and produce sides from a single
/// thread. Batches handed to `consume_*` become the executor's property. A
/// batch shorter than the canonical batch size ends its input. Output follows
/// the same convention: full batches, then exactly one shorter (possibly
/// empty) batch that ends the stream.
pub trait BinaryOperatorExecutor: Send {
    /// True while the left (build) input is still being consumed.
    fn need_consume_left(&self) -> bool;

    fn consume_left(&mut self, batch: ColumnBatch) -> Result<()>;

    /// True only after the build structure is finalized and while probing.
    fn need_consume_right(&self) -> bool;

    fn consume_right(&mut self, batch: ColumnBatch) -> Result<()>;

    /// True when `produce` would return a batch or advance the flush.
    fn can_produce(&self) -> bool;

    /// Pull at most one output batch; `None` means more input is needed first.
    fn produce(&mut self) -> Result<Option<ColumnBatch>>;

    /// Output schema, derived on first use and cached.
    fn output_schema(&mut self) -> Result<SchemaRef>;

    fn phase(&self) -> JoinPhase;

    /// Canonical rows per batch on both inputs and the output.
    fn batch_size(&self) -> usize;

    /// Release the build structure and buffered output. Safe to call twice.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        let mut state = OperatorState::default();
        assert!(state.need_left());
        assert!(!state.need_right());

        state.advance(JoinPhase::Probing).unwrap();
        assert!(!state.need_left());
        assert!(state.need_right());

        assert!(state.advance(JoinPhase::Building).is_err());
        assert!(state.advance(JoinPhase::Probing).is_err());

        state.advance(JoinPhase::Flushing).unwrap();
        assert!(!state.need_right());
        state.finish();
        assert_eq!(state.phase(), JoinPhase::Done);
        assert!(state.advance(JoinPhase::Flushing).is_err());
    }

    #[test]
    fn ensure_reports_wrong_phase() {
        let state = OperatorState::default();
        assert!(state.ensure(JoinPhase::Building, "consume_left").is_ok());
        assert!(matches!(
            state.ensure(JoinPhase::Probing, "consume_right"),
            Err(EngineError::InvalidState(_))
        ));
    }
}
