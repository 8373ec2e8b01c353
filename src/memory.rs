// Memory accounting for batches retained by operators
//
// One pool is shared by every pipeline of a query, across rayon workers.
// Dropping a reservation returns its bytes to the pool exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Byte budget handed to executors as their allocator handle.
#[derive(Debug)]
pub struct MemoryPool {
    budget_bytes: usize,
    in_use_bytes: AtomicUsize,
}

impl MemoryPool {
    /// Pool with a hard byte budget.
    pub fn new(budget_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            budget_bytes,
            in_use_bytes: AtomicUsize::new(0),
        })
    }

    /// Pool that never refuses a reservation.
    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    pub fn from_budget(budget_bytes: Option<usize>) -> Arc<Self> {
        budget_bytes.map_or_else(Self::unbounded, Self::new)
    }

    pub fn in_use(&self) -> usize {
        self.in_use_bytes.load(Ordering::Acquire)
    }

    pub fn budget(&self) -> usize {
        self.budget_bytes
    }

    /// Reserve `bytes`, failing with [`EngineError::ResourceExhausted`] when the
    /// budget cannot cover them.
    pub fn try_reserve(self: &Arc<Self>, bytes: usize) -> Result<MemoryReservation> {
        loop {
            let current = self.in_use_bytes.load(Ordering::Acquire);
            let available = self.budget_bytes.saturating_sub(current);
            if bytes > available {
                return Err(EngineError::ResourceExhausted {
                    requested: bytes,
                    available,
                });
            }
            if self
                .in_use_bytes
                .compare_exchange(current, current + bytes, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(MemoryReservation {
                    pool: Arc::clone(self),
                    bytes,
                });
            }
        }
    }
}

/// Bytes held against a [`MemoryPool`]; released on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    bytes: usize,
}

impl MemoryReservation {
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Fold `other` into this reservation.
    pub fn merge(&mut self, mut other: MemoryReservation) {
        debug_assert!(Arc::ptr_eq(&self.pool, &other.pool));
        self.bytes += std::mem::take(&mut other.bytes);
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.pool
                .in_use_bytes
                .fetch_sub(self.bytes, Ordering::AcqRel);
        }
    }
}
