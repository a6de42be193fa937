//! The two-method contract shared by every allocator strategy.

use std::sync::Arc;

use crate::error::AllocError;
use crate::fit::FitMode;

/// Offset-valued stand-in for the pointer an allocator hands out.
///
/// The wrapped value is the byte offset of the block's payload inside the
/// owning instance's arena (for the global-heap passthrough, a synthetic
/// address). Handles are only meaningful to the instance that produced
/// them; every consuming operation re-validates ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub usize);

impl BlockHandle {
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Common allocation contract.
///
/// `allocate` reserves `value_size * values_count` bytes and returns a
/// handle to the payload; `deallocate` releases a block previously
/// returned by the same instance. Implementations are internally locked:
/// both calls are safe from concurrent threads.
pub trait Allocator: Send + Sync {
    fn allocate(&self, value_size: usize, values_count: usize) -> Result<BlockHandle, AllocError>;

    fn deallocate(&self, handle: BlockHandle) -> Result<(), AllocError>;
}

/// Strategies whose free-region search honors a [`FitMode`].
pub trait AllocatorWithFitMode: Allocator {
    /// Changes the search policy for subsequent allocations.
    ///
    /// Taken under the arena lock, so the change is ordered with respect
    /// to in-flight allocations.
    fn set_fit_mode(&self, mode: FitMode);
}

/// Shared handle type used when one allocator feeds another its arena.
pub type ParentRef = Arc<dyn Allocator>;
