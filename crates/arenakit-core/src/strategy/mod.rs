//! Arena block-management strategies.
//!
//! Four implementations of the shared contract:
//! - boundary tags: occupied-blocks-only doubly-linked list, free space is
//!   the implicit gaps between entries;
//! - buddy system: power-of-two blocks with XOR-addressed siblings;
//! - sorted free list: explicit address-ordered free list threaded through
//!   the free bytes;
//! - global heap: passthrough to the platform allocator with the same
//!   ownership tagging.

pub mod boundary_tags;
pub mod buddies;
pub mod global_heap;
pub mod sorted_list;

pub use boundary_tags::BoundaryTagAllocator;
pub use buddies::BuddyAllocator;
pub use global_heap::GlobalHeapAllocator;
pub use sorted_list::SortedListAllocator;

use std::sync::Arc;

use crate::contract::ParentRef;
use crate::fit::FitMode;
use crate::logging::AllocLogger;

/// Construction options shared by the in-arena strategies.
///
/// Defaults: first fit, no logger, arena taken straight from the
/// platform allocator.
#[derive(Default)]
pub struct ArenaOptions {
    pub fit_mode: FitMode,
    pub logger: Option<Arc<dyn AllocLogger>>,
    pub parent: Option<ParentRef>,
}

impl ArenaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fit_mode(mut self, mode: FitMode) -> Self {
        self.fit_mode = mode;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn AllocLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Makes the allocator lease its whole arena from `parent` instead of
    /// the platform allocator.
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl std::fmt::Debug for ArenaOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaOptions")
            .field("fit_mode", &self.fit_mode)
            .field("logger", &self.logger.as_ref().map(|_| "dyn AllocLogger"))
            .field("parent", &self.parent.as_ref().map(|_| "dyn Allocator"))
            .finish()
    }
}
