//! # arenakit-core
//!
//! User-space arena allocators over owned byte buffers.
//!
//! Four interchangeable strategies sit behind the [`Allocator`] trait:
//! boundary tags, a binary buddy system, an address-sorted free list, and
//! a process-heap passthrough. Arena-backed strategies can lease their
//! arena from a parent allocator, so strategies compose into trees.
//! Blocks are named by [`BlockHandle`] offsets rather than pointers, and
//! every allocator tags blocks with its own identity so a handle handed
//! to the wrong instance is rejected instead of corrupting state.

#![deny(unsafe_code)]

mod arena;
mod fit;

pub mod contract;
pub mod error;
pub mod introspect;
pub mod logging;
pub mod strategy;

pub use contract::{Allocator, AllocatorWithFitMode, BlockHandle, ParentRef};
pub use error::AllocError;
pub use fit::FitMode;
pub use introspect::{BlockInfo, Introspect, blocks_to_string};
pub use strategy::{
    ArenaOptions, BoundaryTagAllocator, BuddyAllocator, GlobalHeapAllocator, SortedListAllocator,
};
