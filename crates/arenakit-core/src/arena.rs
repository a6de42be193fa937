//! Byte-arena primitives shared by the in-arena strategies.
//!
//! Block metadata is encoded directly into the arena's bytes as
//! little-endian 64-bit words accessed by offset; `NIL` plays the role the
//! null pointer played in a pointer-linked layout. The arena buffer itself
//! is plain `Vec<u8>`, so no raw-pointer aliasing exists anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::contract::{BlockHandle, ParentRef};
use crate::error::AllocError;

/// Width of an encoded metadata word.
pub(crate) const WORD: usize = 8;

/// Sentinel for an absent link or root.
pub(crate) const NIL: usize = usize::MAX;

/// Reads the metadata word at `at`.
///
/// Callers guarantee `at + WORD <= buf.len()`; offsets come from validated
/// headers, never from user input.
pub(crate) fn read_word(buf: &[u8], at: usize) -> usize {
    let mut raw = [0u8; WORD];
    raw.copy_from_slice(&buf[at..at + WORD]);
    u64::from_le_bytes(raw) as usize
}

/// Writes the metadata word at `at`.
pub(crate) fn write_word(buf: &mut [u8], at: usize, value: usize) {
    buf[at..at + WORD].copy_from_slice(&(value as u64).to_le_bytes());
}

/// Hands out instance-identity tokens for owner tagging.
///
/// Ids start far from zero and from plausible arena offsets, so a
/// scrubbed owner word or a free-list link never matches a live instance.
pub(crate) fn next_instance_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0xA110_C8ED_5EED_0001);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Reservation of a child arena inside a parent allocator.
///
/// The parent sees the child's whole arena as one opaque occupied block;
/// the child's bookkeeping lives in its own buffer. Dropping the lease
/// returns the block to the parent, which is what ties the allocator-tree
/// lifecycle together.
pub(crate) struct ParentLease {
    parent: ParentRef,
    handle: BlockHandle,
}

impl ParentLease {
    /// Reserves `arena_size` bytes in `parent`.
    pub(crate) fn reserve(parent: ParentRef, arena_size: usize) -> Result<Self, AllocError> {
        let handle = parent
            .allocate(arena_size, 1)
            .map_err(|source| AllocError::ParentFailed {
                requested: arena_size,
                source: Box::new(source),
            })?;
        Ok(Self { parent, handle })
    }
}

impl Drop for ParentLease {
    fn drop(&mut self) {
        // The parent outlives the lease by construction; a failure here
        // would mean the lease was already released, which Drop cannot
        // report.
        let _ = self.parent.deallocate(self.handle);
    }
}

impl std::fmt::Debug for ParentLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParentLease")
            .field("handle", &self.handle)
            .finish()
    }
}
