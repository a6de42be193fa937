//! Sorted free-list allocator.
//!
//! An explicit singly-linked free list threaded through the free bytes
//! themselves, kept in address order. Every block starts with two words:
//! its payload size, then either the next free node (free blocks) or the
//! owner id (occupied blocks) — the second word's meaning is positional,
//! which is also what scrubs ownership on release: freeing a block
//! overwrites the owner word with a list link.

use parking_lot::Mutex;

use crate::arena::{NIL, ParentLease, WORD, next_instance_id, read_word, write_word};
use crate::contract::{Allocator, AllocatorWithFitMode, BlockHandle};
use crate::error::AllocError;
use crate::fit::{FitMode, FitSearch};
use crate::introspect::{BlockInfo, Introspect, blocks_to_string};
use crate::logging::LoggerHandle;
use crate::strategy::ArenaOptions;

/// Per-block header: size word plus link/owner word.
const NODE_META: usize = 2 * WORD;

struct ListState {
    buf: Vec<u8>,
    fit: FitMode,
    /// First free node by address, `NIL` when nothing is free.
    first_free: usize,
    free_bytes: usize,
}

impl ListState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn size_of(&self, node: usize) -> usize {
        read_word(&self.buf, node)
    }

    /// Second header word: next free node (free) or owner id (occupied).
    fn link_of(&self, node: usize) -> usize {
        read_word(&self.buf, node + WORD)
    }

    fn set_size(&mut self, node: usize, size: usize) {
        write_word(&mut self.buf, node, size);
    }

    fn set_link(&mut self, node: usize, link: usize) {
        write_word(&mut self.buf, node + WORD, link);
    }

    /// Rewires the predecessor position (`NIL` = list head) to `node`.
    fn relink(&mut self, pred: usize, node: usize) {
        if pred == NIL {
            self.first_free = node;
        } else {
            self.set_link(pred, node);
        }
    }

    /// Walks block footprints in address order, using the free list to
    /// classify spans.
    fn partition(&self) -> Vec<BlockInfo> {
        let mut blocks = Vec::new();
        let mut pos = 0;
        let mut free = self.first_free;
        while pos < self.capacity() {
            let footprint = NODE_META + self.size_of(pos);
            if pos == free {
                blocks.push(BlockInfo::free(footprint));
                free = self.link_of(pos);
            } else {
                blocks.push(BlockInfo::occupied(footprint));
            }
            pos += footprint;
        }
        blocks
    }
}

/// Allocator over a single arena with an address-sorted free list.
pub struct SortedListAllocator {
    id: u64,
    logger: LoggerHandle,
    state: Mutex<ListState>,
    _lease: Option<ParentLease>,
}

impl SortedListAllocator {
    const TYPENAME: &'static str = "sorted-free-list allocator";

    /// Builds an allocator over `space_size` arena bytes.
    pub fn new(space_size: usize, options: ArenaOptions) -> Result<Self, AllocError> {
        let logger = LoggerHandle::new(options.logger);
        if space_size < NODE_META {
            logger.error(format!(
                "{} construct with param error: {space_size} bytes is less than the minimum \
                 possible size {NODE_META}",
                Self::TYPENAME
            ));
            return Err(AllocError::ArenaTooSmall {
                requested: space_size,
                minimum: NODE_META,
            });
        }

        let lease = match options.parent {
            Some(parent) => Some(ParentLease::reserve(parent, space_size).inspect_err(|_| {
                logger.error(format!(
                    "{} failed to allocate {space_size} bytes of memory",
                    Self::TYPENAME
                ));
            })?),
            None => None,
        };

        let mut state = ListState {
            buf: vec![0u8; space_size],
            fit: options.fit_mode,
            first_free: 0,
            free_bytes: space_size - NODE_META,
        };
        state.set_size(0, space_size - NODE_META);
        state.set_link(0, NIL);

        logger.debug(format!(
            "{} constructor with parameters completed successfully",
            Self::TYPENAME
        ));
        Ok(Self {
            id: next_instance_id(),
            logger,
            state: Mutex::new(state),
            _lease: lease,
        })
    }

    /// Usable free bytes currently on the free list.
    pub fn available(&self) -> usize {
        self.state.lock().free_bytes
    }

    /// Usable bytes of a live block owned by this instance.
    ///
    /// Reports the actual granted size, which may exceed the request when
    /// a region was absorbed whole.
    pub fn usable_size(&self, handle: BlockHandle) -> Result<usize, AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        Ok(state.size_of(header))
    }

    /// Copies `bytes` into the block's payload at `at`.
    pub fn write(&self, handle: BlockHandle, at: usize, bytes: &[u8]) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let end = payload_span(at, bytes.len(), state.size_of(header))?;
        let start = header + NODE_META;
        state.buf[start + at..start + end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the block's payload at `at` into `buf`.
    pub fn read(&self, handle: BlockHandle, at: usize, buf: &mut [u8]) -> Result<(), AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let end = payload_span(at, buf.len(), state.size_of(header))?;
        let start = header + NODE_META;
        buf.copy_from_slice(&state.buf[start + at..start + end]);
        Ok(())
    }

    /// Validates a handle and returns the block's header offset.
    fn resolve(state: &ListState, id: u64, handle: BlockHandle) -> Result<usize, AllocError> {
        let foreign = AllocError::ForeignBlock { offset: handle.0 };
        let Some(header) = handle.0.checked_sub(NODE_META) else {
            return Err(foreign);
        };
        if handle.0 > state.capacity() || state.link_of(header) != id as usize {
            return Err(foreign);
        }
        Ok(header)
    }

    /// Last free node strictly before `header`, `NIL` when none.
    fn free_predecessor(state: &ListState, header: usize) -> usize {
        let mut pred = NIL;
        let mut node = state.first_free;
        while node != NIL && node < header {
            pred = node;
            node = state.link_of(node);
        }
        pred
    }
}

impl Allocator for SortedListAllocator {
    fn allocate(&self, value_size: usize, values_count: usize) -> Result<BlockHandle, AllocError> {
        let requested =
            value_size
                .checked_mul(values_count)
                .ok_or(AllocError::SizeOverflow {
                    value_size,
                    values_count,
                })?;

        let mut state = self.state.lock();
        self.logger.debug(format!(
            "{} allocate with value_size = {value_size}; values_count = {values_count}; \
             now it is having {} bytes",
            Self::TYPENAME,
            state.free_bytes
        ));

        // The search yields the *predecessor* position of the winning
        // free node, because carving the node out rewires that position.
        let mut search = FitSearch::new(state.fit);
        let mut pred = NIL;
        let mut node = state.first_free;
        while node != NIL {
            let size = state.size_of(node);
            if size >= requested && search.offer(size, pred) {
                break;
            }
            pred = node;
            node = state.link_of(node);
        }
        let Some(pred) = search.take() else {
            self.logger.error(format!(
                "{} no suitable block found for {requested} bytes",
                Self::TYPENAME
            ));
            return Err(AllocError::OutOfMemory {
                requested,
                mode: state.fit,
            });
        };

        let block = if pred == NIL {
            state.first_free
        } else {
            state.link_of(pred)
        };
        let region = state.size_of(block);
        let old_next = state.link_of(block);

        // A remainder too small to hold a free-node header cannot be
        // threaded back into the list; grant the whole region instead.
        let mut granted = requested;
        if region < requested + NODE_META {
            self.logger.warning(format!(
                "{} changed allocating block size to {region}",
                Self::TYPENAME
            ));
            granted = region;
        }

        state.set_size(block, granted);
        state.set_link(block, self.id as usize);

        let replacement = if region - granted >= NODE_META {
            // The remainder grows a header of its own.
            let rest = block + NODE_META + granted;
            state.set_size(rest, region - granted - NODE_META);
            state.set_link(rest, old_next);
            state.free_bytes -= granted + NODE_META;
            rest
        } else {
            state.free_bytes -= granted;
            old_next
        };
        state.relink(pred, replacement);

        self.logger.debug(format!(
            "allocation completed. allocated memory size: {granted} bytes. {} bytes left",
            state.free_bytes
        ));
        self.logger.information(format!(
            "{} current state of blocks: {}",
            Self::TYPENAME,
            blocks_to_string(&state.partition())
        ));
        Ok(BlockHandle(block + NODE_META))
    }

    fn deallocate(&self, handle: BlockHandle) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        self.logger
            .debug(format!("start deallocate {}", Self::TYPENAME));

        let header = Self::resolve(&state, self.id, handle).inspect_err(|_| {
            self.logger.error("invalid memory block");
        })?;
        let released = state.size_of(header);

        let pred = Self::free_predecessor(&state, header);
        let next_free = if pred == NIL {
            state.first_free
        } else {
            state.link_of(pred)
        };

        // Fold the adjacent successor free node in, or just point at it.
        // Each merge reclaims the swallowed node's header as usable space.
        let mut reclaimed = released;
        if next_free != NIL && header + NODE_META + state.size_of(header) == next_free {
            let merged = state.size_of(header) + NODE_META + state.size_of(next_free);
            let after = state.link_of(next_free);
            state.set_size(header, merged);
            state.set_link(header, after);
            reclaimed += NODE_META;
        } else {
            state.set_link(header, next_free);
        }
        state.relink(pred, header);

        // Fold into the adjacent predecessor free node.
        if pred != NIL && pred + NODE_META + state.size_of(pred) == header {
            let merged = state.size_of(pred) + NODE_META + state.size_of(header);
            let after = state.link_of(header);
            state.set_size(pred, merged);
            state.set_link(pred, after);
            reclaimed += NODE_META;
        }
        state.free_bytes += reclaimed;

        self.logger.debug(format!(
            "deallocation completed. deallocated memory size: {released} bytes. \
             current available memory: {} bytes",
            state.free_bytes
        ));
        self.logger.information(format!(
            "{} current state of blocks: {}",
            Self::TYPENAME,
            blocks_to_string(&state.partition())
        ));
        Ok(())
    }
}

impl AllocatorWithFitMode for SortedListAllocator {
    fn set_fit_mode(&self, mode: FitMode) {
        self.state.lock().fit = mode;
    }
}

impl Introspect for SortedListAllocator {
    fn blocks_info(&self) -> Vec<BlockInfo> {
        self.state.lock().partition()
    }
}

fn payload_span(at: usize, len: usize, payload: usize) -> Result<usize, AllocError> {
    let end = at
        .checked_add(len)
        .ok_or(AllocError::OutOfBounds { at, len, payload })?;
    if end > payload {
        return Err(AllocError::OutOfBounds { at, len, payload });
    }
    Ok(end)
}
