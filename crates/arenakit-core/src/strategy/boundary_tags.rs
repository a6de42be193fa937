//! Boundary-tag allocator.
//!
//! Keeps an address-ordered doubly-linked list of *occupied* blocks only;
//! free space is implicit — the gaps between consecutive list entries and
//! between the arena edges and the outermost entries. Deallocation is
//! therefore just an unlink: the next allocation's gap walk sees the
//! enlarged gap without any explicit coalescing step.
//!
//! Block header layout, four words at the block's base offset:
//! owner id, payload size, prev occupied block, next occupied block.

use parking_lot::Mutex;

use crate::arena::{NIL, ParentLease, WORD, next_instance_id, read_word, write_word};
use crate::contract::{Allocator, AllocatorWithFitMode, BlockHandle};
use crate::error::AllocError;
use crate::fit::{FitMode, FitSearch};
use crate::introspect::{BlockInfo, Introspect, blocks_to_string};
use crate::logging::LoggerHandle;
use crate::strategy::ArenaOptions;

/// Per-block header: owner, size, prev, next.
const BLOCK_META: usize = 4 * WORD;

const OWNER: usize = 0;
const SIZE: usize = WORD;
const PREV: usize = 2 * WORD;
const NEXT: usize = 3 * WORD;

/// A free region between two occupied neighbors (or an arena edge).
struct Gap {
    start: usize,
    len: usize,
    /// Occupied block preceding the gap, `NIL` at the arena start.
    prev: usize,
}

struct TagState {
    buf: Vec<u8>,
    fit: FitMode,
    /// First occupied block by address, `NIL` when the arena is empty.
    first: usize,
    free_bytes: usize,
}

impl TagState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn owner_of(&self, block: usize) -> usize {
        read_word(&self.buf, block + OWNER)
    }

    fn size_of(&self, block: usize) -> usize {
        read_word(&self.buf, block + SIZE)
    }

    fn prev_of(&self, block: usize) -> usize {
        read_word(&self.buf, block + PREV)
    }

    fn next_of(&self, block: usize) -> usize {
        read_word(&self.buf, block + NEXT)
    }

    /// Offset one past the block's payload.
    fn end_of(&self, block: usize) -> usize {
        block + BLOCK_META + self.size_of(block)
    }

    /// All free regions in address order.
    fn gaps(&self) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let mut prev = NIL;
        let mut prev_end = 0;
        let mut cursor = self.first;
        while cursor != NIL {
            gaps.push(Gap {
                start: prev_end,
                len: cursor - prev_end,
                prev,
            });
            prev_end = self.end_of(cursor);
            prev = cursor;
            cursor = self.next_of(cursor);
        }
        gaps.push(Gap {
            start: prev_end,
            len: self.capacity() - prev_end,
            prev,
        });
        gaps
    }

    fn partition(&self) -> Vec<BlockInfo> {
        let mut blocks = Vec::new();
        let mut prev_end = 0;
        let mut cursor = self.first;
        while cursor != NIL {
            if cursor > prev_end {
                blocks.push(BlockInfo::free(cursor - prev_end));
            }
            blocks.push(BlockInfo::occupied(BLOCK_META + self.size_of(cursor)));
            prev_end = self.end_of(cursor);
            cursor = self.next_of(cursor);
        }
        if prev_end < self.capacity() {
            blocks.push(BlockInfo::free(self.capacity() - prev_end));
        }
        blocks
    }
}

/// Allocator over a single arena with boundary-tagged occupied blocks.
pub struct BoundaryTagAllocator {
    id: u64,
    logger: LoggerHandle,
    state: Mutex<TagState>,
    _lease: Option<ParentLease>,
}

impl BoundaryTagAllocator {
    const TYPENAME: &'static str = "boundary-tags allocator";

    /// Builds an allocator over `space_size` arena bytes.
    ///
    /// Fails when the arena cannot hold even one block header, or when the
    /// configured parent cannot supply the arena.
    pub fn new(space_size: usize, options: ArenaOptions) -> Result<Self, AllocError> {
        let logger = LoggerHandle::new(options.logger);
        if space_size < BLOCK_META {
            logger.error(format!(
                "{} construct with param error: {space_size} bytes is less than the minimum \
                 possible size {BLOCK_META}",
                Self::TYPENAME
            ));
            return Err(AllocError::ArenaTooSmall {
                requested: space_size,
                minimum: BLOCK_META,
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

        logger.debug(format!(
            "{} constructor with parameters completed successfully",
            Self::TYPENAME
        ));
        Ok(Self {
            id: next_instance_id(),
            logger,
            state: Mutex::new(TagState {
                buf: vec![0u8; space_size],
                fit: options.fit_mode,
                first: NIL,
                free_bytes: space_size,
            }),
            _lease: lease,
        })
    }

    /// Free bytes currently available, counting gap space in full.
    pub fn available(&self) -> usize {
        self.state.lock().free_bytes
    }

    /// Usable bytes of a live block owned by this instance.
    pub fn usable_size(&self, handle: BlockHandle) -> Result<usize, AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        Ok(state.size_of(header))
    }

    /// Copies `bytes` into the block's payload at `at`.
    pub fn write(&self, handle: BlockHandle, at: usize, bytes: &[u8]) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let start = header + BLOCK_META;
        let end = payload_span(at, bytes.len(), state.size_of(header))?;
        state.buf[start + at..start + end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the block's payload at `at` into `buf`.
    pub fn read(&self, handle: BlockHandle, at: usize, buf: &mut [u8]) -> Result<(), AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let start = header + BLOCK_META;
        let end = payload_span(at, buf.len(), state.size_of(header))?;
        buf.copy_from_slice(&state.buf[start + at..start + end]);
        Ok(())
    }

    /// Validates a handle and returns the block's header offset.
    fn resolve(state: &TagState, id: u64, handle: BlockHandle) -> Result<usize, AllocError> {
        let foreign = AllocError::ForeignBlock { offset: handle.0 };
        let Some(header) = handle.0.checked_sub(BLOCK_META) else {
            return Err(foreign);
        };
        if handle.0 > state.capacity() || state.owner_of(header) != id as usize {
            return Err(foreign);
        }
        Ok(header)
    }
}

impl Allocator for BoundaryTagAllocator {
    fn allocate(&self, value_size: usize, values_count: usize) -> Result<BlockHandle, AllocError> {
        let requested =
            value_size
                .checked_mul(values_count)
                .ok_or(AllocError::SizeOverflow {
                    value_size,
                    values_count,
                })?;
        // Saturation makes an absurd request miss every gap.
        let need = requested.saturating_add(BLOCK_META);

        let mut state = self.state.lock();
        self.logger.debug(format!(
            "{} allocate with value_size = {value_size}; values_count = {values_count}; \
             now it is having {} bytes",
            Self::TYPENAME,
            state.free_bytes
        ));

        let mut search = FitSearch::new(state.fit);
        for gap in state.gaps() {
            if gap.len >= need && search.offer(gap.len, gap) {
                break;
            }
        }
        let Some(gap) = search.take() else {
            self.logger.error(format!(
                "{} no suitable block found for {need} bytes",
                Self::TYPENAME
            ));
            return Err(AllocError::OutOfMemory {
                requested,
                mode: state.fit,
            });
        };

        // A gap tail too small to hold a header would be unreachable by
        // any later allocation; fold it into this block instead.
        let mut payload = requested;
        if gap.len - need < BLOCK_META {
            payload = gap.len - BLOCK_META;
        }

        let block = gap.start;
        let next = if gap.prev == NIL {
            state.first
        } else {
            state.next_of(gap.prev)
        };
        write_word(&mut state.buf, block + OWNER, self.id as usize);
        write_word(&mut state.buf, block + SIZE, payload);
        write_word(&mut state.buf, block + PREV, gap.prev);
        write_word(&mut state.buf, block + NEXT, next);
        if gap.prev == NIL {
            state.first = block;
        } else {
            write_word(&mut state.buf, gap.prev + NEXT, block);
        }
        if next != NIL {
            write_word(&mut state.buf, next + PREV, block);
        }
        state.free_bytes -= BLOCK_META + payload;

        self.logger.debug(format!(
            "allocation completed. allocated memory size: {payload} bytes. {} bytes left",
            state.free_bytes
        ));
        self.logger.information(format!(
            "{} current state of blocks: {}",
            Self::TYPENAME,
            blocks_to_string(&state.partition())
        ));
        Ok(BlockHandle(block + BLOCK_META))
    }

    fn deallocate(&self, handle: BlockHandle) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        self.logger
            .debug(format!("start deallocate {}", Self::TYPENAME));

        let header = Self::resolve(&state, self.id, handle).inspect_err(|_| {
            self.logger.error("invalid memory block");
        })?;

        let prev = state.prev_of(header);
        let next = state.next_of(header);
        if prev == NIL {
            state.first = next;
        } else {
            write_word(&mut state.buf, prev + NEXT, next);
        }
        if next != NIL {
            write_word(&mut state.buf, next + PREV, prev);
        }
        // Scrub the owner word so a second free of the same handle fails.
        write_word(&mut state.buf, header + OWNER, 0);

        let released = BLOCK_META + state.size_of(header);
        state.free_bytes += released;
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

impl AllocatorWithFitMode for BoundaryTagAllocator {
    fn set_fit_mode(&self, mode: FitMode) {
        self.state.lock().fit = mode;
    }
}

impl Introspect for BoundaryTagAllocator {
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
