//! Passthrough allocator over the platform heap.
//!
//! No arena, no fit mode, no free list: every allocation is its own
//! buffer, registered under a synthetic base offset together with the
//! owner id and size that a pointer-based layout would prepend as a
//! header. Ownership is validated on `deallocate` exactly like the arena
//! strategies do it. Serves as the default benchmark baseline and as a
//! parent for the other strategies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{WORD, next_instance_id};
use crate::contract::{Allocator, BlockHandle};
use crate::error::AllocError;
use crate::logging::{AllocLogger, LoggerHandle};

/// Owner id + size, the header a pointer-based layout would prepend.
const HEADER: usize = 2 * WORD;

/// First synthetic base offset, above the zero page.
const BASE_START: usize = 0x1000;

struct HeapBlock {
    owner: u64,
    bytes: Vec<u8>,
}

struct HeapState {
    blocks: HashMap<usize, HeapBlock>,
    next_base: usize,
}

/// Thin delegation to the platform allocator with ownership tagging.
pub struct GlobalHeapAllocator {
    id: u64,
    logger: LoggerHandle,
    state: Mutex<HeapState>,
}

impl GlobalHeapAllocator {
    const TYPENAME: &'static str = "global-heap allocator";

    pub fn new(logger: Option<Arc<dyn AllocLogger>>) -> Self {
        let logger = LoggerHandle::new(logger);
        logger.debug(format!("start constructor of {}", Self::TYPENAME));
        Self {
            id: next_instance_id(),
            logger,
            state: Mutex::new(HeapState {
                blocks: HashMap::new(),
                next_base: BASE_START,
            }),
        }
    }

    /// Number of live allocations.
    pub fn active_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Usable bytes of a live block owned by this instance.
    pub fn usable_size(&self, handle: BlockHandle) -> Result<usize, AllocError> {
        let state = self.state.lock();
        let block = Self::resolve(&state, self.id, handle)?;
        Ok(block.bytes.len())
    }

    /// Copies `bytes` into the block's payload at `at`.
    pub fn write(&self, handle: BlockHandle, at: usize, bytes: &[u8]) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let id = self.id;
        let block = Self::resolve_mut(&mut state, id, handle)?;
        let end = checked_span(at, bytes.len(), block.bytes.len())?;
        block.bytes[at..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the block's payload at `at` into `buf`.
    pub fn read(&self, handle: BlockHandle, at: usize, buf: &mut [u8]) -> Result<(), AllocError> {
        let state = self.state.lock();
        let block = Self::resolve(&state, self.id, handle)?;
        let end = checked_span(at, buf.len(), block.bytes.len())?;
        buf.copy_from_slice(&block.bytes[at..end]);
        Ok(())
    }

    fn resolve(state: &HeapState, id: u64, handle: BlockHandle) -> Result<&HeapBlock, AllocError> {
        state
            .blocks
            .get(&handle.0)
            .filter(|block| block.owner == id)
            .ok_or(AllocError::ForeignBlock { offset: handle.0 })
    }

    fn resolve_mut(
        state: &mut HeapState,
        id: u64,
        handle: BlockHandle,
    ) -> Result<&mut HeapBlock, AllocError> {
        state
            .blocks
            .get_mut(&handle.0)
            .filter(|block| block.owner == id)
            .ok_or(AllocError::ForeignBlock { offset: handle.0 })
    }
}

impl Default for GlobalHeapAllocator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Allocator for GlobalHeapAllocator {
    fn allocate(&self, value_size: usize, values_count: usize) -> Result<BlockHandle, AllocError> {
        let requested =
            value_size
                .checked_mul(values_count)
                .ok_or(AllocError::SizeOverflow {
                    value_size,
                    values_count,
                })?;
        self.logger.debug(format!(
            "start alloc {}: value_size = {value_size}; values_count = {values_count}; \
             result size = {requested}",
            Self::TYPENAME
        ));

        let mut state = self.state.lock();
        let base = state.next_base;
        state.next_base += HEADER + requested.max(1);
        state.blocks.insert(
            base,
            HeapBlock {
                owner: self.id,
                bytes: vec![0u8; requested],
            },
        );
        self.logger.debug(format!(
            "success alloc {} with {requested} bytes of memory",
            Self::TYPENAME
        ));
        Ok(BlockHandle(base))
    }

    fn deallocate(&self, handle: BlockHandle) -> Result<(), AllocError> {
        self.logger
            .debug(format!("start deallocate {}", Self::TYPENAME));
        let mut state = self.state.lock();
        match state.blocks.get(&handle.0) {
            Some(block) if block.owner == self.id => {
                let size = block.bytes.len();
                state.blocks.remove(&handle.0);
                self.logger.debug(format!(
                    "{} finished deallocate {size} bytes",
                    Self::TYPENAME
                ));
                Ok(())
            }
            _ => {
                self.logger
                    .error(format!("{} calling another allocator", Self::TYPENAME));
                Err(AllocError::ForeignBlock { offset: handle.0 })
            }
        }
    }
}

fn checked_span(at: usize, len: usize, payload: usize) -> Result<usize, AllocError> {
    let end = at.checked_add(len).ok_or(AllocError::OutOfBounds {
        at,
        len,
        payload,
    })?;
    if end > payload {
        return Err(AllocError::OutOfBounds { at, len, payload });
    }
    Ok(end)
}
