//! Binary buddy-system allocator.
//!
//! The arena is `1 << space_power` bytes partitioned into power-of-two
//! blocks. Every block starts with a one-byte header packing its relative
//! order (low bits) and an occupied flag (high bit); occupied blocks carry
//! an owner-id word right after it. A block's buddy — the equal-sized
//! sibling it merges with — sits at `offset XOR size`.

use parking_lot::Mutex;

use crate::arena::{ParentLease, WORD, next_instance_id, read_word, write_word};
use crate::contract::{Allocator, AllocatorWithFitMode, BlockHandle};
use crate::error::AllocError;
use crate::fit::{FitMode, FitSearch};
use crate::introspect::{BlockInfo, Introspect, blocks_to_string};
use crate::logging::LoggerHandle;
use crate::strategy::ArenaOptions;

const OCCUPIED_BIT: u8 = 0x80;
const ORDER_MASK: u8 = 0x7F;

/// Flag byte plus owner word.
const OCCUPIED_META: usize = 1 + WORD;

/// Smallest block order: 16 bytes, enough for the occupied header.
pub const MIN_POWER: u32 = 4;

struct BuddyState {
    buf: Vec<u8>,
    power: u32,
    fit: FitMode,
    free_bytes: usize,
}

impl BuddyState {
    fn capacity(&self) -> usize {
        1 << self.power
    }

    fn rel_order(&self, block: usize) -> u32 {
        (self.buf[block] & ORDER_MASK) as u32
    }

    fn occupied(&self, block: usize) -> bool {
        self.buf[block] & OCCUPIED_BIT != 0
    }

    fn block_size(&self, block: usize) -> usize {
        1 << (MIN_POWER + self.rel_order(block))
    }

    fn set_header(&mut self, block: usize, rel_order: u32, occupied: bool) {
        let flag = if occupied { OCCUPIED_BIT } else { 0 };
        self.buf[block] = rel_order as u8 | flag;
    }

    fn owner_of(&self, block: usize) -> usize {
        read_word(&self.buf, block + 1)
    }

    fn partition(&self) -> Vec<BlockInfo> {
        let mut blocks = Vec::new();
        let mut off = 0;
        while off < self.capacity() {
            let size = self.block_size(off);
            blocks.push(BlockInfo {
                size,
                occupied: self.occupied(off),
            });
            off += size;
        }
        blocks
    }
}

/// Allocator over a power-of-two arena with buddy coalescing.
pub struct BuddyAllocator {
    id: u64,
    logger: LoggerHandle,
    state: Mutex<BuddyState>,
    _lease: Option<ParentLease>,
}

impl BuddyAllocator {
    const TYPENAME: &'static str = "buddy-system allocator";

    /// Builds an allocator over a `1 << space_power` byte arena.
    ///
    /// The exponent must be at least [`MIN_POWER`] so one occupied header
    /// fits, and small enough for the size to be addressable.
    pub fn new(space_power: u32, options: ArenaOptions) -> Result<Self, AllocError> {
        let logger = LoggerHandle::new(options.logger);
        if space_power >= usize::BITS {
            return Err(AllocError::ExponentTooLarge {
                power: space_power,
                max: usize::BITS - 1,
            });
        }
        if space_power < MIN_POWER {
            logger.error(format!(
                "{} construct with param error: 2^{space_power} bytes is less than the \
                 minimum possible size {}",
                Self::TYPENAME,
                1usize << MIN_POWER
            ));
            return Err(AllocError::ArenaTooSmall {
                requested: 1 << space_power,
                minimum: 1 << MIN_POWER,
            });
        }
        let capacity = 1usize << space_power;

        let lease = match options.parent {
            Some(parent) => Some(ParentLease::reserve(parent, capacity).inspect_err(|_| {
                logger.error(format!(
                    "{} failed to allocate {capacity} bytes of memory",
                    Self::TYPENAME
                ));
            })?),
            None => None,
        };

        let mut state = BuddyState {
            buf: vec![0u8; capacity],
            power: space_power,
            fit: options.fit_mode,
            free_bytes: capacity,
        };
        state.set_header(0, space_power - MIN_POWER, false);

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

    /// Free bytes currently available across all free blocks.
    pub fn available(&self) -> usize {
        self.state.lock().free_bytes
    }

    /// Usable bytes of a live block owned by this instance.
    pub fn usable_size(&self, handle: BlockHandle) -> Result<usize, AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        Ok(state.block_size(header) - OCCUPIED_META)
    }

    /// Copies `bytes` into the block's payload at `at`.
    pub fn write(&self, handle: BlockHandle, at: usize, bytes: &[u8]) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let payload = state.block_size(header) - OCCUPIED_META;
        let end = payload_span(at, bytes.len(), payload)?;
        let start = header + OCCUPIED_META;
        state.buf[start + at..start + end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the block's payload at `at` into `buf`.
    pub fn read(&self, handle: BlockHandle, at: usize, buf: &mut [u8]) -> Result<(), AllocError> {
        let state = self.state.lock();
        let header = Self::resolve(&state, self.id, handle)?;
        let payload = state.block_size(header) - OCCUPIED_META;
        let end = payload_span(at, buf.len(), payload)?;
        let start = header + OCCUPIED_META;
        buf.copy_from_slice(&state.buf[start + at..start + end]);
        Ok(())
    }

    /// Validates a non-root handle and returns the block's header offset.
    fn resolve(state: &BuddyState, id: u64, handle: BlockHandle) -> Result<usize, AllocError> {
        let foreign = AllocError::ForeignBlock { offset: handle.0 };
        let Some(header) = handle.0.checked_sub(OCCUPIED_META) else {
            return Err(foreign);
        };
        if handle.0 > state.capacity()
            || !state.occupied(header)
            || state.owner_of(header) != id as usize
        {
            return Err(foreign);
        }
        Ok(header)
    }
}

impl Allocator for BuddyAllocator {
    fn allocate(&self, value_size: usize, values_count: usize) -> Result<BlockHandle, AllocError> {
        let requested =
            value_size
                .checked_mul(values_count)
                .ok_or(AllocError::SizeOverflow {
                    value_size,
                    values_count,
                })?;
        // Saturation makes an absurd request miss every block.
        let need = requested.saturating_add(OCCUPIED_META);

        let mut state = self.state.lock();
        self.logger.debug(format!(
            "{} allocate with value_size = {value_size}; values_count = {values_count}; \
             now it is having {} bytes",
            Self::TYPENAME,
            state.free_bytes
        ));

        let mut search = FitSearch::new(state.fit);
        let mut off = 0;
        while off < state.capacity() {
            let size = state.block_size(off);
            if !state.occupied(off) && size >= need && search.offer(size, off) {
                break;
            }
            off += size;
        }
        let Some(block) = search.take() else {
            self.logger.error(format!(
                "{} no suitable block found for {need} bytes",
                Self::TYPENAME
            ));
            return Err(AllocError::OutOfMemory {
                requested,
                mode: state.fit,
            });
        };

        // Halve the block while the half still covers the request; each
        // halving stamps the new free buddy's header.
        let mut size = state.block_size(block);
        while size >= 2 * need {
            size >>= 1;
            let rel = state.rel_order(block) - 1;
            state.set_header(block, rel, false);
            state.set_header(block + size, rel, false);
        }

        let rel = state.rel_order(block);
        state.set_header(block, rel, true);
        write_word(&mut state.buf, block + 1, self.id as usize);
        state.free_bytes -= size;

        self.logger.debug(format!(
            "allocation completed. allocated memory size: {requested} bytes. {} bytes left",
            state.free_bytes
        ));
        self.logger.information(format!(
            "{} current state of blocks: {}",
            Self::TYPENAME,
            blocks_to_string(&state.partition())
        ));
        Ok(BlockHandle(block + OCCUPIED_META))
    }

    fn deallocate(&self, handle: BlockHandle) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        self.logger
            .debug(format!("start deallocate {}", Self::TYPENAME));

        // A handle equal to the arena base is accepted as an alias for
        // the first block and skips owner verification; the block still
        // has to be occupied.
        let header = if handle.0 == 0 {
            if !state.occupied(0) {
                self.logger.error("invalid memory block");
                return Err(AllocError::ForeignBlock { offset: 0 });
            }
            0
        } else {
            Self::resolve(&state, self.id, handle).inspect_err(|_| {
                self.logger.error("invalid memory block");
            })?
        };

        let freed = state.block_size(header);
        let rel = state.rel_order(header);
        state.set_header(header, rel, false);
        state.free_bytes += freed;

        // Merge with the buddy while it is free and of equal order, up to
        // the whole arena.
        let mut off = header;
        let mut size = freed;
        while size < state.capacity() {
            let buddy = off ^ size;
            if state.occupied(buddy) || state.rel_order(buddy) != state.rel_order(off) {
                break;
            }
            let merged = off.min(buddy);
            let rel = state.rel_order(off) + 1;
            state.set_header(merged, rel, false);
            off = merged;
            size <<= 1;
        }

        self.logger.debug(format!(
            "deallocation completed. deallocated memory size: {freed} bytes. \
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

impl AllocatorWithFitMode for BuddyAllocator {
    fn set_fit_mode(&self, mode: FitMode) {
        self.state.lock().fit = mode;
    }
}

impl Introspect for BuddyAllocator {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(blocks: &[BlockInfo]) -> usize {
        blocks.iter().map(|b| b.size).sum()
    }

    #[test]
    fn test_construction_rejects_tiny_exponent() {
        assert!(matches!(
            BuddyAllocator::new(MIN_POWER - 1, ArenaOptions::new()),
            Err(AllocError::ArenaTooSmall { minimum: 16, .. })
        ));
    }

    #[test]
    fn test_construction_rejects_unaddressable_exponent() {
        assert!(matches!(
            BuddyAllocator::new(usize::BITS, ArenaOptions::new()),
            Err(AllocError::ExponentTooLarge { .. })
        ));
    }

    #[test]
    fn test_fresh_arena_is_one_free_block() {
        let alloc = BuddyAllocator::new(10, ArenaOptions::new()).unwrap();
        assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(1024)]);
    }

    #[test]
    fn test_allocation_rounds_to_smallest_covering_power() {
        // 40 bytes + 9-byte occupied header = 49, so the block must be 64.
        let alloc = BuddyAllocator::new(10, ArenaOptions::new()).unwrap();
        let handle = alloc.allocate(40, 1).unwrap();
        assert_eq!(alloc.usable_size(handle).unwrap(), 64 - OCCUPIED_META);
        assert_eq!(
            alloc.blocks_info(),
            vec![
                BlockInfo::occupied(64),
                BlockInfo::free(64),
                BlockInfo::free(128),
                BlockInfo::free(256),
                BlockInfo::free(512),
            ]
        );
        alloc.deallocate(handle).unwrap();
        assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(1024)]);
    }

    #[test]
    fn test_best_fit_takes_smallest_sufficient_block() {
        let alloc = BuddyAllocator::new(9, ArenaOptions::new()).unwrap();
        let first = alloc.allocate(40, 1).unwrap();
        // Free blocks now: 64 at 64, 128 at 128, 256 at 256.
        alloc.set_fit_mode(FitMode::BestFit);
        let got = alloc.allocate(20, 1).unwrap();
        assert_eq!(got.offset(), 64 + OCCUPIED_META);
        assert_eq!(
            alloc.blocks_info(),
            vec![
                BlockInfo::occupied(64),
                BlockInfo::occupied(32),
                BlockInfo::free(32),
                BlockInfo::free(128),
                BlockInfo::free(256),
            ]
        );
        alloc.deallocate(first).unwrap();
        alloc.deallocate(got).unwrap();
    }

    #[test]
    fn test_worst_fit_takes_largest_block() {
        let alloc = BuddyAllocator::new(9, ArenaOptions::new()).unwrap();
        let _first = alloc.allocate(40, 1).unwrap();
        alloc.set_fit_mode(FitMode::WorstFit);
        let got = alloc.allocate(20, 1).unwrap();
        assert_eq!(got.offset(), 256 + OCCUPIED_META);
        assert_eq!(
            alloc.blocks_info(),
            vec![
                BlockInfo::occupied(64),
                BlockInfo::free(64),
                BlockInfo::free(128),
                BlockInfo::occupied(32),
                BlockInfo::free(32),
                BlockInfo::free(64),
                BlockInfo::free(128),
            ]
        );
    }

    #[test]
    fn test_merge_closure_after_freeing_all_blocks() {
        let alloc = BuddyAllocator::new(10, ArenaOptions::new()).unwrap();
        let handles: Vec<_> = (0..8).map(|_| alloc.allocate(40, 1).unwrap()).collect();
        assert_eq!(sum(&alloc.blocks_info()), 1024);
        // Free in an interleaved order; coalescing must still close back
        // to the full arena.
        for handle in handles.iter().step_by(2).chain(handles.iter().skip(1).step_by(2)) {
            alloc.deallocate(*handle).unwrap();
        }
        assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(1024)]);
        assert_eq!(alloc.available(), 1024);
    }

    #[test]
    fn test_root_handle_skips_owner_verification() {
        let alloc = BuddyAllocator::new(5, ArenaOptions::new()).unwrap();
        let handle = alloc.allocate(20, 1).unwrap();
        assert_eq!(handle.offset(), OCCUPIED_META);
        // Freeing through the arena-base handle resolves to the first
        // block without an owner check.
        alloc.deallocate(BlockHandle(0)).unwrap();
        assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(32)]);
        assert!(matches!(
            alloc.deallocate(BlockHandle(0)),
            Err(AllocError::ForeignBlock { offset: 0 })
        ));
    }

    #[test]
    fn test_ownership_round_trip() {
        let alloc = BuddyAllocator::new(8, ArenaOptions::new()).unwrap();
        let other = BuddyAllocator::new(8, ArenaOptions::new()).unwrap();
        let handle = alloc.allocate(30, 1).unwrap();
        assert!(matches!(
            other.deallocate(handle),
            Err(AllocError::ForeignBlock { .. })
        ));
        alloc.deallocate(handle).unwrap();
        assert!(matches!(
            alloc.deallocate(handle),
            Err(AllocError::ForeignBlock { .. })
        ));
    }

    #[test]
    fn test_out_of_memory_leaves_arena_unchanged() {
        let alloc = BuddyAllocator::new(6, ArenaOptions::new()).unwrap();
        let before = alloc.blocks_info();
        assert!(matches!(
            alloc.allocate(64, 1),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(alloc.blocks_info(), before);
    }

    #[test]
    fn test_data_round_trip_in_split_blocks() {
        let alloc = BuddyAllocator::new(8, ArenaOptions::new()).unwrap();
        let a = alloc.allocate(16, 1).unwrap();
        let b = alloc.allocate(16, 1).unwrap();
        alloc.write(a, 0, &[1; 16]).unwrap();
        alloc.write(b, 0, &[2; 16]).unwrap();
        let mut out = [0u8; 16];
        alloc.read(a, 0, &mut out).unwrap();
        assert_eq!(out, [1; 16]);
        alloc.read(b, 0, &mut out).unwrap();
        assert_eq!(out, [2; 16]);
        assert!(matches!(
            alloc.write(a, 20, &[0; 4]),
            Err(AllocError::OutOfBounds { .. })
        ));
    }
}
