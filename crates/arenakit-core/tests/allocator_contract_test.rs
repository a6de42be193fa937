//! Randomized trace checks shared by every arena strategy.
//!
//! Each strategy is driven through the same pseudo-random sequence of
//! allocations and releases while the partition invariants are checked
//! after every step: block footprints tile the arena exactly, the number
//! of occupied blocks equals the number of live handles, and releasing
//! everything restores a single free region.

use std::sync::Arc;
use std::thread;

use arenakit_core::{
    AllocError, Allocator, AllocatorWithFitMode, ArenaOptions, BlockHandle, BlockInfo,
    BoundaryTagAllocator, BuddyAllocator, FitMode, GlobalHeapAllocator, Introspect,
    SortedListAllocator,
};

struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

const FIT_MODES: [FitMode; 3] = [FitMode::FirstFit, FitMode::BestFit, FitMode::WorstFit];

fn check_partition(blocks: &[BlockInfo], capacity: usize, live: usize, step: usize) {
    let total: usize = blocks.iter().map(|b| b.size).sum();
    assert_eq!(total, capacity, "partition must tile the arena at step {step}");
    let occupied = blocks.iter().filter(|b| b.occupied).count();
    assert_eq!(occupied, live, "occupied count must match live handles at step {step}");
}

fn drive<A>(alloc: &A, capacity: usize, seed: u64)
where
    A: Allocator + AllocatorWithFitMode + Introspect,
{
    let mut rng = Lcg::new(seed);
    let mut live: Vec<BlockHandle> = Vec::new();

    for step in 0..400 {
        if step % 50 == 0 {
            alloc.set_fit_mode(FIT_MODES[(step / 50) % FIT_MODES.len()]);
        }
        let allocate = live.is_empty() || rng.next(10) < 6;
        if allocate {
            let value_size = 1 + rng.next(48);
            let values_count = 1 + rng.next(4);
            match alloc.allocate(value_size, values_count) {
                Ok(handle) => live.push(handle),
                Err(AllocError::OutOfMemory { requested, .. }) => {
                    assert_eq!(requested, value_size * values_count);
                }
                Err(other) => panic!("unexpected allocation failure: {other}"),
            }
        } else {
            let handle = live.swap_remove(rng.next(live.len()));
            alloc.deallocate(handle).unwrap();
        }
        check_partition(&alloc.blocks_info(), capacity, live.len(), step);
    }

    while let Some(handle) = live.pop() {
        alloc.deallocate(handle).unwrap();
    }
    assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(capacity)]);
}

#[test]
fn test_boundary_tags_random_trace() {
    let alloc = BoundaryTagAllocator::new(4096, ArenaOptions::new()).unwrap();
    drive(&alloc, 4096, 0xDEAD_BEEF);
}

#[test]
fn test_buddy_system_random_trace() {
    let alloc = BuddyAllocator::new(12, ArenaOptions::new()).unwrap();
    drive(&alloc, 4096, 0xDEAD_BEEF);
}

#[test]
fn test_sorted_list_random_trace() {
    let alloc = SortedListAllocator::new(4096, ArenaOptions::new()).unwrap();
    drive(&alloc, 4096, 0xDEAD_BEEF);
}

/// Hammers one shared allocator from several threads at once.
///
/// Each thread churns its own handles; nothing is shared but the
/// allocator, so every deallocate must succeed and the arena must close
/// back to a single free region once all threads have joined.
fn hammer<A>(alloc: Arc<A>, capacity: usize)
where
    A: Allocator + Introspect + 'static,
{
    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let alloc = Arc::clone(&alloc);
            thread::spawn(move || {
                let mut rng = Lcg::new(0x9E37_79B9_7F4A_7C15 ^ worker);
                let mut held: Vec<BlockHandle> = Vec::new();
                for _ in 0..200 {
                    if held.len() < 8 && rng.next(10) < 6 {
                        // Contention can exhaust the arena; a failed
                        // allocation is just skipped.
                        if let Ok(handle) = alloc.allocate(1 + rng.next(24), 1) {
                            held.push(handle);
                        }
                    } else if let Some(handle) = held.pop() {
                        alloc.deallocate(handle).unwrap();
                    }
                }
                for handle in held {
                    alloc.deallocate(handle).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(alloc.blocks_info(), vec![BlockInfo::free(capacity)]);
}

#[test]
fn test_boundary_tags_concurrent_churn() {
    let alloc = Arc::new(BoundaryTagAllocator::new(4096, ArenaOptions::new()).unwrap());
    hammer(alloc, 4096);
}

#[test]
fn test_buddy_system_concurrent_churn() {
    let alloc = Arc::new(BuddyAllocator::new(12, ArenaOptions::new()).unwrap());
    hammer(alloc, 4096);
}

#[test]
fn test_sorted_list_concurrent_churn() {
    let alloc = Arc::new(SortedListAllocator::new(4096, ArenaOptions::new()).unwrap());
    hammer(alloc, 4096);
}

#[test]
fn test_allocator_trait_object_crosses_threads() {
    // Handles produced on one thread are released on another through the
    // shared trait object.
    let heap: Arc<dyn Allocator> = Arc::new(GlobalHeapAllocator::new(None));
    let worker = {
        let heap = Arc::clone(&heap);
        thread::spawn(move || heap.allocate(16, 1).unwrap())
    };
    let handle = worker.join().unwrap();
    heap.deallocate(handle).unwrap();
}

#[test]
fn test_strategies_agree_through_a_shared_trace() {
    // The same seed drives every strategy; none of them may corrupt
    // state even though their placement decisions differ.
    for seed in [1u64, 7, 42] {
        let tags = BoundaryTagAllocator::new(2048, ArenaOptions::new()).unwrap();
        let buddies = BuddyAllocator::new(11, ArenaOptions::new()).unwrap();
        let list = SortedListAllocator::new(2048, ArenaOptions::new()).unwrap();
        drive(&tags, 2048, seed);
        drive(&buddies, 2048, seed);
        drive(&list, 2048, seed);
    }
}
