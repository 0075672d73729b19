//! # Block Heap
//!
//! Deterministic allocator for application use: a fixed pool carved into
//! equal blocks, each run of allocated blocks prefixed by an in-pool
//! header carrying the allocated flag and the span size. Allocation is a
//! first-fit scan for a long-enough run of free blocks — O(pool size),
//! no hidden growth, no coalescing (external fragmentation is accepted
//! in exchange for predictability).
//!
//! Freeing re-splits the span into unit free blocks, so the scan only
//! ever inspects uniform free headers. A double free is detected by the
//! allocated flag and ignored, as is a pointer that never came from this
//! pool.

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::NonNull;

use crate::config::{HEAP_BLOCK_SIZE, HEAP_SIZE};

const NUM_BLOCKS: usize = HEAP_SIZE / HEAP_BLOCK_SIZE;
const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Prefix of every block. For a free block `size` is one block; for the
/// first block of an allocated run it is the whole span.
#[repr(C)]
#[derive(Clone, Copy)]
struct BlockHeader {
    size: u32,
    allocated: u32,
}

/// Running counters, exposed through [`stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub free_bytes: usize,
    pub used_bytes: usize,
    pub alloc_count: u32,
    pub free_count: u32,
}

#[repr(align(8))]
struct Pool(UnsafeCell<[u8; HEAP_SIZE]>);

// Safety: the pool is only touched inside critical sections, which on a
// single core serialize tasks and ISRs.
unsafe impl Sync for Pool {}

struct HeapCell {
    stats: core::cell::Cell<HeapStats>,
    initialized: core::cell::Cell<bool>,
}

static POOL: Pool = Pool(UnsafeCell::new([0; HEAP_SIZE]));
static HEAP: critical_section::Mutex<HeapCell> = critical_section::Mutex::new(HeapCell {
    stats: core::cell::Cell::new(HeapStats {
        free_bytes: 0,
        used_bytes: 0,
        alloc_count: 0,
        free_count: 0,
    }),
    initialized: core::cell::Cell::new(false),
});

#[inline]
unsafe fn header_at(index: usize) -> *mut BlockHeader {
    (POOL.0.get() as *mut u8).add(index * HEAP_BLOCK_SIZE) as *mut BlockHeader
}

/// Format the pool: every block becomes a unit free block. Called by
/// `kernel::init`; reinitializing discards all allocations.
pub fn init() {
    critical_section::with(|cs| {
        let heap = HEAP.borrow(cs);
        unsafe {
            for i in 0..NUM_BLOCKS {
                *header_at(i) = BlockHeader {
                    size: HEAP_BLOCK_SIZE as u32,
                    allocated: 0,
                };
            }
        }
        heap.stats.set(HeapStats {
            free_bytes: HEAP_SIZE,
            used_bytes: 0,
            alloc_count: 0,
            free_count: 0,
        });
        heap.initialized.set(true);
    });
}

/// Allocate at least `size` bytes, rounded up to whole blocks. Returns
/// `None` when no contiguous run of free blocks is long enough.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    if size == 0 || size > HEAP_SIZE - HEADER_SIZE {
        return None;
    }
    critical_section::with(|cs| {
        let heap = HEAP.borrow(cs);
        if !heap.initialized.get() {
            return None;
        }
        let blocks_needed = (size + HEADER_SIZE).div_ceil(HEAP_BLOCK_SIZE);
        let span = blocks_needed * HEAP_BLOCK_SIZE;

        unsafe {
            let mut i = 0;
            while i < NUM_BLOCKS {
                let hdr = *header_at(i);
                if hdr.allocated != 0 {
                    i += hdr.size as usize / HEAP_BLOCK_SIZE;
                    continue;
                }
                // Count the free run starting here.
                let mut run = 0;
                while i + run < NUM_BLOCKS
                    && run < blocks_needed
                    && (*header_at(i + run)).allocated == 0
                {
                    run += 1;
                }
                if run >= blocks_needed {
                    *header_at(i) = BlockHeader {
                        size: span as u32,
                        allocated: 1,
                    };
                    let mut stats = heap.stats.get();
                    stats.free_bytes -= span;
                    stats.used_bytes += span;
                    stats.alloc_count += 1;
                    heap.stats.set(stats);

                    let payload = (header_at(i) as *mut u8).add(HEADER_SIZE);
                    return NonNull::new(payload);
                }
                i += run.max(1);
            }
        }
        None
    })
}

/// Return an allocation to the pool.
///
/// A pointer whose block is already free (double free) or that does not
/// address a block payload in this pool is silently ignored.
///
/// # Safety
/// `ptr` must have come from [`alloc`] and must not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>) {
    critical_section::with(|cs| {
        let heap = HEAP.borrow(cs);
        if !heap.initialized.get() {
            return;
        }
        let base = POOL.0.get() as usize;
        let addr = ptr.as_ptr() as usize;
        // The payload sits one header past a block boundary.
        if addr < base + HEADER_SIZE || addr >= base + HEAP_SIZE {
            return;
        }
        let offset = addr - base - HEADER_SIZE;
        if offset % HEAP_BLOCK_SIZE != 0 {
            return;
        }
        let first = offset / HEAP_BLOCK_SIZE;

        let hdr = unsafe { *header_at(first) };
        if hdr.allocated == 0 {
            return; // double free
        }
        let span = hdr.size as usize;
        let blocks = span / HEAP_BLOCK_SIZE;
        for b in first..first + blocks {
            unsafe {
                *header_at(b) = BlockHeader {
                    size: HEAP_BLOCK_SIZE as u32,
                    allocated: 0,
                };
            }
        }
        let mut stats = heap.stats.get();
        stats.free_bytes += span;
        stats.used_bytes -= span;
        stats.free_count += 1;
        heap.stats.set(stats);
    });
}

/// Bytes currently free in the pool (including per-span header bytes).
pub fn free_bytes() -> usize {
    stats().free_bytes
}

/// Snapshot of the heap counters.
pub fn stats() -> HeapStats {
    critical_section::with(|cs| HEAP.borrow(cs).stats.get())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use proptest::prelude::*;
    use std::vec::Vec;

    #[test]
    fn alloc_rounds_up_to_whole_blocks() {
        let _guard = testutil::fresh_kernel();
        let p = alloc(1).unwrap();
        // 1 byte + header fits one block.
        assert_eq!(free_bytes(), HEAP_SIZE - HEAP_BLOCK_SIZE);
        let q = alloc(HEAP_BLOCK_SIZE).unwrap();
        // block + header spills into a second block.
        assert_eq!(free_bytes(), HEAP_SIZE - 3 * HEAP_BLOCK_SIZE);
        unsafe {
            free(p);
            free(q);
        }
        assert_eq!(free_bytes(), HEAP_SIZE);
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let _guard = testutil::fresh_kernel();
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            let p = alloc(40).unwrap();
            assert_eq!(p.as_ptr() as usize % 8, 0);
            ptrs.push(p);
        }
        // 40 + 8 header → 2 blocks each; write a pattern and make sure
        // neighbors don't clobber one another.
        for (i, p) in ptrs.iter().enumerate() {
            unsafe { core::ptr::write_bytes(p.as_ptr(), i as u8, 40) };
        }
        for (i, p) in ptrs.iter().enumerate() {
            for off in 0..40 {
                assert_eq!(unsafe { *p.as_ptr().add(off) }, i as u8);
            }
        }
        for p in ptrs {
            unsafe { free(p) };
        }
        assert_eq!(free_bytes(), HEAP_SIZE);
    }

    #[test]
    fn exhaustion_returns_none_and_recovers() {
        let _guard = testutil::fresh_kernel();
        let big = HEAP_SIZE / 2;
        let a = alloc(big - HEADER_SIZE).unwrap();
        let b = alloc(big - HEADER_SIZE).unwrap();
        assert_eq!(free_bytes(), 0);
        assert!(alloc(1).is_none());
        unsafe { free(a) };
        assert!(alloc(big - HEADER_SIZE).is_some());
        unsafe { free(b) };
    }

    #[test]
    fn oversized_and_zero_requests_fail_fast() {
        let _guard = testutil::fresh_kernel();
        assert!(alloc(0).is_none());
        assert!(alloc(HEAP_SIZE).is_none());
        assert!(alloc(usize::MAX).is_none());
    }

    #[test]
    fn double_free_is_ignored() {
        let _guard = testutil::fresh_kernel();
        let p = alloc(10).unwrap();
        unsafe {
            free(p);
            let before = stats();
            free(p); // second free must change nothing
            assert_eq!(stats(), before);
        }
        assert_eq!(free_bytes(), HEAP_SIZE);
    }

    #[test]
    fn foreign_pointers_are_ignored() {
        let _guard = testutil::fresh_kernel();
        let mut local = 0u8;
        let before = stats();
        unsafe { free(NonNull::from(&mut local)) };
        assert_eq!(stats(), before);
    }

    #[test]
    fn counters_track_alloc_and_free() {
        let _guard = testutil::fresh_kernel();
        let p = alloc(10).unwrap();
        let q = alloc(10).unwrap();
        unsafe { free(p) };
        let s = stats();
        assert_eq!(s.alloc_count, 2);
        assert_eq!(s.free_count, 1);
        assert_eq!(s.used_bytes, HEAP_BLOCK_SIZE);
        unsafe { free(q) };
    }

    proptest! {
        /// Arbitrary alloc/free interleavings keep every live allocation
        /// aligned, in-pool, and non-overlapping, and restore the full
        /// pool once everything is freed.
        #[test]
        fn alloc_free_sequences_preserve_invariants(
            sizes in proptest::collection::vec(1usize..200, 1..20)
        ) {
            let _guard = testutil::fresh_kernel();
            let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

            for size in sizes {
                if let Some(p) = alloc(size) {
                    let start = p.as_ptr() as usize;
                    prop_assert_eq!(start % 8, 0);
                    for &(q, qsize) in &live {
                        let qstart = q.as_ptr() as usize;
                        let disjoint = start + size <= qstart || qstart + qsize <= start;
                        prop_assert!(disjoint, "overlapping allocations");
                    }
                    live.push((p, size));
                }
            }
            for &(p, _) in &live {
                unsafe { free(p) };
            }
            prop_assert_eq!(free_bytes(), HEAP_SIZE);
        }
    }
}
