//! Slab allocator: per-core arenas slicing 32 KiB blocks, with a shared
//! pool of recycled blocks and a large-allocation escape hatch straight to
//! the page layer.
//!
//! Layout discipline:
//! - A super-block is a 256 KiB page-layer mapping aligned to 32 KiB,
//!   carved into eight blocks. Every block starts with a [`BlockHeader`];
//!   user slices start at the first 16-byte boundary past it.
//! - A slice pointer is mapped back to its block by masking off the low
//!   `BLOCK_SIZE_LOG` bits.
//! - Large allocations (above half a block) come from the page layer with
//!   the byte count stored in the `reserved` header field. `reserved` is
//!   always a positive multiple of the page size there and always zero for
//!   slab blocks, so the free path can tell the two apart from the header
//!   alone.

use crate::list::ListNode;
use crate::list_entry;
use crate::mem::{fatal, pages};
use crate::sync::SpinLock;
use std::cell::{Cell, UnsafeCell};
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicU16, Ordering};
use std::sync::OnceLock;

/// Log2 of the block size (and of block alignment).
pub const BLOCK_SIZE_LOG: u8 = 15;
/// Slab block size: 32 KiB.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_LOG;
/// Largest size served from a block; anything bigger goes to the page layer.
pub const BLOCK_LIMIT: usize = BLOCK_SIZE >> 1;

/// Slice granularity in bytes.
const SLICE_UNIT: usize = 16;
/// Blocks carved from one super-block mapping.
const BLOCKS_PER_SUPERBLOCK: usize = 8;
/// Pages per super-block mapping.
const SUPERBLOCK_PAGES: usize = BLOCKS_PER_SUPERBLOCK * BLOCK_SIZE / pages::PAGE_SIZE;

/// Offset of the first user slice within a block.
const DATA_OFFSET: usize = (std::mem::size_of::<BlockHeader>() + SLICE_UNIT - 1) & !(SLICE_UNIT - 1);
/// Slice units available per block.
const BLOCK_UNITS: u16 = ((BLOCK_SIZE - DATA_OFFSET) / SLICE_UNIT) as u16;

/// Header prefix of a large allocation (the `reserved` word, padded to one
/// slice unit).
const BIG_HEADER: usize = SLICE_UNIT;

#[repr(C)]
struct BlockHeader {
    /// Byte count of a large allocation; zero for slab blocks.
    reserved: u64,
    /// Free-list link, valid only while the block is pooled.
    node: ListNode,
    /// Root block only: blocks of this super-block currently in use.
    root_ref: AtomicU16,
    /// Block index within its super-block.
    index: u16,
    /// Live slices, plus one while an arena holds the block as current.
    slices: AtomicU16,
    /// Next free slice position, in units past the header.
    pos: u16,
    /// Unit capacity of the block.
    max: u16,
}

struct Arena {
    lock: SpinLock,
    block: UnsafeCell<*mut BlockHeader>,
}

// Arena state is only touched under its lock; block slice counts are
// atomic.
unsafe impl Sync for Arena {}
unsafe impl Send for Arena {}

struct SlabState {
    lock: SpinLock,
    /// Intrusive free-block list head; lazily ring-initialized on first
    /// use so the sentinel is linked at its final static address.
    available: UnsafeCell<ListNode>,
    arenas: Box<[Arena]>,
}

unsafe impl Sync for SlabState {}
unsafe impl Send for SlabState {}

/// Mapped super-blocks plus outstanding large allocations.
static LIVE_BLOCKS: AtomicIsize = AtomicIsize::new(0);

static STATE: OnceLock<SlabState> = OnceLock::new();

thread_local! {
    /// Index of the arena this thread last acquired successfully.
    static ARENA_HINT: Cell<usize> = const { Cell::new(usize::MAX) };
}

fn state() -> &'static SlabState {
    STATE.get_or_init(|| {
        let cores = match num_cpus::get() {
            0 => 8,
            n => n,
        };
        let arenas = (0..cores)
            .map(|_| Arena {
                lock: SpinLock::new(),
                block: UnsafeCell::new(ptr::null_mut()),
            })
            .collect();
        SlabState {
            lock: SpinLock::new(),
            available: UnsafeCell::new(ListNode::new()),
            arenas,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Zero-length sentinel
// ─────────────────────────────────────────────────────────────────────────────

#[repr(align(16))]
struct ZeroSentinel([u8; 16]);
static ZERO_SENTINEL: ZeroSentinel = ZeroSentinel([0; 16]);

/// The pointer returned for zero-byte allocations. Reading zero bytes from
/// it and passing it to [`free`] are both valid.
#[inline]
pub fn zero_len_ptr() -> *mut u8 {
    ZERO_SENTINEL.0.as_ptr() as *mut u8
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Allocates `size` bytes (16-byte aligned, content unspecified). Never
/// returns null: allocation failure aborts the process.
pub fn alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return zero_len_ptr();
    }
    if size <= BLOCK_LIMIT {
        small_alloc(size)
    } else {
        big_alloc(size)
    }
}

/// Allocates `units * size` zeroed bytes.
pub fn calloc(size: usize, units: usize) -> *mut u8 {
    let total = size
        .checked_mul(units)
        .unwrap_or_else(|| fatal("calloc size overflow"));
    let p = alloc(total);
    unsafe { ptr::write_bytes(p, 0, total) };
    p
}

/// Forces a page-layer allocation regardless of size. Useful for buffers
/// that will be grown in place repeatedly.
pub fn alloc_mmap(size: usize) -> *mut u8 {
    if size == 0 {
        return zero_len_ptr();
    }
    big_alloc(size)
}

/// Releases a pointer obtained from this module. Null and the zero-length
/// sentinel are accepted and ignored.
///
/// # Safety
/// `ptr` must be a live allocation from this module (or null / sentinel).
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() || ptr == zero_len_ptr() {
        return;
    }
    let block = block_of(ptr);
    let reserved = (*block).reserved;
    if reserved != 0 && reserved as usize % pages::PAGE_SIZE == 0 {
        pages::free(block as *mut u8, reserved as usize / pages::PAGE_SIZE);
        LIVE_BLOCKS.fetch_sub(1, Ordering::Relaxed);
        return;
    }
    block_release(block);
}

/// Equivalent to `realloc2(ptr, new_size, new_size)`.
///
/// # Safety
/// Same contract as [`realloc2`].
pub unsafe fn realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    realloc2(ptr, new_size, new_size)
}

/// Resizes `ptr` to `new_size` bytes, copying at most `copy_len` bytes of
/// prior content. Large allocations grow or shrink their mapping in place
/// when the OS allows it; slab slices move. Never returns null.
///
/// # Safety
/// `ptr` must be a live allocation from this module (or null / sentinel,
/// in which case this is a plain allocation).
pub unsafe fn realloc2(ptr: *mut u8, new_size: usize, copy_len: usize) -> *mut u8 {
    if ptr.is_null() || ptr == zero_len_ptr() {
        return alloc(new_size);
    }
    if new_size == 0 {
        free(ptr);
        return zero_len_ptr();
    }
    let block = block_of(ptr);
    let reserved = (*block).reserved as usize;
    if reserved != 0 && reserved % pages::PAGE_SIZE == 0 {
        // Large allocation: resize the mapping itself.
        let old_pages = reserved / pages::PAGE_SIZE;
        let new_pages = (new_size + BIG_HEADER).div_ceil(pages::PAGE_SIZE);
        if new_pages == old_pages {
            return ptr;
        }
        let p = pages::realloc(block as *mut u8, old_pages, new_pages, BLOCK_SIZE_LOG);
        if p.is_null() {
            fatal("page realloc failed");
        }
        let header = p as *mut BlockHeader;
        (*header).reserved = (new_pages * pages::PAGE_SIZE) as u64;
        return p.add(BIG_HEADER);
    }

    // Slab slice: allocate-copy-free. The copy is capped by the distance
    // to the end of the block's data region; bytes past the original
    // slice are unspecified but always mapped.
    let block_end = (block as usize) + DATA_OFFSET + (*block).max as usize * SLICE_UNIT;
    let available = block_end - ptr as usize;
    let fresh = alloc(new_size);
    let n = new_size.min(copy_len).min(available);
    ptr::copy_nonoverlapping(ptr, fresh, n);
    free(ptr);
    fresh
}

/// Live super-block mappings plus outstanding large allocations. Returns
/// to zero once every allocation is freed and [`teardown`] has detached
/// the arena blocks.
pub fn block_count() -> isize {
    LIVE_BLOCKS.load(Ordering::Relaxed)
}

/// Resets the global and per-arena locks. Must be called in the child
/// after `fork` before any allocation; holders from the parent do not
/// exist in the child, so the contention state they left behind is bogus.
pub fn after_fork() {
    let st = state();
    unsafe {
        st.lock.force_unlock();
        for arena in st.arenas.iter() {
            arena.lock.force_unlock();
        }
    }
}

/// Detaches every arena's current block so that fully-freed super-blocks
/// can be returned to the OS. Safe to call at any quiescent point; the
/// allocator keeps working afterwards (arenas re-acquire blocks lazily).
pub fn teardown() {
    let st = state();
    for arena in st.arenas.iter() {
        let _g = arena.lock.lock();
        unsafe {
            let block = *arena.block.get();
            if !block.is_null() {
                *arena.block.get() = ptr::null_mut();
                block_release(block);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Small path
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
unsafe fn block_of(ptr: *mut u8) -> *mut BlockHeader {
    ((ptr as usize) & !(BLOCK_SIZE - 1)) as *mut BlockHeader
}

fn small_alloc(size: usize) -> *mut u8 {
    let st = state();
    let units = size.div_ceil(SLICE_UNIT) as u16;
    let (arena, _guard) = acquire_arena(st);
    unsafe {
        let slot = arena.block.get();
        let mut block = *slot;
        if block.is_null() || (*block).pos + units > (*block).max {
            let fresh = reserve_block(st);
            if fresh.is_null() {
                fatal("out of memory (slab block reservation)");
            }
            if !block.is_null() {
                // Drop the arena's hold; live slices keep the block alive.
                block_release(block);
            }
            *slot = fresh;
            block = fresh;
        }
        let p = (block as *mut u8).add(DATA_OFFSET + (*block).pos as usize * SLICE_UNIT);
        (*block).pos += units;
        (*block).slices.fetch_add(1, Ordering::Relaxed);
        p
    }
}

fn acquire_arena(st: &'static SlabState) -> (&'static Arena, crate::sync::SpinGuard<'static>) {
    let n = st.arenas.len();
    let start = ARENA_HINT.with(|h| h.get()).min(n - 1);
    loop {
        for i in 0..n {
            let idx = (start + i) % n;
            if let Some(guard) = st.arenas[idx].lock.try_lock() {
                ARENA_HINT.with(|h| h.set(idx));
                return (&st.arenas[idx], guard);
            }
        }
        std::thread::yield_now();
        std::thread::sleep(std::time::Duration::from_nanos(1));
    }
}

/// Pops a pooled block or maps a fresh super-block. Returns a block with
/// `pos == 0` and the arena hold (`slices == 1`) already taken, or null on
/// mapping failure.
fn reserve_block(st: &SlabState) -> *mut BlockHeader {
    let _g = st.lock.lock();
    unsafe {
        let head = st.available.get();
        if !(*head).is_linked() {
            ListNode::init_head(head);
        }
        let node = ListNode::shift(head);
        if !node.is_null() {
            let block = list_entry!(node, BlockHeader, node);
            let root = root_of(block);
            (*root).root_ref.fetch_add(1, Ordering::Relaxed);
            (*block).pos = 0;
            (*block).slices.store(1, Ordering::Relaxed);
            return block;
        }

        // Pool is empty: map a super-block and pool all but the first
        // block.
        let base = pages::alloc(SUPERBLOCK_PAGES, BLOCK_SIZE_LOG);
        if base.is_null() {
            return ptr::null_mut();
        }
        LIVE_BLOCKS.fetch_add(1, Ordering::Relaxed);
        log::debug!("slab: mapped super-block at {:p}", base);
        for i in 0..BLOCKS_PER_SUPERBLOCK {
            let block = base.add(i * BLOCK_SIZE) as *mut BlockHeader;
            ptr::write(
                block,
                BlockHeader {
                    reserved: 0,
                    node: ListNode::new(),
                    root_ref: AtomicU16::new(0),
                    index: i as u16,
                    slices: AtomicU16::new(0),
                    pos: 0,
                    max: BLOCK_UNITS,
                },
            );
            if i != 0 {
                ListNode::push(head, &mut (*block).node);
            }
        }
        let root = base as *mut BlockHeader;
        (*root).root_ref.store(1, Ordering::Relaxed);
        (*root).slices.store(1, Ordering::Relaxed);
        root
    }
}

#[inline]
unsafe fn root_of(block: *mut BlockHeader) -> *mut BlockHeader {
    (block as *mut u8).sub((*block).index as usize * BLOCK_SIZE) as *mut BlockHeader
}

/// Drops one slice reference. The last reference pools the block; pooling
/// the last in-use block of a super-block unmaps the whole super-block.
unsafe fn block_release(block: *mut BlockHeader) {
    if (*block).slices.fetch_sub(1, Ordering::AcqRel) != 1 {
        return;
    }
    let st = state();
    let _g = st.lock.lock();
    let head = st.available.get();
    if !(*head).is_linked() {
        ListNode::init_head(head);
    }
    (*block).pos = 0;
    ListNode::push(head, &mut (*block).node);
    let root = root_of(block);
    if (*root).root_ref.fetch_sub(1, Ordering::AcqRel) == 1 {
        // Whole super-block idle: unlink its blocks and return the
        // mapping.
        for i in 0..BLOCKS_PER_SUPERBLOCK {
            let b = (root as *mut u8).add(i * BLOCK_SIZE) as *mut BlockHeader;
            ListNode::remove(&mut (*b).node);
        }
        pages::free(root as *mut u8, SUPERBLOCK_PAGES);
        LIVE_BLOCKS.fetch_sub(1, Ordering::Relaxed);
        log::debug!("slab: unmapped super-block at {:p}", root);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Large path
// ─────────────────────────────────────────────────────────────────────────────

fn big_alloc(size: usize) -> *mut u8 {
    let pages_n = (size + BIG_HEADER).div_ceil(pages::PAGE_SIZE);
    let p = pages::alloc(pages_n, BLOCK_SIZE_LOG);
    if p.is_null() {
        fatal("out of memory (page allocation)");
    }
    LIVE_BLOCKS.fetch_add(1, Ordering::Relaxed);
    unsafe {
        let header = p as *mut BlockHeader;
        (*header).reserved = (pages_n * pages::PAGE_SIZE) as u64;
        p.add(BIG_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_round_trips_through_free() {
        let p = alloc(0);
        assert_eq!(p, zero_len_ptr());
        unsafe { free(p) };
    }

    #[test]
    fn small_slices_are_16_byte_aligned_and_distinct() {
        let a = alloc(24);
        let b = alloc(24);
        assert_ne!(a, b);
        assert_eq!(a as usize % SLICE_UNIT, 0);
        assert_eq!(b as usize % SLICE_UNIT, 0);
        unsafe {
            a.write_bytes(0x5A, 24);
            b.write_bytes(0xA5, 24);
            assert_eq!(*a, 0x5A);
            assert_eq!(*b, 0xA5);
            free(a);
            free(b);
        }
    }

    #[test]
    fn big_allocations_round_trip() {
        let size = BLOCK_LIMIT + 1;
        let p = alloc(size);
        unsafe {
            p.write_bytes(7, size);
            assert_eq!(*p.add(size - 1), 7);
            let q = realloc(p, size * 4);
            assert_eq!(*q.add(size - 1), 7);
            free(q);
        }
    }

    #[test]
    fn realloc_preserves_content_across_size_classes() {
        unsafe {
            let p = alloc(64);
            for i in 0..64 {
                p.add(i).write(i as u8);
            }
            // Small → big → small.
            let q = realloc(p, BLOCK_LIMIT * 2);
            for i in 0..64 {
                assert_eq!(*q.add(i), i as u8);
            }
            let r = realloc2(q, 64, 64);
            for i in 0..64 {
                assert_eq!(*r.add(i), i as u8);
            }
            free(r);
        }
    }

    #[test]
    fn calloc_zeroes_recycled_memory() {
        unsafe {
            let p = alloc(256);
            p.write_bytes(0xFF, 256);
            free(p);
            let q = calloc(256, 1);
            for i in 0..256 {
                assert_eq!(*q.add(i), 0, "byte {i} not zeroed");
            }
            free(q);
        }
    }

    #[test]
    fn block_rotation_survives_heavy_traffic() {
        // Enough slices to rotate through several blocks.
        let mut ptrs = Vec::new();
        for i in 0..512 {
            let size = 128 + (i % 7) * 48;
            let p = alloc(size);
            unsafe { p.write_bytes((i & 0xFF) as u8, size) };
            ptrs.push((p, size, (i & 0xFF) as u8));
        }
        for (p, size, tag) in ptrs {
            unsafe {
                assert_eq!(*p, tag);
                assert_eq!(*p.add(size - 1), tag);
                free(p);
            }
        }
    }
}
