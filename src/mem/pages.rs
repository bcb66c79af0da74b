//! Page allocator: aligned anonymous mappings straight from the OS.
//!
//! Alignment beyond the native page size is achieved by over-mapping and
//! trimming: when a plain mapping comes back misaligned, a mapping of
//! `len + align` bytes is requested instead and the misaligned head and
//! the tail remainder are returned to the OS immediately.
//!
//! A process-wide "next hint" address is advanced on every success. The
//! kernel is free to ignore it; its only job is to keep successive
//! mappings spatially close and reduce fragmentation.
//!
//! On targets without the mmap family (`has_page_mapper` unset) the same
//! contract is provided through the standard aligned allocator, losing
//! grow-in-place.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocation granularity of this layer.
pub const PAGE_SIZE: usize = 4096;

static NEXT_HINT: AtomicUsize = AtomicUsize::new(0);

/// Allocates `pages * PAGE_SIZE` bytes of zeroed memory whose base address
/// is aligned to `2^align_log`. Returns null on failure or when `pages`
/// is zero.
pub fn alloc(pages: usize, align_log: u8) -> *mut u8 {
    if pages == 0 {
        return std::ptr::null_mut();
    }
    imp::alloc(pages * PAGE_SIZE, 1usize << align_log)
}

/// Resizes a mapping obtained from [`alloc`]. Growth happens in place when
/// the OS supports it, then through an adjacent mapping, and finally by
/// allocate-copy-free (re-aligned to `2^align_log`). Shrinking returns the
/// tail pages to the OS when the freed remainder spans at least one page.
/// Returns null on failure, leaving the original mapping intact.
///
/// # Safety
/// `ptr` must come from [`alloc`] / [`realloc`] with the same `old_pages`.
pub unsafe fn realloc(ptr: *mut u8, old_pages: usize, new_pages: usize, align_log: u8) -> *mut u8 {
    if ptr.is_null() || new_pages == 0 || old_pages == 0 {
        return std::ptr::null_mut();
    }
    imp::realloc(
        ptr,
        old_pages * PAGE_SIZE,
        new_pages * PAGE_SIZE,
        1usize << align_log,
    )
}

/// Returns a mapping to the OS.
///
/// # Safety
/// `ptr`/`pages` must describe a live mapping from this module.
pub unsafe fn free(ptr: *mut u8, pages: usize) {
    if ptr.is_null() || pages == 0 {
        return;
    }
    imp::free(ptr, pages * PAGE_SIZE);
}

fn take_hint(len: usize) -> usize {
    let hint = NEXT_HINT.load(Ordering::Relaxed);
    let _ = len;
    hint
}

fn advance_hint(base: usize, len: usize) {
    NEXT_HINT.store(base + len, Ordering::Relaxed);
}

// ─────────────────────────────────────────────────────────────────────────────
// POSIX implementation: anonymous mmap / munmap / mremap
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(has_page_mapper)]
mod imp {
    use super::{advance_hint, take_hint};
    use std::ptr;

    unsafe fn sys_map(hint: usize, len: usize) -> *mut u8 {
        let p = libc::mmap(
            hint as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if p == libc::MAP_FAILED {
            ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    pub fn alloc(len: usize, align: usize) -> *mut u8 {
        unsafe {
            let hint = take_hint(len);
            let p = sys_map(hint, len);
            if p.is_null() {
                return p;
            }
            if (p as usize) & (align - 1) == 0 {
                advance_hint(p as usize, len);
                return p;
            }
            // Misaligned: retry oversized, then trim head and tail.
            libc::munmap(p as *mut libc::c_void, len);
            let p = sys_map(hint, len + align);
            if p.is_null() {
                return p;
            }
            let base = p as usize;
            let aligned = (base + align - 1) & !(align - 1);
            let head = aligned - base;
            let tail = align - head;
            if head != 0 {
                libc::munmap(base as *mut libc::c_void, head);
            }
            if tail != 0 {
                libc::munmap((aligned + len) as *mut libc::c_void, tail);
            }
            advance_hint(aligned, len);
            aligned as *mut u8
        }
    }

    pub unsafe fn realloc(ptr: *mut u8, old_len: usize, new_len: usize, align: usize) -> *mut u8 {
        use super::PAGE_SIZE;
        if new_len <= old_len {
            if old_len - new_len >= PAGE_SIZE {
                libc::munmap(ptr.add(new_len) as *mut libc::c_void, old_len - new_len);
            }
            return ptr;
        }

        // In-place growth (address must not change: the caller's alignment
        // discipline depends on it).
        #[cfg(target_os = "linux")]
        {
            let p = libc::mremap(ptr as *mut libc::c_void, old_len, new_len, 0);
            if p != libc::MAP_FAILED {
                advance_hint(p as usize, new_len);
                return p as *mut u8;
            }
        }

        // Adjacent mapping: ask for the bytes right past the current tail.
        let wanted = ptr.add(old_len) as usize;
        let grown = sys_map(wanted, new_len - old_len);
        if !grown.is_null() {
            if grown as usize == wanted {
                advance_hint(ptr as usize, new_len);
                return ptr;
            }
            libc::munmap(grown as *mut libc::c_void, new_len - old_len);
        }

        // Allocate-copy-free.
        let fresh = alloc(new_len, align);
        if fresh.is_null() {
            return fresh;
        }
        std::ptr::copy_nonoverlapping(ptr, fresh, old_len);
        free(ptr, old_len);
        fresh
    }

    pub unsafe fn free(ptr: *mut u8, len: usize) {
        libc::munmap(ptr as *mut libc::c_void, len);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback: standard aligned allocator
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(not(has_page_mapper))]
mod imp {
    use super::advance_hint;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    // Every allocation uses this fixed alignment so that `free`, which is
    // not told the original alignment, can rebuild the exact layout. It
    // covers every alignment the slab layer requests.
    const FALLBACK_ALIGN: usize = 1 << 16;

    pub fn alloc(len: usize, align: usize) -> *mut u8 {
        if align > FALLBACK_ALIGN {
            return std::ptr::null_mut();
        }
        let layout = match Layout::from_size_align(len, FALLBACK_ALIGN) {
            Ok(l) => l,
            Err(_) => return std::ptr::null_mut(),
        };
        let p = unsafe { alloc_zeroed(layout) };
        if !p.is_null() {
            advance_hint(p as usize, len);
        }
        p
    }

    pub unsafe fn realloc(ptr: *mut u8, old_len: usize, new_len: usize, align: usize) -> *mut u8 {
        if new_len <= old_len {
            return ptr;
        }
        let fresh = alloc(new_len, align);
        if fresh.is_null() {
            return fresh;
        }
        std::ptr::copy_nonoverlapping(ptr, fresh, old_len);
        free(ptr, old_len);
        fresh
    }

    pub unsafe fn free(ptr: *mut u8, len: usize) {
        if let Ok(layout) = Layout::from_size_align(len, FALLBACK_ALIGN) {
            dealloc(ptr, layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_respects_alignment() {
        for align_log in [12u8, 15, 16] {
            let p = alloc(2, align_log);
            assert!(!p.is_null());
            assert_eq!(p as usize & ((1 << align_log) - 1), 0);
            unsafe {
                // Mapped memory is writable and zeroed.
                assert_eq!(*p, 0);
                p.write(0xAA);
                free(p, 2);
            }
        }
    }

    #[test]
    fn zero_pages_is_null() {
        assert!(alloc(0, 12).is_null());
    }

    #[test]
    fn realloc_grow_preserves_content() {
        unsafe {
            let p = alloc(1, 12);
            assert!(!p.is_null());
            for i in 0..PAGE_SIZE {
                p.add(i).write((i & 0xFF) as u8);
            }
            let q = realloc(p, 1, 4, 12);
            assert!(!q.is_null());
            for i in 0..PAGE_SIZE {
                assert_eq!(*q.add(i), (i & 0xFF) as u8);
            }
            free(q, 4);
        }
    }

    #[cfg(has_page_mapper)]
    #[test]
    fn realloc_shrink_keeps_head_pages() {
        unsafe {
            let p = alloc(4, 12);
            assert!(!p.is_null());
            p.write(42);
            let q = realloc(p, 4, 1, 12);
            assert_eq!(q, p);
            assert_eq!(*q, 42);
            free(q, 1);
        }
    }
}
