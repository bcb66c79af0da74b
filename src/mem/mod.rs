//! Memory layers: the OS page allocator and the multi-arena slab
//! allocator built on top of it.
//!
//! Every container in this crate allocates through [`alloc`] / [`calloc`] /
//! [`realloc2`] / [`free`]; swapping the binding for the system allocator
//! means reimplementing those four entry points only.

pub mod pages;
pub mod slab;

pub use slab::{
    after_fork, alloc, alloc_mmap, block_count, calloc, free, realloc, realloc2, teardown,
    zero_len_ptr, BLOCK_LIMIT, BLOCK_SIZE, BLOCK_SIZE_LOG,
};

/// Aborts the process with a location-tagged fatal log. Used on allocation
/// failure in the slab layer, where every caller treats memory as
/// infallible. A SIGINT is raised first so an embedding process may
/// intercept the shutdown.
pub(crate) fn fatal(msg: &str) -> ! {
    log::error!("FATAL: {}", msg);
    #[cfg(has_page_mapper)]
    unsafe {
        libc::kill(0, libc::SIGINT);
    }
    std::process::abort();
}
