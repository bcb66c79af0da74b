//! Thin wrapper around the `xxhash-rust` crate providing the keyed 64-bit
//! hash used by the hash maps, the string layer and the soft-type system.
//!
//! The rest of the crate is parametric in this function: any
//! `H(bytes, seed) → u64` whose seed diffuses all output bits and whose
//! collisions over short random inputs are rare can stand in for it.

pub use xxhash_rust::xxh64::Xxh64 as HashState;

use std::sync::atomic::{AtomicU64, Ordering};

/// One-shot keyed 64-bit hash.
#[inline]
pub fn keyed(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh64::xxh64(data, seed)
}

/// Per-process map seed. Derived once from the address of a process-local
/// static and a monotonic counter, so two runs of the same binary probe
/// their hash tables in different orders.
pub fn process_seed() -> u64 {
    static SEED: AtomicU64 = AtomicU64::new(0);
    let mut seed = SEED.load(Ordering::Relaxed);
    if seed == 0 {
        let anchor = &SEED as *const _ as usize as u64;
        seed = keyed(&anchor.to_le_bytes(), 0x9e37_79b9_7f4a_7c15) | 1;
        SEED.store(seed, Ordering::Relaxed);
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_is_deterministic() {
        assert_eq!(keyed(b"corekit", 7), keyed(b"corekit", 7));
    }

    #[test]
    fn seed_diffuses_output() {
        let a = keyed(b"corekit", 1);
        let b = keyed(b"corekit", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn process_seed_is_stable_and_nonzero() {
        let s = process_seed();
        assert_ne!(s, 0);
        assert_eq!(s, process_seed());
    }
}
