//! Compact hash map: an ordered data vector plus a slim probe table.
//!
//! Where [`OrderedMap`](crate::collections::map::OrderedMap) keeps bulky
//! entries inside the probe-sized store, this variant separates the two:
//! the probe table holds only `(signature, index)` pairs while
//! `(hash, key, value)` tuples live in an append-only vector. Large
//! key/value types reallocate far less often this way.
//!
//! Removal zeroes the tuple's hash and bumps a small `offset` counter;
//! dead tuples are squeezed out lazily when the counter approaches its
//! type limit. Only a full compaction resets the collision flag — a
//! rebuilt table starts from a clean observation window.

use crate::collections::Element;
use crate::mem;
use std::marker::PhantomData;
use std::ptr;

/// Odd probe stride (full period over the power-of-two table).
const PROBE_STRIDE: u64 = 31;
/// Hard cap on probe steps per seek.
const MAX_SEEK: usize = 96;
/// Full-hash collisions on one failed chain that flip `attacked`.
const ATTACK_LIMIT: usize = 11;
const INITIAL_BITS: u8 = 2;
const INITIAL_DATA_CAPA: u32 = 8;
/// `offset` value that forces compaction (close to the u8 limit).
const COMPACT_AT: u8 = 0xF8;

#[repr(C)]
#[derive(Clone, Copy)]
struct AltSlot {
    /// Nonzero hash signature; 0 marks an empty slot.
    sig: u32,
    /// Index into the data vector.
    pos: u32,
}

struct AltEntry<K, V> {
    /// Fixed-up full hash; 0 marks a removed tuple.
    hash: u64,
    key: K,
    value: V,
}

pub struct CompactMap<K: Element, V: Element> {
    data: *mut AltEntry<K, V>,
    map: *mut AltSlot,
    dcapa: u32,
    /// Write cursor into the data vector (removed tuples included).
    w: u32,
    count: u32,
    bits: u8,
    /// Removed tuples awaiting compaction.
    offset: u8,
    collisions: bool,
    attacked: bool,
    _own: PhantomData<(K, V)>,
}

unsafe impl<K: Element + Send, V: Element + Send> Send for CompactMap<K, V> {}
unsafe impl<K: Element + Sync, V: Element + Sync> Sync for CompactMap<K, V> {}

#[inline]
fn fix_hash(h: u64) -> u64 {
    if h == 0 {
        !0
    } else {
        h
    }
}

/// 32-bit probe signature; never zero so it can double as the empty mark.
#[inline]
fn sig_of(hash: u64) -> u32 {
    let s = (hash >> 32) as u32 ^ hash as u32;
    if s == 0 {
        1
    } else {
        s
    }
}

enum Found {
    Match(u32),
    Free(u32),
    Saturated(usize),
}

impl<K: Element, V: Element> CompactMap<K, V> {
    pub const fn new() -> Self {
        CompactMap {
            data: ptr::null_mut(),
            map: ptr::null_mut(),
            dcapa: 0,
            w: 0,
            count: 0,
            bits: 0,
            offset: 0,
            collisions: false,
            attacked: false,
            _own: PhantomData,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn has_collisions(&self) -> bool {
        self.collisions
    }

    #[inline]
    pub fn is_attacked(&self) -> bool {
        self.attacked
    }

    /// Probe-table capacity (zero before the first insertion).
    #[inline]
    pub fn capacity(&self) -> usize {
        if self.map.is_null() {
            0
        } else {
            1usize << self.bits
        }
    }

    /// Inserts or overwrites; returns the previous value for an existing
    /// key (old key retained, incoming key discarded).
    pub fn set(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        let hash = fix_hash(hash);
        self.reserve_insert();

        let mut found = self.seek(hash, &key, true);
        if matches!(found, Found::Saturated(_)) {
            // Clear dead tuples first, then grow the probe table.
            self.compact_to(self.bits);
            found = self.seek(hash, &key, true);
            let mut growths = 0;
            while matches!(found, Found::Saturated(_)) && growths < 3 {
                self.compact_to(self.bits + 1);
                growths += 1;
                found = self.seek(hash, &key, true);
            }
        }
        if let Found::Saturated(chain) = found {
            if chain >= ATTACK_LIMIT && !self.attacked {
                self.attacked = true;
                log::warn!(
                    "security: compact map chain saturated by full-hash collisions; \
                     treating hash equality as key equality from now on"
                );
            }
            found = self.seek(hash, &key, true);
        }

        match found {
            Found::Match(pos) => {
                let entry = unsafe { &mut *self.data.add(pos as usize) };
                key.discard();
                Some(std::mem::replace(&mut entry.value, value))
            }
            Found::Free(slot_idx) => {
                unsafe {
                    let pos = self.w;
                    self.w += 1;
                    self.data.add(pos as usize).write(AltEntry { hash, key, value });
                    *self.map.add(slot_idx as usize) = AltSlot {
                        sig: sig_of(hash),
                        pos,
                    };
                }
                self.count += 1;
                None
            }
            Found::Saturated(_) => {
                // A chain the growth ladder could not clear: shed its
                // oldest tuple, rebuild one size up and retry.
                self.shed_one(hash);
                self.compact_to(self.bits + 1);
                self.set(hash, key, value)
            }
        }
    }

    /// Looks up a key.
    pub fn get(&self, hash: u64, key: &K) -> Option<&V> {
        let hash = fix_hash(hash);
        match self.seek_ref(hash, key) {
            Some(pos) => unsafe { Some(&(*self.data.add(pos as usize)).value) },
            None => None,
        }
    }

    /// Removes a key, returning its value. The tuple is only marked dead;
    /// compaction squeezes it out later.
    pub fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        let hash = fix_hash(hash);
        let pos = self.seek_ref(hash, key)?;
        let value = unsafe {
            let entry = self.data.add(pos as usize);
            (*entry).hash = 0;
            ptr::read(&(*entry).key).discard();
            ptr::read(&(*entry).value)
        };
        self.count -= 1;
        self.offset = self.offset.saturating_add(1);
        if self.offset >= COMPACT_AT {
            self.compact();
        }
        Some(value)
    }

    /// Walks live tuples in insertion order; same contract as the other
    /// containers' `each`.
    pub fn each(&self, start_at: isize, mut f: impl FnMut(&K, &V) -> i32) -> usize {
        let count = self.count as usize;
        let begin = if start_at < 0 {
            count.saturating_add_signed(start_at)
        } else {
            (start_at as usize).min(count)
        };
        let mut live = 0usize;
        for i in 0..self.w as usize {
            let entry = unsafe { &*self.data.add(i) };
            if entry.hash == 0 {
                continue;
            }
            if live >= begin && f(&entry.key, &entry.value) < 0 {
                return live + 1;
            }
            live += 1;
        }
        count
    }

    /// Rebuilds both arrays, squeezing out removed tuples. Resets the
    /// `offset` counter and the collision flag.
    pub fn compact(&mut self) {
        if !self.map.is_null() {
            self.compact_to(self.bits);
        }
    }

    // ── Internals ───────────────────────────────────────────────────────────

    /// Makes room for one more tuple: allocates lazily, compacts when the
    /// data vector fills up with dead tuples, doubles otherwise.
    fn reserve_insert(&mut self) {
        if self.map.is_null() {
            self.build(INITIAL_BITS, INITIAL_DATA_CAPA);
            return;
        }
        if (self.count as usize) >= self.capacity() / 2 {
            self.compact_to(self.bits + 1);
        }
        if self.w == self.dcapa {
            if self.offset > 0 {
                self.compact();
            } else {
                let new_capa = self.dcapa * 2;
                self.data = unsafe {
                    mem::realloc2(
                        self.data as *mut u8,
                        new_capa as usize * std::mem::size_of::<AltEntry<K, V>>(),
                        self.w as usize * std::mem::size_of::<AltEntry<K, V>>(),
                    ) as *mut AltEntry<K, V>
                };
                self.dcapa = new_capa;
            }
        }
    }

    fn build(&mut self, bits: u8, dcapa: u32) {
        self.map = mem::calloc(std::mem::size_of::<AltSlot>(), 1usize << bits) as *mut AltSlot;
        self.data =
            mem::alloc(dcapa as usize * std::mem::size_of::<AltEntry<K, V>>()) as *mut AltEntry<K, V>;
        self.bits = bits;
        self.dcapa = dcapa;
    }

    /// Insert-oriented probe: first dead-or-empty slot is reusable, a
    /// signature hit dereferences into the data vector for the full-hash
    /// and key comparison.
    fn seek(&mut self, hash: u64, key: &K, record: bool) -> Found {
        let sig = sig_of(hash);
        let mask = (1u64 << self.bits) - 1;
        let budget = (mask as usize).max(1).min(MAX_SEEK);
        let mut free: Option<u32> = None;
        let mut chain = 0usize;
        for i in 0..budget {
            let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as u32;
            let slot = unsafe { *self.map.add(slot_idx as usize) };
            if slot.sig == 0 {
                return Found::Free(free.unwrap_or(slot_idx));
            }
            if slot.sig == sig {
                let entry = unsafe { &*self.data.add(slot.pos as usize) };
                if entry.hash == 0 {
                    // Points at a removed tuple: reusable, chain continues.
                    if free.is_none() {
                        free = Some(slot_idx);
                    }
                    continue;
                }
                if entry.hash == hash {
                    if self.attacked || entry.key.is_eq(key) {
                        return Found::Match(slot.pos);
                    }
                    chain += 1;
                    if record {
                        self.collisions = true;
                    }
                }
            }
        }
        // The budget ran out: a mid-chain hole is only safe to reuse for a
        // key the chain proved absent, which it did not.
        let _ = free;
        Found::Saturated(chain)
    }

    /// Lookup-oriented probe; never mutates.
    fn seek_ref(&self, hash: u64, key: &K) -> Option<u32> {
        if self.map.is_null() {
            return None;
        }
        let sig = sig_of(hash);
        let mask = (1u64 << self.bits) - 1;
        let budget = (mask as usize).max(1).min(MAX_SEEK);
        for i in 0..budget {
            let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as u32;
            let slot = unsafe { *self.map.add(slot_idx as usize) };
            if slot.sig == 0 {
                return None;
            }
            if slot.sig == sig {
                let entry = unsafe { &*self.data.add(slot.pos as usize) };
                if entry.hash != 0 && entry.hash == hash && (self.attacked || entry.key.is_eq(key))
                {
                    return Some(slot.pos);
                }
            }
        }
        None
    }

    /// Removes the oldest live tuple on the saturated chain of `hash`.
    fn shed_one(&mut self, hash: u64) {
        let sig = sig_of(hash);
        let mask = (1u64 << self.bits) - 1;
        let budget = (mask as usize).max(1).min(MAX_SEEK);
        for i in 0..budget {
            let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as u32;
            let slot = unsafe { *self.map.add(slot_idx as usize) };
            if slot.sig == 0 {
                return;
            }
            let entry = unsafe { self.data.add(slot.pos as usize) };
            if slot.sig == sig && unsafe { (*entry).hash } != 0 {
                unsafe {
                    (*entry).hash = 0;
                    ptr::read(&(*entry).key).discard();
                    ptr::read(&(*entry).value).discard();
                }
                self.count -= 1;
                self.offset = self.offset.saturating_add(1);
                return;
            }
        }
    }

    /// Rebuilds the probe table at `2^new_bits` and squeezes dead tuples
    /// out of the data vector. Grows further when placement fails.
    fn compact_to(&mut self, new_bits: u8) {
        let mut bits = new_bits.max(INITIAL_BITS);
        'rebuild: loop {
            let capa = 1usize << bits;
            let map = mem::calloc(std::mem::size_of::<AltSlot>(), capa) as *mut AltSlot;
            let mask = (capa - 1) as u64;
            let budget = (mask as usize).max(1).min(MAX_SEEK);

            // Squeeze the data vector in place (write cursor trails read).
            unsafe {
                let mut write = 0u32;
                for read in 0..self.w {
                    let entry = self.data.add(read as usize);
                    if (*entry).hash == 0 {
                        continue;
                    }
                    if write != read {
                        ptr::copy_nonoverlapping(entry, self.data.add(write as usize), 1);
                    }
                    write += 1;
                }
                self.w = write;
                self.offset = 0;

                for pos in 0..self.w {
                    let hash = (*self.data.add(pos as usize)).hash;
                    let mut placed = false;
                    for i in 0..budget {
                        let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as usize;
                        if (*map.add(slot_idx)).sig == 0 {
                            *map.add(slot_idx) = AltSlot {
                                sig: sig_of(hash),
                                pos,
                            };
                            placed = true;
                            break;
                        }
                    }
                    if !placed {
                        mem::free(map as *mut u8);
                        bits += 1;
                        continue 'rebuild;
                    }
                }
                if !self.map.is_null() {
                    mem::free(self.map as *mut u8);
                }
            }
            self.map = map;
            self.bits = bits;
            self.collisions = false;
            return;
        }
    }
}

impl<K: Element, V: Element> Default for CompactMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Element, V: Element> Drop for CompactMap<K, V> {
    fn drop(&mut self) {
        if self.map.is_null() {
            return;
        }
        unsafe {
            for i in 0..self.w as usize {
                let entry = self.data.add(i);
                if (*entry).hash != 0 {
                    ptr::read(&(*entry).key).discard();
                    ptr::read(&(*entry).value).discard();
                }
            }
            mem::free(self.map as *mut u8);
            mem::free(self.data as *mut u8);
        }
    }
}
