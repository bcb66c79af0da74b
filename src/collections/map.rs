//! Insertion-ordered open-addressed hash map and set.
//!
//! Layout: a probe table of `2^bits` slots `(full_hash, position)` plus an
//! entry store of the same size. Entries carry `prev`/`next` indices that
//! stitch the live set into an insertion-ordered ring; the probe slot for
//! a removed entry keeps its hash but gets the tombstone position `!0` so
//! longer chains are not cut short.
//!
//! Probing walks the table with an odd stride (full period over the
//! power-of-two size) for at most `min(mask, 96)` steps. A full-hash
//! collision with a non-equal key is recorded; when probing fails even
//! after a same-size rehash and three doublings while such collisions
//! piled up, the map flips into the `under_attack` mode in which hash
//! equality is treated as key equality — an adversary feeding one hash
//! then overwrites a bounded chain instead of forcing unbounded probing.

use crate::collections::Element;
use crate::mem;
use std::marker::PhantomData;
use std::ptr;

const NONE: u32 = u32::MAX;
const TOMBSTONE: u32 = u32::MAX;
/// Odd probe stride: full-period over any power-of-two table.
const PROBE_STRIDE: u64 = 31;
/// Hard cap on probe steps per seek.
const MAX_SEEK: usize = 96;
/// Full-hash collisions on one failed chain that flip `under_attack`.
const ATTACK_LIMIT: usize = 11;
/// Probe-table size of the first allocation.
const INITIAL_BITS: u8 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct Slot {
    /// Full hash of the entry stored here; 0 marks an empty slot (user
    /// hashes of 0 are remapped before use).
    hash: u64,
    /// Entry index, or [`TOMBSTONE`] for a removed entry.
    pos: u32,
}

struct Entry<K, V> {
    /// Fixed-up hash; 0 marks a dead entry awaiting compaction.
    hash: u64,
    prev: u32,
    next: u32,
    key: K,
    value: V,
}

pub struct OrderedMap<K: Element, V: Element> {
    slots: *mut Slot,
    entries: *mut Entry<K, V>,
    bits: u8,
    count: u32,
    /// Write cursor into the entry store (dead entries included).
    w: u32,
    /// Ring head: oldest live entry, or [`NONE`].
    head: u32,
    /// Element limit; inserting past it evicts the ring head. 0 = none.
    max: u32,
    collisions: u8,
    under_attack: bool,
    _own: PhantomData<(K, V)>,
}

unsafe impl<K: Element + Send, V: Element + Send> Send for OrderedMap<K, V> {}
unsafe impl<K: Element + Sync, V: Element + Sync> Sync for OrderedMap<K, V> {}

/// Remaps the one reserved hash value; 0 marks empty slots.
#[inline]
fn fix_hash(h: u64) -> u64 {
    if h == 0 {
        !0
    } else {
        h
    }
}

struct SeekOutcome {
    /// Slot whose entry matched the key.
    matched: Option<u32>,
    /// First reusable slot (empty or tombstone) on the chain.
    free: Option<u32>,
    /// Full-hash collisions with non-equal keys seen on this walk.
    chain_collisions: usize,
}

impl SeekOutcome {
    fn saturated(&self) -> bool {
        self.matched.is_none() && self.free.is_none()
    }
}

impl<K: Element, V: Element> OrderedMap<K, V> {
    pub const fn new() -> Self {
        OrderedMap {
            slots: ptr::null_mut(),
            entries: ptr::null_mut(),
            bits: 0,
            count: 0,
            w: 0,
            head: NONE,
            max: 0,
            collisions: 0,
            under_attack: false,
            _own: PhantomData,
        }
    }

    /// A map holding at most `limit` elements; inserting a fresh key into
    /// a full map evicts the oldest entry first.
    pub fn with_limit(limit: u32) -> Self {
        let mut m = Self::new();
        m.max = limit;
        m
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Probe-table capacity (zero before the first insertion).
    #[inline]
    pub fn capacity(&self) -> usize {
        if self.slots.is_null() {
            0
        } else {
            1usize << self.bits
        }
    }

    /// True once any full-hash collision or removal has been observed.
    #[inline]
    pub fn has_collisions(&self) -> bool {
        self.collisions != 0
    }

    /// True once the map degraded to hash-equality matching.
    #[inline]
    pub fn is_under_attack(&self) -> bool {
        self.under_attack
    }

    /// Inserts or overwrites. Returns the previous value for an existing
    /// key (the old key is retained, the incoming key is discarded).
    pub fn set(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        self.put(hash, key, value, true).0
    }

    /// Inserts only when the key is absent; an existing entry wins and the
    /// incoming pair is discarded. Returns true when the pair went in.
    pub fn insert(&mut self, hash: u64, key: K, value: V) -> bool {
        self.put(hash, key, value, false).1
    }

    /// Looks up a key. Tombstones and misses return `None`.
    pub fn get(&self, hash: u64, key: &K) -> Option<&V> {
        let outcome = self.seek(fix_hash(hash), Some(key));
        let slot_idx = outcome.matched?;
        unsafe {
            let pos = (*self.slots.add(slot_idx as usize)).pos;
            Some(&(*self.entries.add(pos as usize)).value)
        }
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, hash: u64, key: &K) -> Option<&mut V> {
        let outcome = self.seek(fix_hash(hash), Some(key));
        let slot_idx = outcome.matched?;
        unsafe {
            let pos = (*self.slots.add(slot_idx as usize)).pos;
            Some(&mut (*self.entries.add(pos as usize)).value)
        }
    }

    /// Removes a key, returning its value. The probe slot becomes a
    /// tombstone; the table halves once it is both large (`bits ≥ 8`) and
    /// sparse (below 12.5 % density).
    pub fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        let outcome = self.seek(fix_hash(hash), Some(key));
        let slot_idx = outcome.matched?;
        let value = unsafe { self.remove_at(slot_idx) };
        self.collisions = self.collisions.saturating_add(1);
        if self.bits >= 8 && (self.count as usize) < self.capacity() / 8 {
            self.rehash_to(self.bits - 1);
        }
        Some(value)
    }

    /// Removes and returns the youngest entry.
    pub fn pop(&mut self) -> Option<(K, V)> {
        if self.head == NONE {
            return None;
        }
        let idx = unsafe { (*self.entries.add(self.head as usize)).prev };
        self.take_entry(idx)
    }

    /// Removes and returns the oldest entry.
    pub fn shift(&mut self) -> Option<(K, V)> {
        if self.head == NONE {
            return None;
        }
        self.take_entry(self.head)
    }

    /// Borrows the youngest entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        if self.head == NONE {
            return None;
        }
        unsafe {
            let idx = (*self.entries.add(self.head as usize)).prev;
            let e = &*self.entries.add(idx as usize);
            Some((&e.key, &e.value))
        }
    }

    /// Walks entries in insertion order starting at position `start_at`
    /// (negative counts from the youngest end). `f` returning a negative
    /// value stops the walk. Returns the position after the last entry
    /// processed.
    pub fn each(&self, start_at: isize, mut f: impl FnMut(&K, &V) -> i32) -> usize {
        let count = self.count as usize;
        let begin = if start_at < 0 {
            count.saturating_add_signed(start_at)
        } else {
            (start_at as usize).min(count)
        };
        if begin >= count {
            return count;
        }
        let mut idx = self.head;
        unsafe {
            for _ in 0..begin {
                idx = (*self.entries.add(idx as usize)).next;
            }
            for i in begin..count {
                let e = &*self.entries.add(idx as usize);
                if f(&e.key, &e.value) < 0 {
                    return i + 1;
                }
                idx = e.next;
            }
        }
        count
    }

    /// Rebuilds the probe table at the current size, clearing tombstones
    /// and compacting the entry store.
    pub fn rehash(&mut self) {
        if !self.slots.is_null() {
            self.rehash_to(self.bits);
        }
    }

    // ── Core insertion ──────────────────────────────────────────────────────

    /// Returns `(old_value, inserted_fresh)`.
    fn put(&mut self, hash: u64, key: K, value: V, overwrite: bool) -> (Option<V>, bool) {
        let hash = fix_hash(hash);
        if self.slots.is_null() {
            self.rehash_to(INITIAL_BITS);
        }
        if self.w as usize == self.capacity() || (self.count as usize) >= self.capacity() / 2 {
            let grow = (self.count as usize) >= self.capacity() / 2;
            self.rehash_to(self.bits + grow as u8);
        }

        // Growth ladder: as-is, same-size rehash, then up to 3 doublings.
        let mut outcome = self.seek(hash, Some(&key));
        if outcome.saturated() {
            self.rehash_to(self.bits);
            outcome = self.seek(hash, Some(&key));
            let mut growths = 0;
            while outcome.saturated() && growths < 3 {
                self.rehash_to(self.bits + 1);
                growths += 1;
                outcome = self.seek(hash, Some(&key));
            }
        }

        if outcome.saturated() {
            // Saturated chain. With piled-up full-hash collisions this is
            // indistinguishable from an algorithmic-complexity attack:
            // degrade to hash-equality matching and overwrite the chain.
            if outcome.chain_collisions >= ATTACK_LIMIT && !self.under_attack {
                self.under_attack = true;
                log::warn!(
                    "security: hash map chain saturated by full-hash collisions; \
                     treating hash equality as key equality from now on"
                );
            }
            outcome = self.seek(hash, Some(&key));
            while outcome.saturated() {
                // Shed the oldest entries until the chain clears.
                match self.take_entry(self.head) {
                    Some((k, v)) => {
                        k.discard();
                        v.discard();
                    }
                    None => break,
                }
                self.rehash_to(self.bits);
                outcome = self.seek(hash, Some(&key));
            }
        }
        self.note_collisions(outcome.chain_collisions);

        if let Some(slot_idx) = outcome.matched {
            let pos = unsafe { (*self.slots.add(slot_idx as usize)).pos };
            let entry = unsafe { &mut *self.entries.add(pos as usize) };
            key.discard();
            if overwrite {
                let old = std::mem::replace(&mut entry.value, value);
                return (Some(old), false);
            }
            value.discard();
            return (None, false);
        }

        // Fresh key: honor the element limit before linking.
        if self.max != 0 && self.count >= self.max {
            if let Some((k, v)) = self.take_entry(self.head) {
                k.discard();
                v.discard();
            }
            // Eviction may have freed a better slot on this chain.
            outcome = self.seek(hash, Some(&key));
        }
        let slot_idx = match (outcome.matched, outcome.free) {
            (Some(s), _) | (_, Some(s)) => s,
            _ => unreachable!("seek after eviction lost its free slot"),
        };
        unsafe {
            let idx = self.w;
            self.w += 1;
            let (prev, next) = self.link_tail(idx);
            self.entries.add(idx as usize).write(Entry {
                hash,
                prev,
                next,
                key,
                value,
            });
            *self.slots.add(slot_idx as usize) = Slot { hash, pos: idx };
        }
        self.count += 1;
        (None, true)
    }

    fn note_collisions(&mut self, n: usize) {
        if n > 0 {
            self.collisions = self.collisions.saturating_add(n.min(255) as u8);
        }
    }

    /// Probe walk. Never mutates the map, so lookups stay safe against
    /// concurrent readers.
    fn seek(&self, hash: u64, key: Option<&K>) -> SeekOutcome {
        let mut outcome = SeekOutcome {
            matched: None,
            free: None,
            chain_collisions: 0,
        };
        if self.slots.is_null() {
            return outcome;
        }
        let mask = (1u64 << self.bits) - 1;
        let budget = (mask as usize).max(1).min(MAX_SEEK);
        for i in 0..budget {
            let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as u32;
            let slot = unsafe { *self.slots.add(slot_idx as usize) };
            if slot.hash == 0 {
                if outcome.free.is_none() {
                    outcome.free = Some(slot_idx);
                }
                return outcome;
            }
            if slot.pos == TOMBSTONE {
                if outcome.free.is_none() {
                    outcome.free = Some(slot_idx);
                }
                continue;
            }
            if slot.hash == hash {
                if self.under_attack {
                    outcome.matched = Some(slot_idx);
                    return outcome;
                }
                let entry_key = unsafe { &(*self.entries.add(slot.pos as usize)).key };
                match key {
                    Some(k) if entry_key.is_eq(k) => {
                        outcome.matched = Some(slot_idx);
                        return outcome;
                    }
                    _ => outcome.chain_collisions += 1,
                }
            }
        }
        // Budget exhausted without an empty slot. A tombstone found along
        // the way is not reusable here: the chain never proved the key
        // absent, so report saturation and let the caller rehash.
        outcome.free = None;
        outcome
    }

    /// Seeks the slot whose position points at entry `idx`.
    fn seek_position(&self, hash: u64, idx: u32) -> Option<u32> {
        let mask = (1u64 << self.bits) - 1;
        let budget = (mask as usize).max(1).min(MAX_SEEK);
        for i in 0..budget {
            let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as u32;
            let slot = unsafe { *self.slots.add(slot_idx as usize) };
            if slot.hash == 0 {
                return None;
            }
            if slot.pos != TOMBSTONE && slot.pos == idx {
                return Some(slot_idx);
            }
        }
        None
    }

    /// Tombstones the slot, unlinks the ring and reads the entry out.
    ///
    /// # Safety
    /// `slot_idx` holds a live position.
    unsafe fn remove_at(&mut self, slot_idx: u32) -> V {
        let pos = (*self.slots.add(slot_idx as usize)).pos;
        (*self.slots.add(slot_idx as usize)).pos = TOMBSTONE;
        let entry = self.entries.add(pos as usize);
        (*entry).hash = 0;
        self.unlink(pos);
        self.count -= 1;
        let key = ptr::read(&(*entry).key);
        key.discard();
        ptr::read(&(*entry).value)
    }

    /// Removes entry `idx` (ring index), returning the pair.
    fn take_entry(&mut self, idx: u32) -> Option<(K, V)> {
        if idx == NONE || self.head == NONE {
            return None;
        }
        unsafe {
            let entry = self.entries.add(idx as usize);
            let hash = (*entry).hash;
            let slot_idx = self.seek_position(hash, idx)?;
            (*self.slots.add(slot_idx as usize)).pos = TOMBSTONE;
            (*entry).hash = 0;
            self.unlink(idx);
            self.count -= 1;
            Some((ptr::read(&(*entry).key), ptr::read(&(*entry).value)))
        }
    }

    /// Appends entry `idx` at the ring tail, returning its `(prev, next)`.
    fn link_tail(&mut self, idx: u32) -> (u32, u32) {
        if self.head == NONE {
            self.head = idx;
            return (idx, idx);
        }
        unsafe {
            let head = self.head;
            let tail = (*self.entries.add(head as usize)).prev;
            (*self.entries.add(tail as usize)).next = idx;
            (*self.entries.add(head as usize)).prev = idx;
            (tail, head)
        }
    }

    fn unlink(&mut self, idx: u32) {
        unsafe {
            let entry = self.entries.add(idx as usize);
            let next = (*entry).next;
            if next == idx {
                self.head = NONE;
                return;
            }
            let prev = (*entry).prev;
            (*self.entries.add(prev as usize)).next = next;
            (*self.entries.add(next as usize)).prev = prev;
            if self.head == idx {
                self.head = next;
            }
        }
    }

    /// Rebuilds both arrays at `2^new_bits`, re-placing live entries in
    /// ring order. Clears every tombstone. Grows further if the requested
    /// size cannot place every entry.
    fn rehash_to(&mut self, new_bits: u8) {
        let mut bits = new_bits.max(INITIAL_BITS);
        'rebuild: loop {
            let capa = 1usize << bits;
            debug_assert!(capa >= self.count as usize);
            let slots = mem::calloc(std::mem::size_of::<Slot>(), capa) as *mut Slot;
            let entries =
                mem::alloc(capa * std::mem::size_of::<Entry<K, V>>()) as *mut Entry<K, V>;
            let mask = (capa - 1) as u64;
            let budget = (mask as usize).max(1).min(MAX_SEEK);

            let mut nw: u32 = 0;
            let mut idx = self.head;
            let count = self.count;
            unsafe {
                for _ in 0..count {
                    let old = self.entries.add(idx as usize);
                    let hash = (*old).hash;
                    let mut placed = false;
                    for i in 0..budget {
                        let slot_idx = (hash.wrapping_add(i as u64 * PROBE_STRIDE) & mask) as usize;
                        if (*slots.add(slot_idx)).hash == 0 {
                            *slots.add(slot_idx) = Slot { hash, pos: nw };
                            placed = true;
                            break;
                        }
                    }
                    if !placed {
                        mem::free(slots as *mut u8);
                        mem::free(entries as *mut u8);
                        bits += 1;
                        continue 'rebuild;
                    }
                    entries.add(nw as usize).write(Entry {
                        hash,
                        prev: if nw == 0 { count - 1 } else { nw - 1 },
                        next: if nw + 1 == count { 0 } else { nw + 1 },
                        key: ptr::read(&(*old).key),
                        value: ptr::read(&(*old).value),
                    });
                    nw += 1;
                    idx = (*old).next;
                }
                if !self.slots.is_null() {
                    mem::free(self.slots as *mut u8);
                    mem::free(self.entries as *mut u8);
                }
            }
            self.slots = slots;
            self.entries = entries;
            self.bits = bits;
            self.w = nw;
            self.head = if count == 0 { NONE } else { 0 };
            return;
        }
    }
}

impl<K: Element, V: Element> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Element, V: Element> Drop for OrderedMap<K, V> {
    fn drop(&mut self) {
        if self.slots.is_null() {
            return;
        }
        unsafe {
            let mut idx = self.head;
            for _ in 0..self.count {
                let entry = self.entries.add(idx as usize);
                ptr::read(&(*entry).key).discard();
                ptr::read(&(*entry).value).discard();
                idx = (*entry).next;
            }
            mem::free(self.slots as *mut u8);
            mem::free(self.entries as *mut u8);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Set: key-only instantiation of the same engine
// ─────────────────────────────────────────────────────────────────────────────

/// Insertion-ordered hash set; the hash is derived from the value by the
/// caller.
pub struct OrderedSet<T: Element> {
    map: OrderedMap<T, ()>,
}

impl<T: Element> OrderedSet<T> {
    pub const fn new() -> Self {
        OrderedSet {
            map: OrderedMap::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.map.count()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has_collisions(&self) -> bool {
        self.map.has_collisions()
    }

    pub fn is_under_attack(&self) -> bool {
        self.map.is_under_attack()
    }

    /// Inserts `v` unless an equal value is present. Returns true when
    /// inserted.
    pub fn insert(&mut self, hash: u64, v: T) -> bool {
        self.map.insert(hash, v, ())
    }

    /// True when an equal value is present.
    pub fn contains(&self, hash: u64, v: &T) -> bool {
        self.map.get(hash, v).is_some()
    }

    /// Removes an equal value, returning whether one was present.
    pub fn remove(&mut self, hash: u64, v: &T) -> bool {
        self.map.remove(hash, v).is_some()
    }

    /// Ordered walk; same contract as [`OrderedMap::each`].
    pub fn each(&self, start_at: isize, mut f: impl FnMut(&T) -> i32) -> usize {
        self.map.each(start_at, |k, ()| f(k))
    }
}

impl<T: Element> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
