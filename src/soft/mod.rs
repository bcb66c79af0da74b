//! Soft (dynamic) values: a tagged machine word classifying null, true,
//! false, small integers, small floats and four reference-counted heap
//! classes.
//!
//! The low three bits of the word select the class:
//!
//! | tag   | class                                         |
//! |-------|-----------------------------------------------|
//! | `001` | small integer (signed payload in the upper bits) |
//! | `010` | primitive literal (null / true / false)       |
//! | `011` | pointer to a refcounted string                |
//! | `100` | pointer to a refcounted array                 |
//! | `101` | pointer to a refcounted hash                  |
//! | `110` | small float (an f64 whose low mantissa bits are zero) |
//! | `111` | pointer to a wrapper whose first field is a vtable pointer |
//!
//! The word `0` is [`Soft::INVALID`], the absence of a value.
//!
//! `Soft` is `Copy`; ownership moves through [`Soft::dup`] (refcount up)
//! and [`Soft::free`] (refcount down). Container insertion consumes the
//! caller's reference. Integers that do not fit the tagged payload and
//! floats whose bit pattern aliases the tag fall back to refcounted
//! `bignum` / `bigfloat` wrappers behind the extension vtable.

pub mod json;

use crate::collections::array::Array;
use crate::collections::map::OrderedMap;
use crate::collections::Element;
use crate::hash;
use crate::num;
use crate::refwrap::RefWrap;
use crate::string::BString;
use std::cell::Cell;

const TAG_MASK: usize = 0b111;
const TAG_NUMBER: usize = 0b001;
const TAG_PRIMITIVE: usize = 0b010;
const TAG_STRING: usize = 0b011;
const TAG_ARRAY: usize = 0b100;
const TAG_HASH: usize = 0b101;
const TAG_FLOAT: usize = 0b110;
const TAG_OTHER: usize = 0b111;

const WORD_NULL: usize = TAG_PRIMITIVE;
const WORD_TRUE: usize = (1 << 3) | TAG_PRIMITIVE;
const WORD_FALSE: usize = (2 << 3) | TAG_PRIMITIVE;

/// Signed bits available to a tagged integer.
const INT_BITS: u32 = usize::BITS - 3;

/// Class of a [`Soft`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftType {
    Invalid,
    Null,
    True,
    False,
    Number,
    Float,
    String,
    Array,
    Hash,
    Other,
}

/// Virtual table for user-extended soft classes (tag `111`). The wrapped
/// value's first field must be the vtable reference, and the wrapper must
/// be allocated through `RefWrap<T>` (no metadata slot).
pub struct SoftVtable {
    /// Distinguishes extension classes from one another.
    pub type_id: usize,
    pub is_eq: fn(Soft, Soft) -> bool,
    pub to_s: fn(Soft) -> BString,
    pub to_i: fn(Soft) -> i64,
    pub to_f: fn(Soft) -> f64,
    pub count: fn(Soft) -> usize,
    /// Child iteration for container-like extensions.
    pub each1: Option<fn(Soft, isize, &mut dyn FnMut(Soft) -> i32) -> usize>,
    /// Releases one reference; destroys the wrapper at zero.
    pub free2: fn(Soft),
}

/// First field of every extension payload.
#[repr(C)]
pub struct OtherHeader {
    pub vtable: &'static SoftVtable,
}

// ── Heap payloads ────────────────────────────────────────────────────────────

pub(crate) struct SoftStr {
    /// Memoized content hash; 0 = not computed. Every mutator clears it.
    pub(crate) hash: Cell<u64>,
    pub(crate) str: BString,
}

pub(crate) struct SoftArray {
    pub(crate) ary: Array<Soft>,
}

pub(crate) struct SoftHash {
    pub(crate) map: OrderedMap<Soft, Soft>,
}

#[repr(C)]
struct BigNum {
    head: OtherHeader,
    value: i64,
}

#[repr(C)]
struct BigFloat {
    head: OtherHeader,
    value: f64,
}

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Soft(usize);

thread_local! {
    /// Current key while iterating a hash through `each1`.
    static KEY_IN_LOOP: Cell<usize> = const { Cell::new(0) };
    /// Thread-static temporary string (see [`Soft::str_tmp`]).
    static STR_TMP: Cell<usize> = const { Cell::new(0) };
}

impl Soft {
    /// The absence of a value.
    pub const INVALID: Soft = Soft(0);

    // ── Constructors ────────────────────────────────────────────────────────

    #[inline]
    pub const fn null() -> Soft {
        Soft(WORD_NULL)
    }

    #[inline]
    pub const fn true_() -> Soft {
        Soft(WORD_TRUE)
    }

    #[inline]
    pub const fn false_() -> Soft {
        Soft(WORD_FALSE)
    }

    #[inline]
    pub const fn bool(b: bool) -> Soft {
        if b {
            Self::true_()
        } else {
            Self::false_()
        }
    }

    /// A number: tagged when it fits the payload, a refcounted bignum
    /// wrapper otherwise.
    pub fn int(i: i64) -> Soft {
        let min = -(1i64 << (INT_BITS - 1));
        let max = (1i64 << (INT_BITS - 1)) - 1;
        if (min..=max).contains(&i) {
            return Soft(((i as usize) << 3) | TAG_NUMBER);
        }
        Soft(RefWrap::<BigNum>::new(
            BigNum {
                head: OtherHeader {
                    vtable: &BIGNUM_VTABLE,
                },
                value: i,
            },
            TAG_OTHER as u8,
        ) as usize)
    }

    /// A float: tagged when the low mantissa bits are clear, a refcounted
    /// bigfloat wrapper otherwise.
    pub fn float(f: f64) -> Soft {
        let bits = f.to_bits();
        if usize::BITS == 64 && bits & TAG_MASK as u64 == 0 {
            return Soft(bits as usize | TAG_FLOAT);
        }
        Soft(RefWrap::<BigFloat>::new(
            BigFloat {
                head: OtherHeader {
                    vtable: &BIGFLOAT_VTABLE,
                },
                value: f,
            },
            TAG_OTHER as u8,
        ) as usize)
    }

    /// A refcounted string holding a copy of `bytes`.
    pub fn str(bytes: &[u8]) -> Soft {
        Self::str_from(BString::from_bytes(bytes))
    }

    /// A refcounted string taking ownership of `s`.
    pub fn str_from(s: BString) -> Soft {
        Soft(RefWrap::<SoftStr>::new(
            SoftStr {
                hash: Cell::new(0),
                str: s,
            },
            TAG_STRING as u8,
        ) as usize)
    }

    /// A thread-static temporary string, cleared on every call. Do not
    /// [`Soft::dup`] or [`Soft::free`] it.
    pub fn str_tmp() -> Soft {
        STR_TMP.with(|slot| {
            if slot.get() == 0 {
                let v = Self::str_from(BString::new());
                unsafe {
                    // Pin far above any realistic refcount traffic.
                    RefWrap::<SoftStr>::pin((v.0 & !TAG_MASK) as *mut SoftStr);
                }
                slot.set(v.0);
            }
            let v = Soft(slot.get());
            unsafe {
                let s = v.str_mut();
                s.str.clear();
                s.hash.set(0);
            }
            v
        })
    }

    /// A refcounted empty array.
    pub fn array() -> Soft {
        Soft(RefWrap::<SoftArray>::new(
            SoftArray { ary: Array::new() },
            TAG_ARRAY as u8,
        ) as usize)
    }

    /// A refcounted array with reserved capacity.
    pub fn array_with_capacity(capa: usize) -> Soft {
        Soft(RefWrap::<SoftArray>::new(
            SoftArray {
                ary: Array::with_capacity(capa),
            },
            TAG_ARRAY as u8,
        ) as usize)
    }

    /// A refcounted empty hash (insertion-ordered).
    pub fn hash() -> Soft {
        Soft(RefWrap::<SoftHash>::new(
            SoftHash {
                map: OrderedMap::new(),
            },
            TAG_HASH as u8,
        ) as usize)
    }

    // ── Classification ──────────────────────────────────────────────────────

    #[inline]
    fn tag(self) -> usize {
        self.0 & TAG_MASK
    }

    #[inline]
    fn untagged(self) -> usize {
        self.0 & !TAG_MASK
    }

    pub fn type_of(self) -> SoftType {
        match self.tag() {
            TAG_NUMBER => SoftType::Number,
            TAG_PRIMITIVE => match self.0 {
                WORD_NULL => SoftType::Null,
                WORD_TRUE => SoftType::True,
                WORD_FALSE => SoftType::False,
                _ => SoftType::Invalid,
            },
            TAG_STRING => SoftType::String,
            TAG_ARRAY => SoftType::Array,
            TAG_HASH => SoftType::Hash,
            TAG_FLOAT => SoftType::Float,
            // The built-in wrappers report their logical class; only user
            // extensions surface as `Other`.
            TAG_OTHER => match self.vtable().type_id {
                BIGNUM_TYPE_ID => SoftType::Number,
                BIGFLOAT_TYPE_ID => SoftType::Float,
                _ => SoftType::Other,
            },
            _ => SoftType::Invalid,
        }
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    /// The extension vtable of a tag-`111` value.
    fn vtable(self) -> &'static SoftVtable {
        debug_assert_eq!(self.tag(), TAG_OTHER);
        unsafe { (*(self.untagged() as *const OtherHeader)).vtable }
    }

    // ── Reference management ────────────────────────────────────────────────

    /// Clones the value: refcount up for heap classes, plain copy for
    /// tagged scalars.
    pub fn dup(self) -> Soft {
        unsafe {
            match self.tag() {
                TAG_STRING => {
                    RefWrap::<SoftStr>::up_ref(self.0 as *mut SoftStr);
                }
                TAG_ARRAY => {
                    RefWrap::<SoftArray>::up_ref(self.0 as *mut SoftArray);
                }
                TAG_HASH => {
                    RefWrap::<SoftHash>::up_ref(self.0 as *mut SoftHash);
                }
                TAG_OTHER => {
                    // Every extension payload sits in a plain RefWrap<T>;
                    // the header field is layout-identical for ref ops.
                    RefWrap::<OtherHeader>::up_ref(self.0 as *mut OtherHeader);
                }
                _ => {}
            }
        }
        self
    }

    /// Releases one reference; a no-op for tagged scalars. Container
    /// children are freed iteratively, so arbitrarily deep structures
    /// cannot overflow the stack.
    pub fn free(self) {
        match self.tag() {
            TAG_STRING => unsafe {
                RefWrap::<SoftStr>::free2(self.0 as *mut SoftStr);
            },
            TAG_ARRAY | TAG_HASH => deep_free(self),
            TAG_OTHER => (self.vtable().free2)(self),
            _ => {}
        }
    }

    // ── Uniform operations ──────────────────────────────────────────────────

    /// Deep equality: scalars by payload, strings by content, containers
    /// by count and element-wise equality.
    pub fn iseq(self, other: Soft) -> bool {
        if self.0 == other.0 {
            return true;
        }
        match (self.type_of(), other.type_of()) {
            (SoftType::Number, SoftType::Number) => self.to_i() == other.to_i(),
            (SoftType::Float, SoftType::Float) => self.to_f().to_bits() == other.to_f().to_bits(),
            (SoftType::String, SoftType::String) => unsafe {
                self.str_mut().str.iseq(&other.str_mut().str)
            },
            (SoftType::Array, SoftType::Array) => unsafe {
                let a = &self.ary_mut().ary;
                let b = &other.ary_mut().ary;
                if a.count() != b.count() {
                    return false;
                }
                for i in 0..a.count() {
                    let x = *a.get(i as isize).unwrap();
                    let y = *b.get(i as isize).unwrap();
                    if !x.iseq(y) {
                        return false;
                    }
                }
                true
            },
            (SoftType::Hash, SoftType::Hash) => unsafe {
                let a = &self.map_mut().map;
                let b = &other.map_mut().map;
                if a.count() != b.count() {
                    return false;
                }
                let mut equal = true;
                a.each(0, |k, v| {
                    match b.get(key_hash(*k), k) {
                        Some(w) if v.iseq(*w) => 0,
                        _ => {
                            equal = false;
                            -1
                        }
                    }
                });
                equal
            },
            (SoftType::Other, SoftType::Other) => {
                self.vtable().type_id == other.vtable().type_id
                    && (self.vtable().is_eq)(self, other)
            }
            _ => false,
        }
    }

    /// Truthiness: null/false/invalid and zero numerics are false, strings
    /// by non-empty content, containers by non-zero count.
    pub fn is_true(self) -> bool {
        match self.type_of() {
            SoftType::Invalid | SoftType::Null | SoftType::False => false,
            SoftType::True => true,
            SoftType::Number => self.to_i() != 0,
            SoftType::Float => self.to_f() != 0.0,
            SoftType::String => unsafe { !self.str_mut().str.is_empty() },
            SoftType::Array | SoftType::Hash => self.count() != 0,
            SoftType::Other => (self.vtable().to_i)(self) != 0,
        }
    }

    /// Integer coercion.
    pub fn to_i(self) -> i64 {
        match self.tag() {
            TAG_NUMBER => ((self.0 as isize) >> 3) as i64,
            TAG_FLOAT => self.to_f() as i64,
            TAG_PRIMITIVE => (self.0 == WORD_TRUE) as i64,
            TAG_STRING => unsafe {
                let mut cursor = self.str_mut().str.as_bytes();
                num::atol(&mut cursor)
            },
            TAG_OTHER => (self.vtable().to_i)(self),
            _ => 0,
        }
    }

    /// Float coercion.
    pub fn to_f(self) -> f64 {
        match self.tag() {
            TAG_FLOAT => f64::from_bits(self.untagged() as u64),
            TAG_NUMBER => self.to_i() as f64,
            TAG_PRIMITIVE => (self.0 == WORD_TRUE) as i64 as f64,
            TAG_STRING => unsafe {
                let mut cursor = self.str_mut().str.as_bytes();
                num::atof(&mut cursor)
            },
            TAG_OTHER => (self.vtable().to_f)(self),
            _ => 0.0,
        }
    }

    /// Textual form. Strings clone their content; numerics render into a
    /// fresh small string (no heap traffic); containers render a summary
    /// count like their JSON length.
    pub fn to_s(self) -> BString {
        match self.type_of() {
            SoftType::Invalid => BString::new(),
            SoftType::Null => BString::from_bytes(b"null"),
            SoftType::True => BString::from_bytes(b"true"),
            SoftType::False => BString::from_bytes(b"false"),
            SoftType::Number => {
                let mut s = BString::new();
                s.write_i(self.to_i());
                s
            }
            SoftType::Float => {
                let mut s = BString::new();
                s.write_f(self.to_f());
                s
            }
            SoftType::String => unsafe { self.str_mut().str.clone() },
            SoftType::Array | SoftType::Hash => {
                let mut s = BString::new();
                s.write_fmt(format_args!("[{}]", self.count()));
                s
            }
            SoftType::Other => (self.vtable().to_s)(self),
        }
    }

    /// Number of direct children (container classes only).
    pub fn count(self) -> usize {
        match self.tag() {
            TAG_ARRAY => unsafe { self.ary_mut().ary.count() },
            TAG_HASH => unsafe { self.map_mut().map.count() },
            TAG_OTHER => (self.vtable().count)(self),
            _ => 0,
        }
    }

    /// Visits direct children from position `start_at` (negative counts
    /// from the end). For hashes the callback receives values; the key of
    /// the current entry is exposed through [`key_in_loop`]. `f`
    /// returning a negative value stops the walk. Returns the position
    /// after the last child processed.
    pub fn each1(self, start_at: isize, f: &mut dyn FnMut(Soft) -> i32) -> usize {
        match self.tag() {
            TAG_ARRAY => unsafe { self.ary_mut().ary.each(start_at, |v| f(*v)) },
            TAG_HASH => unsafe {
                let out = self.map_mut().map.each(start_at, |k, v| {
                    KEY_IN_LOOP.with(|c| c.set(k.0));
                    f(*v)
                });
                KEY_IN_LOOP.with(|c| c.set(0));
                out
            },
            TAG_OTHER => match self.vtable().each1 {
                Some(each1) => each1(self, start_at, f),
                None => 0,
            },
            _ => 0,
        }
    }

    /// Pre-order traversal over the value and all its descendants, driven
    /// by an explicit stack (no recursion). `f` returning a negative value
    /// stops the walk. Returns the number of values visited.
    pub fn each2(self, f: &mut dyn FnMut(Soft) -> i32) -> usize {
        let mut stack = vec![self];
        let mut visited = 0usize;
        while let Some(v) = stack.pop() {
            visited += 1;
            if f(v) < 0 {
                return visited;
            }
            match v.type_of() {
                SoftType::Array | SoftType::Hash => {
                    let mut children = Vec::with_capacity(v.count());
                    v.each1(0, &mut |child| {
                        children.push(child);
                        0
                    });
                    while let Some(child) = children.pop() {
                        stack.push(child);
                    }
                }
                _ => {}
            }
        }
        visited
    }

    /// Salted structural hash: scalars hash their payload, strings their
    /// content, containers fold their children in order.
    pub fn hash(self, salt: u64) -> u64 {
        match self.type_of() {
            SoftType::Invalid => hash::keyed(b"", salt),
            SoftType::Null => hash::keyed(b"nil", salt),
            SoftType::True => hash::keyed(b"yes", salt),
            SoftType::False => hash::keyed(b"no", salt),
            SoftType::Number => hash::keyed(&self.to_i().to_le_bytes(), salt),
            SoftType::Float => hash::keyed(&self.to_f().to_bits().to_le_bytes(), salt),
            SoftType::String => unsafe { self.str_mut().str.hash(salt) },
            SoftType::Array => {
                let mut h = hash::keyed(b"ary", salt);
                self.each1(0, &mut |child| {
                    h = child.hash(h);
                    0
                });
                h
            }
            SoftType::Hash => unsafe {
                let mut h = hash::keyed(b"map", salt);
                self.map_mut().map.each(0, |k, v| {
                    h = v.hash(k.hash(h));
                    0
                });
                h
            },
            SoftType::Other => {
                let text = (self.vtable().to_s)(self);
                hash::keyed(text.as_bytes(), salt ^ self.vtable().type_id as u64)
            }
        }
    }

    // ── String class ────────────────────────────────────────────────────────

    /// Borrows the string payload, or `None` for other classes.
    pub fn str_ref(&self) -> Option<&BString> {
        if self.tag() != TAG_STRING {
            return None;
        }
        Some(unsafe { &(*(self.untagged() as *const SoftStr)).str })
    }

    /// Appends bytes to a soft string, clearing its memoized hash.
    /// Returns the new length, or 0 for non-strings and frozen strings.
    pub fn str_write(self, bytes: &[u8]) -> usize {
        if self.tag() != TAG_STRING {
            return 0;
        }
        unsafe {
            let s = self.str_mut();
            s.hash.set(0);
            s.str.write(bytes).len
        }
    }

    /// Memoized content hash of a soft string (map-key seed).
    pub fn str_hash(self) -> u64 {
        debug_assert_eq!(self.tag(), TAG_STRING);
        unsafe {
            let s = self.str_mut();
            let cached = s.hash.get();
            if cached != 0 {
                return cached;
            }
            let h = s.str.hash(hash::process_seed());
            s.hash.set(h);
            h
        }
    }

    // ── Array class ─────────────────────────────────────────────────────────

    /// Borrows the array payload, or `None` for other classes.
    pub fn array_ref(&self) -> Option<&Array<Soft>> {
        if self.tag() != TAG_ARRAY {
            return None;
        }
        Some(unsafe { &(*(self.untagged() as *const SoftArray)).ary })
    }

    /// Appends `v`, consuming the caller's reference.
    pub fn array_push(self, v: Soft) {
        if self.tag() != TAG_ARRAY {
            v.free();
            return;
        }
        unsafe { self.ary_mut().ary.push(v) };
    }

    /// Removes and returns the tail value (caller owns the reference).
    pub fn array_pop(self) -> Soft {
        if self.tag() != TAG_ARRAY {
            return Soft::INVALID;
        }
        unsafe { self.ary_mut().ary.pop().unwrap_or(Soft::INVALID) }
    }

    /// Prepends `v`, consuming the caller's reference.
    pub fn array_unshift(self, v: Soft) {
        if self.tag() != TAG_ARRAY {
            v.free();
            return;
        }
        unsafe { self.ary_mut().ary.unshift(v) };
    }

    /// Removes and returns the head value (caller owns the reference).
    pub fn array_shift(self) -> Soft {
        if self.tag() != TAG_ARRAY {
            return Soft::INVALID;
        }
        unsafe { self.ary_mut().ary.shift().unwrap_or(Soft::INVALID) }
    }

    /// Returns the value at `index` (negative counts from the end)
    /// without transferring ownership. Dup it to keep it.
    pub fn array_get(self, index: isize) -> Soft {
        if self.tag() != TAG_ARRAY {
            return Soft::INVALID;
        }
        unsafe {
            self.ary_mut()
                .ary
                .get(index)
                .copied()
                .unwrap_or(Soft::INVALID)
        }
    }

    /// Stores `v` at `index` (gaps fill with INVALID), consuming the
    /// caller's reference and freeing any displaced value.
    pub fn array_set(self, index: isize, v: Soft) {
        if self.tag() != TAG_ARRAY {
            v.free();
            return;
        }
        unsafe {
            if let Some(old) = self.ary_mut().ary.set(index, v) {
                old.free();
            }
        }
    }

    /// Removes the value at `index`, freeing it. Returns false when out of
    /// range.
    pub fn array_remove(self, index: isize) -> bool {
        if self.tag() != TAG_ARRAY {
            return false;
        }
        unsafe {
            match self.ary_mut().ary.remove(index) {
                Some(old) => {
                    old.free();
                    true
                }
                None => false,
            }
        }
    }

    /// Drops every INVALID hole from the array.
    pub fn array_compact(self) {
        if self.tag() == TAG_ARRAY {
            unsafe {
                self.ary_mut().ary.remove_all(&Soft::INVALID);
            }
        }
    }

    /// Index of the first value equal to `v`, if any.
    pub fn array_find(self, v: Soft) -> Option<usize> {
        if self.tag() != TAG_ARRAY {
            return None;
        }
        unsafe { self.ary_mut().ary.find(&v, 0) }
    }

    // ── Hash class ──────────────────────────────────────────────────────────

    /// Inserts or overwrites `key → value`, consuming both references and
    /// freeing any displaced value.
    pub fn hash_set(self, key: Soft, value: Soft) {
        if self.tag() != TAG_HASH {
            key.free();
            value.free();
            return;
        }
        unsafe {
            if let Some(old) = self.map_mut().map.set(key_hash(key), key, value) {
                old.free();
            }
        }
    }

    /// Returns the value for `key` without transferring ownership, or
    /// INVALID. Dup it to keep it. The key argument is only read; the
    /// caller keeps its reference.
    pub fn hash_get(self, key: Soft) -> Soft {
        if self.tag() != TAG_HASH {
            return Soft::INVALID;
        }
        unsafe {
            self.map_mut()
                .map
                .get(key_hash(key), &key)
                .copied()
                .unwrap_or(Soft::INVALID)
        }
    }

    /// Byte-keyed lookup convenience: builds a transient string key.
    pub fn hash_find(self, key: &[u8]) -> Soft {
        let k = Soft::str(key);
        let out = self.hash_get(k);
        k.free();
        out
    }

    /// Removes `key`, returning its value (caller owns the returned
    /// reference). The key argument itself is only read.
    pub fn hash_remove(self, key: Soft) -> Soft {
        if self.tag() != TAG_HASH {
            return Soft::INVALID;
        }
        unsafe {
            self.map_mut()
                .map
                .remove(key_hash(key), &key)
                .unwrap_or(Soft::INVALID)
        }
    }

    /// Removes `key` and frees its value. Returns false when absent.
    pub fn hash_delete(self, key: Soft) -> bool {
        let v = self.hash_remove(key);
        if v.is_invalid() {
            return false;
        }
        v.free();
        true
    }

    // ── Internal raw access ─────────────────────────────────────────────────

    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn str_mut<'a>(self) -> &'a mut SoftStr {
        &mut *(self.untagged() as *mut SoftStr)
    }

    pub(crate) unsafe fn ary_mut<'a>(self) -> &'a mut SoftArray {
        &mut *(self.untagged() as *mut SoftArray)
    }

    pub(crate) unsafe fn map_mut<'a>(self) -> &'a mut SoftHash {
        &mut *(self.untagged() as *mut SoftHash)
    }
}

impl std::fmt::Debug for Soft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Soft({:?})", self.type_of())
    }
}

/// Map-key hash used by soft hashes: memoized for strings, structural for
/// anything else.
pub(crate) fn key_hash(key: Soft) -> u64 {
    if key.type_of() == SoftType::String {
        key.str_hash()
    } else {
        key.hash(hash::process_seed())
    }
}

/// The key of the hash entry currently visited by
/// [`Soft::each1`], valid inside the callback only.
pub fn key_in_loop() -> Soft {
    KEY_IN_LOOP.with(|c| Soft(c.get()))
}

/// Iterative free of a container tree: children are drained onto an
/// explicit stack before their parent's shell drops, so depth never grows
/// the call stack.
fn deep_free(root: Soft) {
    let mut stack = vec![root];
    while let Some(v) = stack.pop() {
        unsafe {
            match v.tag() {
                TAG_ARRAY => {
                    let p = v.0 as *mut SoftArray;
                    if RefWrap::<SoftArray>::count(p) > 1 {
                        RefWrap::<SoftArray>::free2(p);
                        continue;
                    }
                    let ary = &mut v.ary_mut().ary;
                    while let Some(child) = ary.pop() {
                        stack.push(child);
                    }
                    RefWrap::<SoftArray>::free2(p);
                }
                TAG_HASH => {
                    let p = v.0 as *mut SoftHash;
                    if RefWrap::<SoftHash>::count(p) > 1 {
                        RefWrap::<SoftHash>::free2(p);
                        continue;
                    }
                    let map = &mut v.map_mut().map;
                    while let Some((k, val)) = map.pop() {
                        stack.push(k);
                        stack.push(val);
                    }
                    RefWrap::<SoftHash>::free2(p);
                }
                _ => v.free(),
            }
        }
    }
}

impl Element for Soft {
    fn duplicate(&self) -> Self {
        self.dup()
    }

    fn discard(self) {
        self.free();
    }

    fn invalid() -> Self {
        Soft::INVALID
    }

    fn is_eq(&self, other: &Self) -> bool {
        self.iseq(*other)
    }

    fn is_invalid(&self) -> bool {
        Soft::is_invalid(*self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in extension classes: bignum and bigfloat
// ─────────────────────────────────────────────────────────────────────────────

const BIGNUM_TYPE_ID: usize = 1;
const BIGFLOAT_TYPE_ID: usize = 2;

unsafe fn bignum_value(v: Soft) -> i64 {
    (*((v.0 & !TAG_MASK) as *const BigNum)).value
}

unsafe fn bigfloat_value(v: Soft) -> f64 {
    (*((v.0 & !TAG_MASK) as *const BigFloat)).value
}

static BIGNUM_VTABLE: SoftVtable = SoftVtable {
    type_id: BIGNUM_TYPE_ID,
    is_eq: |a, b| unsafe { bignum_value(a) == bignum_value(b) },
    to_s: |v| {
        let mut s = BString::new();
        s.write_i(unsafe { bignum_value(v) });
        s
    },
    to_i: |v| unsafe { bignum_value(v) },
    to_f: |v| unsafe { bignum_value(v) as f64 },
    count: |_| 0,
    each1: None,
    free2: |v| unsafe {
        RefWrap::<BigNum>::free2((v.0 & !TAG_MASK | TAG_OTHER) as *mut BigNum);
    },
};

static BIGFLOAT_VTABLE: SoftVtable = SoftVtable {
    type_id: BIGFLOAT_TYPE_ID,
    is_eq: |a, b| unsafe { bigfloat_value(a).to_bits() == bigfloat_value(b).to_bits() },
    to_s: |v| {
        let mut s = BString::new();
        s.write_f(unsafe { bigfloat_value(v) });
        s
    },
    to_i: |v| unsafe { bigfloat_value(v) as i64 },
    to_f: |v| unsafe { bigfloat_value(v) },
    count: |_| 0,
    each1: None,
    free2: |v| unsafe {
        RefWrap::<BigFloat>::free2((v.0 & !TAG_MASK | TAG_OTHER) as *mut BigFloat);
    },
};

// The number/float coercions must see through the wrappers.
impl Soft {
    /// True when the value is a number of either representation.
    pub fn is_number(self) -> bool {
        self.tag() == TAG_NUMBER
            || (self.tag() == TAG_OTHER && self.vtable().type_id == BIGNUM_TYPE_ID)
    }

    /// True when the value is a float of either representation.
    pub fn is_float(self) -> bool {
        self.tag() == TAG_FLOAT
            || (self.tag() == TAG_OTHER && self.vtable().type_id == BIGFLOAT_TYPE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_classify_and_coerce() {
        assert_eq!(Soft::null().type_of(), SoftType::Null);
        assert_eq!(Soft::true_().type_of(), SoftType::True);
        assert_eq!(Soft::false_().type_of(), SoftType::False);
        assert_eq!(Soft::INVALID.type_of(), SoftType::Invalid);
        assert!(Soft::true_().is_true());
        assert!(!Soft::false_().is_true());
        assert!(!Soft::null().is_true());
        assert_eq!(Soft::true_().to_i(), 1);
        assert_eq!(Soft::null().to_i(), 0);
    }

    #[test]
    fn small_ints_are_value_copies() {
        for i in [0i64, 1, -1, 4096, -4096, (1 << 59), -(1 << 59)] {
            let v = Soft::int(i);
            assert_eq!(v.type_of(), SoftType::Number);
            assert_eq!(v.to_i(), i);
            // dup/free are no-ops on tagged scalars.
            let d = v.dup();
            assert!(d.iseq(v));
            d.free();
            assert_eq!(v.to_i(), i);
        }
    }

    #[test]
    fn oversized_ints_fall_back_to_bignum() {
        for i in [i64::MAX, i64::MIN, (1 << 61), -(1 << 61)] {
            let v = Soft::int(i);
            assert_eq!(v.type_of(), SoftType::Number);
            assert_eq!(v.to_i(), i);
            assert!(v.is_number());
            let text = v.to_s();
            assert_eq!(text.as_bytes(), i.to_string().as_bytes());
            v.free();
        }
    }

    #[test]
    fn floats_preserve_bits_in_both_representations() {
        for f in [0.0, 3.5, -128.0, 1.0 / 3.0, f64::from_bits(0x1237)] {
            let v = Soft::float(f);
            assert_eq!(v.type_of(), SoftType::Float);
            assert_eq!(v.to_f().to_bits(), f.to_bits());
            v.free();
        }
    }

    #[test]
    fn strings_compare_by_content() {
        let a = Soft::str(b"hello");
        let b = Soft::str(b"hello");
        let c = Soft::str(b"other");
        assert!(a.iseq(b));
        assert!(!a.iseq(c));
        assert_eq!(a.to_s().as_bytes(), b"hello");
        assert!(a.is_true());
        assert!(!Soft::str(b"").is_true());
        a.free();
        b.free();
        c.free();
    }

    #[test]
    fn string_to_i_parses_content() {
        let v = Soft::str(b"-42 trailing");
        assert_eq!(v.to_i(), -42);
        let f = Soft::str(b"2.75");
        assert_eq!(f.to_f(), 2.75);
        v.free();
        f.free();
    }

    #[test]
    fn dup_shares_and_free_releases() {
        let s = Soft::str(b"shared");
        let d = s.dup();
        s.free();
        // Still alive through the second reference.
        assert_eq!(d.str_ref().unwrap().as_bytes(), b"shared");
        d.free();
    }

    #[test]
    fn array_ops_transfer_ownership() {
        let a = Soft::array();
        a.array_push(Soft::int(1));
        a.array_push(Soft::str(b"two"));
        a.array_unshift(Soft::null());
        assert_eq!(a.count(), 3);
        assert_eq!(a.array_get(0).type_of(), SoftType::Null);
        assert_eq!(a.array_get(-1).str_ref().unwrap().as_bytes(), b"two");
        let popped = a.array_pop();
        assert_eq!(popped.str_ref().unwrap().as_bytes(), b"two");
        popped.free();
        let shifted = a.array_shift();
        assert_eq!(shifted.type_of(), SoftType::Null);
        shifted.free();
        assert_eq!(a.count(), 1);
        a.free();
    }

    #[test]
    fn array_set_fills_gaps_with_invalid() {
        let a = Soft::array();
        a.array_push(Soft::null());
        a.array_set(4, Soft::true_());
        assert_eq!(a.count(), 5);
        assert!(a.array_get(2).is_invalid());
        a.array_compact();
        assert_eq!(a.count(), 2);
        a.free();
    }

    #[test]
    fn hash_ops_and_key_in_loop() {
        let h = Soft::hash();
        h.hash_set(Soft::str(b"a"), Soft::int(1));
        h.hash_set(Soft::str(b"b"), Soft::int(2));
        h.hash_set(Soft::str(b"a"), Soft::int(10));
        assert_eq!(h.count(), 2);
        assert_eq!(h.hash_find(b"a").to_i(), 10);
        assert!(h.hash_find(b"missing").is_invalid());

        let mut seen = Vec::new();
        h.each1(0, &mut |v| {
            let key = key_in_loop();
            seen.push((key.to_s().as_bytes().to_vec(), v.to_i()));
            0
        });
        assert_eq!(seen, vec![(b"a".to_vec(), 10), (b"b".to_vec(), 2)]);

        // Lookup-style calls borrow the key; the caller keeps its reference.
        let probe = Soft::str(b"a");
        assert!(h.hash_delete(probe));
        probe.free();
        assert_eq!(h.count(), 1);
        h.free();
    }

    #[test]
    fn deep_equality_on_containers() {
        let build = || {
            let a = Soft::array();
            a.array_push(Soft::int(1));
            let h = Soft::hash();
            h.hash_set(Soft::str(b"k"), Soft::str(b"v"));
            a.array_push(h);
            a
        };
        let x = build();
        let y = build();
        assert!(x.iseq(y));
        y.array_push(Soft::null());
        assert!(!x.iseq(y));
        x.free();
        y.free();
    }

    #[test]
    fn each2_visits_every_descendant() {
        let root = Soft::array();
        root.array_push(Soft::int(1));
        let inner = Soft::array();
        inner.array_push(Soft::int(2));
        inner.array_push(Soft::int(3));
        root.array_push(inner);
        let h = Soft::hash();
        h.hash_set(Soft::str(b"k"), Soft::int(4));
        root.array_push(h);

        let mut ints = Vec::new();
        let visited = root.each2(&mut |v| {
            if v.type_of() == SoftType::Number {
                ints.push(v.to_i());
            }
            0
        });
        // root + 1 + inner + 2 + 3 + hash + 4
        assert_eq!(visited, 7);
        assert_eq!(ints, vec![1, 2, 3, 4]);
        root.free();
    }

    #[test]
    fn structural_hash_is_salted_and_stable() {
        let a = Soft::str(b"content");
        let b = Soft::str(b"content");
        assert_eq!(a.hash(7), b.hash(7));
        assert_ne!(a.hash(7), a.hash(8));
        let ary = Soft::array();
        ary.array_push(a);
        let ary2 = Soft::array();
        ary2.array_push(b);
        assert_eq!(ary.hash(3), ary2.hash(3));
        ary.free();
        ary2.free();
    }

    #[test]
    fn str_tmp_is_reused_and_cleared() {
        let t1 = Soft::str_tmp();
        t1.str_write(b"scratch");
        assert_eq!(t1.str_ref().unwrap().as_bytes(), b"scratch");
        let t2 = Soft::str_tmp();
        assert_eq!(t2.str_ref().unwrap().len(), 0);
        assert_eq!(t1.0, t2.0);
    }

    #[test]
    fn deeply_nested_free_does_not_recurse() {
        let root = Soft::array();
        let mut cursor = root;
        for _ in 0..100_000 {
            let inner = Soft::array();
            cursor.array_push(inner);
            cursor = inner;
        }
        root.free();
    }

    #[test]
    fn user_extension_vtable_dispatches() {
        #[repr(C)]
        struct Flagged {
            head: OtherHeader,
            flag: i64,
        }
        static FLAG_VTABLE: SoftVtable = SoftVtable {
            type_id: 900,
            is_eq: |a, b| a.to_i() == b.to_i(),
            to_s: |v| {
                let mut s = BString::new();
                s.write_fmt(format_args!("flag:{}", v.to_i()));
                s
            },
            to_i: |v| unsafe { (*((v.0 & !TAG_MASK) as *const Flagged)).flag },
            to_f: |v| v.to_i() as f64,
            count: |_| 0,
            each1: None,
            free2: |v| unsafe {
                RefWrap::<Flagged>::free2(v.0 as *mut Flagged);
            },
        };
        let v = Soft(RefWrap::<Flagged>::new(
            Flagged {
                head: OtherHeader {
                    vtable: &FLAG_VTABLE,
                },
                flag: 99,
            },
            TAG_OTHER as u8,
        ) as usize);
        assert_eq!(v.type_of(), SoftType::Other);
        assert_eq!(v.to_i(), 99);
        assert_eq!(v.to_s().as_bytes(), b"flag:99");
        let d = v.dup();
        v.free();
        assert_eq!(d.to_i(), 99);
        d.free();
    }
}
