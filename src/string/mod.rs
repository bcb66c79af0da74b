//! Binary-safe string with small-string optimization, a frozen mode and a
//! pluggable deallocator.
//!
//! Two storage modes share one record: short content lives inline in the
//! struct (no heap allocation); anything larger moves to a slab-allocated
//! buffer carrying `(data, len, capa, deallocator)`. The transition
//! small→large happens on any write that outgrows the inline capacity;
//! large→small only on an explicit [`BString::compact`].
//!
//! Owned buffers keep a terminating NUL at `data[len]` so the content can
//! be handed to C-style consumers; the NUL is not part of `len`. Borrowed
//! static content (capacity 0) is copied out on the first mutation.
//!
//! Freezing a string turns every mutator into a no-op that returns the
//! current [`StrInfo`] unchanged.

pub mod base64;
pub mod escape;
pub mod utf8;

use crate::hash;
use crate::mem;
use crate::num;
use std::fmt;

/// Inline buffer size; one byte is reserved for the terminating NUL.
const SMALL_BUF: usize = 40;
/// Largest content the inline mode can hold.
pub const SMALL_CAPACITY: usize = SMALL_BUF - 1;

/// Read chunk cap for [`BString::readfile`].
const READ_CHUNK: usize = 128 * 1024 * 1024;

/// `(len, capacity)` snapshot returned by every mutator. `capa` reads zero
/// for frozen or borrowed-static strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrInfo {
    pub len: usize,
    pub capa: usize,
}

/// Deallocator for large-mode buffers: `(data, capa)`.
pub type Dealloc = unsafe fn(*mut u8, usize);

/// The default deallocator: returns the buffer to the slab allocator.
///
/// # Safety
/// `data` must be a live slab allocation.
pub unsafe fn slab_dealloc(data: *mut u8, _capa: usize) {
    mem::free(data);
}

enum Repr {
    Small {
        len: u8,
        buf: [u8; SMALL_BUF],
    },
    Large {
        data: *mut u8,
        len: usize,
        capa: usize,
        dealloc: Option<Dealloc>,
    },
}

pub struct BString {
    frozen: bool,
    repr: Repr,
}

unsafe impl Send for BString {}
unsafe impl Sync for BString {}

#[inline]
fn round_capa(n: usize) -> usize {
    (n + 15) & !15
}

impl BString {
    /// An empty string in inline mode.
    pub const fn new() -> Self {
        BString {
            frozen: false,
            repr: Repr::Small {
                len: 0,
                buf: [0; SMALL_BUF],
            },
        }
    }

    /// A string holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut s = Self::new();
        s.write(bytes);
        s
    }

    /// Borrows static content without copying. Capacity reads zero; the
    /// first mutation copies the content into an owned buffer.
    pub fn from_static(bytes: &'static [u8]) -> Self {
        BString {
            frozen: false,
            repr: Repr::Large {
                data: bytes.as_ptr() as *mut u8,
                len: bytes.len(),
                capa: 0,
                dealloc: None,
            },
        }
    }

    /// Takes ownership of an existing buffer. `dealloc` is called with
    /// `(data, capa)` when the string is dropped or the buffer replaced;
    /// pass [`slab_dealloc`] for slab memory or `None` to never free.
    ///
    /// # Safety
    /// `data` must stay valid for `capa` bytes until the deallocator runs,
    /// and `len < capa` (the NUL discipline needs one spare byte).
    pub unsafe fn from_owned(
        data: *mut u8,
        len: usize,
        capa: usize,
        dealloc: Option<Dealloc>,
    ) -> Self {
        BString {
            frozen: false,
            repr: Repr::Large {
                data,
                len,
                capa,
                dealloc,
            },
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[inline]
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Small { len, .. } => *len as usize,
            Repr::Large { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writable capacity. Zero for frozen strings and borrowed-static
    /// content.
    pub fn capa(&self) -> usize {
        if self.frozen {
            return 0;
        }
        match &self.repr {
            Repr::Small { .. } => SMALL_CAPACITY,
            Repr::Large { capa, .. } => capa.saturating_sub(1),
        }
    }

    /// Content pointer, valid until the next mutation.
    pub fn data(&self) -> *const u8 {
        match &self.repr {
            Repr::Small { buf, .. } => buf.as_ptr(),
            Repr::Large { data, .. } => *data,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data(), self.len()) }
    }

    #[inline]
    pub fn info(&self) -> StrInfo {
        StrInfo {
            len: self.len(),
            capa: self.capa(),
        }
    }

    /// True while the content lives inline in the record.
    pub fn is_small(&self) -> bool {
        matches!(self.repr, Repr::Small { .. })
    }

    /// Disables every mutator. There is no thaw.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Byte-exact equality of length and content.
    pub fn iseq(&self, other: &BString) -> bool {
        self.as_bytes() == other.as_bytes()
    }

    /// Keyed hash of the content.
    pub fn hash(&self, seed: u64) -> u64 {
        hash::keyed(self.as_bytes(), seed)
    }

    // ── Mutators ────────────────────────────────────────────────────────────

    /// Ensures a writable capacity of at least `n` content bytes, possibly
    /// leaving inline mode. Frozen strings are untouched.
    pub fn reserve(&mut self, n: usize) -> StrInfo {
        if self.frozen {
            return self.info();
        }
        match &mut self.repr {
            Repr::Small { len, buf } => {
                if n <= SMALL_CAPACITY {
                    return self.info();
                }
                let capa = round_capa(n + 1);
                let data = mem::alloc(capa);
                let old_len = *len as usize;
                unsafe {
                    std::ptr::copy_nonoverlapping(buf.as_ptr(), data, old_len);
                    *data.add(old_len) = 0;
                }
                self.repr = Repr::Large {
                    data,
                    len: old_len,
                    capa,
                    dealloc: Some(slab_dealloc),
                };
            }
            Repr::Large {
                data,
                len,
                capa,
                dealloc,
            } => {
                if n + 1 <= *capa {
                    return self.info();
                }
                let new_capa = round_capa(n + 1);
                unsafe {
                    let fresh = if *dealloc == Some(slab_dealloc as Dealloc) {
                        mem::realloc2(*data, new_capa, *len + 1)
                    } else {
                        // Borrowed or foreign buffer: copy into slab
                        // memory and release the original through its own
                        // deallocator.
                        let fresh = mem::alloc(new_capa);
                        std::ptr::copy_nonoverlapping(*data, fresh, *len);
                        *fresh.add(*len) = 0;
                        if let Some(dealloc) = *dealloc {
                            dealloc(*data, *capa);
                        }
                        fresh
                    };
                    *data = fresh;
                }
                *capa = new_capa;
                *dealloc = Some(slab_dealloc);
            }
        }
        self.info()
    }

    /// Sets the length. Growing zero-fills the gap; both directions write
    /// the terminating NUL.
    pub fn resize(&mut self, n: usize) -> StrInfo {
        if self.frozen {
            return self.info();
        }
        if n > self.capa() {
            self.reserve(n);
        }
        let old_len = self.len();
        match &mut self.repr {
            Repr::Small { len, buf } => {
                if n > old_len {
                    buf[old_len..n].fill(0);
                }
                buf[n] = 0;
                *len = n as u8;
            }
            Repr::Large {
                data, len, capa, ..
            } => unsafe {
                // A borrowed static buffer (capa 0) can only shrink here —
                // growth went through reserve above — and must not be
                // written to.
                if *capa != 0 {
                    if n > old_len {
                        std::ptr::write_bytes(data.add(old_len), 0, n - old_len);
                    }
                    *data.add(n) = 0;
                }
                *len = n;
            },
        }
        self.info()
    }

    /// Empties the content, keeping the buffer.
    pub fn clear(&mut self) -> StrInfo {
        self.resize(0)
    }

    /// Appends raw bytes.
    pub fn write(&mut self, bytes: &[u8]) -> StrInfo {
        if self.frozen || bytes.is_empty() {
            return self.info();
        }
        let old_len = self.len();
        let new_len = old_len + bytes.len();
        if new_len > self.capa() {
            self.reserve(new_len);
        }
        unsafe {
            let dst = self.data_mut().add(old_len);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            *dst.add(bytes.len()) = 0;
        }
        self.set_len(new_len);
        self.info()
    }

    /// Appends a base-10 integer.
    pub fn write_i(&mut self, num: i64) -> StrInfo {
        let mut buf = [0u8; num::LTOA_BUF_LEN];
        let n = num::ltoa(&mut buf, num, 10);
        self.write(&buf[..n])
    }

    /// Appends a float in shortest round-trip form.
    pub fn write_f(&mut self, num: f64) -> StrInfo {
        let mut buf = [0u8; num::FTOA_BUF_LEN];
        let n = num::ftoa(&mut buf, num);
        self.write(&buf[..n])
    }

    /// Appends formatted text; the printf of this string type.
    /// Call as `s.write_fmt(format_args!("x={}", x))`.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> StrInfo {
        let _ = fmt::Write::write_fmt(&mut Appender(self), args);
        self.info()
    }

    /// Appends another string's content.
    pub fn concat(&mut self, other: &BString) -> StrInfo {
        self.write(other.as_bytes())
    }

    /// Alias of [`BString::concat`].
    pub fn join(&mut self, other: &BString) -> StrInfo {
        self.concat(other)
    }

    /// General-purpose splice: replaces `old_len` bytes at `start_pos`
    /// (negative counts from the end) with `src`. `old_len == 0` inserts,
    /// an empty `src` deletes.
    pub fn replace(&mut self, start_pos: isize, old_len: usize, src: &[u8]) -> StrInfo {
        if self.frozen {
            return self.info();
        }
        let len = self.len();
        let start = if start_pos < 0 {
            len.saturating_add_signed(start_pos)
        } else {
            (start_pos as usize).min(len)
        };
        let old_len = old_len.min(len - start);
        let new_len = len - old_len + src.len();
        if new_len > self.capa() {
            self.reserve(new_len);
        }
        if !self.writable() {
            // Borrowed static content with a shrink-only splice: take an
            // owned copy first.
            self.reserve(new_len.max(1));
        }
        unsafe {
            let data = self.data_mut();
            let tail = len - start - old_len;
            std::ptr::copy(data.add(start + old_len), data.add(start + src.len()), tail);
            std::ptr::copy_nonoverlapping(src.as_ptr(), data.add(start), src.len());
            *data.add(new_len) = 0;
        }
        self.set_len(new_len);
        self.info()
    }

    /// False while the content is a borrowed static buffer.
    fn writable(&self) -> bool {
        match &self.repr {
            Repr::Small { .. } => true,
            Repr::Large { capa, .. } => *capa != 0,
        }
    }

    /// Returns surplus memory: large content shrinks to an exact fit, and
    /// content short enough moves back inline.
    pub fn compact(&mut self) -> StrInfo {
        if self.frozen {
            return self.info();
        }
        let (len, shrinkable) = match &self.repr {
            Repr::Small { .. } => return self.info(),
            Repr::Large { len, capa, .. } => (*len, *capa > round_capa(*len + 1) || *len <= SMALL_CAPACITY),
        };
        if !shrinkable {
            return self.info();
        }
        if len <= SMALL_CAPACITY {
            let mut buf = [0u8; SMALL_BUF];
            buf[..len].copy_from_slice(self.as_bytes());
            self.release_large();
            self.repr = Repr::Small {
                len: len as u8,
                buf,
            };
            return self.info();
        }
        if let Repr::Large {
            data,
            capa,
            dealloc,
            ..
        } = &mut self.repr
        {
            let exact = round_capa(len + 1);
            if *dealloc == Some(slab_dealloc as Dealloc) {
                unsafe {
                    *data = mem::realloc2(*data, exact, len + 1);
                }
                *capa = exact;
            }
        }
        self.info()
    }

    /// Yields an owned copy of the content and resets the string to empty.
    /// The returned vector holds exactly the former content bytes.
    pub fn detach(&mut self) -> Vec<u8> {
        let out = self.as_bytes().to_vec();
        if !self.frozen {
            self.release_large();
            self.repr = Repr::Small {
                len: 0,
                buf: [0; SMALL_BUF],
            };
        }
        out
    }

    // ── UTF-8 helpers ───────────────────────────────────────────────────────

    /// True when the content is valid UTF-8.
    pub fn utf8_valid(&self) -> bool {
        utf8::utf8_valid(self.as_bytes())
    }

    /// Number of UTF-8 code points (0 on invalid content).
    pub fn utf8_len(&self) -> usize {
        utf8::utf8_len(self.as_bytes())
    }

    /// Translates a character-unit window into a byte-unit window; see
    /// [`utf8::utf8_select`].
    pub fn utf8_select(&self, pos: &mut isize, len: &mut usize) -> Result<(), utf8::Utf8Error> {
        utf8::utf8_select(self.as_bytes(), pos, len)
    }

    // ── File input ──────────────────────────────────────────────────────────

    /// Appends the contents of the file at `path` (leading `~/` expands
    /// through `HOME`). `start_at` is the file offset, negative counts
    /// from EOF; `limit == 0` reads to EOF. Reads run through `pread` in
    /// chunks of at most 128 MiB. On error the string is left unchanged.
    pub fn readfile(
        &mut self,
        path: &str,
        start_at: i64,
        limit: i64,
    ) -> std::io::Result<StrInfo> {
        use std::io;

        let expanded: std::path::PathBuf = match path.strip_prefix("~/") {
            Some(rest) => match std::env::var_os("HOME") {
                Some(home) => std::path::Path::new(&home).join(rest),
                None => path.into(),
            },
            None => path.into(),
        };
        let file = std::fs::File::open(&expanded)?;
        let size = file.metadata()?.len() as i64;

        let start = if start_at < 0 {
            (size + start_at).max(0)
        } else {
            start_at
        };
        if start > size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "start offset beyond end of file",
            ));
        }
        let mut want = size - start;
        if limit > 0 && limit < want {
            want = limit;
        }
        if self.frozen || want == 0 {
            return Ok(self.info());
        }

        let old_len = self.len();
        self.reserve(old_len + want as usize);
        let mut done = 0usize;
        while done < want as usize {
            let chunk = (want as usize - done).min(READ_CHUNK);
            let dst = unsafe {
                std::slice::from_raw_parts_mut(self.data_mut().add(old_len + done), chunk)
            };
            let n = nix::sys::uio::pread(&file, dst, start + done as i64)
                .map_err(io::Error::from)?;
            if n == 0 {
                break;
            }
            done += n;
        }
        unsafe {
            *self.data_mut().add(old_len + done) = 0;
        }
        self.set_len(old_len + done);
        Ok(self.info())
    }

    // ── Internal plumbing ───────────────────────────────────────────────────

    pub(crate) fn data_mut(&mut self) -> *mut u8 {
        match &mut self.repr {
            Repr::Small { buf, .. } => buf.as_mut_ptr(),
            Repr::Large { data, .. } => *data,
        }
    }

    pub(crate) fn set_len(&mut self, n: usize) {
        match &mut self.repr {
            Repr::Small { len, .. } => *len = n as u8,
            Repr::Large { len, .. } => *len = n,
        }
    }

    fn release_large(&mut self) {
        if let Repr::Large {
            data,
            capa,
            dealloc,
            ..
        } = &self.repr
        {
            if let Some(dealloc) = dealloc {
                unsafe { dealloc(*data, *capa) };
            }
        }
    }
}

/// Adapter so the formatting machinery can drive [`BString::write`].
struct Appender<'a>(&'a mut BString);

impl fmt::Write for Appender<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}

impl Default for BString {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BString {
    fn drop(&mut self) {
        self.release_large();
    }
}

impl fmt::Debug for BString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BString")
            .field("len", &self.len())
            .field("content", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl Clone for BString {
    fn clone(&self) -> Self {
        let mut s = BString::from_bytes(self.as_bytes());
        s.frozen = self.frozen;
        s
    }
}

impl PartialEq for BString {
    fn eq(&self, other: &Self) -> bool {
        self.iseq(other)
    }
}

impl Eq for BString {}

crate::impl_element!(BString);
