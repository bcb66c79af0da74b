//! Streaming JSON parser: a byte recognizer driving user callbacks.
//!
//! The parser keeps three pieces of state: a 32-bit nesting bitmap (one
//! bit per open container, 0 = object, 1 = array), an 8-bit depth counter
//! hard-capped at [`JSON_MAX_DEPTH`], and the next-token expectation. It
//! is iterative throughout — adversarial nesting cannot grow the stack.
//!
//! Accepted beyond RFC 8259: `//…` and `#…` line comments, `/* … */`
//! block comments, and bare `NaN` / `Infinity` literals (delivered
//! through the float callback). Trailing commas are rejected. Strings are
//! delivered still-escaped, pointing into the input buffer.
//!
//! [`JsonParser::parse`] consumes bytes until a complete top-level value
//! closes, the buffer ends, or a syntax error fires
//! [`JsonHandler::on_error`] and parsing stops at the offending byte.
//! Feeding additional input only works from a clean state (depth zero, no
//! pending expectation).

use crate::num;

/// Maximum container nesting.
pub const JSON_MAX_DEPTH: usize = 32;

/// Callback surface of the parser. String content arrives still-escaped;
/// resolve it with
/// [`BString::write_unescape`](crate::string::BString::write_unescape).
pub trait JsonHandler {
    fn on_null(&mut self);
    fn on_true(&mut self);
    fn on_false(&mut self);
    fn on_number(&mut self, num: i64);
    fn on_float(&mut self, num: f64);
    /// A string token (object key or value), still escaped.
    fn on_string(&mut self, escaped: &[u8]);
    /// A non-zero (`true`) return aborts parsing.
    fn on_start_object(&mut self) -> bool;
    fn on_end_object(&mut self);
    /// A non-zero (`true`) return aborts parsing.
    fn on_start_array(&mut self) -> bool;
    fn on_end_array(&mut self);
    /// A complete top-level value was recognized.
    fn on_json(&mut self);
    /// Syntax violation; parsing stopped at the offending byte.
    fn on_error(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum Expect {
    /// First key in a just-opened object (`}` legal).
    FirstKey,
    /// Key after a comma (`}` illegal: trailing comma).
    Key,
    Colon,
    /// First value in a just-opened array (`]` legal).
    FirstValue,
    #[default]
    Value,
    /// `,` or the matching close.
    Separator,
}

#[derive(Default)]
pub struct JsonParser {
    depth: u8,
    /// One bit per open container: 0 = object, 1 = array.
    nesting: u32,
    expect: Expect,
    /// Offset the current step advanced to (valid on `Step::Continue`).
    cursor: usize,
}

enum Step {
    Continue,
    /// Top-level value finished at this offset.
    Done(usize),
    /// Syntax error at this offset.
    Fail(usize),
    /// Buffer exhausted mid-token; nothing more can be consumed.
    Starve(usize),
    /// A container callback asked to abort at this offset.
    Abort(usize),
}

impl JsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no value is half-parsed; only a clean parser may be fed
    /// a fresh buffer.
    pub fn is_clean(&self) -> bool {
        self.depth == 0 && self.nesting == 0 && self.expect == Expect::Value
    }

    /// Drops any half-parsed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Consumes `buf` until a top-level value completes, the buffer ends,
    /// or a syntax error occurs. Returns the number of bytes consumed.
    pub fn parse<H: JsonHandler>(&mut self, handler: &mut H, buf: &[u8]) -> usize {
        let mut i = 0usize;
        loop {
            skip_insignificant(buf, &mut i);
            if i >= buf.len() {
                return i;
            }
            let step = match self.expect {
                Expect::FirstKey | Expect::Key => self.step_key(handler, buf, i),
                Expect::Colon => self.step_colon(handler, buf, i),
                Expect::FirstValue | Expect::Value => self.step_value(handler, buf, i),
                Expect::Separator => self.step_separator(handler, buf, i),
            };
            match step {
                Step::Continue => {
                    i = self.cursor;
                }
                Step::Done(at) => return at,
                Step::Starve(at) => return at,
                Step::Abort(at) => return at,
                Step::Fail(at) => {
                    handler.on_error();
                    return at;
                }
            }
        }
    }

    // The per-step functions communicate the new offset through `cursor`
    // when they continue; terminal outcomes carry their own offset.
    fn step_key<H: JsonHandler>(&mut self, h: &mut H, buf: &[u8], i: usize) -> Step {
        match buf[i] {
            b'}' if self.expect == Expect::FirstKey => self.close(h, buf, i, false),
            b'"' => match string_token(buf, i) {
                Some((content, after)) => {
                    h.on_string(&buf[content]);
                    self.expect = Expect::Colon;
                    self.cursor = after;
                    Step::Continue
                }
                None => Step::Starve(i),
            },
            _ => Step::Fail(i),
        }
    }

    fn step_colon<H: JsonHandler>(&mut self, _h: &mut H, buf: &[u8], i: usize) -> Step {
        if buf[i] == b':' {
            self.expect = Expect::Value;
            self.cursor = i + 1;
            Step::Continue
        } else {
            Step::Fail(i)
        }
    }

    fn step_separator<H: JsonHandler>(&mut self, h: &mut H, buf: &[u8], i: usize) -> Step {
        match buf[i] {
            b',' => {
                self.expect = if self.in_object() {
                    Expect::Key
                } else {
                    Expect::Value
                };
                self.cursor = i + 1;
                Step::Continue
            }
            b'}' => self.close(h, buf, i, false),
            b']' => self.close(h, buf, i, true),
            _ => Step::Fail(i),
        }
    }

    fn step_value<H: JsonHandler>(&mut self, h: &mut H, buf: &[u8], i: usize) -> Step {
        match buf[i] {
            b']' if self.expect == Expect::FirstValue => self.close(h, buf, i, true),
            b'{' => {
                if self.depth as usize == JSON_MAX_DEPTH {
                    return Step::Fail(i);
                }
                if h.on_start_object() {
                    return Step::Abort(i + 1);
                }
                self.nesting <<= 1;
                self.depth += 1;
                self.expect = Expect::FirstKey;
                self.cursor = i + 1;
                Step::Continue
            }
            b'[' => {
                if self.depth as usize == JSON_MAX_DEPTH {
                    return Step::Fail(i);
                }
                if h.on_start_array() {
                    return Step::Abort(i + 1);
                }
                self.nesting = (self.nesting << 1) | 1;
                self.depth += 1;
                self.expect = Expect::FirstValue;
                self.cursor = i + 1;
                Step::Continue
            }
            b'"' => match string_token(buf, i) {
                Some((content, after)) => {
                    h.on_string(&buf[content]);
                    self.value_done(h, after)
                }
                None => Step::Starve(i),
            },
            b'n' if buf[i..].starts_with(b"null") => {
                h.on_null();
                self.value_done(h, i + 4)
            }
            b't' if buf[i..].starts_with(b"true") => {
                h.on_true();
                self.value_done(h, i + 4)
            }
            b'f' if buf[i..].starts_with(b"false") => {
                h.on_false();
                self.value_done(h, i + 5)
            }
            b'N' | b'I' | b'-' | b'+' | b'0'..=b'9' | b'.' => self.number(h, buf, i),
            _ => Step::Fail(i),
        }
    }

    fn number<H: JsonHandler>(&mut self, h: &mut H, buf: &[u8], i: usize) -> Step {
        let token = number_token(buf, i);
        if token.is_empty() {
            return Step::Fail(i);
        }
        let after = i + token.len();
        let mut cursor = token;

        // Bare NaN / Infinity are recognized and delivered through the
        // float path with whatever the conversion routine produces.
        let bare = match token {
            [b'+' | b'-', rest @ ..] => rest,
            rest => rest,
        };
        if bare == b"NaN" || bare == b"Infinity" {
            let v = num::atof(&mut cursor);
            h.on_float(v);
            return self.value_done(h, after);
        }

        // JSON numbers are decimal-only: the radix prefixes the standalone
        // integer parser accepts (hex, octal, binary) are not part of the
        // accepted grammar here.
        match decimal_shape(token) {
            Some(false) => {
                let v = num::atol(&mut cursor);
                if !cursor.is_empty() {
                    return Step::Fail(i);
                }
                h.on_number(v);
                self.value_done(h, after)
            }
            Some(true) => {
                let v = num::atof(&mut cursor);
                if !cursor.is_empty() {
                    return Step::Fail(i);
                }
                h.on_float(v);
                self.value_done(h, after)
            }
            None => Step::Fail(i),
        }
    }

    fn close<H: JsonHandler>(&mut self, h: &mut H, _buf: &[u8], i: usize, array: bool) -> Step {
        if self.depth == 0 || self.in_array() != array {
            return Step::Fail(i);
        }
        self.depth -= 1;
        self.nesting >>= 1;
        if array {
            h.on_end_array();
        } else {
            h.on_end_object();
        }
        self.value_done(h, i + 1)
    }

    /// A value just finished at offset `at`: either the whole document is
    /// done, or its container expects a separator next.
    fn value_done<H: JsonHandler>(&mut self, h: &mut H, at: usize) -> Step {
        if self.depth == 0 {
            self.expect = Expect::Value;
            h.on_json();
            return Step::Done(at);
        }
        self.expect = Expect::Separator;
        self.cursor = at;
        Step::Continue
    }

    #[inline]
    fn in_array(&self) -> bool {
        self.nesting & 1 == 1
    }

    #[inline]
    fn in_object(&self) -> bool {
        self.depth > 0 && !self.in_array()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token scanners
// ─────────────────────────────────────────────────────────────────────────────

/// Eight spaces at once, then byte-wise whitespace, then comments.
fn skip_insignificant(buf: &[u8], i: &mut usize) {
    loop {
        // SWAR fast path: skip 8-byte runs of plain spaces.
        while *i + 8 <= buf.len() {
            let word = u64::from_ne_bytes(buf[*i..*i + 8].try_into().unwrap());
            if word == 0x2020_2020_2020_2020 {
                *i += 8;
            } else {
                break;
            }
        }
        while *i < buf.len() && matches!(buf[*i], b' ' | b'\t' | b'\r' | b'\n') {
            *i += 1;
        }
        // Comments.
        if *i < buf.len() && buf[*i] == b'#' {
            skip_line(buf, i);
            continue;
        }
        if *i + 1 < buf.len() && buf[*i] == b'/' {
            match buf[*i + 1] {
                b'/' => {
                    skip_line(buf, i);
                    continue;
                }
                b'*' => {
                    match find_subslice(&buf[*i + 2..], b"*/") {
                        Some(at) => *i += 2 + at + 2,
                        None => *i = buf.len(),
                    }
                    continue;
                }
                _ => {}
            }
        }
        return;
    }
}

fn skip_line(buf: &[u8], i: &mut usize) {
    while *i < buf.len() && buf[*i] != b'\n' {
        *i += 1;
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Returns the still-escaped content range and the offset past the closing
/// quote, or `None` when the string is not closed within the buffer.
fn string_token(buf: &[u8], quote_at: usize) -> Option<(std::ops::Range<usize>, usize)> {
    let mut j = quote_at + 1;
    while j < buf.len() {
        match buf[j] {
            b'\\' => j += 2,
            b'"' => return Some((quote_at + 1..j, j + 1)),
            _ => j += 1,
        }
    }
    None
}

/// Validates the RFC 8259 number grammar over a delimited token: optional
/// sign, an integer part without leading-zero runs, optional fraction and
/// exponent. Returns whether the token needs the float path; `None` when
/// the shape is not a decimal number.
fn decimal_shape(token: &[u8]) -> Option<bool> {
    let mut i = 0;
    if matches!(token.first(), Some(&(b'+' | b'-'))) {
        i += 1;
    }
    let int_start = i;
    while i < token.len() && token[i].is_ascii_digit() {
        i += 1;
    }
    let int_len = i - int_start;
    if int_len == 0 || (int_len > 1 && token[int_start] == b'0') {
        return None;
    }
    let mut float = false;
    if i < token.len() && token[i] == b'.' {
        float = true;
        i += 1;
        let frac_start = i;
        while i < token.len() && token[i].is_ascii_digit() {
            i += 1;
        }
        if i == frac_start {
            return None;
        }
    }
    if i < token.len() && (token[i] == b'e' || token[i] == b'E') {
        float = true;
        i += 1;
        if matches!(token.get(i), Some(&(b'+' | b'-'))) {
            i += 1;
        }
        let exp_start = i;
        while i < token.len() && token[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    (i == token.len()).then_some(float)
}

/// The byte run forming a number-ish token (digits, sign, radix and
/// exponent characters, or the NaN / Infinity letters). Delimits the run
/// only; [`decimal_shape`] decides validity.
fn number_token(buf: &[u8], at: usize) -> &[u8] {
    let mut j = at;
    while j < buf.len() {
        match buf[j] {
            b'0'..=b'9'
            | b'a'..=b'f'
            | b'A'..=b'F'
            | b'x'
            | b'X'
            | b'.'
            | b'+'
            | b'-'
            | b'n'
            | b'N'
            | b'I'
            | b'i'
            | b't'
            | b'y' => j += 1,
            _ => break,
        }
    }
    &buf[at..j]
}
