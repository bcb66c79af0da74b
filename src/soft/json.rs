//! JSON codec for soft values: emission into a [`BString`] and
//! construction through the streaming parser.
//!
//! Emission bounds its recursion at depth 28 and prints `"[...]"` /
//! `"{...}"` placeholders beyond it. Construction is a
//! [`JsonHandler`] that assembles containers on an explicit stack, so
//! parser depth (capped at 32) is the only nesting limit.

use crate::json::{JsonHandler, JsonParser};
use crate::soft::{Soft, SoftType};
use crate::string::{BString, StrInfo};

/// Emission recursion bound.
pub const JSON_MAX_EMIT_DEPTH: usize = 28;

/// Appends the JSON form of `v` to `dest`. `pretty` emits two-space
/// indentation and newlines. Returns the destination info.
pub fn to_json(dest: &mut BString, v: Soft, pretty: bool) -> StrInfo {
    write_value(dest, v, pretty, 0);
    dest.info()
}

/// Parses the first top-level JSON value in `bytes`. Returns the value
/// (INVALID on syntax error or empty input) and the number of bytes
/// consumed.
pub fn json_parse(bytes: &[u8]) -> (Soft, usize) {
    let mut parser = JsonParser::new();
    let mut builder = Builder::default();
    let consumed = parser.parse(&mut builder, bytes);
    if builder.complete && !builder.failed {
        (builder.top, consumed)
    } else {
        builder.dispose();
        (Soft::INVALID, consumed)
    }
}

/// Parses a top-level JSON object and merges its entries into the soft
/// hash `target` (overwriting existing keys). Anything other than an
/// object is parsed and discarded. Returns the number of bytes consumed.
pub fn hash_update_json(target: Soft, bytes: &[u8]) -> usize {
    let (v, consumed) = json_parse(bytes);
    if v.is_invalid() {
        return consumed;
    }
    if v.type_of() == SoftType::Hash && target.type_of() == SoftType::Hash {
        unsafe {
            let map = &mut v.map_mut().map;
            while let Some((k, val)) = map.shift() {
                target.hash_set(k, val);
            }
        }
    }
    v.free();
    consumed
}

// ─────────────────────────────────────────────────────────────────────────────
// Emission
// ─────────────────────────────────────────────────────────────────────────────

fn indent(dest: &mut BString, depth: usize) {
    dest.write(b"\n");
    for _ in 0..depth {
        dest.write(b"  ");
    }
}

fn write_string(dest: &mut BString, content: &[u8]) {
    dest.write(b"\"");
    dest.write_escape(content);
    dest.write(b"\"");
}

fn write_value(dest: &mut BString, v: Soft, pretty: bool, depth: usize) {
    match v.type_of() {
        SoftType::Invalid | SoftType::Null => {
            dest.write(b"null");
        }
        SoftType::True => {
            dest.write(b"true");
        }
        SoftType::False => {
            dest.write(b"false");
        }
        SoftType::Number => {
            dest.write_i(v.to_i());
        }
        SoftType::Float => {
            dest.write_f(v.to_f());
        }
        SoftType::String => {
            write_string(dest, v.str_ref().map(BString::as_bytes).unwrap_or(b""));
        }
        SoftType::Array => {
            if depth == JSON_MAX_EMIT_DEPTH {
                dest.write(b"\"[...]\"");
                return;
            }
            let count = v.count();
            dest.write(b"[");
            for i in 0..count {
                if i > 0 {
                    dest.write(b",");
                }
                if pretty {
                    indent(dest, depth + 1);
                }
                write_value(dest, v.array_get(i as isize), pretty, depth + 1);
            }
            if pretty && count > 0 {
                indent(dest, depth);
            }
            dest.write(b"]");
        }
        SoftType::Hash => {
            if depth == JSON_MAX_EMIT_DEPTH {
                dest.write(b"\"{...}\"");
                return;
            }
            dest.write(b"{");
            let mut first = true;
            unsafe {
                v.map_mut().map.each(0, |k, val| {
                    if !first {
                        dest.write(b",");
                    }
                    first = false;
                    if pretty {
                        indent(dest, depth + 1);
                    }
                    let key_text = k.to_s();
                    write_string(dest, key_text.as_bytes());
                    dest.write(if pretty { b": " as &[u8] } else { b":" as &[u8] });
                    write_value(dest, *val, pretty, depth + 1);
                    0
                });
            }
            if pretty && !first {
                indent(dest, depth);
            }
            dest.write(b"}");
        }
        SoftType::Other => {
            // Extension classes emit their textual form verbatim.
            let text = v.to_s();
            dest.write(text.as_bytes());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Builder {
    /// Open containers with their pending object key.
    stack: Vec<(Soft, Soft)>,
    top: Soft,
    complete: bool,
    failed: bool,
}

impl Builder {
    /// Routes a finished value into the innermost open container, or
    /// makes it the result.
    fn take_value(&mut self, v: Soft) {
        match self.stack.last_mut() {
            None => {
                self.top = v;
            }
            Some((container, pending_key)) => match container.type_of() {
                SoftType::Array => container.array_push(v),
                _ => {
                    if pending_key.is_invalid() {
                        *pending_key = v;
                    } else {
                        let key = std::mem::replace(pending_key, Soft::INVALID);
                        container.hash_set(key, v);
                    }
                }
            },
        }
    }

    fn open(&mut self, container: Soft) {
        self.stack.push((container, Soft::INVALID));
    }

    fn close(&mut self) {
        if let Some((container, pending_key)) = self.stack.pop() {
            pending_key.free();
            self.take_value(container);
        }
    }

    /// Frees every partially built value after a failed parse.
    fn dispose(&mut self) {
        while let Some((container, pending_key)) = self.stack.pop() {
            pending_key.free();
            container.free();
        }
        self.top.free();
        self.top = Soft::INVALID;
    }
}

impl JsonHandler for Builder {
    fn on_null(&mut self) {
        self.take_value(Soft::null());
    }

    fn on_true(&mut self) {
        self.take_value(Soft::true_());
    }

    fn on_false(&mut self) {
        self.take_value(Soft::false_());
    }

    fn on_number(&mut self, num: i64) {
        self.take_value(Soft::int(num));
    }

    fn on_float(&mut self, num: f64) {
        self.take_value(Soft::float(num));
    }

    fn on_string(&mut self, escaped: &[u8]) {
        let mut s = BString::new();
        s.write_unescape(escaped);
        self.take_value(Soft::str_from(s));
    }

    fn on_start_object(&mut self) -> bool {
        self.open(Soft::hash());
        false
    }

    fn on_end_object(&mut self) {
        self.close();
    }

    fn on_start_array(&mut self) -> bool {
        self.open(Soft::array());
        false
    }

    fn on_end_array(&mut self) {
        self.close();
    }

    fn on_json(&mut self) {
        self.complete = true;
    }

    fn on_error(&mut self) {
        self.failed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(v: Soft, pretty: bool) -> String {
        let mut out = BString::new();
        to_json(&mut out, v, pretty);
        String::from_utf8_lossy(out.as_bytes()).into_owned()
    }

    #[test]
    fn scalars_render() {
        assert_eq!(render(Soft::null(), false), "null");
        assert_eq!(render(Soft::true_(), false), "true");
        assert_eq!(render(Soft::int(-7), false), "-7");
        assert_eq!(render(Soft::float(3.5), false), "3.5");
        let s = Soft::str(b"a\tb");
        assert_eq!(render(s, false), "\"a\\tb\"");
        s.free();
    }

    #[test]
    fn containers_render_compact_and_pretty() {
        let ary = Soft::array();
        ary.array_push(Soft::int(1));
        ary.array_push(Soft::null());
        let hash = Soft::hash();
        hash.hash_set(Soft::str(b"k"), Soft::int(2));
        ary.array_push(hash);
        assert_eq!(render(ary, false), "[1,null,{\"k\":2}]");
        let pretty = render(ary, true);
        assert!(pretty.contains("\n  1"));
        assert!(pretty.contains("\"k\": 2"));
        ary.free();
    }

    #[test]
    fn parse_builds_matching_structure() {
        let (v, consumed) = json_parse(br#"{"a":[1,2.5,null,true,"x\ty"]}"#);
        assert_eq!(consumed, 30);
        assert_eq!(v.type_of(), SoftType::Hash);
        let a = v.hash_find(b"a");
        assert_eq!(a.type_of(), SoftType::Array);
        assert_eq!(a.count(), 5);
        assert_eq!(a.array_get(0).to_i(), 1);
        assert_eq!(a.array_get(1).to_f(), 2.5);
        assert_eq!(a.array_get(2).type_of(), SoftType::Null);
        assert_eq!(a.array_get(3).type_of(), SoftType::True);
        assert_eq!(a.array_get(4).str_ref().unwrap().as_bytes(), b"x\ty");
        v.free();
    }

    #[test]
    fn parse_error_returns_invalid_without_leak() {
        let (v, _) = json_parse(b"{\"k\": [1, 2, }");
        assert!(v.is_invalid());
        let (v, _) = json_parse(b"");
        assert!(v.is_invalid());
    }

    #[test]
    fn roundtrip_preserves_structure_and_float_bits() {
        let (v, _) = json_parse(br#"{"a":[1,2,3.5,null,true,false,"x\ty"],"n":-12}"#);
        for pretty in [false, true] {
            let mut out = BString::new();
            to_json(&mut out, v, pretty);
            let (w, _) = json_parse(out.as_bytes());
            assert!(v.iseq(w), "pretty={pretty} text={:?}", out);
            w.free();
        }
        v.free();
    }

    #[test]
    fn bignum_and_bigfloat_roundtrip() {
        let big = Soft::int(i64::MAX);
        assert_eq!(render(big, false), i64::MAX.to_string());
        let (back, _) = json_parse(render(big, false).as_bytes());
        assert!(big.iseq(back));
        back.free();
        big.free();

        // A float whose bit pattern keeps the tag bits busy.
        let f = f64::from_bits(0x3FF0_0000_0000_0001);
        let v = Soft::float(f);
        let (back, _) = json_parse(render(v, false).as_bytes());
        assert_eq!(back.to_f().to_bits(), f.to_bits());
        back.free();
        v.free();
    }

    #[test]
    fn emit_depth_cap_prints_placeholder() {
        let root = Soft::array();
        let mut cursor = root;
        for _ in 0..JSON_MAX_EMIT_DEPTH + 4 {
            let inner = Soft::array();
            cursor.array_push(inner);
            cursor = inner;
        }
        let text = render(root, false);
        assert!(text.contains("\"[...]\""));
        root.free();
    }

    #[test]
    fn hash_update_merges_objects() {
        let (target, _) = json_parse(br#"{"keep":1,"swap":2}"#);
        let consumed = hash_update_json(target, br#"{"swap":20,"new":30}"#);
        assert_eq!(consumed, 20);
        assert_eq!(target.hash_find(b"keep").to_i(), 1);
        assert_eq!(target.hash_find(b"swap").to_i(), 20);
        assert_eq!(target.hash_find(b"new").to_i(), 30);
        assert_eq!(target.count(), 3);
        target.free();
    }

    #[test]
    fn deep_parse_hits_parser_cap_not_the_stack() {
        let mut input = Vec::new();
        for _ in 0..40 {
            input.push(b'[');
        }
        let (v, _) = json_parse(&input);
        assert!(v.is_invalid());
    }
}
