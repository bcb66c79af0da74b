//! E2E: JSON round trips through the soft-type system.
//!
//! Covers the serialize → parse → deep-equality loop (with float bit
//! preservation), the parser extensions, and the Base64 stress loop the
//! codec layer promises.

use corekit::{json_parse, to_json, BString, Soft, SoftType};

fn roundtrip(v: Soft, pretty: bool) -> Soft {
    let mut text = BString::new();
    to_json(&mut text, v, pretty);
    let (back, _) = json_parse(text.as_bytes());
    back
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: parse → serialize → re-parse → deep equality
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn document_roundtrip_with_float_bits() {
    let (v, _) = json_parse(br#"{"a":[1,2,3.5,null,true,false,"x\ty"]}"#);
    assert_eq!(v.type_of(), SoftType::Hash);

    let a = v.hash_find(b"a");
    assert_eq!(a.count(), 7);
    assert_eq!(a.array_get(2).to_f().to_bits(), 3.5f64.to_bits());
    assert_eq!(a.array_get(6).str_ref().unwrap().as_bytes(), b"x\ty");

    for pretty in [false, true] {
        let back = roundtrip(v, pretty);
        assert!(v.iseq(back), "pretty={pretty}");
        back.free();
    }
    v.free();
}

#[test]
fn nested_structures_survive_many_generations() {
    let (mut v, _) = json_parse(
        br#"{"users":[{"name":"ada","tags":["x","y"],"score":99.25},
                      {"name":"lin","tags":[],"score":-0.5}],
             "total":2,"ok":true}"#,
    );
    assert!(!v.is_invalid());
    for _ in 0..10 {
        let next = roundtrip(v, false);
        assert!(v.iseq(next));
        v.free();
        v = next;
    }
    assert_eq!(v.hash_find(b"total").to_i(), 2);
    let users = v.hash_find(b"users");
    assert_eq!(users.array_get(0).hash_find(b"name").str_ref().unwrap().as_bytes(), b"ada");
    v.free();
}

#[test]
fn escaped_keys_and_values_roundtrip() {
    let (v, _) = json_parse(br#"{"wei\u00dfe":"\u00fcber\n\t\"quoted\"","path":"a\/b"}"#);
    assert!(!v.is_invalid());
    let value = v.hash_find("wei\u{df}e".as_bytes());
    assert_eq!(
        value.str_ref().unwrap().as_bytes(),
        "\u{fc}ber\n\t\"quoted\"".as_bytes()
    );
    assert_eq!(v.hash_find(b"path").str_ref().unwrap().as_bytes(), b"a/b");
    let back = roundtrip(v, false);
    assert!(v.iseq(back));
    back.free();
    v.free();
}

#[test]
fn comments_and_extended_literals_parse() {
    let input = br#"
        { // configuration
          "threads": 4, /* cores */
          "ratio": NaN, # unknown yet
          "burst": Infinity
        }"#;
    let (v, _) = json_parse(input);
    assert!(!v.is_invalid());
    assert_eq!(v.hash_find(b"threads").to_i(), 4);
    assert!(v.hash_find(b"ratio").to_f().is_nan());
    assert_eq!(v.hash_find(b"burst").to_f(), f64::INFINITY);
    v.free();
}

#[test]
fn sixty_four_bit_integers_are_preserved() {
    for i in [i64::MAX, i64::MIN, 1 << 62, -(1 << 62), 0] {
        let text = format!("[{i}]");
        let (v, _) = json_parse(text.as_bytes());
        assert_eq!(v.array_get(0).to_i(), i);
        let back = roundtrip(v, false);
        assert!(v.iseq(back));
        back.free();
        v.free();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: Base64 stress
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn base64_full_byte_sequence_both_alphabets() {
    let payload: Vec<u8> = (0..=255u8).collect();
    for url_safe in [true, false] {
        let mut encoded = BString::new();
        encoded.write_b64enc(&payload, url_safe);
        let mut decoded = BString::new();
        decoded.write_b64dec(encoded.as_bytes());
        assert_eq!(decoded.as_bytes(), &payload[..], "url_safe={url_safe}");
    }
}
