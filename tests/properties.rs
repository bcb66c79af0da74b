// Cross-module property tests: the quantified invariants the library
// promises, exercised over representative input sweeps.

use corekit::{hash, num, Array, BString, CompactMap, OrderedMap};

// ─────────────────────────────────────────────────────────────────────────────
// String round trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn from_bytes_into_bytes_is_identity() {
    let samples: &[&[u8]] = &[
        b"",
        b"a",
        b"short",
        b"exactly-39-bytes-of-content-to-fill-sso",
        b"something comfortably longer than the small-string capacity of the record",
        b"\x00\x01\xFE\xFF",
    ];
    for &sample in samples {
        let s = BString::from_bytes(sample);
        assert_eq!(s.as_bytes(), sample);
        assert_eq!(s.len(), sample.len());
    }
}

#[test]
fn frozen_info_is_immutable() {
    let mut s = BString::from_bytes(b"content that spills out of the inline buffer for sure");
    s.freeze();
    let before = s.info();
    s.write(b"x");
    s.resize(0);
    s.replace(0, 3, b"yyy");
    s.compact();
    s.write_b64enc(b"zz", false);
    s.write_escape(b"\"");
    assert_eq!(s.info(), before);
}

// ─────────────────────────────────────────────────────────────────────────────
// Numeric round trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn atol_ltoa_roundtrip_sweep() {
    let mut samples = vec![0i64, i64::MAX, i64::MIN];
    let mut x: i64 = 1;
    while x < i64::MAX / 3 {
        samples.push(x);
        samples.push(-x);
        samples.push(x.wrapping_mul(7) ^ 0x5A5A);
        x = x.wrapping_mul(3) + 1;
    }
    let mut buf = [0u8; num::LTOA_BUF_LEN];
    for &i in &samples {
        for base in [2u8, 8, 10, 16] {
            let n = num::ltoa(&mut buf, i, base);
            let mut cursor = &buf[..n];
            assert_eq!(num::atol(&mut cursor), i, "i={i} base={base}");
            assert!(cursor.is_empty());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Array contracts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn push_pop_and_unshift_shift_are_inverses() {
    let mut a: Array<u64> = Array::new();
    for x in 0..1000u64 {
        a.push(x);
        assert_eq!(a.pop(), Some(x));
        a.unshift(x);
        assert_eq!(a.shift(), Some(x));
    }
    assert_eq!(a.count(), 0);
}

#[test]
fn mixed_end_traffic_keeps_order() {
    let mut a: Array<u64> = Array::new();
    for x in 0..100u64 {
        if x % 2 == 0 {
            a.push(x);
        } else {
            a.unshift(x);
        }
    }
    // Odd values reversed, then even values in order.
    let expect: Vec<u64> = (0..100u64)
        .filter(|x| x % 2 == 1)
        .rev()
        .chain((0..100u64).filter(|x| x % 2 == 0))
        .collect();
    assert_eq!(a.as_slice(), &expect[..]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Map contracts
// ─────────────────────────────────────────────────────────────────────────────

fn key_hash(k: &str) -> u64 {
    hash::keyed(k.as_bytes(), 0x0f0e0d0c)
}

#[test]
fn overwrite_semantics_hold_under_load() {
    let mut m: OrderedMap<String, u64> = OrderedMap::new();
    for i in 0..2000u64 {
        let k = format!("key-{}", i % 500);
        m.set(key_hash(&k), k, i);
    }
    assert_eq!(m.count(), 500);
    for i in 0..500u64 {
        let k = format!("key-{i}");
        // The last writer for each key was round 1500 + i.
        assert_eq!(m.get(key_hash(&k), &k), Some(&(1500 + i)));
    }
}

#[test]
fn ring_count_matches_live_entries() {
    let mut m: OrderedMap<String, u64> = OrderedMap::new();
    for i in 0..300u64 {
        let k = format!("k{i}");
        m.set(key_hash(&k), k, i);
    }
    for i in (0..300u64).step_by(7) {
        let k = format!("k{i}");
        m.remove(key_hash(&k), &k);
    }
    let mut walked = 0usize;
    m.each(0, |_, _| {
        walked += 1;
        0
    });
    assert_eq!(walked, m.count());
}

#[test]
fn compact_map_mirrors_ordered_map_results() {
    let mut a: OrderedMap<String, u64> = OrderedMap::new();
    let mut b: CompactMap<String, u64> = CompactMap::new();
    for i in 0..400u64 {
        let k = format!("key-{}", i % 150);
        a.set(key_hash(&k), k.clone(), i);
        b.set(key_hash(&k), k, i);
    }
    assert_eq!(a.count(), b.count());
    a.each(0, |k, v| {
        assert_eq!(b.get(key_hash(k), k), Some(v));
        0
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec round trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn base64_roundtrip_sweep() {
    let mut payload = Vec::new();
    for len in 0..64usize {
        payload.clear();
        payload.extend((0..len).map(|i| (i * 13 + 7) as u8));
        for url in [false, true] {
            let mut enc = BString::new();
            enc.write_b64enc(&payload, url);
            let mut dec = BString::new();
            dec.write_b64dec(enc.as_bytes());
            assert_eq!(dec.as_bytes(), &payload[..], "len={len} url={url}");
        }
    }
}

#[test]
fn escape_roundtrip_over_binary_noise() {
    let mut state = 0x12345678u32;
    let mut payload = Vec::with_capacity(4096);
    for _ in 0..4096 {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        payload.push((state >> 24) as u8);
    }
    let mut escaped = BString::new();
    escaped.write_escape(&payload);
    let mut restored = BString::new();
    restored.write_unescape(escaped.as_bytes());
    assert_eq!(restored.as_bytes(), &payload[..]);
}

// ─────────────────────────────────────────────────────────────────────────────
// UTF-8 window accounting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn utf8_char_count_never_exceeds_byte_count() {
    let samples = [
        "ascii only",
        "mixed héllo wörld",
        "\u{7FF}\u{800}\u{FFFF}\u{10000}\u{10FFFF}",
        "",
    ];
    for sample in samples {
        let s = BString::from_bytes(sample.as_bytes());
        assert!(s.utf8_valid());
        let chars = s.utf8_len();
        assert_eq!(chars, sample.chars().count());
        assert!(chars <= s.len());
        // Summing per-character windows covers the whole byte length.
        let mut total = 0usize;
        for i in 0..chars {
            let mut pos = i as isize;
            let mut len = 1usize;
            s.utf8_select(&mut pos, &mut len).unwrap();
            total += len;
        }
        assert_eq!(total, s.len());
    }
}
