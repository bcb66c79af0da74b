// Integration tests for BString file input: offsets, limits, tilde
// expansion and error behavior.

use corekit::BString;
use std::io::Write;
use tempfile::NamedTempFile;

fn fixture(content: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("tempfile");
    f.write_all(content).expect("write fixture");
    f.flush().expect("flush fixture");
    f
}

#[test]
fn reads_whole_file_to_eof() {
    let f = fixture(b"the quick brown fox");
    let mut s = BString::new();
    let info = s.readfile(f.path().to_str().unwrap(), 0, 0).unwrap();
    assert_eq!(info.len, 19);
    assert_eq!(s.as_bytes(), b"the quick brown fox");
}

#[test]
fn appends_to_existing_content() {
    let f = fixture(b"-tail");
    let mut s = BString::from_bytes(b"head");
    s.readfile(f.path().to_str().unwrap(), 0, 0).unwrap();
    assert_eq!(s.as_bytes(), b"head-tail");
}

#[test]
fn start_and_limit_select_a_window() {
    let f = fixture(b"0123456789");
    let mut s = BString::new();
    s.readfile(f.path().to_str().unwrap(), 2, 5).unwrap();
    assert_eq!(s.as_bytes(), b"23456");
}

#[test]
fn negative_start_counts_from_eof() {
    let f = fixture(b"0123456789");
    let mut s = BString::new();
    s.readfile(f.path().to_str().unwrap(), -3, 0).unwrap();
    assert_eq!(s.as_bytes(), b"789");
}

#[test]
fn missing_file_leaves_string_unchanged() {
    let mut s = BString::from_bytes(b"untouched");
    let err = s.readfile("/no/such/path/anywhere", 0, 0);
    assert!(err.is_err());
    assert_eq!(s.as_bytes(), b"untouched");
}

#[test]
fn start_past_eof_is_an_error() {
    let f = fixture(b"tiny");
    let mut s = BString::from_bytes(b"untouched");
    let err = s.readfile(f.path().to_str().unwrap(), 100, 0);
    assert!(err.is_err());
    assert_eq!(s.as_bytes(), b"untouched");
}

#[test]
fn binary_content_survives() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let f = fixture(&payload);
    let mut s = BString::new();
    let info = s.readfile(f.path().to_str().unwrap(), 0, 0).unwrap();
    assert_eq!(info.len, payload.len());
    assert_eq!(s.as_bytes(), &payload[..]);
}

#[test]
fn tilde_expands_through_home() {
    let f = fixture(b"home sweet home");
    let dir = f.path().parent().unwrap();
    let name = f.path().file_name().unwrap().to_str().unwrap();
    // Point HOME at the fixture directory so "~/<name>" resolves to it.
    std::env::set_var("HOME", dir);
    let mut s = BString::new();
    s.readfile(&format!("~/{name}"), 0, 0).unwrap();
    assert_eq!(s.as_bytes(), b"home sweet home");
}
