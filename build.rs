// build.rs — Platform detection for the page-mapper layer.
//
// Emits `cargo:rustc-cfg=has_page_mapper` on Unix-like targets where the
// anonymous mmap family (mmap / munmap / mremap-or-remap) is available.
// On other targets the page allocator falls back to the standard aligned
// allocator, which loses grow-in-place but keeps the same contract.
fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let unix_targets = [
        "linux",
        "macos",
        "freebsd",
        "netbsd",
        "openbsd",
        "dragonfly",
        "solaris",
        "illumos",
        "haiku",
        "android",
        "ios",
    ];
    if unix_targets.contains(&target_os.as_str()) || std::env::var("CARGO_CFG_UNIX").is_ok() {
        println!("cargo:rustc-cfg=has_page_mapper");
    }
}
