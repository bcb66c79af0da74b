//! E2E: whole-process allocator lifecycle.
//!
//! Owns its process (single test) so the live-block gauge is not
//! disturbed by concurrent test threads: a full allocate/free sweep plus
//! a teardown must return the gauge to zero, and a forked child must be
//! able to allocate after the post-fork lock reset.

use corekit::mem;

#[test]
fn lifecycle_teardown_and_fork() {
    // ── Phase 1: mixed traffic, then full release ───────────────────────────
    let mut ptrs = Vec::new();
    for i in 0..600usize {
        let size = match i % 4 {
            0 => 24 + i,
            1 => 1000 + i * 3,
            2 => mem::BLOCK_LIMIT + 100 + i,
            _ => 8,
        };
        let p = mem::alloc(size);
        unsafe { p.write_bytes((i & 0x7F) as u8, size) };
        ptrs.push((p, size, (i & 0x7F) as u8));
    }
    assert!(mem::block_count() > 0);
    for (p, size, tag) in ptrs.drain(..) {
        unsafe {
            assert_eq!(*p, tag);
            assert_eq!(*p.add(size - 1), tag);
            mem::free(p);
        }
    }

    // ── Phase 2: teardown releases the arenas' current blocks ───────────────
    mem::teardown();
    assert_eq!(
        mem::block_count(),
        0,
        "live blocks remain after full free + teardown"
    );

    // The allocator keeps working after a teardown.
    let p = mem::alloc(512);
    unsafe {
        p.write_bytes(0x33, 512);
        mem::free(p);
    }

    // ── Phase 3: fork, reset locks in the child, allocate there ─────────────
    #[cfg(unix)]
    {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                mem::after_fork();
                let mut ok = true;
                for i in 0..64usize {
                    let size = 64 + i * 33;
                    let p = mem::alloc(size);
                    unsafe {
                        p.write_bytes(0x5C, size);
                        ok &= *p.add(size - 1) == 0x5C;
                        mem::free(p);
                    }
                }
                // Exit without running the parent's test harness teardown.
                unsafe { libc::_exit(if ok { 0 } else { 1 }) };
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None).expect("waitpid") {
                    WaitStatus::Exited(_, code) => {
                        assert_eq!(code, 0, "child allocation cycle failed")
                    }
                    other => panic!("unexpected child status: {other:?}"),
                }
            }
        }
    }
}
