//! Spin lock used by the allocator arenas and the global block pool.
//!
//! The lock is a single atomic flag. Contended acquisition spins a few
//! times, then yields the scheduler slice and naps for one nanosecond —
//! arena critical sections cover a single slice operation, so the holder
//! is expected back almost immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct SpinLock {
    flag: AtomicBool,
}

/// RAII guard; releases the lock on drop.
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    pub const fn new() -> Self {
        SpinLock {
            flag: AtomicBool::new(false),
        }
    }

    /// Non-blocking acquisition attempt.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }

    /// Blocking acquisition: spin, then yield + 1 ns nap between rounds.
    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            for _ in 0..64 {
                if let Some(guard) = self.try_lock() {
                    return guard;
                }
                std::hint::spin_loop();
            }
            std::thread::yield_now();
            std::thread::sleep(Duration::from_nanos(1));
        }
    }

    /// Clears the flag regardless of ownership.
    ///
    /// # Safety
    /// Only valid when no thread can still believe it holds the lock —
    /// i.e. in the child immediately after `fork`, where the parent's
    /// lock holders do not exist.
    pub unsafe fn force_unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// True when some thread currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn try_lock_excludes_second_owner() {
        let lock = SpinLock::new();
        let g = lock.try_lock();
        assert!(g.is_some());
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new();
        {
            let _g = lock.lock();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn contended_counter_stays_consistent() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(std::cell::UnsafeCell::new(0u64));
        struct SendCell(Arc<std::cell::UnsafeCell<u64>>);
        unsafe impl Send for SendCell {}

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let cell = SendCell(Arc::clone(&counter));
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let _g = lock.lock();
                    unsafe { *cell.0.get() += 1 };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let _g = lock.lock();
        assert_eq!(unsafe { *counter.get() }, 40_000);
    }

    #[test]
    fn force_unlock_recovers_an_orphaned_lock() {
        let lock = SpinLock::new();
        std::mem::forget(lock.lock());
        assert!(lock.is_locked());
        unsafe { lock.force_unlock() };
        assert!(lock.try_lock().is_some());
    }
}
