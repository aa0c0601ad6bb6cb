//! Allocation-free mutual exclusion for the heap entry points.
//!
//! The core allocator performs no locking of its own; one process-wide
//! [`Mutex`] in front of it serializes every public call. On hosted Linux
//! builds the lock parks waiters on a futex. On Cortex-M targets, where the
//! heap must be callable with the scheduler running, taking the lock masks
//! interrupts for the (bounded) duration of the call, which subsumes
//! suspending preemption on a single core. Everywhere else it spins.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, Ordering};

#[cfg(all(target_arch = "arm", target_os = "none"))]
use core::cell::Cell;

/// 0 = unlocked, 1 = locked, 2 = locked with waiters (futex builds only).
pub struct RawMutex {
    state: AtomicI32,
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    irq_was_enabled: Cell<bool>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub const fn new() -> Self {
        RawMutex {
            state: AtomicI32::new(0),
            #[cfg(all(target_arch = "arm", target_os = "none"))]
            irq_was_enabled: Cell::new(false),
        }
    }

    #[cfg(all(target_arch = "arm", target_os = "none"))]
    #[inline]
    pub fn lock(&self) {
        let primask = cortex_m::register::primask::read();
        cortex_m::interrupt::disable();
        self.irq_was_enabled.set(primask.is_active());
        self.state.store(1, Ordering::Relaxed);
    }

    #[cfg(all(target_arch = "arm", target_os = "none"))]
    #[inline]
    pub fn unlock(&self) {
        self.state.store(0, Ordering::Relaxed);
        if self.irq_was_enabled.get() {
            // Re-enable only if interrupts were live when we masked them.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    #[inline]
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_contended();
    }

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    #[cold]
    fn lock_contended(&self) {
        loop {
            let previous = self.state.swap(2, Ordering::Acquire);
            if previous == 0 {
                return;
            }
            self.park();
        }
    }

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    #[inline]
    pub fn unlock(&self) {
        let previous = self.state.fetch_sub(1, Ordering::Release);
        if previous != 1 {
            self.state.store(0, Ordering::Release);
            self.wake_one();
        }
    }

    #[cfg(target_os = "linux")]
    fn park(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                &self.state as *const AtomicI32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                2i32,
                core::ptr::null::<libc::timespec>(),
            );
        }
    }

    #[cfg(target_os = "linux")]
    #[cold]
    fn wake_one(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                &self.state as *const AtomicI32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
            );
        }
    }

    #[cfg(not(any(target_os = "linux", all(target_arch = "arm", target_os = "none"))))]
    fn park(&self) {
        core::hint::spin_loop();
    }

    #[cfg(not(any(target_os = "linux", all(target_arch = "arm", target_os = "none"))))]
    #[cold]
    fn wake_one(&self) {}
}

/// A mutex wrapping data, like `std::sync::Mutex` but allocation-free and
/// usable from `no_std`.
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn exclusion_under_contention() {
        let counter = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }
}
