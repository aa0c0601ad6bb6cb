//! Target-specific primitives: the fatal-assertion handler and interrupt
//! context detection. Everything else in the crate is target-neutral.

#[cfg(any(target_os = "linux", target_os = "macos"))]
mod hosted;
#[cfg(any(target_os = "linux", target_os = "macos"))]
use hosted as sys;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod armv7m;
#[cfg(all(target_arch = "arm", target_os = "none"))]
use armv7m as sys;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    all(target_arch = "arm", target_os = "none")
)))]
mod fallback;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    all(target_arch = "arm", target_os = "none")
)))]
use fallback as sys;

/// Write a diagnostic and abort. Called when a heap invariant is violated:
/// the caller (or another caller) has already corrupted memory, so there is
/// nothing to recover.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    sys::abort_with_message(msg)
}

/// True when executing in interrupt (exception) context. Heap calls from
/// interrupts are a programming error, not a recoverable condition.
#[inline]
pub fn in_interrupt() -> bool {
    sys::in_interrupt()
}
