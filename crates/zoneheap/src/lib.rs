//! Page-granular, multi-zone heap allocator with a use-after-free quarantine.
//!
//! Memory is handed out in whole pages. Every block is framed by a
//! checksummed header and footer; freed blocks are parked in a FIFO
//! quarantine (optionally behind read-only MPU regions) before their pages
//! return to the free pool. Designed as the backing store for a preemptive
//! kernel's heap port: the core is single-threaded and the top-level API
//! serializes every call behind one process-wide lock.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod api;
pub mod bitmap;
pub mod config;
pub mod guard;
pub mod heap;
pub mod mpu;
pub mod platform;
pub mod quarantine;
pub mod sync;
pub mod util;
pub mod zone;

pub use heap::{HeapRegion, HeapStats, HeapZone};
