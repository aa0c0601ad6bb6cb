//! Memory-protection capability for trapping use-after-free.
//!
//! The hardware is modeled as a small set of numbered region slots in
//! `[MPU_FIRST_REGION, MPU_FIRST_REGION + MPU_REGION_COUNT)`. The register
//! programming itself lives behind [`MpuBackend`], installed by the platform
//! port at startup; without a backend every protect attempt reports
//! [`INVALID_REGION`] and the allocator carries on unprotected.

use crate::config::{MPU_FIRST_REGION, MPU_REGION_COUNT};
use crate::sync::Mutex;

/// Region id meaning "not protected".
pub const INVALID_REGION: i8 = -1;

/// Low-level protection capability supplied by the platform port.
///
/// `protect` marks `[addr, addr + size)` read-only for unprivileged code.
/// Hardware may require `size` to be a power of two and `addr` to be
/// `size`-aligned; callers arrange that before asking.
pub trait MpuBackend: Sync {
    fn protect(&self, addr: usize, size: usize) -> bool;
    fn unprotect(&self, addr: usize, size: usize);
}

#[derive(Clone, Copy)]
struct RegionSlot {
    addr: usize,
    size: usize,
    used: bool,
}

struct RegionTable {
    backend: Option<&'static dyn MpuBackend>,
    slots: [RegionSlot; MPU_REGION_COUNT],
}

impl RegionTable {
    const fn new() -> Self {
        const FREE: RegionSlot = RegionSlot {
            addr: 0,
            size: 0,
            used: false,
        };
        RegionTable {
            backend: None,
            slots: [FREE; MPU_REGION_COUNT],
        }
    }
}

static REGIONS: Mutex<RegionTable> = Mutex::new(RegionTable::new());

/// Install the platform's protection capability. Call once at startup,
/// before the first free.
pub fn set_backend(backend: &'static dyn MpuBackend) {
    REGIONS.lock().backend = Some(backend);
}

/// True if a protection backend is installed.
pub fn available() -> bool {
    REGIONS.lock().backend.is_some()
}

/// Mark `[addr, addr + size)` read-only. Returns the claimed region id, or
/// [`INVALID_REGION`] when no backend is installed, no slot is free, or the
/// hardware refuses the window.
pub fn protect(addr: usize, size: usize) -> i8 {
    let mut table = REGIONS.lock();
    let backend = match table.backend {
        Some(backend) => backend,
        None => return INVALID_REGION,
    };
    for (i, slot) in table.slots.iter_mut().enumerate() {
        if !slot.used {
            if !backend.protect(addr, size) {
                return INVALID_REGION;
            }
            *slot = RegionSlot {
                addr,
                size,
                used: true,
            };
            return MPU_FIRST_REGION + i as i8;
        }
    }
    INVALID_REGION
}

/// Release a region id previously returned by [`protect`]. Ids outside the
/// configured range are ignored.
pub fn unprotect(region: i8) {
    if region < MPU_FIRST_REGION {
        return;
    }
    let index = (region - MPU_FIRST_REGION) as usize;
    if index >= MPU_REGION_COUNT {
        return;
    }
    let mut table = REGIONS.lock();
    let backend = match table.backend {
        Some(backend) => backend,
        None => return,
    };
    let slot = &mut table.slots[index];
    if slot.used {
        backend.unprotect(slot.addr, slot.size);
        slot.used = false;
    }
}
