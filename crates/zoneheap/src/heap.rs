//! Multi-zone router: owns every zone and directs requests between them.

use crate::config::MAX_ZONES;
use crate::platform;
use crate::zone::PageAllocator;
use core::ptr;
use log::{error, info};

/// Zone selection policy for subsequent allocations.
///
/// Zone 0 is the fast region, zone 1 the slow one. The `Prefer` variants
/// fall back to the other zones when the preferred one is exhausted; the
/// bare `Fast`/`Slow` variants do not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeapZone {
    #[default]
    Any,
    Fast,
    Slow,
    FastPrefer,
    SlowPrefer,
}

/// Snapshot of heap-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub available_bytes: usize,
    pub minimum_ever_free_bytes: usize,
    pub successful_allocations: usize,
    pub successful_frees: usize,
}

/// One contiguous memory region handed to `define_heap_regions`.
#[derive(Clone, Copy, Debug)]
pub struct HeapRegion {
    pub start: *mut u8,
    pub size_bytes: usize,
}

struct ZoneRoute {
    primary: usize,
    secondary: usize,
    try_secondary: bool,
}

pub struct MultiZoneHeap {
    zones: [PageAllocator; MAX_ZONES],
    active_zones: usize,
    current_zone: HeapZone,
    initialized: bool,
}

unsafe impl Send for MultiZoneHeap {}

impl MultiZoneHeap {
    pub const fn new() -> Self {
        const ZONE: PageAllocator = PageAllocator::new();
        MultiZoneHeap {
            zones: [ZONE; MAX_ZONES],
            active_zones: 0,
            current_zone: HeapZone::Any,
            initialized: false,
        }
    }

    /// Initialize one zone per region, in order, up to the zone limit.
    /// A null or empty region terminates the list early (the C heap-port
    /// convention). Defining no usable region at all is fatal.
    ///
    /// # Safety
    /// Every region must be valid for reads and writes for the life of the
    /// heap and referenced by nothing else.
    pub unsafe fn define_heap_regions(&mut self, regions: &[HeapRegion]) {
        self.active_zones = 0;
        self.current_zone = HeapZone::Any;
        self.initialized = false;

        for region in regions {
            if self.active_zones >= MAX_ZONES
                || region.start.is_null()
                || region.size_bytes == 0
            {
                break;
            }
            self.zones[self.active_zones].init(
                region.start,
                region.size_bytes,
                self.active_zones as u8,
            );
            info!(
                "zone {}: {} bytes at {:p}",
                self.active_zones, region.size_bytes, region.start
            );
            self.active_zones += 1;
        }

        if self.active_zones == 0 {
            platform::abort_with_message("zoneheap: no usable heap regions defined\n");
        }
        self.initialized = true;
    }

    /// Drop every zone back to the uninitialized state.
    /// `define_heap_regions` must run again before the next allocation.
    pub fn reset_state(&mut self) {
        for zone in self.zones.iter_mut().take(self.active_zones) {
            *zone = PageAllocator::new();
        }
        self.active_zones = 0;
        self.current_zone = HeapZone::Any;
        self.initialized = false;
        info!("heap state reset");
    }

    fn resolve_route(&self, zone: HeapZone) -> ZoneRoute {
        match zone {
            HeapZone::Fast => ZoneRoute {
                primary: 0,
                secondary: 0,
                try_secondary: false,
            },
            HeapZone::Slow => ZoneRoute {
                primary: 1,
                secondary: 1,
                try_secondary: false,
            },
            HeapZone::SlowPrefer => ZoneRoute {
                primary: 1,
                secondary: 0,
                try_secondary: true,
            },
            HeapZone::Any | HeapZone::FastPrefer => ZoneRoute {
                primary: 0,
                secondary: 1,
                try_secondary: true,
            },
        }
    }

    unsafe fn allocate_with_route(&mut self, route: &ZoneRoute, size: usize) -> *mut u8 {
        if route.primary < self.active_zones && self.zones[route.primary].is_initialized() {
            let user_ptr = self.zones[route.primary].allocate(size);
            if !user_ptr.is_null() {
                return user_ptr;
            }
        }

        if route.try_secondary
            && route.secondary < self.active_zones
            && route.secondary != route.primary
            && self.zones[route.secondary].is_initialized()
        {
            let user_ptr = self.zones[route.secondary].allocate(size);
            if !user_ptr.is_null() {
                return user_ptr;
            }
        }

        if route.try_secondary {
            for i in 0..self.active_zones {
                if i == route.primary || i == route.secondary {
                    continue;
                }
                if !self.zones[i].is_initialized() {
                    continue;
                }
                let user_ptr = self.zones[i].allocate(size);
                if !user_ptr.is_null() {
                    return user_ptr;
                }
            }
        }

        ptr::null_mut()
    }

    /// Allocate from the currently selected zone (with fallback per policy).
    ///
    /// # Safety
    /// See [`PageAllocator::allocate`].
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        let route = self.resolve_route(self.current_zone);
        self.allocate_with_route(&route, size)
    }

    /// Free a pointer, dispatching to the zone that owns it. A pointer
    /// belonging to no zone is a fatal assertion.
    ///
    /// # Safety
    /// See [`PageAllocator::deallocate`].
    pub unsafe fn deallocate(&mut self, user_ptr: *mut u8) {
        if user_ptr.is_null() {
            return;
        }
        for zone in self.zones.iter_mut().take(self.active_zones) {
            if zone.is_initialized() && zone.owns_pointer(user_ptr) {
                zone.deallocate(user_ptr);
                return;
            }
        }
        platform::abort_with_message("zoneheap: free of pointer outside any heap zone\n");
    }

    /// Zeroed allocation. Tries the primary zone, then the secondary when
    /// fallback is permitted; does not sweep the remaining zones.
    ///
    /// # Safety
    /// See [`PageAllocator::calloc`].
    pub unsafe fn calloc(&mut self, num: usize, elem_size: usize) -> *mut u8 {
        let route = self.resolve_route(self.current_zone);

        if route.primary < self.active_zones && self.zones[route.primary].is_initialized() {
            let user_ptr = self.zones[route.primary].calloc(num, elem_size);
            if !user_ptr.is_null() {
                return user_ptr;
            }
        }
        if route.try_secondary
            && route.secondary < self.active_zones
            && route.secondary != route.primary
            && self.zones[route.secondary].is_initialized()
        {
            return self.zones[route.secondary].calloc(num, elem_size);
        }
        ptr::null_mut()
    }

    pub fn set_zone(&mut self, zone: HeapZone) {
        self.current_zone = zone;
    }

    pub fn zone(&self) -> HeapZone {
        self.current_zone
    }

    pub fn zone_count(&self) -> usize {
        self.active_zones
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn free_heap_size(&self) -> usize {
        self.active().map(PageAllocator::free_bytes).sum()
    }

    pub fn minimum_ever_free_heap_size(&self) -> usize {
        self.active().map(PageAllocator::min_ever_free_bytes).sum()
    }

    pub fn total_heap_size(&self) -> usize {
        self.active().map(PageAllocator::total_bytes).sum()
    }

    pub fn used_heap_size(&self) -> usize {
        self.total_heap_size() - self.free_heap_size()
    }

    pub fn heap_stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();
        for zone in self.active() {
            stats.available_bytes += zone.free_bytes();
            stats.minimum_ever_free_bytes += zone.min_ever_free_bytes();
            stats.successful_allocations += zone.successful_allocs();
            stats.successful_frees += zone.successful_frees();
        }
        stats
    }

    pub fn zone_free_bytes(&self, index: usize) -> usize {
        self.zone_at(index).map_or(0, PageAllocator::free_bytes)
    }

    pub fn zone_total_bytes(&self, index: usize) -> usize {
        self.zone_at(index).map_or(0, PageAllocator::total_bytes)
    }

    pub fn zone_min_free_bytes(&self, index: usize) -> usize {
        self.zone_at(index)
            .map_or(0, PageAllocator::min_ever_free_bytes)
    }

    pub fn zone_used_bytes(&self, index: usize) -> usize {
        self.zone_at(index).map_or(0, PageAllocator::used_bytes)
    }

    /// Run quarantine and live-block verification across every zone.
    pub fn validate(&self) -> bool {
        let mut ok = true;
        for (i, zone) in self.active().enumerate() {
            if !zone.verify_quarantine() {
                error!("zone {}: quarantine verification failed", i);
                ok = false;
            }
            if !zone.verify_allocated() {
                error!("zone {}: allocated block verification failed", i);
                ok = false;
            }
        }
        ok
    }

    fn active(&self) -> impl Iterator<Item = &PageAllocator> {
        self.zones
            .iter()
            .take(self.active_zones)
            .filter(|zone| zone.is_initialized())
    }

    fn zone_at(&self, index: usize) -> Option<&PageAllocator> {
        if index < self.active_zones {
            Some(&self.zones[index])
        } else {
            None
        }
    }
}
