//! Locked entry points over the process-wide heap instance.
//!
//! This is the surface a kernel heap port calls into. Every operation takes
//! the one global lock for its whole duration and asserts it is running in
//! task context; the core underneath performs no synchronization of its
//! own. The static instance starts all-zero ("uninitialized") and becomes
//! usable after [`define_heap_regions`].

use crate::heap::{HeapRegion, HeapStats, HeapZone, MultiZoneHeap};
use crate::platform;
use crate::sync::Mutex;

static HEAP: Mutex<MultiZoneHeap> = Mutex::new(MultiZoneHeap::new());

/// Every entry point is task-only; interrupt context is a programming
/// error, not a recoverable condition.
fn assert_task_context() {
    if platform::in_interrupt() {
        platform::abort_with_message("zoneheap: heap call from interrupt context\n");
    }
}

/// Allocate `size` bytes from the currently selected zone. Null on zero
/// size, exhaustion, or an uninitialized heap.
///
/// # Safety
/// The returned pointer must be released only through [`deallocate`].
pub unsafe fn allocate(size: usize) -> *mut u8 {
    assert_task_context();
    HEAP.lock().allocate(size)
}

/// Free a pointer obtained from [`allocate`] or [`calloc`]. Null is a
/// no-op; a pointer belonging to no zone is a fatal assertion.
///
/// # Safety
/// `user_ptr` must be null or a live heap pointer with no outstanding
/// references into its block.
pub unsafe fn deallocate(user_ptr: *mut u8) {
    if user_ptr.is_null() {
        return;
    }
    assert_task_context();
    HEAP.lock().deallocate(user_ptr);
}

/// Allocate a zeroed array of `num` elements of `elem_size` bytes. Null on
/// multiplication overflow or allocation failure.
///
/// # Safety
/// Same contract as [`allocate`].
pub unsafe fn calloc(num: usize, elem_size: usize) -> *mut u8 {
    assert_task_context();
    HEAP.lock().calloc(num, elem_size)
}

/// Initialize up to the configured number of zones from `regions`. Must be
/// called once before any allocation (and again after [`reset_state`]).
///
/// # Safety
/// Every region must be valid for reads and writes for the life of the
/// heap and referenced by nothing else.
pub unsafe fn define_heap_regions(regions: &[HeapRegion]) {
    assert_task_context();
    HEAP.lock().define_heap_regions(regions);
}

/// Zero all heap state. Requires [`define_heap_regions`] before further
/// use.
pub fn reset_state() {
    assert_task_context();
    HEAP.lock().reset_state();
}

/// Sum of free bytes across all zones.
pub fn free_heap_size() -> usize {
    assert_task_context();
    HEAP.lock().free_heap_size()
}

/// Sum of the per-zone low-water marks.
pub fn minimum_ever_free_heap_size() -> usize {
    assert_task_context();
    HEAP.lock().minimum_ever_free_heap_size()
}

/// Sum of zone sizes.
pub fn total_heap_size() -> usize {
    assert_task_context();
    HEAP.lock().total_heap_size()
}

pub fn used_heap_size() -> usize {
    assert_task_context();
    HEAP.lock().used_heap_size()
}

/// Aggregate counters across all zones. Zeros while uninitialized.
pub fn heap_stats() -> HeapStats {
    assert_task_context();
    HEAP.lock().heap_stats()
}

/// Run quarantine and live-block verification across every zone.
pub fn validate_heap() -> bool {
    assert_task_context();
    HEAP.lock().validate()
}

/// Select the zone policy for subsequent allocations.
pub fn set_zone(zone: HeapZone) {
    assert_task_context();
    HEAP.lock().set_zone(zone);
}

pub fn zone() -> HeapZone {
    assert_task_context();
    HEAP.lock().zone()
}

pub fn zone_count() -> usize {
    assert_task_context();
    HEAP.lock().zone_count()
}

pub fn zone_free_bytes(index: usize) -> usize {
    assert_task_context();
    HEAP.lock().zone_free_bytes(index)
}

pub fn zone_total_bytes(index: usize) -> usize {
    assert_task_context();
    HEAP.lock().zone_total_bytes(index)
}

pub fn zone_min_free_bytes(index: usize) -> usize {
    assert_task_context();
    HEAP.lock().zone_min_free_bytes(index)
}

pub fn zone_used_bytes(index: usize) -> usize {
    assert_task_context();
    HEAP.lock().zone_used_bytes(index)
}
