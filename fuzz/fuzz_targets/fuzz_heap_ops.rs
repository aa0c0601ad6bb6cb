#![no_main]

use libfuzzer_sys::fuzz_target;
use zoneheap::config::PAGE_SIZE;
use zoneheap::heap::{HeapRegion, HeapZone, MultiZoneHeap};

/// Fuzz target that interprets a byte slice as a sequence of heap operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=allocate, 1=deallocate, 2=calloc, 3=set_zone, 4=validate)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// Every pointer handed to deallocate came from the allocator, so the run
/// must stay abort-free; validate_heap must report a healthy heap at every
/// checkpoint.
const MAX_SLOTS: usize = 32;
const ZONE_PAGES: usize = 64;

#[repr(C, align(1024))]
struct Region([u8; ZONE_PAGES * PAGE_SIZE]);

fuzz_target!(|data: &[u8]| {
    let mut fast = Box::new(Region([0; ZONE_PAGES * PAGE_SIZE]));
    let mut slow = Box::new(Region([0; ZONE_PAGES * PAGE_SIZE]));

    let mut heap = MultiZoneHeap::new();
    unsafe {
        heap.define_heap_regions(&[
            HeapRegion {
                start: fast.0.as_mut_ptr(),
                size_bytes: ZONE_PAGES * PAGE_SIZE,
            },
            HeapRegion {
                start: slow.0.as_mut_ptr(),
                size_bytes: ZONE_PAGES * PAGE_SIZE,
            },
        ]);
    }

    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] % 5;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 => {
                if !slots[slot].is_null() {
                    unsafe { heap.deallocate(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                }
                let ptr = unsafe { heap.allocate(size) };
                slots[slot] = ptr;
                sizes[slot] = size;
                if !ptr.is_null() {
                    unsafe {
                        std::ptr::write_bytes(ptr, 0xAA, size.min(256));
                    }
                }
            }
            1 => {
                if !slots[slot].is_null() {
                    unsafe { heap.deallocate(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
            }
            2 => {
                if !slots[slot].is_null() {
                    unsafe { heap.deallocate(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                }
                let num = (size >> 8).max(1);
                let elem_size = (size & 0xFF).max(1);
                let ptr = unsafe { heap.calloc(num, elem_size) };
                slots[slot] = ptr;
                sizes[slot] = num * elem_size;
                if !ptr.is_null() {
                    let check_len = (num * elem_size).min(256);
                    for j in 0..check_len {
                        assert_eq!(
                            unsafe { ptr.add(j).read() },
                            0,
                            "calloc memory not zeroed at offset {}",
                            j
                        );
                    }
                }
            }
            3 => {
                let zone = match size % 5 {
                    0 => HeapZone::Any,
                    1 => HeapZone::Fast,
                    2 => HeapZone::Slow,
                    3 => HeapZone::FastPrefer,
                    _ => HeapZone::SlowPrefer,
                };
                heap.set_zone(zone);
            }
            4 => {
                assert!(heap.validate(), "heap validation failed mid-sequence");
            }
            _ => unreachable!(),
        }
    }

    // Cleanup; the heap must still be coherent afterwards.
    for slot in &mut slots {
        if !slot.is_null() {
            unsafe { heap.deallocate(*slot) };
            *slot = std::ptr::null_mut();
        }
    }
    assert!(heap.validate(), "heap validation failed after cleanup");
});
