//! Page allocator for one contiguous memory zone.

use crate::bitmap::PageBitmap;
use crate::config::{
    FOOTER_SIZE, HEADER_SIZE, MAX_PAGES_PER_ZONE, PAGE_SIZE, QUARANTINE_CHECK_LEVEL,
};
use crate::guard::{self, BlockHeader};
use crate::mpu;
use crate::platform;
use crate::quarantine::{QuarantineEntry, QuarantineTable};
use crate::util;
use core::mem::align_of;
use core::ptr;

/// One zone's allocator state.
///
/// Memory is handed out in whole pages. Every block is framed by a header
/// and footer; freed blocks are parked in the quarantine, and their pages
/// return to the free pool only on eviction. The all-zero value behaves as
/// "uninitialized": every operation is a trivial failure or no-op until
/// [`PageAllocator::init`] runs. Performs no locking of its own.
pub struct PageAllocator {
    base: *mut u8,
    total_pages: usize,
    zone_index: u8,
    initialized: bool,

    /// Bit set = page is live or quarantined.
    in_use: PageBitmap,
    /// Bit set = page belongs to a live block.
    allocated: PageBitmap,

    quarantine: QuarantineTable,

    sequence_counter: u32,
    free_pages: usize,
    min_ever_free_pages: usize,
    successful_allocs: usize,
    successful_frees: usize,
}

impl PageAllocator {
    pub const fn new() -> Self {
        PageAllocator {
            base: ptr::null_mut(),
            total_pages: 0,
            zone_index: 0,
            initialized: false,
            in_use: PageBitmap::new(),
            allocated: PageBitmap::new(),
            quarantine: QuarantineTable::new(),
            sequence_counter: 0,
            free_pages: 0,
            min_ever_free_pages: 0,
            successful_allocs: 0,
            successful_frees: 0,
        }
    }

    /// Take ownership of `[start, start + size)` as zone `zone_index`.
    ///
    /// # Safety
    /// The region must be valid for reads and writes for the life of the
    /// allocator and referenced by nothing else.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize, zone_index: u8) {
        if start.is_null() || size < PAGE_SIZE {
            platform::abort_with_message("zoneheap: zone region is null or below one page\n");
        }
        if !util::is_aligned(start as usize, align_of::<BlockHeader>()) {
            platform::abort_with_message("zoneheap: zone region is misaligned\n");
        }
        let pages = size / PAGE_SIZE;
        if pages > MAX_PAGES_PER_ZONE {
            platform::abort_with_message("zoneheap: zone exceeds the page limit\n");
        }

        self.base = start;
        self.total_pages = pages;
        self.zone_index = zone_index;

        self.in_use.init(pages);
        self.allocated.init(pages);
        self.quarantine.init();

        self.sequence_counter = 0;
        self.free_pages = pages;
        self.min_ever_free_pages = pages;
        self.successful_allocs = 0;
        self.successful_frees = 0;

        self.initialized = true;
    }

    /// Pages needed to hold a framed block of `requested_size` payload
    /// bytes. `None` on arithmetic overflow.
    fn pages_needed(requested_size: usize) -> Option<usize> {
        let total = HEADER_SIZE
            .checked_add(requested_size)?
            .checked_add(FOOTER_SIZE)?;
        Some(total.div_ceil(PAGE_SIZE))
    }

    #[inline]
    fn page_address(&self, page: usize) -> *mut u8 {
        debug_assert!(page <= self.total_pages);
        unsafe { self.base.add(page * PAGE_SIZE) }
    }

    /// Allocate `requested_size` bytes. Null when the zone is uninitialized,
    /// the size is zero, or no sufficiently long free run exists.
    ///
    /// # Safety
    /// The zone's region must still be exclusively owned by this allocator.
    pub unsafe fn allocate(&mut self, requested_size: usize) -> *mut u8 {
        if !self.initialized || requested_size == 0 {
            return ptr::null_mut();
        }

        let pages = match Self::pages_needed(requested_size) {
            Some(pages) => pages,
            None => return ptr::null_mut(),
        };
        if pages > self.free_pages {
            return ptr::null_mut();
        }

        self.run_integrity_checks();

        let start = match self.in_use.find_free_run(pages) {
            Some(start) => start,
            None => return ptr::null_mut(),
        };

        let sequence = self.sequence_counter;
        self.sequence_counter = self.sequence_counter.wrapping_add(1);

        self.in_use.set_range(start, pages);
        self.allocated.set_range(start, pages);

        let header_addr = self.page_address(start);
        guard::write_header(
            header_addr,
            requested_size as u32,
            start as u16,
            pages as u16,
            self.zone_index,
            sequence,
        );

        let header = header_addr as *mut BlockHeader;
        let footer = guard::footer_from_header(header);
        guard::write_footer(
            footer as *mut u8,
            requested_size as u32,
            start as u16,
            pages as u16,
            self.zone_index,
            sequence,
        );

        let pad_len = guard::padding_len(requested_size, pages);
        if pad_len > 0 {
            guard::fill_padding(guard::padding_from_header(header), pad_len);
        }

        self.free_pages -= pages;
        if self.free_pages < self.min_ever_free_pages {
            self.min_ever_free_pages = self.free_pages;
        }
        self.successful_allocs += 1;

        guard::user_data_from_header(header)
    }

    /// Return `user_ptr` to the allocator. Null is a no-op; anything that is
    /// not a live block of this zone is a fatal assertion.
    ///
    /// # Safety
    /// `user_ptr` must be null or a pointer obtained from [`allocate`] on
    /// this zone, with no outstanding references into the block.
    ///
    /// [`allocate`]: PageAllocator::allocate
    pub unsafe fn deallocate(&mut self, user_ptr: *mut u8) {
        if !self.initialized || user_ptr.is_null() {
            return;
        }

        let header = guard::header_from_user_data(user_ptr);
        if !guard::validate_header(header) {
            platform::abort_with_message("zoneheap: invalid or corrupted block header on free\n");
        }
        let footer = guard::footer_from_header(header);
        if !guard::validate_footer(footer) {
            platform::abort_with_message("zoneheap: corrupted block footer on free\n");
        }
        if !guard::validate_pair(&*header, &*footer) {
            platform::abort_with_message("zoneheap: header/footer mismatch on free\n");
        }

        if (*header).zone_index != self.zone_index {
            platform::abort_with_message("zoneheap: block belongs to another zone\n");
        }
        let start_page = (*header).start_page as usize;
        let page_count = (*header).page_count as usize;
        let requested_size = (*header).requested_size;
        if start_page + page_count > self.total_pages {
            platform::abort_with_message("zoneheap: block extends past the end of its zone\n");
        }

        // The header's start page must agree with where the pointer actually
        // lives; a forged record cannot redirect the free elsewhere.
        let offset = (header as usize).wrapping_sub(self.base as usize);
        if offset % PAGE_SIZE != 0 || offset / PAGE_SIZE != start_page {
            platform::abort_with_message("zoneheap: block start page does not match pointer\n");
        }

        if !self.allocated.test(start_page) {
            platform::abort_with_message("zoneheap: double free detected\n");
        }

        self.run_integrity_checks();

        if let Some(evicted) =
            self.quarantine
                .add(start_page as u16, page_count as u16, requested_size, self.zone_index)
        {
            self.evict_from_quarantine(&evicted);
        }

        #[cfg(feature = "fill-on-free")]
        guard::fill_quarantine_payload(user_ptr, requested_size as usize);

        // The pages stay marked in `in_use` until quarantine eviction; only
        // the live-allocation bits drop now.
        self.allocated.clear_range(start_page, page_count);

        #[cfg(feature = "mpu-protect")]
        self.update_mpu_protection(start_page, page_count);

        self.successful_frees += 1;
    }

    /// Allocate a zeroed array of `num` elements of `elem_size` bytes.
    /// Null on multiplication overflow or allocation failure.
    ///
    /// # Safety
    /// Same contract as [`allocate`](PageAllocator::allocate).
    pub unsafe fn calloc(&mut self, num: usize, elem_size: usize) -> *mut u8 {
        let total = match num.checked_mul(elem_size) {
            Some(total) => total,
            None => return ptr::null_mut(),
        };
        let user_ptr = self.allocate(total);
        if !user_ptr.is_null() {
            ptr::write_bytes(user_ptr, 0, total);
        }
        user_ptr
    }

    /// Release an evicted quarantine entry's pages back to the free pool.
    fn evict_from_quarantine(&mut self, entry: &QuarantineEntry) {
        if entry.mpu_region >= 0 {
            mpu::unprotect(entry.mpu_region);
        }

        let start_page = entry.start_page as usize;
        let page_count = entry.page_count as usize;

        #[cfg(feature = "clear-on-evict")]
        unsafe {
            guard::fill_cleared_pages(self.page_address(start_page), page_count * PAGE_SIZE);
        }

        self.in_use.clear_range(start_page, page_count);
        self.free_pages += page_count;
    }

    /// Re-cover quarantined pages with an MPU window after a new insertion.
    ///
    /// The freshly quarantined range is first coalesced with its non-live
    /// neighbors, then the largest self-aligned power-of-two window inside
    /// the coalesced range is protected. Entries already covered by an older
    /// window inside the new one give their region slot back first.
    #[cfg(any(test, feature = "mpu-protect"))]
    pub(crate) fn update_mpu_protection(&mut self, start_page: usize, page_count: usize) {
        if !mpu::available() {
            return;
        }

        let (window_addr, window_size) = self.protection_window(start_page, page_count);
        let base = self.base as usize;

        for i in 0..QuarantineTable::capacity() {
            let entry = self.quarantine.entry_at_mut(i);
            if !entry.active || entry.mpu_region < 0 {
                continue;
            }
            let entry_start = base + entry.start_page as usize * PAGE_SIZE;
            let entry_end = entry_start + entry.page_count as usize * PAGE_SIZE;
            if entry_start >= window_addr && entry_end <= window_addr + window_size {
                mpu::unprotect(entry.mpu_region);
                entry.mpu_region = mpu::INVALID_REGION;
            }
        }

        let region = mpu::protect(window_addr, window_size);
        if region >= 0 {
            for i in 0..QuarantineTable::capacity() {
                let entry = self.quarantine.entry_at_mut(i);
                if !entry.active {
                    continue;
                }
                let entry_start = base + entry.start_page as usize * PAGE_SIZE;
                let entry_end = entry_start + entry.page_count as usize * PAGE_SIZE;
                if entry_start >= window_addr && entry_end <= window_addr + window_size {
                    entry.mpu_region = region;
                }
            }
        }
    }

    /// Choose the MPU window for a freshly quarantined range.
    #[cfg(any(test, feature = "mpu-protect"))]
    fn protection_window(&self, start_page: usize, page_count: usize) -> (usize, usize) {
        let mut region_start = start_page;
        let mut region_end = start_page + page_count;
        while region_start > 0 && !self.allocated.test(region_start - 1) {
            region_start -= 1;
        }
        while region_end < self.total_pages && !self.allocated.test(region_end) {
            region_end += 1;
        }

        let region_addr = self.page_address(region_start) as usize;
        let region_end_addr = self.page_address(region_end) as usize;
        let new_addr = self.page_address(start_page) as usize;

        let mut size = util::floor_pow2(region_end_addr - region_addr);
        let mut addr = util::align_down(region_addr, size);
        while size > PAGE_SIZE {
            if addr >= region_addr && addr + size <= region_end_addr {
                break;
            }
            size /= 2;
            addr = util::align_down(new_addr, size);
        }
        (addr, size)
    }

    /// Run whichever pre-operation verifications the build enables; any
    /// failure is fatal.
    fn run_integrity_checks(&self) {
        if QUARANTINE_CHECK_LEVEL > 0 && !self.verify_quarantine() {
            platform::abort_with_message("zoneheap: quarantine corruption detected\n");
        }
        if cfg!(feature = "check-all-allocated") && !self.verify_allocated() {
            platform::abort_with_message("zoneheap: allocated block corruption detected\n");
        }
    }

    /// Validate every active quarantine entry: header, footer, mirrored
    /// pair, and (at higher check levels) the payload and padding fills.
    /// True when no active entries exist.
    pub fn verify_quarantine(&self) -> bool {
        for i in 0..QuarantineTable::capacity() {
            let entry = self.quarantine.entry_at(i);
            if !entry.active {
                continue;
            }

            let header = self.page_address(entry.start_page as usize) as *mut BlockHeader;
            unsafe {
                if !guard::validate_header(header) {
                    return false;
                }
                let footer = guard::footer_from_header(header);
                if !guard::validate_footer(footer) {
                    return false;
                }
                if !guard::validate_pair(&*header, &*footer) {
                    return false;
                }

                if QUARANTINE_CHECK_LEVEL >= 2 {
                    let payload = guard::user_data_from_header(header);
                    if !guard::validate_quarantine_payload(
                        payload,
                        (*header).requested_size as usize,
                    ) {
                        return false;
                    }
                }

                if QUARANTINE_CHECK_LEVEL >= 3 {
                    let pad_len = guard::padding_len(
                        (*header).requested_size as usize,
                        (*header).page_count as usize,
                    );
                    if pad_len > 0
                        && !guard::validate_padding(guard::padding_from_header(header), pad_len)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Walk the allocated bitmap and validate every live block found.
    /// Pages whose bit is set but which hold no valid header are presumed
    /// interior to a block already validated and are skipped.
    pub fn verify_allocated(&self) -> bool {
        let mut page = 0;
        while page < self.total_pages {
            if !self.allocated.test(page) {
                page += 1;
                continue;
            }

            let header = self.page_address(page) as *mut BlockHeader;
            unsafe {
                if !guard::validate_header(header) || (*header).start_page as usize != page {
                    page += 1;
                    continue;
                }

                let footer = guard::footer_from_header(header);
                if !guard::validate_footer(footer) {
                    return false;
                }
                if !guard::validate_pair(&*header, &*footer) {
                    return false;
                }

                page += (*header).page_count as usize;
            }
        }
        true
    }

    /// Run every verification the build enables, reporting instead of
    /// aborting.
    pub fn run_checks(&self) -> bool {
        let mut ok = true;
        if QUARANTINE_CHECK_LEVEL > 0 {
            ok = ok && self.verify_quarantine();
        }
        if cfg!(feature = "check-all-allocated") {
            ok = ok && self.verify_allocated();
        }
        ok
    }

    /// True iff `ptr` could be a user pointer of this zone. The lower bound
    /// excludes page 0's header so header addresses never test positive.
    pub fn owns_pointer(&self, ptr: *const u8) -> bool {
        if !self.initialized || ptr.is_null() {
            return false;
        }
        let addr = ptr as usize;
        let low = self.base as usize + HEADER_SIZE;
        let high = self.base as usize + self.total_pages * PAGE_SIZE;
        addr >= low && addr < high
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn free_bytes(&self) -> usize {
        if self.initialized {
            self.free_pages * PAGE_SIZE
        } else {
            0
        }
    }

    pub fn min_ever_free_bytes(&self) -> usize {
        if self.initialized {
            self.min_ever_free_pages * PAGE_SIZE
        } else {
            0
        }
    }

    pub fn total_bytes(&self) -> usize {
        if self.initialized {
            self.total_pages * PAGE_SIZE
        } else {
            0
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.total_bytes() - self.free_bytes()
    }

    pub fn successful_allocs(&self) -> usize {
        self.successful_allocs
    }

    pub fn successful_frees(&self) -> usize {
        self.successful_frees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QUARANTINE_CAPACITY, QUARANTINE_PATTERN};
    use std::boxed::Box;
    use std::vec::Vec;

    #[repr(C, align(1024))]
    struct Region16([u8; 16 * PAGE_SIZE]);

    #[repr(C, align(1024))]
    struct Region48([u8; 48 * PAGE_SIZE]);

    /// 16 pages whose base is aligned to the whole-region size, so MPU
    /// window selection is deterministic.
    #[repr(C, align(16384))]
    struct AlignedRegion16([u8; 16 * PAGE_SIZE]);

    fn zone16() -> (PageAllocator, Box<Region16>) {
        let mut region = Box::new(Region16([0; 16 * PAGE_SIZE]));
        let mut zone = PageAllocator::new();
        unsafe { zone.init(region.0.as_mut_ptr(), 16 * PAGE_SIZE, 0) };
        (zone, region)
    }

    #[test]
    fn uninitialized_zone_is_inert() {
        let mut zone = PageAllocator::new();
        unsafe {
            assert!(zone.allocate(100).is_null());
            zone.deallocate(ptr::null_mut());
        }
        assert_eq!(zone.free_bytes(), 0);
        assert_eq!(zone.min_ever_free_bytes(), 0);
        assert_eq!(zone.total_bytes(), 0);
        assert_eq!(zone.used_bytes(), 0);
        assert!(!zone.owns_pointer(0x1000 as *const u8));
        assert!(zone.verify_quarantine());
        assert!(zone.verify_allocated());
    }

    #[test]
    fn allocate_stamps_header_footer_and_padding() {
        let (mut zone, region) = zone16();
        let base = region.0.as_ptr() as usize;
        unsafe {
            let user = zone.allocate(100);
            assert_eq!(user as usize, base + HEADER_SIZE);
            assert_eq!(zone.free_bytes(), 15 * PAGE_SIZE);
            assert_eq!(zone.min_ever_free_bytes(), 15 * PAGE_SIZE);
            assert_eq!(zone.successful_allocs(), 1);

            let header = guard::header_from_user_data(user);
            assert!(guard::validate_header(header));
            assert_eq!((*header).requested_size, 100);
            assert_eq!((*header).start_page, 0);
            assert_eq!((*header).page_count, 1);
            assert_eq!((*header).sequence_num, 0);

            let footer = guard::footer_from_header(header);
            assert_eq!(footer as usize, base + HEADER_SIZE + 100);
            assert!(guard::validate_footer(footer));
            assert!(guard::validate_pair(&*header, &*footer));

            let pad_len = guard::padding_len(100, 1);
            assert!(guard::validate_padding(
                guard::padding_from_header(header),
                pad_len
            ));
        }
    }

    #[test]
    fn allocation_is_first_fit() {
        let (mut zone, _region) = zone16();
        unsafe {
            let a = zone.allocate(100);
            let b = zone.allocate(100);
            let c = zone.allocate(100);
            assert_eq!(b as usize - a as usize, PAGE_SIZE);
            assert_eq!(c as usize - b as usize, PAGE_SIZE);

            // Freeing the middle block does not reopen its page (it is
            // quarantined); the next allocation is first-fit after c.
            zone.deallocate(b);
            let d = zone.allocate(100);
            assert_eq!(d as usize - c as usize, PAGE_SIZE);
        }
    }

    #[test]
    fn zero_size_is_rejected_without_consuming_a_sequence() {
        let (mut zone, _region) = zone16();
        unsafe {
            assert!(zone.allocate(0).is_null());
            let user = zone.allocate(1);
            let header = guard::header_from_user_data(user);
            assert_eq!((*header).sequence_num, 0);
        }
        assert_eq!(zone.successful_allocs(), 1);
    }

    #[test]
    fn exact_fit_leaves_no_padding() {
        let (mut zone, _region) = zone16();
        let size = PAGE_SIZE - HEADER_SIZE - FOOTER_SIZE;
        unsafe {
            let user = zone.allocate(size);
            assert!(!user.is_null());
            let header = guard::header_from_user_data(user);
            assert_eq!((*header).page_count, 1);
            assert_eq!(guard::padding_len(size, 1), 0);
            assert!(guard::validate_footer(guard::footer_from_header(header)));
            zone.deallocate(user);
        }
        assert!(zone.verify_quarantine());
    }

    #[test]
    fn oversized_requests_fail_cleanly() {
        let (mut zone, _region) = zone16();
        unsafe {
            // Needs 17 pages once framed.
            assert!(zone.allocate(17 * PAGE_SIZE).is_null());
            // Fill the whole zone, then ask for one more page.
            let all = zone.allocate(16 * PAGE_SIZE - HEADER_SIZE - FOOTER_SIZE);
            assert!(!all.is_null());
            assert_eq!(zone.free_bytes(), 0);
            assert!(zone.allocate(1).is_null());
        }
        assert_eq!(zone.successful_allocs(), 1);
    }

    #[test]
    fn free_moves_pages_to_quarantine() {
        let (mut zone, _region) = zone16();
        unsafe {
            let user = zone.allocate(100);
            zone.deallocate(user);

            // Pages are still busy, just no longer live.
            assert_eq!(zone.free_bytes(), 15 * PAGE_SIZE);
            assert!(zone.in_use.test(0));
            assert!(!zone.allocated.test(0));
            assert_eq!(zone.quarantine.count(), 1);
            assert_eq!(zone.successful_frees(), 1);

            let entry = (0..QuarantineTable::capacity())
                .map(|i| *zone.quarantine.entry_at(i))
                .find(|e| e.active)
                .unwrap();
            assert_eq!(entry.free_sequence, 1);
            assert_eq!(entry.start_page, 0);
            assert_eq!(entry.requested_size, 100);

            // Payload is scrubbed; the frame survives for later checks.
            for i in 0..100 {
                assert_eq!(user.add(i).read(), QUARANTINE_PATTERN);
            }
            assert!(zone.verify_quarantine());
        }
    }

    #[test]
    fn two_single_page_blocks_bitmap_states() {
        let (mut zone, _region) = zone16();
        unsafe {
            let a = zone.allocate(500);
            let b = zone.allocate(500);
            assert_eq!(b as usize - a as usize, PAGE_SIZE);

            zone.deallocate(a);
            assert!(zone.in_use.test(0));
            assert!(zone.in_use.test(1));
            assert!(!zone.allocated.test(0));
            assert!(zone.allocated.test(1));
        }
    }

    #[test]
    fn quarantine_pressure_evicts_fifo_and_clears() {
        let mut region = Box::new(Region48([0; 48 * PAGE_SIZE]));
        let mut zone = PageAllocator::new();
        unsafe {
            zone.init(region.0.as_mut_ptr(), 48 * PAGE_SIZE, 0);

            for _ in 0..QUARANTINE_CAPACITY + 1 {
                let user = zone.allocate(100);
                assert!(!user.is_null());
                zone.deallocate(user);
            }

            // 33 cycles walked pages 0..=32; the last free displaced the
            // very first entry, returning page 0 to the pool.
            assert_eq!(zone.quarantine.count(), QUARANTINE_CAPACITY);
            assert!(!zone.in_use.test(0));
            assert!(zone.in_use.test(1));
            assert_eq!(zone.free_bytes(), (48 - QUARANTINE_CAPACITY) * PAGE_SIZE);

            // Evicted pages are wiped to the cleared pattern.
            for i in 0..PAGE_SIZE {
                assert_eq!(region.0[i], 0);
            }

            // And first-fit immediately reuses the reclaimed page 0.
            let next = zone.allocate(100);
            assert_eq!(next as usize, region.0.as_ptr() as usize + HEADER_SIZE);
        }
    }

    #[test]
    fn accounting_invariants_hold_through_mixed_traffic() {
        let mut region = Box::new(Region48([0; 48 * PAGE_SIZE]));
        let mut zone = PageAllocator::new();
        unsafe {
            zone.init(region.0.as_mut_ptr(), 48 * PAGE_SIZE, 0);

            let mut live: Vec<*mut u8> = Vec::new();
            let sizes = [100usize, 960, 1500, 3000, 64, 2048];
            for (round, &size) in sizes.iter().cycle().take(40).enumerate() {
                let user = zone.allocate(size);
                if user.is_null() {
                    break;
                }
                live.push(user);
                if round % 3 == 2 {
                    let victim = live.remove(0);
                    zone.deallocate(victim);
                }

                // allocated ⊆ in_use, and the free count mirrors the bitmap.
                for page in 0..48 {
                    if zone.allocated.test(page) {
                        assert!(zone.in_use.test(page));
                    }
                }
                assert_eq!(zone.free_pages, 48 - zone.in_use.count_set());
                assert!(zone.min_ever_free_pages <= zone.free_pages);
                assert!(zone.verify_quarantine());
                assert!(zone.verify_allocated());
            }
        }
    }

    #[test]
    fn calloc_zeroes_and_rejects_overflow() {
        let (mut zone, region) = zone16();
        unsafe {
            let user = zone.calloc(4, 250);
            assert_eq!(user as usize, region.0.as_ptr() as usize + HEADER_SIZE);
            assert_eq!(zone.free_bytes(), 15 * PAGE_SIZE);
            for i in 0..1000 {
                assert_eq!(user.add(i).read(), 0);
            }

            assert!(zone.calloc(usize::MAX, 2).is_null());
            assert!(zone.calloc(2, usize::MAX).is_null());
            assert!(zone.calloc(0, 8).is_null());
        }
    }

    #[test]
    fn owns_pointer_excludes_first_header() {
        let (zone, region) = zone16();
        let base = region.0.as_ptr() as usize;
        assert!(!zone.owns_pointer((base + HEADER_SIZE - 1) as *const u8));
        assert!(zone.owns_pointer((base + HEADER_SIZE) as *const u8));
        assert!(zone.owns_pointer((base + 16 * PAGE_SIZE - 1) as *const u8));
        assert!(!zone.owns_pointer((base + 16 * PAGE_SIZE) as *const u8));
        assert!(!zone.owns_pointer(ptr::null()));
    }

    #[test]
    fn verify_allocated_flags_corrupt_footer() {
        let (mut zone, _region) = zone16();
        unsafe {
            let user = zone.allocate(100);
            assert!(zone.verify_allocated());
            // One byte past the payload lands in the footer.
            user.add(100).write(0xA5);
            assert!(!zone.verify_allocated());
        }
    }

    #[test]
    fn verify_quarantine_flags_scribbled_header() {
        let (mut zone, mut region) = zone16();
        unsafe {
            let user = zone.allocate(100);
            zone.deallocate(user);
            assert!(zone.verify_quarantine());

            // A use-after-free writing before the payload corrupts the
            // quarantined header.
            region.0.as_mut_ptr().add(4).write(0x77);
            assert!(!zone.verify_quarantine());
        }
    }

    #[test]
    fn interior_pages_of_multi_page_blocks_are_skipped() {
        let (mut zone, _region) = zone16();
        unsafe {
            // 3 pages: bits set on all three, header only on the first.
            let user = zone.allocate(2 * PAGE_SIZE + 100);
            let header = guard::header_from_user_data(user);
            assert_eq!((*header).page_count, 3);
            assert!(zone.verify_allocated());
            zone.deallocate(user);
            assert!(zone.verify_quarantine());
            assert_eq!(zone.free_bytes(), 13 * PAGE_SIZE);
        }
    }

    #[test]
    fn protection_window_between_live_neighbors() {
        let (mut zone, region) = zone16();
        let base = region.0.as_ptr() as usize;
        unsafe {
            let a = zone.allocate(100);
            let b = zone.allocate(100);
            let c = zone.allocate(100);
            assert!(!a.is_null() && !c.is_null());
            zone.deallocate(b);

            // Pages 0 and 2 are live, so the window is exactly page 1.
            let (addr, size) = zone.protection_window(1, 1);
            assert_eq!(addr, base + PAGE_SIZE);
            assert_eq!(size, PAGE_SIZE);
        }
    }

    #[test]
    fn protection_window_expands_over_free_pages() {
        let mut region = Box::new(AlignedRegion16([0; 16 * PAGE_SIZE]));
        let base = region.0.as_ptr() as usize;
        let mut zone = PageAllocator::new();
        unsafe {
            zone.init(region.0.as_mut_ptr(), 16 * PAGE_SIZE, 0);
            let user = zone.allocate(100);
            zone.deallocate(user);

            // Nothing is live: the window grows to the whole (self-aligned)
            // zone.
            let (addr, size) = zone.protection_window(0, 1);
            assert_eq!(addr, base);
            assert_eq!(size, 16 * PAGE_SIZE);
        }
    }

    #[test]
    fn mpu_update_coalesces_and_reassigns_regions() {
        use crate::mpu::testing::{exclusive_table, reset, RecordingBackend};

        let _guard = exclusive_table();
        reset();
        static BACKEND: RecordingBackend = RecordingBackend::new();
        mpu::set_backend(&BACKEND);
        BACKEND.calls.lock().unwrap().clear();

        let mut region = Box::new(AlignedRegion16([0; 16 * PAGE_SIZE]));
        let base = region.0.as_ptr() as usize;
        let mut zone = PageAllocator::new();
        unsafe {
            zone.init(region.0.as_mut_ptr(), 16 * PAGE_SIZE, 0);
            let a = zone.allocate(100);
            let b = zone.allocate(100);
            let c = zone.allocate(100);
            assert!(!c.is_null());

            zone.deallocate(b);
            zone.update_mpu_protection(1, 1);

            // Page 1 sits between live pages: a one-page window.
            {
                let calls = BACKEND.calls.lock().unwrap();
                assert_eq!(*calls, [(base + PAGE_SIZE, PAGE_SIZE, true)]);
            }
            let entry = (0..QuarantineTable::capacity())
                .map(|i| *zone.quarantine.entry_at(i))
                .find(|e| e.active && e.start_page == 1)
                .unwrap();
            assert_eq!(entry.mpu_region, crate::config::MPU_FIRST_REGION);

            // Freeing page 0 widens the window over both quarantined pages;
            // the old region is released and both entries share the new one.
            zone.deallocate(a);
            zone.update_mpu_protection(0, 1);
            {
                let calls = BACKEND.calls.lock().unwrap();
                assert_eq!(
                    calls[1..],
                    [
                        (base + PAGE_SIZE, PAGE_SIZE, false),
                        (base, 2 * PAGE_SIZE, true)
                    ]
                );
            }
            for page in [0u16, 1] {
                let entry = (0..QuarantineTable::capacity())
                    .map(|i| *zone.quarantine.entry_at(i))
                    .find(|e| e.active && e.start_page == page)
                    .unwrap();
                assert_eq!(entry.mpu_region, crate::config::MPU_FIRST_REGION);
            }
        }
        reset();
    }
}
