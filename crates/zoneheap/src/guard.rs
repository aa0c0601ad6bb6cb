//! Block framing: header and footer records, fill patterns, and the
//! pointer arithmetic between the pieces of a block.
//!
//! A block occupies a whole run of pages laid out as
//! `[header][payload][footer][padding]`. Header and footer carry the same
//! logical fields under distinct magics so one-sided corruption (an overrun
//! from a neighboring block, a stray write through a stale pointer) is
//! caught by cross-validation. The magic and the checksum are verified
//! separately: a bad magic means "this is not a header", a bad checksum
//! means "this was a header and something scribbled on it".

use crate::config::{
    CLEARED_PATTERN, FOOTER_MAGIC, FOOTER_SIZE, HEADER_MAGIC, HEADER_SIZE, PADDING_PATTERN,
    PAGE_SIZE, QUARANTINE_PATTERN,
};
use core::mem::size_of;

/// Header stamped at the first byte of a block's first page.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockHeader {
    pub magic: u32,
    pub requested_size: u32,
    pub start_page: u16,
    pub page_count: u16,
    pub zone_index: u8,
    reserved: [u8; 3],
    pub sequence_num: u32,
    reserved2: u32,
    reserved3: u32,
    pub checksum: u32,
}

/// Footer stamped immediately after the payload. Mirrors the header's
/// logical fields under its own magic.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockFooter {
    pub magic: u32,
    pub requested_size: u32,
    pub start_page: u16,
    pub page_count: u16,
    pub zone_index: u8,
    reserved: [u8; 3],
    pub sequence_num: u32,
    reserved2: u32,
    reserved3: u32,
    pub checksum: u32,
}

const _: () = assert!(size_of::<BlockHeader>() == HEADER_SIZE);
const _: () = assert!(size_of::<BlockFooter>() == FOOTER_SIZE);

/// 32-bit words covered by the checksum: every word of the record except
/// the checksum itself.
const CHECKSUM_WORDS: usize = HEADER_SIZE / size_of::<u32>() - 1;

/// XOR of `words` consecutive u32s starting at `ptr`.
///
/// # Safety
/// `ptr` must be valid for reads of `words * 4` bytes and 4-byte aligned.
#[inline]
unsafe fn xor_words(ptr: *const u32, words: usize) -> u32 {
    let mut acc = 0;
    for i in 0..words {
        acc ^= ptr.add(i).read();
    }
    acc
}

/// Populate a header record at `dest`.
///
/// # Safety
/// `dest` must be valid for writes of `HEADER_SIZE` bytes and 4-byte aligned.
pub unsafe fn write_header(
    dest: *mut u8,
    requested_size: u32,
    start_page: u16,
    page_count: u16,
    zone_index: u8,
    sequence_num: u32,
) {
    let header = dest as *mut BlockHeader;
    header.write(BlockHeader {
        magic: HEADER_MAGIC,
        requested_size,
        start_page,
        page_count,
        zone_index,
        reserved: [0; 3],
        sequence_num,
        reserved2: 0,
        reserved3: 0,
        checksum: 0,
    });
    (*header).checksum = xor_words(header as *const u32, CHECKSUM_WORDS);
}

/// Populate a footer record at `dest`.
///
/// # Safety
/// `dest` must be valid for writes of `FOOTER_SIZE` bytes and 4-byte aligned.
pub unsafe fn write_footer(
    dest: *mut u8,
    requested_size: u32,
    start_page: u16,
    page_count: u16,
    zone_index: u8,
    sequence_num: u32,
) {
    let footer = dest as *mut BlockFooter;
    footer.write(BlockFooter {
        magic: FOOTER_MAGIC,
        requested_size,
        start_page,
        page_count,
        zone_index,
        reserved: [0; 3],
        sequence_num,
        reserved2: 0,
        reserved3: 0,
        checksum: 0,
    });
    (*footer).checksum = xor_words(footer as *const u32, CHECKSUM_WORDS);
}

/// True iff the magic matches and the checksum recomputes.
///
/// # Safety
/// `header` must be valid for reads of `HEADER_SIZE` bytes and 4-byte aligned.
pub unsafe fn validate_header(header: *const BlockHeader) -> bool {
    if (*header).magic != HEADER_MAGIC {
        return false;
    }
    (*header).checksum == xor_words(header as *const u32, CHECKSUM_WORDS)
}

/// True iff the magic matches and the checksum recomputes.
///
/// # Safety
/// `footer` must be valid for reads of `FOOTER_SIZE` bytes and 4-byte aligned.
pub unsafe fn validate_footer(footer: *const BlockFooter) -> bool {
    if (*footer).magic != FOOTER_MAGIC {
        return false;
    }
    (*footer).checksum == xor_words(footer as *const u32, CHECKSUM_WORDS)
}

/// True iff every mirrored field agrees between header and footer.
pub fn validate_pair(header: &BlockHeader, footer: &BlockFooter) -> bool {
    header.requested_size == footer.requested_size
        && header.start_page == footer.start_page
        && header.page_count == footer.page_count
        && header.zone_index == footer.zone_index
        && header.sequence_num == footer.sequence_num
}

/// Fill the padding tail of a block.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes.
#[inline]
pub unsafe fn fill_padding(ptr: *mut u8, len: usize) {
    core::ptr::write_bytes(ptr, PADDING_PATTERN, len);
}

/// Fill a freed payload with the quarantine pattern.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes.
#[inline]
pub unsafe fn fill_quarantine_payload(ptr: *mut u8, len: usize) {
    core::ptr::write_bytes(ptr, QUARANTINE_PATTERN, len);
}

/// Fill pages evicted from quarantine with the cleared pattern.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes.
#[inline]
pub unsafe fn fill_cleared_pages(ptr: *mut u8, len: usize) {
    core::ptr::write_bytes(ptr, CLEARED_PATTERN, len);
}

/// Byte-for-byte check of a region against a single fill byte.
/// Accumulates differences instead of returning early so a write-after-free
/// probe cannot learn the corruption offset from timing.
///
/// # Safety
/// `ptr` must be valid for reads of `len` bytes.
unsafe fn region_is(ptr: *const u8, len: usize, pattern: u8) -> bool {
    let expected = u64::from_le_bytes([pattern; 8]);
    let full_words = len / 8;
    let remainder = len % 8;

    let mut diff: u64 = 0;
    let words = ptr as *const u64;
    for i in 0..full_words {
        diff |= words.add(i).read_unaligned() ^ expected;
    }

    let tail = ptr.add(full_words * 8);
    for i in 0..remainder {
        diff |= (tail.add(i).read() ^ pattern) as u64;
    }

    diff == 0
}

/// # Safety
/// `ptr` must be valid for reads of `len` bytes.
pub unsafe fn validate_padding(ptr: *const u8, len: usize) -> bool {
    region_is(ptr, len, PADDING_PATTERN)
}

/// # Safety
/// `ptr` must be valid for reads of `len` bytes.
pub unsafe fn validate_quarantine_payload(ptr: *const u8, len: usize) -> bool {
    region_is(ptr, len, QUARANTINE_PATTERN)
}

/// Payload address of the block whose header is at `header`.
///
/// # Safety
/// `header` must point to a block header within its block's pages.
#[inline]
pub unsafe fn user_data_from_header(header: *mut BlockHeader) -> *mut u8 {
    (header as *mut u8).add(HEADER_SIZE)
}

/// Header address of the block owning the payload at `user_data`.
///
/// # Safety
/// `user_data` must be a payload pointer previously produced by this module.
#[inline]
pub unsafe fn header_from_user_data(user_data: *mut u8) -> *mut BlockHeader {
    user_data.sub(HEADER_SIZE) as *mut BlockHeader
}

/// Footer address, computed from the header's recorded payload size.
///
/// # Safety
/// `header` must point to a valid block header.
#[inline]
pub unsafe fn footer_from_header(header: *mut BlockHeader) -> *mut BlockFooter {
    (header as *mut u8).add(HEADER_SIZE + (*header).requested_size as usize) as *mut BlockFooter
}

/// Padding address, immediately after the footer.
///
/// # Safety
/// `header` must point to a valid block header.
#[inline]
pub unsafe fn padding_from_header(header: *mut BlockHeader) -> *mut u8 {
    (header as *mut u8).add(HEADER_SIZE + (*header).requested_size as usize + FOOTER_SIZE)
}

/// Length of the padding tail for a block of `page_count` pages holding
/// `requested_size` payload bytes. May be zero on an exact fit.
#[inline]
pub fn padding_len(requested_size: usize, page_count: usize) -> usize {
    let total = page_count * PAGE_SIZE;
    let used = HEADER_SIZE + requested_size + FOOTER_SIZE;
    debug_assert!(total >= used);
    total - used
}
