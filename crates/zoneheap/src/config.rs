//! Compile-time configuration.
//!
//! Geometry and limits are constants; behavior toggles are cargo features.
//! There is no runtime configuration surface of any kind.

/// Size of one page in bytes. Every allocation occupies whole pages.
pub const PAGE_SIZE: usize = 1024;

/// Size of the block header record in bytes.
pub const HEADER_SIZE: usize = 32;

/// Size of the block footer record in bytes.
pub const FOOTER_SIZE: usize = 32;

/// Maximum number of memory zones.
pub const MAX_ZONES: usize = 2;

/// Maximum number of pages a single zone may span (10 MiB at 1 KiB pages).
pub const MAX_PAGES_PER_ZONE: usize = 10240;

/// Capacity of the per-zone quarantine table.
pub const QUARANTINE_CAPACITY: usize = 32;

/// Header magic ("HEAD").
pub const HEADER_MAGIC: u32 = 0x4845_4144;

/// Footer magic ("FOOT").
pub const FOOTER_MAGIC: u32 = 0x464F_4F54;

/// Byte written into the padding tail of a block.
pub const PADDING_PATTERN: u8 = 0xFE;

/// Byte written over a payload when it enters quarantine.
pub const QUARANTINE_PATTERN: u8 = 0xCD;

/// Byte written over pages evicted from quarantine.
pub const CLEARED_PATTERN: u8 = 0x00;

/// First hardware MPU region the allocator may claim.
pub const MPU_FIRST_REGION: i8 = 4;

/// Number of MPU regions available to the allocator.
pub const MPU_REGION_COUNT: usize = 2;

/// Quarantine verification level selected by feature flags:
/// 0 = disabled, 1 = header + footer, 2 = + payload fill, 3 = + padding.
pub const QUARANTINE_CHECK_LEVEL: u8 = if cfg!(feature = "check-quarantine-padding") {
    3
} else if cfg!(feature = "check-quarantine-payload") {
    2
} else if cfg!(feature = "check-quarantine") {
    1
} else {
    0
};

// A page must fit a header, a footer, and at least one payload byte.
const _: () = assert!(PAGE_SIZE >= HEADER_SIZE + FOOTER_SIZE + 1);
// Page indices are stored as u16 in block headers and quarantine entries.
const _: () = assert!(MAX_PAGES_PER_ZONE <= u16::MAX as usize);
