//! # Index Page Constants
//!
//! This module centralizes the numeric layout constants of an index page,
//! grouping interdependent values together. Offsets that are derived from
//! other offsets are written as expressions so that a change to one size
//! propagates, and the relationships that the page algorithms rely on are
//! enforced by compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (16384 bytes)
//!       │
//!       ├─> FIL_HEADER_SIZE (24) ──> PAGE_HEADER (index header start)
//!       │                                │
//!       │                                └─> PAGE_DATA (= PAGE_HEADER + 36)
//!       │                                       │
//!       │                                       ├─> PAGE_NEW_INFIMUM / SUPREMUM (compact)
//!       │                                       └─> PAGE_OLD_INFIMUM / SUPREMUM (redundant)
//!       │
//!       └─> FIL_TRAILER_SIZE (8) ──> PAGE_DIR (directory grows down from here)
//!
//! PAGE_DIR_SLOT_MAX_N_OWNED (8)
//!       │
//!       ├─> split: a slot reaching MAX+1 is cut into MAX/2 and MAX/2 + 1
//!       │
//!       └─> PAGE_DIR_SLOT_MIN_N_OWNED (4): MIN - 1 + MIN must fit in MAX
//!             so that an underfull slot can always merge with a neighbour
//!             that owns exactly MIN records.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `PAGE_SIZE <= 65536` (every in-page pointer is a 2-byte offset)
//! 2. `2 * MIN - 1 <= MAX` (merge of an underfull slot never overflows)
//! 3. `MAX / 2 >= MIN` (both halves of a split slot are valid)
//! 4. Supremum end of either format stays below the first directory slot

// ============================================================================
// PAGE FRAME
// ============================================================================

/// Size of each index page in bytes (16KB).
pub const PAGE_SIZE: usize = 16384;

/// Generic page header shared by every page type (checksum, page number,
/// LSN, page type).
pub const FIL_HEADER_SIZE: usize = 24;

/// Trailer at the end of every page (low 32 bits of the LSN plus padding).
pub const FIL_TRAILER_SIZE: usize = 8;

pub const FIL_PAGE_OFFSET: usize = 4;
pub const FIL_PAGE_LSN: usize = 8;
pub const FIL_PAGE_TYPE: usize = 16;

const _: () = assert!(PAGE_SIZE <= 1 << 16, "page offsets are 2-byte values");

// ============================================================================
// INDEX PAGE HEADER
// Offsets are relative to PAGE_HEADER.
// ============================================================================

/// Start of the index page header.
pub const PAGE_HEADER: usize = FIL_HEADER_SIZE;

pub const PAGE_N_DIR_SLOTS: usize = 0;
pub const PAGE_HEAP_TOP: usize = 2;
pub const PAGE_N_HEAP: usize = 4;
pub const PAGE_FREE: usize = 6;
pub const PAGE_GARBAGE: usize = 8;
pub const PAGE_LAST_INSERT: usize = 10;
pub const PAGE_DIRECTION_B: usize = 13;
pub const PAGE_N_DIRECTION: usize = 14;
pub const PAGE_N_RECS: usize = 16;
pub const PAGE_MAX_TRX_ID: usize = 18;
pub const PAGE_LEVEL: usize = 26;
pub const PAGE_INDEX_ID: usize = 28;

/// Size of the index page header in bytes.
pub const INDEX_HEADER_SIZE: usize = 36;

/// Start of the record heap (first byte of the infimum record's header).
pub const PAGE_DATA: usize = PAGE_HEADER + INDEX_HEADER_SIZE;

/// Bit of PAGE_N_HEAP telling that the page uses the compact record format.
pub const PAGE_N_HEAP_COMPACT_FLAG: u16 = 0x8000;

/// Direction codes stored in the low 3 bits of PAGE_DIRECTION_B.
pub const PAGE_LEFT: u8 = 1;
pub const PAGE_RIGHT: u8 = 2;
pub const PAGE_SAME_REC: u8 = 3;
pub const PAGE_SAME_PAGE: u8 = 4;
pub const PAGE_NO_DIRECTION: u8 = 5;

const _: () = assert!(PAGE_INDEX_ID + 8 == INDEX_HEADER_SIZE);

// ============================================================================
// RECORD HEADERS
// ============================================================================

/// Fixed header bytes before the origin of a redundant record.
pub const REC_N_OLD_EXTRA_BYTES: usize = 6;

/// Fixed header bytes before the origin of a compact record.
pub const REC_N_NEW_EXTRA_BYTES: usize = 5;

pub const REC_MAX_N_FIELDS: usize = 1023;

/// Info bit marking the minimum record of the leftmost non-leaf page.
pub const REC_INFO_MIN_REC_FLAG: u8 = 0x10;

/// Info bit marking a delete-marked record.
pub const REC_INFO_DELETED_FLAG: u8 = 0x20;

pub const REC_INFO_BITS_MASK: u8 = 0xF0;
pub const REC_N_OWNED_MASK: u8 = 0x0F;

/// Compact record status values (low 3 bits of the heap number field).
pub const REC_STATUS_ORDINARY: u8 = 0;
pub const REC_STATUS_NODE_PTR: u8 = 1;
pub const REC_STATUS_INFIMUM: u8 = 2;
pub const REC_STATUS_SUPREMUM: u8 = 3;

/// Size of a child page number stored at the end of a node pointer record.
pub const REC_NODE_PTR_SIZE: usize = 4;

const _: () = assert!(REC_N_OLD_EXTRA_BYTES == REC_N_NEW_EXTRA_BYTES + 1);

// ============================================================================
// SENTINEL RECORDS
// ============================================================================

pub const PAGE_NEW_INFIMUM: usize = PAGE_DATA + REC_N_NEW_EXTRA_BYTES;
pub const PAGE_NEW_SUPREMUM: usize = PAGE_DATA + 2 * REC_N_NEW_EXTRA_BYTES + 8;
pub const PAGE_NEW_SUPREMUM_END: usize = PAGE_NEW_SUPREMUM + 8;

pub const PAGE_OLD_INFIMUM: usize = PAGE_DATA + 1 + REC_N_OLD_EXTRA_BYTES;
pub const PAGE_OLD_SUPREMUM: usize = PAGE_DATA + 2 + 2 * REC_N_OLD_EXTRA_BYTES + 8;
pub const PAGE_OLD_SUPREMUM_END: usize = PAGE_OLD_SUPREMUM + 9;

// ============================================================================
// HEAP
// ============================================================================

pub const PAGE_HEAP_NO_INFIMUM: usize = 0;
pub const PAGE_HEAP_NO_SUPREMUM: usize = 1;
pub const PAGE_HEAP_NO_USER_LOW: usize = 2;

/// Heap numbers are 13-bit values.
pub const PAGE_HEAP_NO_LIMIT: usize = 1 << 13;

// ============================================================================
// PAGE DIRECTORY
// ============================================================================

/// The directory ends this many bytes before the end of the page.
pub const PAGE_DIR: usize = FIL_TRAILER_SIZE;

pub const PAGE_DIR_SLOT_SIZE: usize = 2;

/// Minimum number of records owned by a non-sentinel slot.
pub const PAGE_DIR_SLOT_MIN_N_OWNED: usize = 4;

/// Maximum number of records owned by any slot.
pub const PAGE_DIR_SLOT_MAX_N_OWNED: usize = 8;

const _: () = assert!(
    2 * PAGE_DIR_SLOT_MIN_N_OWNED - 1 <= PAGE_DIR_SLOT_MAX_N_OWNED,
    "an underfull slot must be able to merge with a neighbour owning MIN records"
);

const _: () = assert!(
    PAGE_DIR_SLOT_MAX_N_OWNED / 2 >= PAGE_DIR_SLOT_MIN_N_OWNED,
    "both halves of a split slot must own at least MIN records"
);

const _: () = assert!(PAGE_DIR_SLOT_MAX_N_OWNED < 16, "n_owned is a 4-bit field");

const _: () = assert!(
    PAGE_OLD_SUPREMUM_END + 2 * PAGE_DIR_SLOT_SIZE < PAGE_SIZE - PAGE_DIR,
    "an empty page must hold its sentinels and two slots"
);

// ============================================================================
// COMPRESSED PAGES
// ============================================================================

/// Size of a dense directory entry of a compressed page.
pub const PAGE_ZIP_DIR_SLOT_SIZE: usize = 2;

pub const DATA_TRX_ID_LEN: usize = 6;
pub const DATA_ROLL_PTR_LEN: usize = 7;

/// Uncompressed bytes stored per record on a clustered leaf page.
pub const PAGE_ZIP_CLUST_LEAF_SLOT_SIZE: usize =
    PAGE_ZIP_DIR_SLOT_SIZE + DATA_TRX_ID_LEN + DATA_ROLL_PTR_LEN;

/// Size of one externally stored column reference.
pub const BTR_EXTERN_FIELD_REF_SIZE: usize = 20;

pub const PAGE_ZIP_MIN_SIZE: usize = 1024;

pub const DEFAULT_COMPRESSION_LEVEL: u8 = 6;
pub const MAX_COMPRESSION_LEVEL: u8 = 9;

const _: () = assert!(PAGE_ZIP_MIN_SIZE <= PAGE_SIZE);
