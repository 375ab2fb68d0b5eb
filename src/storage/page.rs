//! # Index Page Layout
//!
//! Every 16KB index page has the same frame: a 24-byte file header, a 36-byte
//! index header, a heap of records growing upward from `PAGE_DATA`, and a
//! directory of 2-byte slots growing downward from the 8-byte trailer.
//!
//! ```text
//! 0        24                60                 heap_top        dir     16376  16384
//! +--------+-----------------+--------------------+---------------+--------+------+
//! | FIL    | index header    | infimum supremum   | free          | slots  | FIL  |
//! | header | (36 bytes)      | user records ...   | space         | n-1..0 | trlr |
//! +--------+-----------------+--------------------+---------------+--------+------+
//! ```
//!
//! ## File Header (24 bytes, big-endian)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  --------------------------------------------
//! 0       4     checksum    CRC-32C of bytes [4, PAGE_SIZE - 8)
//! 4       4     page_no     Page number within the tablespace
//! 8       8     lsn         End LSN of the last applied mini-transaction
//! 16      2     page_type   0x45BF (B-tree index) or 0x45BE (R-tree)
//! 18      6     reserved
//! ```
//!
//! ## Index Header (36 bytes at PAGE_HEADER, big-endian)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  -------------------------------------------
//! 0       2     n_dir_slots  Number of directory slots
//! 2       2     heap_top     First byte after the highest record
//! 4       2     n_heap       Heap records incl. sentinels and free ones;
//!                            bit 15 set for the compact record format
//! 6       2     free         First record of the free list (0 = empty)
//! 8       2     garbage      Bytes held by deleted records
//! 10      2     last_insert  Origin of the last inserted record (0 = none)
//! 12      2     direction    Low 3 bits: LEFT, RIGHT or NO_DIRECTION
//! 14      2     n_direction  Consecutive inserts in that direction
//! 16      2     n_recs       User records on the page
//! 18      8     max_trx_id   Highest transaction id that touched the page
//! 26      2     level        0 for leaf pages
//! 28      8     index_id     Owning index
//! ```
//!
//! ## Directory
//!
//! Slot `i` lives at `PAGE_SIZE - PAGE_DIR - 2 * (i + 1)`. Slot 0 points to
//! the infimum and owns only it; the last slot points to the supremum. Every
//! other slot owns between `PAGE_DIR_SLOT_MIN_N_OWNED` and
//! `PAGE_DIR_SLOT_MAX_N_OWNED` consecutive records ending at the record it
//! points to.

use crc::{Crc, CRC_32_ISCSI};
use eyre::{ensure, Result};
use zerocopy::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::*;
use crate::encoding::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::zerocopy_accessors;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x0000,
    RTree = 0x45BE,
    Index = 0x45BF,
}

impl PageType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x45BE => PageType::RTree,
            0x45BF => PageType::Index,
            _ => PageType::Unknown,
        }
    }
}

/// Record encoding of a page, read once from the compact flag of PAGE_N_HEAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFormat {
    Redundant,
    Compact,
}

impl RecordFormat {
    pub fn of(page: &[u8]) -> Self {
        if read_u16(page, PAGE_HEADER + PAGE_N_HEAP) & PAGE_N_HEAP_COMPACT_FLAG != 0 {
            RecordFormat::Compact
        } else {
            RecordFormat::Redundant
        }
    }

    pub fn infimum(self) -> usize {
        match self {
            RecordFormat::Redundant => PAGE_OLD_INFIMUM,
            RecordFormat::Compact => PAGE_NEW_INFIMUM,
        }
    }

    pub fn supremum(self) -> usize {
        match self {
            RecordFormat::Redundant => PAGE_OLD_SUPREMUM,
            RecordFormat::Compact => PAGE_NEW_SUPREMUM,
        }
    }

    pub fn supremum_end(self) -> usize {
        match self {
            RecordFormat::Redundant => PAGE_OLD_SUPREMUM_END,
            RecordFormat::Compact => PAGE_NEW_SUPREMUM_END,
        }
    }

    pub fn extra_bytes(self) -> usize {
        match self {
            RecordFormat::Redundant => REC_N_OLD_EXTRA_BYTES,
            RecordFormat::Compact => REC_N_NEW_EXTRA_BYTES,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FilHeader {
    checksum: U32,
    page_no: U32,
    lsn: U64,
    page_type: U16,
    reserved: [u8; 6],
}

impl FilHeader {
    zerocopy_accessors! {
        checksum: u32,
        page_no: u32,
        lsn: u64,
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= FIL_HEADER_SIZE,
            "buffer too small for FilHeader: {} < {}",
            data.len(),
            FIL_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..FIL_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read FilHeader: {:?}", e))
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u16(self.page_type.get())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexHeader {
    n_dir_slots: U16,
    heap_top: U16,
    n_heap: U16,
    free: U16,
    garbage: U16,
    last_insert: U16,
    direction: U16,
    n_direction: U16,
    n_recs: U16,
    max_trx_id: U64,
    level: U16,
    index_id: U64,
}

impl IndexHeader {
    zerocopy_accessors! {
        n_dir_slots: u16,
        heap_top: u16,
        free: u16,
        garbage: u16,
        last_insert: u16,
        n_direction: u16,
        n_recs: u16,
        max_trx_id: u64,
        level: u16,
        index_id: u64,
    }

    pub fn from_bytes(page: &[u8]) -> Result<&Self> {
        ensure!(
            page.len() >= PAGE_HEADER + INDEX_HEADER_SIZE,
            "buffer too small for IndexHeader: {} < {}",
            page.len(),
            PAGE_HEADER + INDEX_HEADER_SIZE
        );

        Self::ref_from_bytes(&page[PAGE_HEADER..PAGE_HEADER + INDEX_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read IndexHeader: {:?}", e))
    }

    pub fn n_heap(&self) -> u16 {
        self.n_heap.get() & !PAGE_N_HEAP_COMPACT_FLAG
    }

    pub fn is_compact(&self) -> bool {
        self.n_heap.get() & PAGE_N_HEAP_COMPACT_FLAG != 0
    }

    pub fn direction(&self) -> u8 {
        (self.direction.get() & 0x7) as u8
    }
}

/// Parameters of a freshly created index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInit {
    pub format: RecordFormat,
    pub page_type: PageType,
    pub level: u16,
    pub index_id: u64,
    pub max_trx_id: u64,
}

impl PageInit {
    pub fn leaf(format: RecordFormat, index_id: u64) -> Self {
        Self {
            format,
            page_type: PageType::Index,
            level: 0,
            index_id,
            max_trx_id: 0,
        }
    }

    /// Reads the parameters that survive `create_empty` from an existing page.
    pub fn of(page: &[u8]) -> Self {
        Self {
            format: RecordFormat::of(page),
            page_type: page_type(page),
            level: level(page),
            index_id: index_id(page),
            max_trx_id: max_trx_id(page),
        }
    }
}

const COMPACT_SENTINELS: [u8; 26] = [
    0x01, 0x00, 0x02, 0x00, 0x0d, b'i', b'n', b'f', b'i', b'm', b'u', b'm', 0x00, 0x01, 0x00,
    0x0b, 0x00, 0x00, b's', b'u', b'p', b'r', b'e', b'm', b'u', b'm',
];

const REDUNDANT_SENTINELS: [u8; 31] = [
    0x08,
    0x01,
    0x00,
    0x00,
    0x03,
    (PAGE_OLD_SUPREMUM >> 8) as u8,
    PAGE_OLD_SUPREMUM as u8,
    b'i',
    b'n',
    b'f',
    b'i',
    b'm',
    b'u',
    b'm',
    0x00,
    0x09,
    0x01,
    0x00,
    0x08,
    0x03,
    0x00,
    0x00,
    b's',
    b'u',
    b'p',
    b'r',
    b'e',
    b'm',
    b'u',
    b'm',
    0x00,
];

const _: () = assert!(PAGE_DATA + COMPACT_SENTINELS.len() == PAGE_NEW_SUPREMUM_END);
const _: () = assert!(PAGE_DATA + REDUNDANT_SENTINELS.len() == PAGE_OLD_SUPREMUM_END);

/// Formats `page` as an empty index page.
///
/// The checksum, page number and LSN of the file header are left alone; the
/// rest of the page below the trailer is rewritten.
pub fn create(page: &mut [u8], init: &PageInit) {
    write_u16(page, FIL_PAGE_TYPE, init.page_type as u16);
    page[FIL_PAGE_TYPE + 2..FIL_HEADER_SIZE].fill(0);
    page[PAGE_HEADER..PAGE_SIZE - FIL_TRAILER_SIZE].fill(0);

    let (sentinels, n_heap): (&[u8], u16) = match init.format {
        RecordFormat::Compact => (&COMPACT_SENTINELS, 2 | PAGE_N_HEAP_COMPACT_FLAG),
        RecordFormat::Redundant => (&REDUNDANT_SENTINELS, 2),
    };
    page[PAGE_DATA..PAGE_DATA + sentinels.len()].copy_from_slice(sentinels);

    set_header_field(page, PAGE_N_DIR_SLOTS, 2);
    set_header_field(page, PAGE_HEAP_TOP, init.format.supremum_end());
    write_u16(page, PAGE_HEADER + PAGE_N_HEAP, n_heap);
    set_direction(page, PAGE_NO_DIRECTION);
    write_u64(page, PAGE_HEADER + PAGE_MAX_TRX_ID, init.max_trx_id);
    set_header_field(page, PAGE_LEVEL, init.level as usize);
    write_u64(page, PAGE_HEADER + PAGE_INDEX_ID, init.index_id);

    set_slot_rec(page, 0, init.format.infimum());
    set_slot_rec(page, 1, init.format.supremum());
}

/// Resets a page to the empty state, keeping its type, level, index id and
/// max transaction id.
pub fn create_empty(page: &mut [u8]) {
    let init = PageInit::of(page);
    create(page, &init);
}

/// Allocates a zeroed page buffer, stamps its page number and formats it.
pub fn new_page(page_no: u32, init: &PageInit) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    write_u32(&mut page, FIL_PAGE_OFFSET, page_no);
    create(&mut page, init);
    page
}

/// Checks that a buffer is an index page this crate can operate on.
pub fn check_frame(page: &[u8]) -> Result<()> {
    ensure!(
        page.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        page.len(),
        PAGE_SIZE
    );
    ensure!(
        page_type(page) != PageType::Unknown,
        "not an index page: type {:#06x}",
        read_u16(page, FIL_PAGE_TYPE)
    );
    Ok(())
}

#[inline]
pub fn header_field(page: &[u8], field: usize) -> usize {
    read_u16(page, PAGE_HEADER + field) as usize
}

#[inline]
pub fn set_header_field(page: &mut [u8], field: usize, value: usize) {
    write_u16(page, PAGE_HEADER + field, value as u16);
}

pub fn page_no(page: &[u8]) -> u32 {
    read_u32(page, FIL_PAGE_OFFSET)
}

pub fn page_type(page: &[u8]) -> PageType {
    PageType::from_u16(read_u16(page, FIL_PAGE_TYPE))
}

pub fn is_rtree(page: &[u8]) -> bool {
    page_type(page) == PageType::RTree
}

pub fn page_lsn(page: &[u8]) -> u64 {
    read_u64(page, FIL_PAGE_LSN)
}

/// Stamps the page LSN in the header and its low half in the trailer.
pub fn set_page_lsn(page: &mut [u8], lsn: u64) {
    write_u64(page, FIL_PAGE_LSN, lsn);
    write_u32(page, PAGE_SIZE - 4, lsn as u32);
}

pub fn n_heap(page: &[u8]) -> usize {
    (read_u16(page, PAGE_HEADER + PAGE_N_HEAP) & !PAGE_N_HEAP_COMPACT_FLAG) as usize
}

pub fn set_n_heap(page: &mut [u8], n: usize) {
    let flag = read_u16(page, PAGE_HEADER + PAGE_N_HEAP) & PAGE_N_HEAP_COMPACT_FLAG;
    write_u16(page, PAGE_HEADER + PAGE_N_HEAP, flag | n as u16);
}

pub fn n_recs(page: &[u8]) -> usize {
    header_field(page, PAGE_N_RECS)
}

pub fn heap_top(page: &[u8]) -> usize {
    header_field(page, PAGE_HEAP_TOP)
}

pub fn garbage(page: &[u8]) -> usize {
    header_field(page, PAGE_GARBAGE)
}

pub fn has_garbage(page: &[u8]) -> bool {
    garbage(page) != 0
}

pub fn direction(page: &[u8]) -> u8 {
    page[PAGE_HEADER + PAGE_DIRECTION_B] & 0x7
}

pub fn set_direction(page: &mut [u8], direction: u8) {
    let b = &mut page[PAGE_HEADER + PAGE_DIRECTION_B];
    *b = (*b & !0x7) | direction;
}

pub fn level(page: &[u8]) -> u16 {
    read_u16(page, PAGE_HEADER + PAGE_LEVEL)
}

pub fn is_leaf(page: &[u8]) -> bool {
    level(page) == 0
}

pub fn is_empty(page: &[u8]) -> bool {
    n_recs(page) == 0
}

pub fn index_id(page: &[u8]) -> u64 {
    read_u64(page, PAGE_HEADER + PAGE_INDEX_ID)
}

pub fn max_trx_id(page: &[u8]) -> u64 {
    read_u64(page, PAGE_HEADER + PAGE_MAX_TRX_ID)
}

pub fn set_max_trx_id(page: &mut [u8], trx_id: u64) {
    write_u64(page, PAGE_HEADER + PAGE_MAX_TRX_ID, trx_id);
}

pub fn n_slots(page: &[u8]) -> usize {
    header_field(page, PAGE_N_DIR_SLOTS)
}

/// Byte position of directory slot `i`.
#[inline]
pub const fn slot_pos(i: usize) -> usize {
    PAGE_SIZE - PAGE_DIR - PAGE_DIR_SLOT_SIZE * (i + 1)
}

/// Record offset stored in slot `i`, unvalidated.
#[inline]
pub fn slot_rec(page: &[u8], i: usize) -> usize {
    read_u16(page, slot_pos(i)) as usize
}

#[inline]
pub fn set_slot_rec(page: &mut [u8], i: usize, rec: usize) {
    write_u16(page, slot_pos(i), rec as u16);
}

/// Lowest byte of the directory.
pub fn dir_start(page: &[u8]) -> usize {
    PAGE_SIZE - PAGE_DIR - PAGE_DIR_SLOT_SIZE * n_slots(page)
}

/// Bytes of live records, excluding the sentinels.
pub fn data_size(page: &[u8]) -> usize {
    let format = RecordFormat::of(page);
    heap_top(page)
        .saturating_sub(format.supremum_end())
        .saturating_sub(garbage(page))
}

/// Record bytes an empty page can hold.
pub fn free_space_of_empty(format: RecordFormat) -> usize {
    PAGE_SIZE - format.supremum_end() - PAGE_DIR - 2 * PAGE_DIR_SLOT_SIZE
}

/// Directory bytes reserved for `n_recs` user records.
pub fn dir_calc_reserved_space(n_recs: usize) -> usize {
    (PAGE_DIR_SLOT_SIZE * n_recs + PAGE_DIR_SLOT_MIN_N_OWNED - 1) / PAGE_DIR_SLOT_MIN_N_OWNED
}

/// Largest record that fits in contiguous free space if `n_recs` more records
/// are to be inserted, ignoring the free list.
pub fn max_insert_size(page: &[u8], n_recs: usize) -> usize {
    let format = RecordFormat::of(page);
    let occupied = heap_top(page).saturating_sub(format.supremum_end())
        + dir_calc_reserved_space(n_recs + n_heap(page).saturating_sub(2));
    free_space_of_empty(format).saturating_sub(occupied)
}

/// Largest record that would fit after the page is reorganized.
pub fn max_insert_size_after_reorganize(page: &[u8], n_recs: usize) -> usize {
    let format = RecordFormat::of(page);
    let occupied = data_size(page) + dir_calc_reserved_space(n_recs + self::n_recs(page));
    free_space_of_empty(format).saturating_sub(occupied)
}

pub fn compute_checksum(page: &[u8]) -> u32 {
    CRC32C.checksum(&page[FIL_PAGE_OFFSET..PAGE_SIZE - FIL_TRAILER_SIZE])
}

pub fn write_checksum(page: &mut [u8]) {
    let checksum = compute_checksum(page);
    write_u32(page, 0, checksum);
}

/// Verifies the stored checksum and that the trailer matches the header LSN.
pub fn verify_checksum(page: &[u8]) -> bool {
    page.len() == PAGE_SIZE
        && read_u32(page, 0) == compute_checksum(page)
        && read_u32(page, PAGE_SIZE - 4) == page_lsn(page) as u32
}
