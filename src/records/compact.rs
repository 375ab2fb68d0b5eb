//! # Compact Record Format
//!
//! ```text
//!  ... | len[k] .. len[0] | nulls[m] .. nulls[0] | info|owned | heap_no<<3|status | next | data
//!                                                 <------------ 5 fixed bytes ------------>
//! ```
//!
//! The null bitmap has one bit per nullable field, starting with the low bit
//! of the byte just before the fixed header and continuing into lower
//! addresses. The length array follows below it, one entry per non-NULL
//! variable-length field, also in field order towards lower addresses:
//!
//! ```text
//! Entry     Condition                         Encoding
//! --------  --------------------------------  -------------------------------
//! 1 byte    column cannot exceed 255 bytes    len
//! 1 byte    big column, len < 128             len (0x80 clear)
//! 2 bytes   big column, len >= 128 or extern  0x80 | ext<<6 | len>>8, len & 0xFF
//! ```
//!
//! Node pointer records on non-leaf pages hold the first `n_uniq` fields
//! followed by the 4-byte child page number and carry status NODE_PTR.

use eyre::{ensure, Result};

use super::{
    check_span, header_byte, FieldRange, FieldRanges, IndexDef, RecSizes, RecordLayout,
};
use crate::config::{
    PAGE_NEW_INFIMUM, PAGE_NEW_SUPREMUM, PAGE_NEW_SUPREMUM_END, REC_N_NEW_EXTRA_BYTES,
};
use crate::encoding::{read_u16, write_u16};
use crate::storage::RecordFormat;

const STATUS_MASK: u16 = 0x7;

/// Flag of the first byte of a two-byte length entry.
pub(crate) const LEN_2BYTE_FLAG: u8 = 0x80;
pub(crate) const LEN_EXTERN_FLAG: u8 = 0x40;

#[derive(Debug, Clone, Copy)]
pub struct Compact;

impl Compact {
    pub fn set_status(page: &mut [u8], rec: usize, status: u8) {
        let pos = rec - REC_N_NEW_EXTRA_BYTES + 1;
        let v = read_u16(page, pos);
        write_u16(page, pos, (v & !STATUS_MASK) | (status as u16 & STATUS_MASK));
    }

    /// Walks the null bitmap and length array of a user record.
    fn walk(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<(FieldRanges, usize)> {
        ensure!(
            rec >= PAGE_NEW_SUPREMUM_END + REC_N_NEW_EXTRA_BYTES && rec <= page.len(),
            "record origin {} outside the heap",
            rec
        );
        let n_fields = index.n_fields(leaf);
        let n_null_bytes = index.n_nullable(leaf).div_ceil(8);

        // `nulls` addresses the current bitmap byte; `lens` the next length byte.
        let mut nulls = rec - REC_N_NEW_EXTRA_BYTES - 1;
        let mut lens = (rec - REC_N_NEW_EXTRA_BYTES).checked_sub(n_null_bytes + 1);
        let mut null_mask: u16 = 1;

        let mut ranges = FieldRanges::new();
        let mut offs = 0usize;
        for i in 0..n_fields {
            let field = index.field(i, leaf);

            if field.nullable {
                if null_mask == 0x100 {
                    nulls -= 1;
                    null_mask = 1;
                }
                let bits = header_byte(page, Some(nulls))?;
                let is_null = bits as u16 & null_mask != 0;
                null_mask <<= 1;
                if is_null {
                    ranges.push(FieldRange {
                        start: rec + offs,
                        len: 0,
                        null: true,
                        external: false,
                    });
                    continue;
                }
            }

            let (len, external) = if field.is_fixed() {
                (field.fixed_len, false)
            } else {
                let b0 = header_byte(page, lens)?;
                lens = lens.and_then(|p| p.checked_sub(1));
                if field.is_big_col() && b0 & LEN_2BYTE_FLAG != 0 {
                    let b1 = header_byte(page, lens)?;
                    lens = lens.and_then(|p| p.checked_sub(1));
                    let v = u16::from_be_bytes([b0, b1]);
                    ((v & 0x3FFF) as usize, b0 & LEN_EXTERN_FLAG != 0)
                } else {
                    (b0 as usize, false)
                }
            };

            ranges.push(FieldRange {
                start: rec + offs,
                len,
                null: false,
                external,
            });
            offs += len;
        }

        let header_start = match lens {
            Some(p) => p + 1,
            None => 0,
        };
        ensure!(
            header_start >= PAGE_NEW_SUPREMUM_END,
            "header of record at {} runs below the heap",
            rec
        );
        check_span(page, header_start, rec + offs)?;
        Ok((ranges, rec - header_start))
    }
}

impl RecordLayout for Compact {
    const FORMAT: RecordFormat = RecordFormat::Compact;
    const EXTRA_BYTES: usize = REC_N_NEW_EXTRA_BYTES;
    const INFIMUM: usize = PAGE_NEW_INFIMUM;
    const SUPREMUM: usize = PAGE_NEW_SUPREMUM;
    const SUPREMUM_END: usize = PAGE_NEW_SUPREMUM_END;

    #[inline]
    fn next_offs(page: &[u8], rec: usize) -> usize {
        match read_u16(page, rec - 2) {
            0 => 0,
            rel => (rec as u16).wrapping_add(rel) as usize,
        }
    }

    #[inline]
    fn set_next_offs(page: &mut [u8], rec: usize, next: usize) {
        write_u16(page, rec - 2, Self::encode_next(rec, next));
    }

    #[inline]
    fn encode_next(rec: usize, next: usize) -> u16 {
        if next == 0 {
            0
        } else {
            (next as u16).wrapping_sub(rec as u16)
        }
    }

    fn status(page: &[u8], rec: usize) -> u8 {
        (read_u16(page, rec - REC_N_NEW_EXTRA_BYTES + 1) & STATUS_MASK) as u8
    }

    fn sentinel_sizes(_rec: usize) -> RecSizes {
        RecSizes {
            extra: REC_N_NEW_EXTRA_BYTES,
            data: 8,
        }
    }

    fn sizes(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<RecSizes> {
        if Self::is_sentinel(rec) {
            return Ok(Self::sentinel_sizes(rec));
        }
        let (ranges, extra) = Self::walk(page, rec, index, leaf)?;
        let data = ranges.last().map_or(0, |r| r.start + r.len - rec);
        Ok(RecSizes { extra, data })
    }

    fn field_ranges(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<FieldRanges> {
        ensure!(
            !Self::is_sentinel(rec),
            "record at {} is a page sentinel",
            rec
        );
        Self::walk(page, rec, index, leaf).map(|(ranges, _)| ranges)
    }
}

/// Encodes the variable part of a compact header (length array and null
/// bitmap, in page order) followed by the 5 fixed bytes.
///
/// `fields` yields `(len, null, external)` per field.
pub(crate) fn encode_header(
    index: &IndexDef,
    leaf: bool,
    fields: &[(usize, bool, bool)],
    info_bits: u8,
    status: u8,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let n_null_bytes = index.n_nullable(leaf).div_ceil(8);
    let mut nulls = smallvec::SmallVec::<[u8; 8]>::from_elem(0, n_null_bytes);
    // Length bytes in reading order (towards lower addresses).
    let mut lens = smallvec::SmallVec::<[u8; 32]>::new();

    let mut null_bit = 0usize;
    for (i, &(len, null, external)) in fields.iter().enumerate() {
        let field = index.field(i, leaf);
        if field.nullable {
            if null {
                nulls[null_bit / 8] |= 1 << (null_bit % 8);
            }
            null_bit += 1;
        }
        if null || field.is_fixed() {
            continue;
        }
        if field.is_big_col() && (len >= 0x80 || external) {
            ensure!(len <= 0x3FFF, "field {} too long: {}", i, len);
            let mut b0 = LEN_2BYTE_FLAG | (len >> 8) as u8;
            if external {
                b0 |= LEN_EXTERN_FLAG;
            }
            lens.push(b0);
            lens.push(len as u8);
        } else {
            ensure!(len <= 0xFF, "field {} too long: {}", i, len);
            lens.push(len as u8);
        }
    }

    let var = lens.len() + n_null_bytes;
    let base = out.len();
    out.extend(lens.iter().rev());
    out.extend(nulls.iter().rev());
    out.extend_from_slice(&[
        info_bits & crate::config::REC_INFO_BITS_MASK,
        0,
        status,
        0,
        0,
    ]);
    debug_assert_eq!(out.len() - base, var + REC_N_NEW_EXTRA_BYTES);
    Ok(var + REC_N_NEW_EXTRA_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{REC_STATUS_INFIMUM, REC_STATUS_ORDINARY};
    use crate::records::schema::{FieldDef, IndexKind};
    use crate::storage::{new_page, PageInit};

    fn index() -> IndexDef {
        IndexDef::new(
            9,
            IndexKind::Secondary,
            [
                FieldDef::int(4),
                FieldDef::varchar(100).nullable(),
                FieldDef::blob().nullable(),
                FieldDef::char(2).nullable(),
            ],
            1,
        )
        .unwrap()
    }

    fn place(index: &IndexDef, fields: &[(usize, bool, bool)], payload: &[u8]) -> (Vec<u8>, usize) {
        let mut page = new_page(1, &PageInit::leaf(RecordFormat::Compact, 9));
        let mut buf = Vec::new();
        let extra = encode_header(index, true, fields, 0, REC_STATUS_ORDINARY, &mut buf).unwrap();
        buf.extend_from_slice(payload);
        let start = PAGE_NEW_SUPREMUM_END;
        page[start..start + buf.len()].copy_from_slice(&buf);
        (page, start + extra)
    }

    #[test]
    fn nulls_and_short_lengths() {
        let index = index();
        let (page, rec) = place(
            &index,
            &[(4, false, false), (3, false, false), (0, true, false), (2, false, false)],
            b"\x80\x00\x00\x01abcXY",
        );

        let ranges = Compact::field_ranges(&page, rec, &index, true).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[1].value(&page), Some(&b"abc"[..]));
        assert!(ranges[2].null);
        assert_eq!(ranges[3].value(&page), Some(&b"XY"[..]));

        // 1 null byte + 1 length byte + 5 fixed.
        let sizes = Compact::sizes(&page, rec, &index, true).unwrap();
        assert_eq!(sizes, RecSizes { extra: 7, data: 9 });
    }

    #[test]
    fn big_column_uses_two_length_bytes() {
        let index = index();
        let blob = vec![0xABu8; 300];
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&blob);
        let (page, rec) = place(
            &index,
            &[(4, false, false), (0, true, false), (300, false, false), (0, true, false)],
            &payload,
        );

        let ranges = Compact::field_ranges(&page, rec, &index, true).unwrap();
        assert_eq!(ranges[2].len, 300);
        assert!(!ranges[2].external);
        assert_eq!(Compact::sizes(&page, rec, &index, true).unwrap().extra, 8);
    }

    #[test]
    fn sentinel_status_and_sizes() {
        let page = new_page(1, &PageInit::leaf(RecordFormat::Compact, 9));

        assert_eq!(Compact::status(&page, PAGE_NEW_INFIMUM), REC_STATUS_INFIMUM);
        assert_eq!(
            Compact::sizes(&page, PAGE_NEW_SUPREMUM, &index(), true).unwrap(),
            RecSizes { extra: 5, data: 8 }
        );
    }

    #[test]
    fn relative_next_wraps() {
        let mut page = new_page(1, &PageInit::leaf(RecordFormat::Compact, 9));
        Compact::set_next_offs(&mut page, PAGE_NEW_SUPREMUM, PAGE_NEW_INFIMUM);

        assert_eq!(read_u16(&page, PAGE_NEW_SUPREMUM - 2), 0u16.wrapping_sub(13));
        assert_eq!(Compact::next_offs(&page, PAGE_NEW_SUPREMUM), PAGE_NEW_INFIMUM);
    }

    #[test]
    fn header_below_heap_is_rejected() {
        let index = index();
        let page = new_page(1, &PageInit::leaf(RecordFormat::Compact, 9));

        let result = Compact::sizes(&page, PAGE_NEW_SUPREMUM_END + 6, &index, true);
        assert!(result.is_err());
    }
}
