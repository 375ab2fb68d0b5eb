//! # Redundant Record Format
//!
//! ```text
//!  ... | end[n-1] | ... | end[1] | end[0] | info|owned | heap_no<<3 | n_fields<<1|short | next | data
//!      <---- 1 or 2 bytes per field ---->  <------------- 6 fixed bytes ------------->
//! ```
//!
//! Each field stores the end offset of its payload relative to the origin.
//! With the one-byte form (`short` flag set, used when the payload is at most
//! 127 bytes and no field is stored externally) bit 0x80 marks SQL NULL and
//! the low 7 bits hold the offset. With the two-byte form 0x8000 marks SQL
//! NULL, 0x4000 marks an externally stored field, and the low 14 bits hold
//! the offset. A NULL fixed-length field still occupies its length in zero
//! bytes; a NULL variable-length field occupies nothing.
//!
//! The heap number and the field count share byte `[-4]`: the heap number
//! uses its high 5 bits and the field count its low 3 bits.

use eyre::{ensure, Result};

use super::{
    check_span, header_byte, sentinel_status, EncodedRecord, FieldRange, FieldRanges, IndexDef,
    RecSizes, RecordLayout,
};
use crate::config::{
    PAGE_OLD_INFIMUM, PAGE_OLD_SUPREMUM, PAGE_OLD_SUPREMUM_END, REC_MAX_N_FIELDS,
    REC_N_OLD_EXTRA_BYTES, REC_STATUS_NODE_PTR, REC_STATUS_ORDINARY,
};
use crate::encoding::{read_u16, write_u16};
use crate::storage::{page, RecordFormat};

const N_FIELDS_MASK: u16 = 0x07FE;
const SHORT_FLAG: u8 = 0x01;

pub(crate) const SQL_NULL_1BYTE: u8 = 0x80;
pub(crate) const SQL_NULL_2BYTE: u16 = 0x8000;
pub(crate) const EXTERN_2BYTE: u16 = 0x4000;

#[derive(Debug, Clone, Copy)]
pub struct Redundant;

impl Redundant {
    pub fn n_fields(page: &[u8], rec: usize) -> usize {
        ((read_u16(page, rec - 4) & N_FIELDS_MASK) >> 1) as usize
    }

    pub fn set_n_fields(page: &mut [u8], rec: usize, n_fields: usize) {
        let v = read_u16(page, rec - 4);
        write_u16(
            page,
            rec - 4,
            (v & !N_FIELDS_MASK) | (((n_fields as u16) << 1) & N_FIELDS_MASK),
        );
    }

    pub fn is_short(page: &[u8], rec: usize) -> bool {
        page[rec - 3] & SHORT_FLAG != 0
    }

    pub fn set_short(page: &mut [u8], rec: usize, short: bool) {
        let b = &mut page[rec - 3];
        *b = (*b & !SHORT_FLAG) | short as u8;
    }

    /// Header size implied by a field count and offset width.
    pub fn extra_size_for(n_fields: usize, short: bool) -> usize {
        REC_N_OLD_EXTRA_BYTES + if short { n_fields } else { 2 * n_fields }
    }

    /// Raw end-offset entry of field `i`, with the NULL and extern flags.
    fn end_entry(page: &[u8], rec: usize, i: usize, short: bool) -> Result<(usize, bool, bool)> {
        if short {
            let pos = rec.checked_sub(REC_N_OLD_EXTRA_BYTES + 1 + i);
            let b = header_byte(page, pos)?;
            Ok(((b & !SQL_NULL_1BYTE) as usize, b & SQL_NULL_1BYTE != 0, false))
        } else {
            let pos = rec.checked_sub(REC_N_OLD_EXTRA_BYTES + 2 * (i + 1));
            let hi = header_byte(page, pos)?;
            let lo = header_byte(page, pos.map(|p| p + 1))?;
            let v = u16::from_be_bytes([hi, lo]);
            Ok((
                (v & 0x3FFF) as usize,
                v & SQL_NULL_2BYTE != 0,
                v & EXTERN_2BYTE != 0,
            ))
        }
    }

    /// Sizes derived from the record's own header, without an index
    /// definition.
    pub fn self_sizes(page: &[u8], rec: usize) -> Result<RecSizes> {
        ensure!(
            rec >= REC_N_OLD_EXTRA_BYTES && rec <= page.len(),
            "record origin {} outside the page",
            rec
        );
        let n_fields = Self::n_fields(page, rec);
        ensure!(
            n_fields > 0 && n_fields <= REC_MAX_N_FIELDS,
            "record at {} has {} fields",
            rec,
            n_fields
        );
        let short = Self::is_short(page, rec);
        let extra = Self::extra_size_for(n_fields, short);
        ensure!(rec >= extra, "record header at {} runs outside the page", rec);
        let (data, _, _) = Self::end_entry(page, rec, n_fields - 1, short)?;
        check_span(page, rec - extra, rec + data)?;
        Ok(RecSizes { extra, data })
    }
}

impl RecordLayout for Redundant {
    const FORMAT: RecordFormat = RecordFormat::Redundant;
    const EXTRA_BYTES: usize = REC_N_OLD_EXTRA_BYTES;
    const INFIMUM: usize = PAGE_OLD_INFIMUM;
    const SUPREMUM: usize = PAGE_OLD_SUPREMUM;
    const SUPREMUM_END: usize = PAGE_OLD_SUPREMUM_END;

    #[inline]
    fn next_offs(page: &[u8], rec: usize) -> usize {
        read_u16(page, rec - 2) as usize
    }

    #[inline]
    fn set_next_offs(page: &mut [u8], rec: usize, next: usize) {
        write_u16(page, rec - 2, Self::encode_next(rec, next));
    }

    #[inline]
    fn encode_next(_rec: usize, next: usize) -> u16 {
        next as u16
    }

    fn status(page: &[u8], rec: usize) -> u8 {
        match sentinel_status(Self::heap_no(page, rec)) {
            Some(status) => status,
            None if page::is_leaf(page) => REC_STATUS_ORDINARY,
            None => REC_STATUS_NODE_PTR,
        }
    }

    fn sentinel_sizes(rec: usize) -> RecSizes {
        if rec == Self::INFIMUM {
            RecSizes {
                extra: REC_N_OLD_EXTRA_BYTES + 1,
                data: 8,
            }
        } else {
            RecSizes {
                extra: REC_N_OLD_EXTRA_BYTES + 1,
                data: 9,
            }
        }
    }

    fn sizes(page: &[u8], rec: usize, _index: &IndexDef, _leaf: bool) -> Result<RecSizes> {
        Self::self_sizes(page, rec)
    }

    fn field_ranges(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<FieldRanges> {
        let sizes = Self::self_sizes(page, rec)?;
        let n_fields = Self::n_fields(page, rec);
        ensure!(
            n_fields == index.n_fields(leaf),
            "record at {} has {} fields, index {} expects {}",
            rec,
            n_fields,
            index.id,
            index.n_fields(leaf)
        );
        let short = Self::is_short(page, rec);

        let mut ranges = FieldRanges::new();
        let mut start = 0;
        for i in 0..n_fields {
            let (end, null, external) = Self::end_entry(page, rec, i, short)?;
            ensure!(
                end >= start && end <= sizes.data,
                "field {} of record at {} ends at {}",
                i,
                rec,
                end
            );
            ranges.push(FieldRange {
                start: rec + start,
                len: end - start,
                null,
                external,
            });
            start = end;
        }
        Ok(ranges)
    }
}

/// Encodes the redundant header for a field list.
///
/// `fields` yields `(len, null, external)` per field in order, where `len` is
/// the stored payload length (the fixed length for a NULL fixed-size field).
pub(crate) fn encode_header(
    fields: &[(usize, bool, bool)],
    info_bits: u8,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let n_fields = fields.len();
    let data_size: usize = fields.iter().map(|f| f.0).sum();
    let any_extern = fields.iter().any(|f| f.2);
    let short = data_size <= 0x7F && !any_extern;
    ensure!(data_size <= 0x3FFF, "record payload too large: {}", data_size);

    let extra = Redundant::extra_size_for(n_fields, short);
    let base = out.len();
    out.resize(base + extra, 0);
    let hdr = &mut out[base..];

    let mut end = 0;
    for (i, &(len, null, external)) in fields.iter().enumerate() {
        end += len;
        if short {
            let mut b = end as u8;
            if null {
                b |= SQL_NULL_1BYTE;
            }
            hdr[extra - REC_N_OLD_EXTRA_BYTES - 1 - i] = b;
        } else {
            let mut v = end as u16;
            if null {
                v |= SQL_NULL_2BYTE;
            }
            if external {
                v |= EXTERN_2BYTE;
            }
            let pos = extra - REC_N_OLD_EXTRA_BYTES - 2 * (i + 1);
            hdr[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
        }
    }

    let fixed = extra - REC_N_OLD_EXTRA_BYTES;
    hdr[fixed] = info_bits & crate::config::REC_INFO_BITS_MASK;
    let nf = ((n_fields as u16) << 1) | short as u16;
    hdr[fixed + 2..fixed + 4].copy_from_slice(&nf.to_be_bytes());

    Ok(extra)
}

pub(crate) fn is_short_record(rec: &EncodedRecord) -> bool {
    rec.extra_size() == Redundant::extra_size_for(rec.n_fields(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_OLD_SUPREMUM_END;
    use crate::storage::{new_page, PageInit};

    fn place(fields: &[(usize, bool, bool)], payload: &[u8]) -> (Vec<u8>, usize) {
        let mut page = new_page(1, &PageInit::leaf(RecordFormat::Redundant, 1));
        let mut buf = Vec::new();
        let extra = encode_header(fields, 0, &mut buf).unwrap();
        buf.extend_from_slice(payload);
        let start = PAGE_OLD_SUPREMUM_END;
        page[start..start + buf.len()].copy_from_slice(&buf);
        (page, start + extra)
    }

    #[test]
    fn short_offsets_round_trip() {
        let (page, rec) = place(&[(4, false, false), (0, true, false), (3, false, false)], b"abcdxyz");

        let sizes = Redundant::self_sizes(&page, rec).unwrap();
        assert_eq!(sizes, RecSizes { extra: 9, data: 7 });
        assert!(Redundant::is_short(&page, rec));
        assert_eq!(Redundant::n_fields(&page, rec), 3);
    }

    #[test]
    fn long_payload_switches_to_two_byte_offsets() {
        let payload = vec![7u8; 200];
        let (page, rec) = place(&[(100, false, false), (100, false, false)], &payload);

        assert!(!Redundant::is_short(&page, rec));
        assert_eq!(
            Redundant::self_sizes(&page, rec).unwrap(),
            RecSizes { extra: 10, data: 200 }
        );
    }

    #[test]
    fn external_field_forces_two_byte_offsets() {
        let (page, rec) = place(&[(2, false, false), (20, false, true)], &[1u8; 22]);

        assert!(!Redundant::is_short(&page, rec));
        let (end, null, external) = Redundant::end_entry(&page, rec, 1, false).unwrap();
        assert_eq!((end, null, external), (22, false, true));
    }

    #[test]
    fn zero_fields_is_corruption() {
        let (mut page, rec) = place(&[(1, false, false)], b"x");
        Redundant::set_n_fields(&mut page, rec, 0);

        assert!(Redundant::self_sizes(&page, rec)
            .unwrap_err()
            .to_string()
            .contains("has 0 fields"));
    }

    #[test]
    fn n_fields_does_not_disturb_heap_no() {
        let (mut page, rec) = place(&[(1, false, false)], b"x");
        Redundant::set_heap_no(&mut page, rec, 8191);
        Redundant::set_n_fields(&mut page, rec, 1023);

        assert_eq!(Redundant::heap_no(&page, rec), 8191);
        assert_eq!(Redundant::n_fields(&page, rec), 1023);
        assert!(Redundant::is_short(&page, rec));
    }
}
