//! # RecordBuilder - Record Construction
//!
//! This module provides `RecordBuilder` for turning a list of field values
//! into the exact bytes a record occupies on a page of a given format. The
//! result, an [`EncodedRecord`], is what the insert engine copies into the
//! heap; its next pointer, heap number and owned count are left zero and are
//! filled in when the record is linked into a page.
//!
//! ## Usage
//!
//! ```ignore
//! let rec = RecordBuilder::new(&index)
//!     .field(&42i32.to_be_bytes())
//!     .null()
//!     .field(b"hello")
//!     .build(RecordFormat::Compact)?;
//!
//! // Node pointer record for a non-leaf page
//! let ptr = RecordBuilder::new(&index)
//!     .field(&key)
//!     .child_page(17)
//!     .build(RecordFormat::Compact)?;
//! ```

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::schema::IndexDef;
use super::{compact, redundant};
use crate::config::{
    BTR_EXTERN_FIELD_REF_SIZE, REC_INFO_BITS_MASK, REC_STATUS_NODE_PTR, REC_STATUS_ORDINARY,
};
use crate::storage::page::free_space_of_empty;
use crate::storage::RecordFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldValue<'a> {
    Null,
    Bytes(&'a [u8]),
    External(&'a [u8]),
}

pub struct RecordBuilder<'a> {
    index: &'a IndexDef,
    values: SmallVec<[FieldValue<'a>; 16]>,
    info_bits: u8,
    child_page: Option<[u8; 4]>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(index: &'a IndexDef) -> Self {
        Self {
            index,
            values: SmallVec::new(),
            info_bits: 0,
            child_page: None,
        }
    }

    pub fn field(mut self, value: &'a [u8]) -> Self {
        self.values.push(FieldValue::Bytes(value));
        self
    }

    pub fn null(mut self) -> Self {
        self.values.push(FieldValue::Null);
        self
    }

    /// Adds a field whose payload is the locally stored prefix plus a
    /// 20-byte reference to off-page storage.
    pub fn external(mut self, value: &'a [u8]) -> Self {
        self.values.push(FieldValue::External(value));
        self
    }

    pub fn info_bits(mut self, bits: u8) -> Self {
        self.info_bits = bits & REC_INFO_BITS_MASK;
        self
    }

    /// Makes this a node pointer record pointing at `page_no`.
    pub fn child_page(mut self, page_no: u32) -> Self {
        self.child_page = Some(page_no.to_be_bytes());
        self
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.info_bits = 0;
        self.child_page = None;
    }

    pub fn build(&self, format: RecordFormat) -> Result<EncodedRecord> {
        let leaf = self.child_page.is_none();
        let n_key = if leaf {
            self.index.n_fields(true)
        } else {
            self.index.n_uniq()
        };
        ensure!(
            self.values.len() == n_key,
            "index {} expects {} fields, got {}",
            self.index.id,
            n_key,
            self.values.len()
        );

        let mut values: SmallVec<[FieldValue<'_>; 16]> = self.values.iter().copied().collect();
        if let Some(child) = &self.child_page {
            values.push(FieldValue::Bytes(child));
        }

        // (stored len, null, external) per field
        let mut layout: SmallVec<[(usize, bool, bool); 16]> = SmallVec::new();
        for (i, value) in values.iter().enumerate() {
            let field = self.index.field(i, leaf);
            match *value {
                FieldValue::Null => {
                    if !field.nullable {
                        bail!("field {} of index {} is not nullable", i, self.index.id);
                    }
                    let len = match format {
                        RecordFormat::Redundant => field.fixed_len,
                        RecordFormat::Compact => 0,
                    };
                    layout.push((len, true, false));
                }
                FieldValue::Bytes(bytes) | FieldValue::External(bytes) => {
                    let external = matches!(value, FieldValue::External(_));
                    if field.is_fixed() {
                        ensure!(
                            bytes.len() == field.fixed_len,
                            "field {} expects {} bytes, got {}",
                            i,
                            field.fixed_len,
                            bytes.len()
                        );
                        ensure!(!external, "fixed-length field {} cannot be external", i);
                    } else if external {
                        ensure!(
                            field.is_big_col(),
                            "field {} cannot be stored externally",
                            i
                        );
                        ensure!(
                            bytes.len() >= BTR_EXTERN_FIELD_REF_SIZE,
                            "external field {} needs a {}-byte reference",
                            i,
                            BTR_EXTERN_FIELD_REF_SIZE
                        );
                    } else {
                        ensure!(
                            bytes.len() <= field.max_len,
                            "field {} longer than {} bytes",
                            i,
                            field.max_len
                        );
                    }
                    layout.push((bytes.len(), false, external));
                }
            }
        }

        let mut buf = Vec::new();
        let extra_size = match format {
            RecordFormat::Redundant => redundant::encode_header(&layout, self.info_bits, &mut buf)?,
            RecordFormat::Compact => {
                let status = if leaf {
                    REC_STATUS_ORDINARY
                } else {
                    REC_STATUS_NODE_PTR
                };
                compact::encode_header(self.index, leaf, &layout, self.info_bits, status, &mut buf)?
            }
        };

        for (value, &(len, _, _)) in values.iter().zip(&layout) {
            match *value {
                FieldValue::Bytes(bytes) | FieldValue::External(bytes) => {
                    buf.extend_from_slice(bytes)
                }
                FieldValue::Null => buf.resize(buf.len() + len, 0),
            }
        }

        let limit = free_space_of_empty(format) / 2;
        ensure!(
            buf.len() <= limit,
            "record of {} bytes exceeds the {}-byte limit",
            buf.len(),
            limit
        );

        Ok(EncodedRecord {
            buf,
            extra_size,
            format,
            n_fields: values.len(),
            n_extern: layout.iter().filter(|f| f.2).count(),
            info_bits: self.info_bits,
            leaf,
        })
    }
}

/// A record in its on-page byte form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    buf: Vec<u8>,
    extra_size: usize,
    format: RecordFormat,
    n_fields: usize,
    n_extern: usize,
    info_bits: u8,
    leaf: bool,
}

impl EncodedRecord {
    /// Header and payload bytes, starting at the first header byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn extra_size(&self) -> usize {
        self.extra_size
    }

    pub fn data_size(&self) -> usize {
        self.buf.len() - self.extra_size
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.extra_size..]
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    /// Number of externally stored fields.
    pub fn n_extern(&self) -> usize {
        self.n_extern
    }

    pub fn info_bits(&self) -> u8 {
        self.info_bits
    }

    /// Whether this is a leaf record rather than a node pointer.
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REC_INFO_DELETED_FLAG;
    use crate::records::schema::{FieldDef, IndexKind};

    fn index() -> IndexDef {
        IndexDef::new(
            3,
            IndexKind::Clustered,
            [
                FieldDef::int(4),
                FieldDef::varchar(40).nullable(),
                FieldDef::blob().nullable(),
            ],
            1,
        )
        .unwrap()
    }

    #[test]
    fn compact_record_layout() {
        let index = index();
        let rec = RecordBuilder::new(&index)
            .field(&[0x80, 0, 0, 5])
            .field(b"five")
            .null()
            .build(RecordFormat::Compact)
            .unwrap();

        // 1 length byte + 1 null byte + 5 fixed bytes
        assert_eq!(rec.extra_size(), 7);
        assert_eq!(rec.data(), b"\x80\x00\x00\x05five");
        assert_eq!(rec.as_bytes()[0], 4);
        assert_eq!(rec.as_bytes()[1], 0b10);
    }

    #[test]
    fn redundant_null_fixed_field_is_zero_filled() {
        let index = IndexDef::new(
            3,
            IndexKind::Secondary,
            [FieldDef::int(4).nullable(), FieldDef::varchar(10)],
            2,
        )
        .unwrap();
        let rec = RecordBuilder::new(&index)
            .null()
            .field(b"ab")
            .build(RecordFormat::Redundant)
            .unwrap();

        assert_eq!(rec.data(), b"\0\0\0\0ab");
        assert_eq!(rec.extra_size(), 8);
        // field 0 ends at 4 and is NULL
        assert_eq!(rec.as_bytes()[1], 0x80 | 4);
        assert_eq!(rec.as_bytes()[0], 6);
    }

    #[test]
    fn node_pointer_appends_child_page() {
        let index = index();
        let rec = RecordBuilder::new(&index)
            .field(&[0x80, 0, 0, 9])
            .child_page(0x0102_0304)
            .build(RecordFormat::Compact)
            .unwrap();

        assert!(!rec.is_leaf());
        assert_eq!(rec.n_fields(), 2);
        assert_eq!(rec.data(), &[0x80, 0, 0, 9, 1, 2, 3, 4]);
        assert_eq!(rec.as_bytes()[rec.extra_size() - 3] & 0x7, REC_STATUS_NODE_PTR);
    }

    #[test]
    fn info_bits_land_in_the_fixed_header() {
        let index = index();
        let rec = RecordBuilder::new(&index)
            .field(&[0x80, 0, 0, 1])
            .null()
            .null()
            .info_bits(REC_INFO_DELETED_FLAG)
            .build(RecordFormat::Compact)
            .unwrap();

        assert_eq!(rec.as_bytes()[rec.extra_size() - 5], REC_INFO_DELETED_FLAG);
    }

    #[test]
    fn external_field_needs_reference() {
        let index = index();
        let short = RecordBuilder::new(&index)
            .field(&[0x80, 0, 0, 1])
            .null()
            .external(&[0u8; 10])
            .build(RecordFormat::Compact);

        assert!(short.unwrap_err().to_string().contains("reference"));

        let ok = RecordBuilder::new(&index)
            .field(&[0x80, 0, 0, 1])
            .null()
            .external(&[0u8; 30])
            .build(RecordFormat::Compact)
            .unwrap();
        assert_eq!(ok.n_extern(), 1);
    }

    #[test]
    fn wrong_field_count_rejected() {
        let index = index();
        let result = RecordBuilder::new(&index).field(&[0, 0, 0, 1]).build(RecordFormat::Compact);

        assert!(result.unwrap_err().to_string().contains("expects 3 fields"));
    }

    #[test]
    fn non_nullable_null_rejected() {
        let index = index();
        let result = RecordBuilder::new(&index)
            .null()
            .null()
            .null()
            .build(RecordFormat::Redundant);

        assert!(result.unwrap_err().to_string().contains("not nullable"));
    }
}
