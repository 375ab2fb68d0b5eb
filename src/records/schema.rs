//! # Index Definitions
//!
//! An [`IndexDef`] tells the record codecs and the comparator how the fields
//! of an index are stored and ordered. Compact records do not describe
//! themselves: the null bitmap only has bits for nullable fields and the
//! length array only has entries for variable-length fields, so every parse
//! of a compact record needs the index definition. Redundant records carry
//! their own field end offsets and only need it for comparison.
//!
//! ## Leaf and Node Pointer Records
//!
//! ```text
//! leaf record:          field 0 .. field n-1
//! node pointer record:  field 0 .. field n_uniq-1, child page number (4 bytes)
//! ```
//!
//! The child page number behaves as a fixed 4-byte, non-null, binary field.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::config::{REC_MAX_N_FIELDS, REC_NODE_PTR_SIZE};

/// Storage type of an index field, as far as ordering is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Integers stored big-endian with the sign bit flipped.
    Int,
    FixBinary,
    Binary,
    Char,
    VarChar,
    Blob,
    Text,
    /// Minimum bounding rectangle of a spatial index, four f64 values.
    Geometry,
}

impl DataType {
    /// Byte used to extend the shorter of two values in a byte comparison.
    pub fn pad_byte(self) -> Option<u8> {
        match self {
            DataType::Char | DataType::VarChar | DataType::Text => Some(0x20),
            _ => None,
        }
    }

    /// Whether values of this type may exceed 255 bytes regardless of the
    /// declared maximum length.
    pub fn is_big(self) -> bool {
        matches!(self, DataType::Blob | DataType::Text | DataType::Geometry)
    }
}

/// Ordering callback for fields whose collation is not plain byte order.
pub trait Collation: Send + Sync + fmt::Debug {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub dtype: DataType,
    /// Stored length of fixed-length fields; 0 for variable-length fields.
    pub fixed_len: usize,
    /// Longest value a variable-length field may hold.
    pub max_len: usize,
    pub nullable: bool,
    pub descending: bool,
    pub collation: Option<Arc<dyn Collation>>,
}

impl FieldDef {
    pub fn new(dtype: DataType, fixed_len: usize, max_len: usize) -> Self {
        Self {
            dtype,
            fixed_len,
            max_len: max_len.max(fixed_len),
            nullable: false,
            descending: false,
            collation: None,
        }
    }

    pub fn int(len: usize) -> Self {
        Self::new(DataType::Int, len, len)
    }

    pub fn fixed_binary(len: usize) -> Self {
        Self::new(DataType::FixBinary, len, len)
    }

    pub fn binary(max_len: usize) -> Self {
        Self::new(DataType::Binary, 0, max_len)
    }

    pub fn char(len: usize) -> Self {
        Self::new(DataType::Char, len, len)
    }

    pub fn varchar(max_len: usize) -> Self {
        Self::new(DataType::VarChar, 0, max_len)
    }

    pub fn blob() -> Self {
        Self::new(DataType::Blob, 0, 0x3FFF)
    }

    pub fn mbr() -> Self {
        Self::new(DataType::Geometry, 32, 32)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn with_collation(mut self, collation: Arc<dyn Collation>) -> Self {
        self.collation = Some(collation);
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_len != 0
    }

    /// Whether a compact record may use a 2-byte length entry for this field.
    pub fn is_big_col(&self) -> bool {
        !self.is_fixed() && (self.max_len > 255 || self.dtype.is_big())
    }
}

static CHILD_PAGE_FIELD: FieldDef = FieldDef {
    dtype: DataType::FixBinary,
    fixed_len: REC_NODE_PTR_SIZE,
    max_len: REC_NODE_PTR_SIZE,
    nullable: false,
    descending: false,
    collation: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Clustered,
    Secondary,
    Spatial,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub id: u64,
    pub kind: IndexKind,
    fields: SmallVec<[FieldDef; 8]>,
    n_uniq: usize,
}

impl IndexDef {
    pub fn new(
        id: u64,
        kind: IndexKind,
        fields: impl IntoIterator<Item = FieldDef>,
        n_uniq: usize,
    ) -> Result<Self> {
        let fields: SmallVec<[FieldDef; 8]> = fields.into_iter().collect();

        ensure!(!fields.is_empty(), "index {} has no fields", id);
        ensure!(
            fields.len() < REC_MAX_N_FIELDS,
            "index {} has {} fields, limit is {}",
            id,
            fields.len(),
            REC_MAX_N_FIELDS - 1
        );
        ensure!(
            n_uniq >= 1 && n_uniq <= fields.len(),
            "index {}: n_uniq {} out of range 1..={}",
            id,
            n_uniq,
            fields.len()
        );
        for (i, f) in fields.iter().enumerate() {
            ensure!(
                f.fixed_len <= 0x3FFF && f.max_len <= 0x3FFF,
                "index {}: field {} longer than a page can hold",
                id,
                i
            );
        }
        if kind == IndexKind::Spatial {
            ensure!(
                fields[0].dtype == DataType::Geometry,
                "spatial index {} must start with a geometry field",
                id
            );
        }

        Ok(Self {
            id,
            kind,
            fields,
            n_uniq,
        })
    }

    pub fn is_spatial(&self) -> bool {
        self.kind == IndexKind::Spatial
    }

    pub fn is_clustered(&self) -> bool {
        self.kind == IndexKind::Clustered
    }

    pub fn n_uniq(&self) -> usize {
        self.n_uniq
    }

    /// Number of fields in a record on a leaf or non-leaf page.
    pub fn n_fields(&self, leaf: bool) -> usize {
        if leaf {
            self.fields.len()
        } else {
            self.n_uniq + 1
        }
    }

    /// Definition of field `i` of a record on a leaf or non-leaf page.
    pub fn field(&self, i: usize, leaf: bool) -> &FieldDef {
        if !leaf && i == self.n_uniq {
            &CHILD_PAGE_FIELD
        } else {
            &self.fields[i]
        }
    }

    /// Number of nullable fields among those stored on a leaf or non-leaf page.
    pub fn n_nullable(&self, leaf: bool) -> usize {
        let n = if leaf { self.fields.len() } else { self.n_uniq };
        self.fields[..n].iter().filter(|f| f.nullable).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> IndexDef {
        IndexDef::new(
            1,
            IndexKind::Secondary,
            [
                FieldDef::int(4),
                FieldDef::varchar(300).nullable(),
                FieldDef::char(10).nullable(),
            ],
            2,
        )
        .unwrap()
    }

    #[test]
    fn leaf_and_node_pointer_field_counts() {
        let index = sample_index();

        assert_eq!(index.n_fields(true), 3);
        assert_eq!(index.n_fields(false), 3);
        assert_eq!(index.field(2, false).fixed_len, REC_NODE_PTR_SIZE);
        assert_eq!(index.field(2, true).dtype, DataType::Char);
    }

    #[test]
    fn nullable_counts_depend_on_level() {
        let index = sample_index();

        assert_eq!(index.n_nullable(true), 2);
        assert_eq!(index.n_nullable(false), 1);
    }

    #[test]
    fn big_columns() {
        assert!(FieldDef::varchar(300).is_big_col());
        assert!(!FieldDef::varchar(200).is_big_col());
        assert!(FieldDef::blob().is_big_col());
        assert!(!FieldDef::char(10).is_big_col());
    }

    #[test]
    fn pad_bytes() {
        assert_eq!(DataType::Char.pad_byte(), Some(b' '));
        assert_eq!(DataType::Binary.pad_byte(), None);
        assert_eq!(DataType::Int.pad_byte(), None);
    }

    #[test]
    fn n_uniq_out_of_range_rejected() {
        let result = IndexDef::new(1, IndexKind::Clustered, [FieldDef::int(4)], 2);

        assert!(result.unwrap_err().to_string().contains("n_uniq"));
    }

    #[test]
    fn spatial_index_requires_mbr_first() {
        let result = IndexDef::new(1, IndexKind::Spatial, [FieldDef::int(4)], 1);

        assert!(result.unwrap_err().to_string().contains("geometry"));
    }
}
