//! # indexpage - Slotted B-tree Index Pages
//!
//! The single-page layer of a B-tree storage engine: the byte layout of a
//! 16 KiB index page, the two record encodings it can hold, the sparse page
//! directory, cursor search, record insert and delete, and the physiological
//! redo records that make every change replayable after a crash.
//!
//! ## Quick Start
//!
//! ```ignore
//! use indexpage::btree::{insert_rec, search, SearchKey, SearchMode};
//! use indexpage::records::{FieldDef, IndexDef, IndexKind, RecordBuilder};
//! use indexpage::redo::{MiniTransaction, RedoLog};
//! use indexpage::storage::{new_page, PageInit, RecordFormat};
//!
//! let index = IndexDef::new(1, IndexKind::Clustered, [FieldDef::int(4)], 1)?;
//! let mut page = new_page(3, &PageInit::leaf(RecordFormat::Compact, index.id));
//!
//! let key = 42u32.to_be_bytes();
//! let rec = RecordBuilder::new(&index).field(&key).build(RecordFormat::Compact)?;
//! let cursor = search(&page, &index, &SearchKey::new().field(&key), SearchMode::Le)?;
//!
//! let mut mtr = MiniTransaction::new();
//! insert_rec(&mut page, &index, &cursor, &rec, &mut mtr)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  btree: cursor, insert, delete, zip,    │
//! │         reorganize, validate            │
//! ├────────────────────┬────────────────────┤
//! │  records: layouts, │  redo: records,    │
//! │  builder, schema   │  apply, recovery   │
//! ├────────────────────┴────────────────────┤
//! │  storage::page: headers, slots, heap    │
//! ├─────────────────────────────────────────┤
//! │  encoding, config, error                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Pages are plain byte slices owned by the caller's buffer pool. Reads
//! take `&[u8]`, mutations take `&mut [u8]` together with a
//! [`redo::RedoSink`] that receives the redo record of the change.
//!
//! ## Module Overview
//!
//! - [`storage`]: page frame, header fields, page creation
//! - [`records`]: redundant and compact record layouts, record builder
//! - [`btree`]: directory, search, insert, delete, compressed pages
//! - [`redo`]: redo records, apply, mini-transactions, recovery
//! - [`encoding`]: big-endian and varint codecs
//! - [`config`]: layout constants and the compression level
//! - [`error`]: page corruption reports

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod encoding;
pub mod error;
pub mod records;
pub mod redo;
pub mod storage;

pub use error::{is_corruption, PageCorrupted};
