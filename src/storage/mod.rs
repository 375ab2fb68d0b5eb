//! # Storage Module
//!
//! The physical frame of an index page: file header, index header, sentinel
//! records, heap bounds and directory slots. Everything above this module
//! (record codecs, search, insert, delete, redo apply) addresses the page as
//! a plain `&[u8]` / `&mut [u8]` of exactly [`PAGE_SIZE`] bytes and goes
//! through the accessors here for header fields and slots.
//!
//! ## Ownership Model
//!
//! Pages are borrowed, never owned, by this crate. The buffer pool (an
//! external collaborator) hands out `&mut [u8]` under an exclusive latch for
//! mutation and `&[u8]` under a shared latch for search, so the borrow
//! checker enforces the single-writer discipline:
//!
//! ```text
//! search_with_match(&page, ..)        // shared borrow, reentrant
//! insert_rec(&mut page, ..)           // exclusive borrow
//! ```
//!
//! ## Module Organization
//!
//! - `page`: header layouts, page creation, slot and heap accessors,
//!   free-space arithmetic and checksums

pub mod page;

pub use crate::config::PAGE_SIZE;
pub use page::{
    check_frame, create, create_empty, new_page, FilHeader, IndexHeader, PageInit, PageType,
    RecordFormat,
};
