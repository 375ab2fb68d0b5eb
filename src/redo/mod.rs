//! # Redo Logging
//!
//! Every change this crate makes to an index page is described by a
//! [`RedoRecord`] before it is made. The live insert and delete paths build
//! the record, apply it through [`apply`], and pass it to a [`RedoSink`];
//! recovery decodes the same records from the log and applies them again.
//!
//! ## Record Kinds
//!
//! ```text
//! Tag  Kind               Used for
//! ---  -----------------  ----------------------------------------------
//! 1    insert redundant   insert at the heap top, redundant page
//! 2    insert redundant   insert into freed space, redundant page
//! 3    insert dynamic     insert at the heap top, compact page
//! 4    insert dynamic     insert into freed space, compact page
//! 5    delete redundant   unlink and free, redundant page
//! 6    delete dynamic     unlink and free, compact page
//! 7    page create        format an empty page
//! 8    page image         overwrite a byte range (reorganize)
//! ```
//!
//! Inserts log only the bytes the new record does not share with its
//! predecessor; the shared header and payload prefixes are copied from the
//! page at apply time.
//!
//! ## Module Organization
//!
//! - `record`: the records and their byte encoding
//! - `apply`: executing one record against a page
//! - `mtr`: mini-transactions and the append-only log
//! - `recovery`: replaying a log against a page store

pub mod apply;
pub mod mtr;
pub mod record;
pub mod recovery;

pub use apply::{apply, ApplyOutcome};
pub use mtr::{read_frame, LogFrame, LogMode, MiniTransaction, RedoLog, RedoSink};
pub use record::{
    decode_all, DeleteDynamic, DeleteRedundant, InsertDynamic, InsertRedundant, PageCreate,
    PageImage, RedoOp, RedoRecord,
};
pub use recovery::{recover, PageStore, RecoveryReport, SkippedRecord};
