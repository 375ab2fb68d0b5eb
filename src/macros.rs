//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! the big-endian wrapper types (U16, U32, U64). Every multi-byte field of an
//! index page is stored most-significant byte first, so the on-page headers
//! are declared with `zerocopy::big_endian` types and accessed through these
//! generated methods.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::big_endian::{U16, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     n_recs: U16,
//!     index_id: U64,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         n_recs: u16,
//!         index_id: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn n_recs(&self) -> u16 { self.n_recs.get() }
//! // pub fn set_n_recs(&mut self, val: u16) { self.n_recs = U16::new(val); }
//! // pub fn index_id(&self) -> u64 { self.index_id.get() }
//! // pub fn set_index_id(&mut self, val: u64) { self.index_id = U64::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::big_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::big_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Selects the record layout of a page once and evaluates `$body` with the
/// type alias `$layout` bound to [`Redundant`](crate::records::Redundant) or
/// [`Compact`](crate::records::Compact).
///
/// ```ignore
/// let n = with_layout!(RecordFormat::of(page), L => L::n_owned(page, rec));
/// ```
#[macro_export]
macro_rules! with_layout {
    ($format:expr, $layout:ident => $body:expr) => {
        match $format {
            $crate::storage::RecordFormat::Redundant => {
                #[allow(dead_code)]
                type $layout = $crate::records::Redundant;
                $body
            }
            $crate::storage::RecordFormat::Compact => {
                #[allow(dead_code)]
                type $layout = $crate::records::Compact;
                $body
            }
        }
    };
}

/// Returns a [`PageCorrupted`](crate::error::PageCorrupted) report for
/// `$page` unless `$cond` holds.
///
/// ```ignore
/// ensure_page!(page, next < heap_top, "record at {} links past the heap", rec);
/// ```
#[macro_export]
macro_rules! ensure_page {
    ($page:expr, $cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::corrupted(
                $crate::storage::page::page_no($page),
                format!($($arg)+),
            ));
        }
    };
}
