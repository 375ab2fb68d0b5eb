//! # Encoding Module
//!
//! - **Varint encoding**: prefix-length integers used inside redo records
//! - **Fixed encoding**: big-endian 2/4/8-byte fields of page headers and
//!   record headers

pub mod fixed;
pub mod varint;

pub use fixed::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
pub use varint::{decode_varint, encode_varint, push_varint, varint_len};
