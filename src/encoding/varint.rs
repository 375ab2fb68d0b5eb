//! # Redo Log Variable-Length Integers
//!
//! Offsets, byte counts and page numbers inside redo records are written
//! with a prefix-length encoding: the number of leading one bits of the first
//! byte tells how many bytes follow, and each longer form starts counting
//! where the shorter one ended, so no value has two encodings.
//!
//! ## Encoding Format
//!
//! | Value Range                 | Bytes | First byte  |
//! |-----------------------------|-------|-------------|
//! | 0 - 0x7F                    | 1     | `0xxxxxxx`  |
//! | 0x80 - 0x407F               | 2     | `10xxxxxx`  |
//! | 0x4080 - 0x20407F           | 3     | `110xxxxx`  |
//! | 0x204080 - 0x1020407F       | 4     | `1110xxxx`  |
//! | 0x10204080 - u32::MAX       | 5     | `11110000`  |
//!
//! The stored payload of an N-byte form is `value - MIN_NBYTE`, big-endian,
//! with the high payload bits packed into the first byte.
//!
//! ## Boundary Values
//!
//! - 0x7F: maximum 1-byte value
//! - 0x80: minimum 2-byte value, encoded `[0x80, 0x00]`
//! - 0x407F: maximum 2-byte value, encoded `[0xBF, 0xFF]`
//! - 0x4080: minimum 3-byte value
//! - 0x204080: minimum 4-byte value
//! - 0x10204080: minimum 5-byte value
//!
//! ## Usage Example
//!
//! ```rust
//! use indexpage::encoding::varint::{encode_varint, decode_varint, varint_len};
//!
//! let mut buf = [0u8; 5];
//! let written = encode_varint(1000, &mut buf);
//! assert_eq!(written, varint_len(1000));
//!
//! let (value, read) = decode_varint(&buf).unwrap();
//! assert_eq!(value, 1000);
//! assert_eq!(read, 2);
//! ```
//!
//! ## Error Handling
//!
//! `decode_varint` never panics on malformed input; recovery feeds it bytes
//! read back from a possibly torn log:
//! - Empty buffer: "empty buffer for varint decode"
//! - Truncated encoding: "truncated N-byte varint"
//! - Invalid marker: "invalid varint marker: X"

use eyre::{bail, ensure, Result};

pub const MIN_2BYTE: u32 = 1 << 7;
pub const MIN_3BYTE: u32 = MIN_2BYTE + (1 << 14);
pub const MIN_4BYTE: u32 = MIN_3BYTE + (1 << 21);
pub const MIN_5BYTE: u32 = MIN_4BYTE + (1 << 28);

/// Largest encoded length.
pub const MAX_VARINT_LEN: usize = 5;

pub fn varint_len(value: u32) -> usize {
    if value < MIN_2BYTE {
        1
    } else if value < MIN_3BYTE {
        2
    } else if value < MIN_4BYTE {
        3
    } else if value < MIN_5BYTE {
        4
    } else {
        5
    }
}

pub fn encode_varint(value: u32, buf: &mut [u8]) -> usize {
    if value < MIN_2BYTE {
        buf[0] = value as u8;
        1
    } else if value < MIN_3BYTE {
        let v = value - MIN_2BYTE;
        buf[0] = 0x80 | (v >> 8) as u8;
        buf[1] = v as u8;
        2
    } else if value < MIN_4BYTE {
        let v = value - MIN_3BYTE;
        buf[0] = 0xC0 | (v >> 16) as u8;
        buf[1] = (v >> 8) as u8;
        buf[2] = v as u8;
        3
    } else if value < MIN_5BYTE {
        let v = value - MIN_4BYTE;
        buf[0] = 0xE0 | (v >> 24) as u8;
        buf[1] = (v >> 16) as u8;
        buf[2] = (v >> 8) as u8;
        buf[3] = v as u8;
        4
    } else {
        let v = value - MIN_5BYTE;
        buf[0] = 0xF0;
        buf[1..5].copy_from_slice(&v.to_be_bytes());
        5
    }
}

/// Appends the encoding of `value` to `out`.
pub fn push_varint(value: u32, out: &mut Vec<u8>) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = encode_varint(value, &mut buf);
    out.extend_from_slice(&buf[..n]);
}

pub fn decode_varint(buf: &[u8]) -> Result<(u32, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let first = buf[0] as u32;

    if first < 0x80 {
        Ok((first, 1))
    } else if first < 0xC0 {
        ensure!(buf.len() >= 2, "truncated 2-byte varint");
        let v = ((first & 0x3F) << 8) | buf[1] as u32;
        Ok((v + MIN_2BYTE, 2))
    } else if first < 0xE0 {
        ensure!(buf.len() >= 3, "truncated 3-byte varint");
        let v = ((first & 0x1F) << 16) | (buf[1] as u32) << 8 | buf[2] as u32;
        Ok((v + MIN_3BYTE, 3))
    } else if first < 0xF0 {
        ensure!(buf.len() >= 4, "truncated 4-byte varint");
        let v = ((first & 0x0F) << 24)
            | (buf[1] as u32) << 16
            | (buf[2] as u32) << 8
            | buf[3] as u32;
        Ok((v + MIN_4BYTE, 4))
    } else if first == 0xF0 {
        ensure!(buf.len() >= 5, "truncated 5-byte varint");
        let v = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        match v.checked_add(MIN_5BYTE) {
            Some(value) => Ok((value, 5)),
            None => bail!("varint overflows u32: payload {:#x}", v),
        }
    } else {
        bail!("invalid varint marker: {:#04x}", first)
    }
}
