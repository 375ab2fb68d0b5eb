//! # Redo Records
//!
//! Every page change made by this crate is described by one [`RedoRecord`].
//! Records are written back to back inside a mini-transaction frame:
//!
//! ```text
//! +-----+-----------------+------------------+---------------+
//! | tag | page_no varint  | body_len varint  | body          |
//! +-----+-----------------+------------------+---------------+
//! ```
//!
//! ## Bodies
//!
//! ```text
//! Tag  Record                  Body (varints unless noted)
//! ---  ----------------------  ---------------------------------------------
//! 1    insert redundant, heap  prev, enc_hdr, hdr_c, data_c, literal
//! 2    insert redundant, free  prev, enc_hdr, hdr_c, data_c, literal
//! 3    insert dynamic, heap    prev, enc_hdr_l, hdr_c, data_c, literal
//! 4    insert dynamic, free    prev, shift, enc_hdr_l, hdr_c, data_c, literal
//! 5    delete redundant        prev
//! 6    delete dynamic          prev, hdr_size, data_size
//! 7    page create             flags u8, level, index_id u64, max_trx_id u64
//! 8    page image              offset, bytes
//! ```
//!
//! `prev` is the predecessor's origin minus the infimum origin. `hdr_c` and
//! `data_c` count the header bytes (backwards from the fixed header bytes)
//! and payload bytes (forwards from the origin) the new record shares with
//! its predecessor; the literal carries the rest, uncommon header bytes
//! first. The literal runs to the end of the body.
//!
//! ```text
//! enc_hdr   = (n_fields - 1) << 3 | one_byte_offsets << 2 | info_bits >> 4
//! enc_hdr_l = uncommon_header_len << 3 | info_bits >> 4
//! shift     = |s| << 1 | (s < 0),   s = extra_size - free_extra_size
//! flags     = compact | rtree << 1
//! ```
//!
//! Decoding never panics: every length is checked against the buffer and a
//! body must be consumed exactly.

use eyre::{bail, ensure, Result, WrapErr};

use crate::encoding::{decode_varint, push_varint};

const TAG_INSERT_REDUNDANT_HEAP: u8 = 1;
const TAG_INSERT_REDUNDANT_REUSE: u8 = 2;
const TAG_INSERT_DYNAMIC_HEAP: u8 = 3;
const TAG_INSERT_DYNAMIC_REUSE: u8 = 4;
const TAG_DELETE_REDUNDANT: u8 = 5;
const TAG_DELETE_DYNAMIC: u8 = 6;
const TAG_PAGE_CREATE: u8 = 7;
const TAG_PAGE_IMAGE: u8 = 8;

const FLAG_COMPACT: u8 = 0x01;
const FLAG_RTREE: u8 = 0x02;

/// Insert into a redundant-format page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRedundant {
    /// Take the space of the free list head instead of the heap top.
    pub reuse: bool,
    pub prev: usize,
    pub enc_hdr: usize,
    pub hdr_c: usize,
    pub data_c: usize,
    pub literal: Vec<u8>,
}

/// Insert into a compact-format page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertDynamic {
    /// Encoded origin shift when the free list head is reused.
    pub shift: Option<usize>,
    pub prev: usize,
    pub enc_hdr_l: usize,
    pub hdr_c: usize,
    pub data_c: usize,
    pub literal: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRedundant {
    pub prev: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteDynamic {
    pub prev: usize,
    /// Header bytes in front of the 5 fixed bytes.
    pub hdr_size: usize,
    pub data_size: usize,
}

/// Formats the page as an empty index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCreate {
    pub compact: bool,
    pub rtree: bool,
    pub level: u16,
    pub index_id: u64,
    pub max_trx_id: u64,
}

/// Overwrites `bytes.len()` bytes of the page at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoOp {
    InsertRedundant(InsertRedundant),
    InsertDynamic(InsertDynamic),
    DeleteRedundant(DeleteRedundant),
    DeleteDynamic(DeleteDynamic),
    PageCreate(PageCreate),
    PageImage(PageImage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoRecord {
    pub page_no: u32,
    pub op: RedoOp,
}

/// Encodes an origin shift `s` in the sign-magnitude form of the log.
pub fn encode_shift(s: isize) -> usize {
    (s.unsigned_abs() << 1) | (s < 0) as usize
}

/// Inverse of [`encode_shift`].
pub fn decode_shift(shift: usize) -> isize {
    let magnitude = (shift >> 1) as isize;
    if shift & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn push(value: usize, out: &mut Vec<u8>) {
    push_varint(value as u32, out);
}

impl RedoRecord {
    pub fn new(page_no: u32, op: RedoOp) -> Self {
        Self { page_no, op }
    }

    fn tag(&self) -> u8 {
        match &self.op {
            RedoOp::InsertRedundant(op) if op.reuse => TAG_INSERT_REDUNDANT_REUSE,
            RedoOp::InsertRedundant(_) => TAG_INSERT_REDUNDANT_HEAP,
            RedoOp::InsertDynamic(op) if op.shift.is_some() => TAG_INSERT_DYNAMIC_REUSE,
            RedoOp::InsertDynamic(_) => TAG_INSERT_DYNAMIC_HEAP,
            RedoOp::DeleteRedundant(_) => TAG_DELETE_REDUNDANT,
            RedoOp::DeleteDynamic(_) => TAG_DELETE_DYNAMIC,
            RedoOp::PageCreate(_) => TAG_PAGE_CREATE,
            RedoOp::PageImage(_) => TAG_PAGE_IMAGE,
        }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match &self.op {
            RedoOp::InsertRedundant(op) => {
                push(op.prev, out);
                push(op.enc_hdr, out);
                push(op.hdr_c, out);
                push(op.data_c, out);
                out.extend_from_slice(&op.literal);
            }
            RedoOp::InsertDynamic(op) => {
                push(op.prev, out);
                if let Some(shift) = op.shift {
                    push(shift, out);
                }
                push(op.enc_hdr_l, out);
                push(op.hdr_c, out);
                push(op.data_c, out);
                out.extend_from_slice(&op.literal);
            }
            RedoOp::DeleteRedundant(op) => push(op.prev, out),
            RedoOp::DeleteDynamic(op) => {
                push(op.prev, out);
                push(op.hdr_size, out);
                push(op.data_size, out);
            }
            RedoOp::PageCreate(op) => {
                let mut flags = 0;
                if op.compact {
                    flags |= FLAG_COMPACT;
                }
                if op.rtree {
                    flags |= FLAG_RTREE;
                }
                out.push(flags);
                push(op.level as usize, out);
                out.extend_from_slice(&op.index_id.to_be_bytes());
                out.extend_from_slice(&op.max_trx_id.to_be_bytes());
            }
            RedoOp::PageImage(op) => {
                push(op.offset, out);
                out.extend_from_slice(&op.bytes);
            }
        }
    }

    /// Appends the wire form of this record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        self.encode_body(&mut body);

        out.push(self.tag());
        push_varint(self.page_no, out);
        push(body.len(), out);
        out.extend_from_slice(&body);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes one record from the start of `buf`. Returns the record and
    /// the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure!(!buf.is_empty(), "empty buffer for redo record");
        let tag = buf[0];
        let mut pos = 1;

        let (page_no, n) = decode_varint(&buf[pos..]).wrap_err("redo record page number")?;
        pos += n;
        let (body_len, n) = decode_varint(&buf[pos..]).wrap_err("redo record length")?;
        pos += n;
        let end = pos
            .checked_add(body_len as usize)
            .filter(|&end| end <= buf.len());
        let Some(end) = end else {
            bail!(
                "redo record body of {} bytes truncated at {}",
                body_len,
                buf.len() - pos
            );
        };

        let mut body = BodyReader {
            buf: &buf[pos..end],
            pos: 0,
        };
        let op = match tag {
            TAG_INSERT_REDUNDANT_HEAP | TAG_INSERT_REDUNDANT_REUSE => {
                RedoOp::InsertRedundant(InsertRedundant {
                    reuse: tag == TAG_INSERT_REDUNDANT_REUSE,
                    prev: body.varint()?,
                    enc_hdr: body.varint()?,
                    hdr_c: body.varint()?,
                    data_c: body.varint()?,
                    literal: body.rest().to_vec(),
                })
            }
            TAG_INSERT_DYNAMIC_HEAP | TAG_INSERT_DYNAMIC_REUSE => {
                let prev = body.varint()?;
                let shift = if tag == TAG_INSERT_DYNAMIC_REUSE {
                    Some(body.varint()?)
                } else {
                    None
                };
                RedoOp::InsertDynamic(InsertDynamic {
                    shift,
                    prev,
                    enc_hdr_l: body.varint()?,
                    hdr_c: body.varint()?,
                    data_c: body.varint()?,
                    literal: body.rest().to_vec(),
                })
            }
            TAG_DELETE_REDUNDANT => RedoOp::DeleteRedundant(DeleteRedundant {
                prev: body.varint()?,
            }),
            TAG_DELETE_DYNAMIC => RedoOp::DeleteDynamic(DeleteDynamic {
                prev: body.varint()?,
                hdr_size: body.varint()?,
                data_size: body.varint()?,
            }),
            TAG_PAGE_CREATE => {
                let flags = body.byte()?;
                ensure!(
                    flags & !(FLAG_COMPACT | FLAG_RTREE) == 0,
                    "unknown page create flags {:#04x}",
                    flags
                );
                let level = body.varint()?;
                ensure!(level <= u16::MAX as usize, "page level {} out of range", level);
                RedoOp::PageCreate(PageCreate {
                    compact: flags & FLAG_COMPACT != 0,
                    rtree: flags & FLAG_RTREE != 0,
                    level: level as u16,
                    index_id: body.u64()?,
                    max_trx_id: body.u64()?,
                })
            }
            TAG_PAGE_IMAGE => RedoOp::PageImage(PageImage {
                offset: body.varint()?,
                bytes: body.rest().to_vec(),
            }),
            other => bail!("unknown redo record tag {}", other),
        };
        ensure!(
            body.pos == body.buf.len(),
            "redo record tag {} has {} trailing bytes",
            tag,
            body.buf.len() - body.pos
        );

        Ok((Self { page_no, op }, end))
    }
}

/// Decodes a sequence of records filling `buf` exactly.
pub fn decode_all(buf: &[u8]) -> Result<Vec<RedoRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (record, n) =
            RedoRecord::decode(&buf[pos..]).wrap_err_with(|| format!("redo record at {}", pos))?;
        records.push(record);
        pos += n;
    }
    Ok(records)
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl BodyReader<'_> {
    fn varint(&mut self) -> Result<usize> {
        let (value, n) = decode_varint(&self.buf[self.pos..])?;
        self.pos += n;
        Ok(value as usize)
    }

    fn byte(&mut self) -> Result<u8> {
        let Some(&b) = self.buf.get(self.pos) else {
            bail!("redo record body truncated");
        };
        self.pos += 1;
        Ok(b)
    }

    fn u64(&mut self) -> Result<u64> {
        let Some(bytes) = self.buf.get(self.pos..self.pos + 8) else {
            bail!("redo record body truncated");
        };
        self.pos += 8;
        let mut b = [0u8; 8];
        b.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(b))
    }

    fn rest(&mut self) -> &[u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}
