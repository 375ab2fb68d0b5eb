//! # Compressed Pages
//!
//! A compact page may carry a compressed image of a fixed power-of-two size
//! beside it. The image holds the compressed stream, a modification log of
//! records appended since the last compression, and a trailer with
//! uncompressed per-record data:
//!
//! ```text
//! +--------------------+--------------------+-------+------------------+
//! | compressed stream  | modification log   | free  | trailer          |
//! +--------------------+--------------------+-------+------------------+
//! 0                                          m_end          size - trailer
//! ```
//!
//! [`ZipDescriptor`] tracks the sizes only; the actual codec sits behind
//! [`PageCompressor`]. An insert fits in place when its record, minus the
//! next pointer and info byte the log does not store, still leaves room for
//! the trailer grown by one dense directory entry.
//!
//! ## Insert Flow
//!
//! 1. Reorganize first if only a reorganized page would have room.
//! 2. If the record does not fit the image: an empty page is recreated and
//!    recompressed; a page with a non-empty log or with garbage is
//!    reorganized and recompressed, the cursor re-seeked by position.
//! 3. If it still does not fit, the record is inserted without redo, the page
//!    is reorganized and recompressed and logged as an image. If compression
//!    fails the pre-insert page is restored.
//! 4. Otherwise the record is inserted in place, reusing a freed record only
//!    at its own origin, and appended to the modification log.

use eyre::{ensure, Result};

use super::cursor::{n_recs_before, rec_at};
use super::insert::{check_insert, insert_low, FreeReuse};
use super::reorganize::{log_image, rebuild};
use super::{next_checked, PageCursor};
use crate::config::{
    CompressionLevel, BTR_EXTERN_FIELD_REF_SIZE, PAGE_HEAP_NO_USER_LOW, PAGE_SIZE,
    PAGE_ZIP_CLUST_LEAF_SLOT_SIZE, PAGE_ZIP_DIR_SLOT_SIZE, PAGE_ZIP_MIN_SIZE, REC_NODE_PTR_SIZE,
    REC_N_NEW_EXTRA_BYTES,
};
use crate::records::{Compact, EncodedRecord, IndexDef};
use crate::redo::apply::{apply_page_create, page_create_of};
use crate::redo::{RedoOp, RedoRecord, RedoSink};
use crate::storage::page::{
    check_frame, has_garbage, is_empty, is_leaf, max_insert_size,
    max_insert_size_after_reorganize, n_heap, page_no,
};
use crate::storage::RecordFormat;

/// Bytes of a record header that the modification log does not store.
const MLOG_OMITTED: usize = REC_N_NEW_EXTRA_BYTES - 2;

/// Compresses a page image.
pub trait PageCompressor {
    /// Returns the size of the compressed stream for `page`, or `None` if
    /// the codec failed.
    fn compress(&mut self, page: &[u8], level: CompressionLevel) -> Option<usize>;
}

/// Size bookkeeping of the compressed image of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipDescriptor {
    pub size: usize,
    /// End of the compressed stream and the modification log.
    pub m_end: usize,
    /// Whether the modification log holds records.
    pub m_nonempty: bool,
    /// Externally stored column references on the page.
    pub n_blobs: usize,
    /// Clustered leaf pages keep transaction fields uncompressed.
    pub clustered: bool,
}

impl ZipDescriptor {
    pub fn new(size: usize, clustered: bool) -> Result<Self> {
        ensure!(
            size.is_power_of_two() && (PAGE_ZIP_MIN_SIZE..=PAGE_SIZE).contains(&size),
            "compressed page size {} is not a power of two in {}..={}",
            size,
            PAGE_ZIP_MIN_SIZE,
            PAGE_SIZE
        );
        Ok(Self {
            size,
            m_end: 0,
            m_nonempty: false,
            n_blobs: 0,
            clustered,
        })
    }

    /// Trailer bytes for the records of `page`, plus one if `create`.
    pub fn trailer(&self, page: &[u8], create: bool) -> usize {
        let n_dense = n_heap(page).saturating_sub(PAGE_HEAP_NO_USER_LOW) + create as usize;
        let per_rec = if !is_leaf(page) {
            PAGE_ZIP_DIR_SLOT_SIZE + REC_NODE_PTR_SIZE
        } else if self.clustered {
            PAGE_ZIP_CLUST_LEAF_SLOT_SIZE
        } else {
            PAGE_ZIP_DIR_SLOT_SIZE
        };
        n_dense * per_rec + self.n_blobs * BTR_EXTERN_FIELD_REF_SIZE
    }

    /// Whether a record of `rec_size` bytes can be appended to the
    /// modification log.
    pub fn available(&self, page: &[u8], rec_size: usize, create: bool) -> bool {
        rec_size.saturating_sub(MLOG_OMITTED) + self.trailer(page, create) + self.m_end < self.size
    }

    /// Compresses `page` into the image, emptying the modification log.
    /// Leaves the descriptor alone and returns `false` if the result does not
    /// fit.
    pub fn compress_page<C: PageCompressor + ?Sized>(
        &mut self,
        page: &[u8],
        level: CompressionLevel,
        compressor: &mut C,
    ) -> bool {
        match compressor.compress(page, level) {
            Some(len) if len + self.trailer(page, false) <= self.size => {
                self.m_end = len;
                self.m_nonempty = false;
                true
            }
            other => {
                tracing::debug!(
                    page_no = page_no(page),
                    compressed = ?other,
                    size = self.size,
                    level = level.get(),
                    "page does not compress into its image"
                );
                false
            }
        }
    }
}

/// Reorganizes a compressed page and recompresses it. On failure the page
/// is restored and `false` returned.
pub fn reorganize_zip<C, M>(
    page: &mut [u8],
    zip: &mut ZipDescriptor,
    index: &IndexDef,
    level: CompressionLevel,
    compressor: &mut C,
    mtr: &mut M,
) -> Result<bool>
where
    C: PageCompressor + ?Sized,
    M: RedoSink + ?Sized,
{
    check_frame(page)?;
    ensure!(
        RecordFormat::of(page) == RecordFormat::Compact,
        "compressed pages hold compact records only"
    );
    let saved = page.to_vec();
    let n = rebuild::<Compact>(page, index)?;
    if !zip.compress_page(page, level, compressor) {
        page.copy_from_slice(&saved);
        return Ok(false);
    }
    log_image(page, mtr);
    tracing::debug!(page_no = page_no(page), n_recs = n, m_end = zip.m_end, "compressed page reorganized");
    Ok(true)
}

/// Forwards page modifications but drops redo records.
struct Unlogged<'m, M: ?Sized>(&'m mut M);

impl<M: RedoSink + ?Sized> RedoSink for Unlogged<'_, M> {
    fn is_logged(&self) -> bool {
        false
    }

    fn log(&mut self, _record: RedoRecord) {}

    fn set_modified(&mut self, page_no: u32) {
        self.0.set_modified(page_no);
    }
}

/// Inserts `rec` after the cursor record of a compressed page.
///
/// The cursor may be moved when the page is reorganized; it stays on the
/// same logical predecessor. Returns `None` if the record fits neither the
/// page nor its compressed image.
#[allow(clippy::too_many_arguments)]
pub fn insert_rec_zip<C, M>(
    page: &mut [u8],
    zip: &mut ZipDescriptor,
    index: &IndexDef,
    cursor: &mut PageCursor,
    rec: &EncodedRecord,
    level: CompressionLevel,
    compressor: &mut C,
    mtr: &mut M,
) -> Result<Option<usize>>
where
    C: PageCompressor + ?Sized,
    M: RedoSink + ?Sized,
{
    check_insert(page, cursor, rec)?;
    ensure!(
        rec.format() == RecordFormat::Compact,
        "compressed pages hold compact records only"
    );
    let size = rec.size();
    let reorg_before = has_garbage(page)
        && size > max_insert_size(page, 1)
        && size <= max_insert_size_after_reorganize(page, 1);

    if reorg_before || !zip.available(page, size, true) {
        if is_empty(page) {
            let page_no = page_no(page);
            let op = page_create_of(page);
            apply_page_create(page, page_no, &op)?;
            if mtr.is_logged() {
                mtr.log(RedoRecord::new(page_no, RedoOp::PageCreate(op)));
            }
            mtr.set_modified(page_no);
            zip.n_blobs = 0;
            zip.m_nonempty = false;
            *cursor = PageCursor::before_first(page);
            if !zip.compress_page(page, level, compressor) || !zip.available(page, size, true) {
                return Ok(None);
            }
        } else {
            let mut fits = false;
            if zip.m_nonempty || has_garbage(page) {
                let pos = n_recs_before(page, cursor.rec())?;
                if !reorganize_zip(page, zip, index, level, compressor, mtr)? {
                    return Ok(None);
                }
                *cursor = PageCursor::at(rec_at(page, pos)?);
                fits = zip.available(page, size, true);
            }
            if !fits {
                return insert_then_recompress(page, zip, index, cursor, rec, level, compressor, mtr);
            }
        }
    }

    let Some(origin) =
        insert_low::<Compact, M>(page, index, cursor.rec(), rec, mtr, FreeReuse::AtOrigin)?
    else {
        return Ok(None);
    };
    zip.m_end += size - MLOG_OMITTED;
    zip.m_nonempty = true;
    zip.n_blobs += rec.n_extern();
    Ok(Some(origin))
}

#[allow(clippy::too_many_arguments)]
fn insert_then_recompress<C, M>(
    page: &mut [u8],
    zip: &mut ZipDescriptor,
    index: &IndexDef,
    cursor: &mut PageCursor,
    rec: &EncodedRecord,
    level: CompressionLevel,
    compressor: &mut C,
    mtr: &mut M,
) -> Result<Option<usize>>
where
    C: PageCompressor + ?Sized,
    M: RedoSink + ?Sized,
{
    let saved = page.to_vec();
    let inserted = insert_low::<Compact, _>(
        page,
        index,
        cursor.rec(),
        rec,
        &mut Unlogged(&mut *mtr),
        FreeReuse::AtStart,
    )?;
    let Some(ins) = inserted else {
        return Ok(None);
    };

    let n_blobs = zip.n_blobs;
    let recompressed = n_recs_before(page, ins).and_then(|pos| {
        zip.n_blobs += rec.n_extern();
        Ok(reorganize_zip(page, zip, index, level, compressor, mtr)?.then_some(pos))
    });
    let pos = match recompressed {
        Ok(Some(pos)) => pos,
        other => {
            zip.n_blobs = n_blobs;
            page.copy_from_slice(&saved);
            return other.map(|_| None);
        }
    };
    *cursor = PageCursor::at(rec_at(page, pos - 1)?);
    let origin = next_checked::<Compact>(page, cursor.rec())?;
    Ok(Some(origin))
}
