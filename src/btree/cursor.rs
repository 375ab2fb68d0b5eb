//! # Page Cursor
//!
//! A [`PageCursor`] is a record origin on one page: the infimum ("before the
//! first record"), a user record, or the supremum ("after the last record").
//! Inserts go after the cursor record, deletes remove it.
//!
//! ## Search
//!
//! [`search_with_match`] positions a cursor relative to a search key:
//!
//! ```text
//! Mode  Cursor lands on                 Equal records count as
//! ----  ------------------------------  ----------------------
//! L     last record <  key              upper side
//! Le    last record <= key              lower side
//! G     first record >  key             lower side
//! Ge    first record >= key             upper side
//! ```
//!
//! The search runs in three phases:
//!
//! 1. **Shortcut**: on a leaf page being filled left to right (direction
//!    RIGHT for more than two inserts), an `Le` search first checks whether
//!    the key falls right after the last inserted record.
//! 2. **Directory**: binary search over the slots until the lower and upper
//!    slot are adjacent.
//! 3. **Chain**: linear walk through the records owned by the upper slot.
//!
//! Each comparison starts from the smaller of the lower and upper bounds'
//! matched prefixes, and the final prefixes are returned with the cursor.

use std::cmp::Ordering;

use eyre::Result;
use rand::Rng;

use super::compare::{compare_with, Matched, SearchKey};
use super::directory::{check_dir, find_owner, slot_of, slot_rec_checked};
use super::{is_user_rec_origin, next_checked};
use crate::config::{PAGE_DIR_SLOT_MAX_N_OWNED, PAGE_LAST_INSERT, PAGE_N_DIRECTION, PAGE_RIGHT};
use crate::ensure_page;
use crate::records::{IndexDef, RecordLayout};
use crate::storage::page::{direction, header_field, is_leaf, n_recs, slot_rec};
use crate::storage::RecordFormat;
use crate::with_layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    L,
    Le,
    G,
    Ge,
}

impl SearchMode {
    /// Whether a record equal to the key belongs below the cursor boundary.
    fn equal_goes_low(self) -> bool {
        matches!(self, SearchMode::G | SearchMode::Le)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    rec: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub cursor: PageCursor,
    /// Prefix the key shares with the upper bound record.
    pub up: Matched,
    /// Prefix the key shares with the lower bound record.
    pub low: Matched,
}

impl PageCursor {
    /// Positions on `rec` without checking it.
    pub fn at(rec: usize) -> Self {
        Self { rec }
    }

    pub fn before_first(page: &[u8]) -> Self {
        Self::at(RecordFormat::of(page).infimum())
    }

    pub fn after_last(page: &[u8]) -> Self {
        Self::at(RecordFormat::of(page).supremum())
    }

    pub fn rec(&self) -> usize {
        self.rec
    }

    pub fn is_before_first(&self, page: &[u8]) -> bool {
        self.rec == RecordFormat::of(page).infimum()
    }

    pub fn is_after_last(&self, page: &[u8]) -> bool {
        self.rec == RecordFormat::of(page).supremum()
    }

    pub fn is_user_rec(&self, page: &[u8]) -> bool {
        !self.is_before_first(page) && !self.is_after_last(page)
    }

    /// Advances to the next record. Returns false when already after the
    /// last record.
    pub fn move_to_next(&mut self, page: &[u8]) -> Result<bool> {
        with_layout!(RecordFormat::of(page), L => {
            if self.rec == L::SUPREMUM {
                return Ok(false);
            }
            self.rec = next_checked::<L>(page, self.rec)?;
            Ok(true)
        })
    }

    /// Steps back to the previous record. Returns false when already before
    /// the first record.
    pub fn move_to_prev(&mut self, page: &[u8]) -> Result<bool> {
        with_layout!(RecordFormat::of(page), L => {
            if self.rec == L::INFIMUM {
                return Ok(false);
            }
            self.rec = prev_rec::<L>(page, self.rec)?;
            Ok(true)
        })
    }
}

/// Predecessor of `rec` in the chain, found through the directory.
pub(crate) fn prev_rec<L: RecordLayout>(page: &[u8], rec: usize) -> Result<usize> {
    let n = check_dir::<L>(page)?;
    let (owner, _) = find_owner::<L>(page, rec)?;
    let slot = slot_of::<L>(page, owner, n)?;
    ensure_page!(page, slot > 0, "record {} is owned by the infimum slot", rec);

    let mut r = slot_rec_checked::<L>(page, slot - 1, n)?;
    for _ in 0..=PAGE_DIR_SLOT_MAX_N_OWNED {
        let next = next_checked::<L>(page, r)?;
        if next == rec {
            return Ok(r);
        }
        ensure_page!(page, next != L::SUPREMUM, "record {} is not in the chain", rec);
        r = next;
    }
    Err(crate::error::corrupted(
        crate::storage::page::page_no(page),
        format!("no predecessor of {} within its slot group", rec),
    ))
}

/// Searches the page for `key` and returns the cursor and matched prefixes.
pub fn search_with_match(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    mode: SearchMode,
) -> Result<SearchResult> {
    with_layout!(RecordFormat::of(page), L => search_in::<L>(page, index, key, mode))
}

/// Searches the page for `key` and returns the cursor.
pub fn search(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    mode: SearchMode,
) -> Result<PageCursor> {
    search_with_match(page, index, key, mode).map(|r| r.cursor)
}

fn search_in<L: RecordLayout>(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    mode: SearchMode,
) -> Result<SearchResult> {
    let n_slots = check_dir::<L>(page)?;

    if mode == SearchMode::Le && is_leaf(page) {
        if let Some(result) = try_shortcut::<L>(page, index, key)? {
            return Ok(result);
        }
    }

    let mut low = 0;
    let mut up = n_slots - 1;
    let mut low_m = Matched::default();
    let mut up_m = Matched::default();

    while up - low > 1 {
        let mid = (low + up) / 2;
        let mid_rec = slot_rec_checked::<L>(page, mid, n_slots)?;
        let mut cur = low_m.min(up_m);
        match compare_with::<L>(page, index, key, mid_rec, &mut cur)? {
            Ordering::Greater => (low, low_m) = (mid, cur),
            Ordering::Less => (up, up_m) = (mid, cur),
            Ordering::Equal if mode.equal_goes_low() => (low, low_m) = (mid, cur),
            Ordering::Equal => (up, up_m) = (mid, cur),
        }
    }

    let mut low_rec = slot_rec_checked::<L>(page, low, n_slots)?;
    let mut up_rec = slot_rec_checked::<L>(page, up, n_slots)?;

    let mut hops = 0;
    loop {
        let mid_rec = next_checked::<L>(page, low_rec)?;
        if mid_rec == up_rec {
            break;
        }
        hops += 1;
        ensure_page!(
            page,
            hops <= PAGE_DIR_SLOT_MAX_N_OWNED && mid_rec != L::SUPREMUM,
            "slot {} record is not reachable from slot {}",
            up,
            low
        );
        let mut cur = low_m.min(up_m);
        match compare_with::<L>(page, index, key, mid_rec, &mut cur)? {
            Ordering::Greater => (low_rec, low_m) = (mid_rec, cur),
            Ordering::Less => (up_rec, up_m) = (mid_rec, cur),
            Ordering::Equal if mode.equal_goes_low() => (low_rec, low_m) = (mid_rec, cur),
            Ordering::Equal => (up_rec, up_m) = (mid_rec, cur),
        }
    }

    let rec = match mode {
        SearchMode::G | SearchMode::Ge => up_rec,
        SearchMode::L | SearchMode::Le => low_rec,
    };
    Ok(SearchResult {
        cursor: PageCursor::at(rec),
        up: up_m,
        low: low_m,
    })
}

/// Checks whether the key falls right after the last inserted record.
fn try_shortcut<L: RecordLayout>(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
) -> Result<Option<SearchResult>> {
    let last = header_field(page, PAGE_LAST_INSERT);
    if direction(page) != PAGE_RIGHT
        || header_field(page, PAGE_N_DIRECTION) <= 2
        || !is_user_rec_origin::<L>(page, last)
    {
        return Ok(None);
    }

    let mut low = Matched::default();
    if compare_with::<L>(page, index, key, last, &mut low)? == Ordering::Less {
        return Ok(None);
    }
    let next = next_checked::<L>(page, last)?;
    let mut up = Matched::default();
    if next != L::SUPREMUM
        && compare_with::<L>(page, index, key, next, &mut up)? != Ordering::Less
    {
        return Ok(None);
    }
    Ok(Some(SearchResult {
        cursor: PageCursor::at(last),
        up,
        low,
    }))
}

/// Origins of all user records in chain order.
pub fn user_recs(page: &[u8]) -> Result<Vec<usize>> {
    with_layout!(RecordFormat::of(page), L => {
        check_dir::<L>(page)?;
        let n = n_recs(page);
        let mut out = Vec::with_capacity(n);
        let mut rec = next_checked::<L>(page, L::INFIMUM)?;
        while rec != L::SUPREMUM {
            ensure_page!(page, out.len() < n, "record chain longer than {} records", n);
            out.push(rec);
            rec = next_checked::<L>(page, rec)?;
        }
        ensure_page!(page, out.len() == n, "record chain has {} of {} records", out.len(), n);
        Ok(out)
    })
}

/// Number of records before `rec` in the chain, counting the infimum: 0 for
/// the infimum, 1 for the first user record, `n_recs + 1` for the supremum.
pub fn n_recs_before(page: &[u8], rec: usize) -> Result<usize> {
    with_layout!(RecordFormat::of(page), L => {
        let n = check_dir::<L>(page)?;
        let (owner, hops) = find_owner::<L>(page, rec)?;
        let slot = slot_of::<L>(page, owner, n)?;
        let mut before = 0;
        for i in 0..slot {
            let owned = L::n_owned(page, slot_rec_checked::<L>(page, i, n)?);
            ensure_page!(page, owned <= PAGE_DIR_SLOT_MAX_N_OWNED, "slot {} owns {} records", i, owned);
            before += owned;
        }
        let owned = L::n_owned(page, owner);
        ensure_page!(page, owned <= PAGE_DIR_SLOT_MAX_N_OWNED, "slot {} owns {} records", slot, owned);
        ensure_page!(page, owned > hops, "record {} lies outside its owner's group", rec);
        Ok(before + owned - hops - 1)
    })
}

/// The record with `nth` records before it (see [`n_recs_before`]).
pub fn rec_at(page: &[u8], nth: usize) -> Result<usize> {
    with_layout!(RecordFormat::of(page), L => {
        let n = check_dir::<L>(page)?;
        ensure_page!(page, nth <= n_recs(page) + 1, "record {} of {} requested", nth, n_recs(page));
        let mut before = 0;
        for slot in 0..n {
            let rec = slot_rec_checked::<L>(page, slot, n)?;
            let owned = L::n_owned(page, rec);
            ensure_page!(page, owned <= PAGE_DIR_SLOT_MAX_N_OWNED, "slot {} owns {} records", slot, owned);
            if nth < before + owned {
                if slot == 0 {
                    return Ok(L::INFIMUM);
                }
                let mut r = slot_rec(page, slot - 1);
                for _ in before..=nth {
                    r = next_checked::<L>(page, r)?;
                }
                return Ok(r);
            }
            before += owned;
        }
        Err(crate::error::corrupted(
            crate::storage::page::page_no(page),
            format!("directory owns {} records, fewer than {}", before, nth + 1),
        ))
    })
}

/// Positions on the `nth` user record (0-based), or after the last record
/// when `nth >= n_recs`.
pub fn open_on_nth_user_rec(page: &[u8], nth: usize) -> Result<PageCursor> {
    let n = n_recs(page);
    if nth >= n {
        return Ok(PageCursor::after_last(page));
    }
    rec_at(page, nth + 1).map(PageCursor::at)
}

/// Positions on a uniformly chosen user record, or before the first record
/// of an empty page.
pub fn open_on_random_user_rec<R: Rng + ?Sized>(page: &[u8], rng: &mut R) -> Result<PageCursor> {
    let n = n_recs(page);
    if n == 0 {
        return Ok(PageCursor::before_first(page));
    }
    rec_at(page, rng.gen_range(0..n) + 1).map(PageCursor::at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::testutil::{int_index, int_key, page_with_keys, rec_key};
    use crate::error::is_corruption;
    use crate::records::Compact;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn expected(keys: &[u32], k: u32, mode: SearchMode) -> Option<u32> {
        match mode {
            SearchMode::L => keys.iter().rev().find(|&&x| x < k).copied(),
            SearchMode::Le => keys.iter().rev().find(|&&x| x <= k).copied(),
            SearchMode::G => keys.iter().find(|&&x| x > k).copied(),
            SearchMode::Ge => keys.iter().find(|&&x| x >= k).copied(),
        }
    }

    #[test]
    fn search_matches_linear_scan() {
        let index = int_index();
        let keys: Vec<u32> = (0..60).map(|i| i * 3).collect();
        for format in [RecordFormat::Compact, RecordFormat::Redundant] {
            let page = page_with_keys(format, &index, &keys);
            for k in 0..185 {
                let kb = int_key(k);
                let key = SearchKey::new().field(&kb);
                for mode in [SearchMode::L, SearchMode::Le, SearchMode::G, SearchMode::Ge] {
                    let cursor = search(&page, &index, &key, mode).unwrap();
                    let found = if cursor.is_user_rec(&page) {
                        Some(rec_key(&page, cursor.rec()))
                    } else {
                        None
                    };
                    assert_eq!(found, expected(&keys, k, mode), "key {} mode {:?}", k, mode);
                }
            }
        }
    }

    #[test]
    fn empty_page_positions_on_sentinels() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Compact, &index, &[]);
        let kb = int_key(1);
        let key = SearchKey::new().field(&kb);

        assert!(search(&page, &index, &key, SearchMode::Le).unwrap().is_before_first(&page));
        assert!(search(&page, &index, &key, SearchMode::Ge).unwrap().is_after_last(&page));
    }

    #[test]
    fn shortcut_after_ascending_inserts() {
        let index = int_index();
        let keys: Vec<u32> = (0..20).collect();
        let page = page_with_keys(RecordFormat::Compact, &index, &keys);
        assert_eq!(direction(&page), PAGE_RIGHT);
        assert!(header_field(&page, PAGE_N_DIRECTION) > 2);

        let kb = int_key(100);
        let key = SearchKey::new().field(&kb);
        let result = search_with_match(&page, &index, &key, SearchMode::Le).unwrap();

        assert_eq!(result.cursor.rec(), header_field(&page, PAGE_LAST_INSERT));
        assert_eq!(rec_key(&page, result.cursor.rec()), 19);
    }

    #[test]
    fn movement_visits_every_record() {
        let index = int_index();
        let keys: Vec<u32> = (0..30).rev().collect();
        let page = page_with_keys(RecordFormat::Redundant, &index, &keys);

        let mut cursor = PageCursor::before_first(&page);
        let mut forward = Vec::new();
        while cursor.move_to_next(&page).unwrap() && cursor.is_user_rec(&page) {
            forward.push(rec_key(&page, cursor.rec()));
        }
        assert_eq!(forward, (0..30).collect::<Vec<_>>());
        assert!(!cursor.move_to_next(&page).unwrap());

        let mut backward = Vec::new();
        while cursor.move_to_prev(&page).unwrap() && cursor.is_user_rec(&page) {
            backward.push(rec_key(&page, cursor.rec()));
        }
        assert_eq!(backward, (0..30).rev().collect::<Vec<_>>());
        assert!(cursor.is_before_first(&page));
    }

    #[test]
    fn nth_and_position_agree() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Compact, &index, &(0..45).collect::<Vec<_>>());
        let recs = user_recs(&page).unwrap();

        for (i, &rec) in recs.iter().enumerate() {
            assert_eq!(n_recs_before(&page, rec).unwrap(), i + 1);
            assert_eq!(rec_at(&page, i + 1).unwrap(), rec);
            assert_eq!(open_on_nth_user_rec(&page, i).unwrap().rec(), rec);
        }
        assert_eq!(n_recs_before(&page, Compact::INFIMUM).unwrap(), 0);
        assert_eq!(n_recs_before(&page, Compact::SUPREMUM).unwrap(), 46);
        assert_eq!(rec_at(&page, 46).unwrap(), Compact::SUPREMUM);
        assert!(open_on_nth_user_rec(&page, 45).unwrap().is_after_last(&page));
    }

    #[test]
    fn random_positioning_stays_on_user_records() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Compact, &index, &(0..17).collect::<Vec<_>>());
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let cursor = open_on_random_user_rec(&page, &mut rng).unwrap();
            assert!(cursor.is_user_rec(&page));
        }

        let empty = page_with_keys(RecordFormat::Compact, &index, &[]);
        assert!(open_on_random_user_rec(&empty, &mut rng).unwrap().is_before_first(&empty));
    }

    #[test]
    fn chain_cycle_is_detected() {
        let index = int_index();
        let mut page = page_with_keys(RecordFormat::Compact, &index, &(0..10).collect::<Vec<_>>());
        let recs = user_recs(&page).unwrap();
        Compact::set_next_offs(&mut page, recs[6], recs[2]);

        assert!(is_corruption(&user_recs(&page).unwrap_err()));
        let kb = int_key(8);
        let key = SearchKey::new().field(&kb);
        let err = search(&page, &index, &key, SearchMode::Le).unwrap_err();
        assert!(is_corruption(&err));
    }

    #[test]
    fn slot_outside_heap_is_detected() {
        let index = int_index();
        let mut page = page_with_keys(RecordFormat::Redundant, &index, &(0..20).collect::<Vec<_>>());
        crate::storage::page::set_slot_rec(&mut page, 1, 16000);

        let kb = int_key(3);
        let key = SearchKey::new().field(&kb);
        assert!(is_corruption(&search(&page, &index, &key, SearchMode::Ge).unwrap_err()));
    }

    #[test]
    fn middle_slot_below_heap_is_detected_when_counting() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Compact, &index, &(0..45).collect::<Vec<_>>());
        let last = *user_recs(&page).unwrap().last().unwrap();
        let mut bad = page.clone();
        crate::storage::page::set_slot_rec(&mut bad, 1, 3);

        assert!(is_corruption(&n_recs_before(&bad, last).unwrap_err()));
        assert!(is_corruption(&n_recs_before(&bad, Compact::SUPREMUM).unwrap_err()));
        assert!(is_corruption(&rec_at(&bad, 45).unwrap_err()));
        assert_eq!(n_recs_before(&page, last).unwrap(), 45);
    }
}
