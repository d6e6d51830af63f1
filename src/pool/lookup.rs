//! Ordered lookup with a locality hint.
//!
//! Joins resolve a sibling row by entity id. During an iteration the
//! sibling's previous match is almost always a handful of rows behind the
//! next one, so the search first probes a small window ahead of the hint and
//! only falls back to a bounded binary search when the target lies outside
//! it. The hint is advisory: any stale or out-of-range value degrades to a
//! full binary search, never to a wrong answer.

use crate::{entity, pool::Pool};

/// Width of the probe window ahead of the hint.
pub(crate) const GUESS_RANGE: usize = 64;

/// Binary search for `target` in `ids[from..to)`.
fn search(ids: &[entity::Id], mut from: usize, mut to: usize, target: entity::Id) -> Option<usize> {
    while from < to {
        let mid = (from + to) / 2;
        let v = ids[mid];
        if v == target {
            return Some(mid);
        }
        if v < target {
            from = mid + 1;
        } else {
            to = mid;
        }
    }
    None
}

impl Pool {
    /// Locate the row holding `target`, using the pool's cached hint.
    #[inline]
    pub(crate) fn lookup(&self, target: entity::Id) -> Option<usize> {
        self.lookup_hinted(target, self.last_lookup())
    }

    /// Locate the row holding `target`, starting from an explicit hint row.
    ///
    /// A hit updates the pool's cached hint, so a run of lookups with
    /// ascending targets walks the array in amortised constant time.
    pub(crate) fn lookup_hinted(&self, target: entity::Id, hint: usize) -> Option<usize> {
        let ids = self.ids();
        let n = ids.len();
        if n == 0 {
            return None;
        }
        let found = if hint >= n {
            search(ids, 0, n, target)
        } else if target <= ids[hint] {
            if target == ids[hint] {
                Some(hint)
            } else {
                search(ids, 0, hint, target)
            }
        } else if hint + 2 * GUESS_RANGE >= n {
            search(ids, hint + 1, n, target)
        } else if target > ids[hint + GUESS_RANGE] {
            search(ids, hint + GUESS_RANGE + 1, n, target)
        } else {
            search(ids, hint + 1, hint + GUESS_RANGE + 1, target)
        };
        if let Some(row) = found {
            self.set_last_lookup(row);
        }
        found
    }
}
