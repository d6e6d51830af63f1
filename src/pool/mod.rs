//! Packed per-type component storage.
//!
//! A pool holds one component type as parallel dense arrays: the entity id
//! array, the packed payload rows for data pools, and the host-reference side
//! table for foreign pools. Outside an iteration step, every non-order pool
//! keeps its id array strictly increasing; tag pools may carry a transient
//! duplicate between a disable and the next visit that absorbs it.
//!
//! # Invariants
//! - `data.len() == ids.len() * stride.payload_size()`
//! - `refs.len() == ids.len()` for foreign pools, zero otherwise
//! - for sorted strides the id array is non-decreasing, and strictly
//!   increasing whenever no iteration is in flight
//!
//! Buffers are allocated lazily on the first insert, grow by ×1.5, and only
//! shrink on an explicit collect.

mod lookup;
mod tag;

use std::cell::Cell;

use log::trace;

use crate::{
    component::{HostRef, Stride},
    entity,
};

/// One recorded consequence of sweeping a designated reference pool: either a
/// surviving row moved down, or a row died and its side-table slot was
/// dropped. Replayed to the host in sweep order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefEvent {
    Moved { from: usize, to: usize },
    Dead { row: usize },
}

/// The storage for one component type.
pub(crate) struct Pool {
    /// The payload layout of this pool.
    stride: Stride,

    /// Capacity of the first allocation.
    cap_hint: usize,

    /// The dense entity id array.
    ids: Vec<entity::Id>,

    /// Packed payload rows, `ids.len() * k` bytes for a data stride of `k`.
    data: Vec<u8>,

    /// The host-reference side table for foreign pools.
    refs: Vec<Option<HostRef>>,

    /// Cached row hint for the join fast path. Advisory only; stale values
    /// fall back to a full binary search.
    last_lookup: Cell<usize>,

    /// Whether the host designated this (foreign) pool for reference
    /// maintenance; sweeps then journal their row movements.
    is_reference: bool,

    /// Pending reference events awaiting replay to the host.
    journal: Vec<RefEvent>,
}

impl Pool {
    /// Construct an empty pool. Nothing is allocated until the first insert.
    pub(crate) fn new(stride: Stride, cap_hint: usize) -> Self {
        Self {
            stride,
            cap_hint,
            ids: Vec::new(),
            data: Vec::new(),
            refs: Vec::new(),
            last_lookup: Cell::new(0),
            is_reference: false,
            journal: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn stride(&self) -> Stride {
        self.stride
    }

    /// The number of live rows.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The dense id array.
    #[inline]
    pub(crate) fn ids(&self) -> &[entity::Id] {
        &self.ids
    }

    /// Mutable view of the id array, for the mark and renumber passes.
    /// Structural changes go through the dedicated methods.
    #[inline]
    pub(crate) fn ids_mut(&mut self) -> &mut [entity::Id] {
        &mut self.ids
    }

    /// The id at a row, if the row is live.
    #[inline]
    pub(crate) fn id(&self, row: usize) -> Option<entity::Id> {
        self.ids.get(row).copied()
    }

    /// The greatest id in the pool: the tail of the sorted array.
    #[inline]
    pub(crate) fn tail(&self) -> Option<entity::Id> {
        self.ids.last().copied()
    }

    /// Append a row. The caller has already validated the payload against the
    /// stride and the id against the tail-ordering contract.
    pub(crate) fn push(&mut self, id: entity::Id, payload: Option<&[u8]>) -> usize {
        self.reserve_for_push();
        let row = self.ids.len();
        self.ids.push(id);
        match self.stride {
            Stride::Data(k) => match payload {
                Some(bytes) => self.data.extend_from_slice(bytes),
                None => self.data.resize(self.data.len() + k, 0),
            },
            Stride::Foreign => self.refs.push(None),
            Stride::Tag | Stride::Order => {}
        }
        #[cfg(debug_assertions)]
        self.verify_invariants();
        row
    }

    /// Insert an id at a position, shifting the tail right. Only meaningful
    /// for payload-free pools; the sorted tag insertion uses it.
    pub(crate) fn insert_id(&mut self, at: usize, id: entity::Id) {
        self.ids.insert(at, id);
    }

    /// Make room for one more row: the first allocation takes the declared
    /// capacity hint, after that the arrays grow by half their capacity.
    pub(crate) fn reserve_for_push(&mut self) {
        if self.ids.len() < self.ids.capacity() {
            return;
        }
        let grow = if self.ids.capacity() == 0 {
            self.cap_hint
        } else {
            (self.ids.capacity() / 2).max(1)
        };
        trace!(
            "pool grows from {} by {} rows (stride {:?})",
            self.ids.capacity(),
            grow,
            self.stride
        );
        self.ids.reserve_exact(grow);
        if let Stride::Data(k) = self.stride {
            self.data.reserve_exact(grow * k);
        }
        if self.stride == Stride::Foreign {
            self.refs.reserve_exact(grow);
        }
    }

    /// Drop every row but keep the capacity.
    pub(crate) fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
        self.refs.clear();
        self.journal.clear();
        self.last_lookup.set(0);
    }

    /// Trim capacity down to the live count.
    pub(crate) fn shrink(&mut self) {
        self.ids.shrink_to_fit();
        self.data.shrink_to_fit();
        self.refs.shrink_to_fit();
        self.journal.shrink_to_fit();
    }

    /// Bytes reserved by this pool's allocations.
    pub(crate) fn reserved_bytes(&self) -> usize {
        self.ids.capacity() * size_of::<entity::Id>()
            + self.data.capacity()
            + self.refs.capacity() * size_of::<Option<HostRef>>()
    }

    /// Bytes occupied by live rows.
    pub(crate) fn live_bytes(&self) -> usize {
        let per_row = size_of::<entity::Id>()
            + self.stride.payload_size()
            + if self.stride == Stride::Foreign {
                size_of::<Option<HostRef>>()
            } else {
                0
            };
        self.ids.len() * per_row
    }

    /// The packed payload row at an index.
    #[inline]
    pub(crate) fn row_bytes(&self, row: usize) -> &[u8] {
        let k = self.stride.payload_size();
        &self.data[row * k..(row + 1) * k]
    }

    /// The packed payload row at an index, mutably.
    #[inline]
    pub(crate) fn row_bytes_mut(&mut self, row: usize) -> &mut [u8] {
        let k = self.stride.payload_size();
        &mut self.data[row * k..(row + 1) * k]
    }

    /// The side-table reference at a row of a foreign pool.
    #[inline]
    pub(crate) fn object(&self, row: usize) -> Option<HostRef> {
        self.refs[row]
    }

    /// Replace the side-table reference at a row of a foreign pool.
    #[inline]
    pub(crate) fn set_object(&mut self, row: usize, value: Option<HostRef>) {
        self.refs[row] = value;
    }

    /// The cached row hint for the join fast path.
    #[inline]
    pub(crate) fn last_lookup(&self) -> usize {
        self.last_lookup.get()
    }

    /// Move the cached row hint. Shared borrows may do this: the hint is
    /// advisory state, not part of the pool's logical contents.
    #[inline]
    pub(crate) fn set_last_lookup(&self, row: usize) {
        self.last_lookup.set(row);
    }

    /// Designate this pool for reference maintenance.
    #[inline]
    pub(crate) fn set_reference(&mut self) {
        self.is_reference = true;
    }

    #[inline]
    pub(crate) fn is_reference(&self) -> bool {
        self.is_reference
    }

    /// Take the pending reference events, leaving the journal empty.
    pub(crate) fn take_journal(&mut self) -> Vec<RefEvent> {
        std::mem::take(&mut self.journal)
    }

    /// Compact tombstoned rows out, moving survivors downward and keeping
    /// payload rows and side-table slots with their ids. Designated reference
    /// pools journal every move and death for the host to replay.
    ///
    /// Returns the number of rows removed.
    pub(crate) fn sweep(&mut self) -> usize {
        let n = self.ids.len();
        let mut to = 0;
        for from in 0..n {
            if self.ids[from].is_tombstone() {
                if self.is_reference {
                    self.journal.push(RefEvent::Dead { row: from });
                }
                continue;
            }
            if from != to {
                self.move_row(from, to);
                if self.is_reference {
                    self.journal.push(RefEvent::Moved { from, to });
                }
            }
            to += 1;
        }
        self.truncate(to);
        #[cfg(debug_assertions)]
        self.verify_invariants();
        n - to
    }

    /// Copy a row downward during compaction.
    fn move_row(&mut self, from: usize, to: usize) {
        let id = self.ids[from];
        self.ids[to] = id;
        let k = self.stride.payload_size();
        if k > 0 {
            self.data.copy_within(from * k..(from + 1) * k, to * k);
        }
        if self.stride == Stride::Foreign {
            let moved = self.refs[from].take();
            self.refs[to] = moved;
        }
    }

    /// Drop every row at or past the given count.
    pub(crate) fn truncate(&mut self, keep: usize) {
        self.ids.truncate(keep);
        self.data.truncate(keep * self.stride.payload_size());
        if self.stride == Stride::Foreign {
            self.refs.truncate(keep);
        }
    }

    /// Verify the parallel-array and ordering invariants.
    ///
    /// # Panics
    /// Panics if a payload or side-table array is out of step with the ids,
    /// or a sorted pool's ids decrease.
    #[cfg(debug_assertions)]
    pub(crate) fn verify_invariants(&self) {
        let n = self.ids.len();
        assert_eq!(
            self.data.len(),
            n * self.stride.payload_size(),
            "payload rows out of step with ids"
        );
        if self.stride == Stride::Foreign {
            assert_eq!(self.refs.len(), n, "side table out of step with ids");
        }
        if self.stride.is_sorted() {
            assert!(
                self.ids.windows(2).all(|w| w[0] <= w[1]),
                "sorted pool ids decreased"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> entity::Id {
        entity::Id::new(raw)
    }

    #[test]
    fn first_allocation_takes_the_hint() {
        // Given
        let mut pool = Pool::new(Stride::Tag, 16);
        assert_eq!(pool.ids.capacity(), 0);

        // When
        pool.push(id(1), None);

        // Then
        assert_eq!(pool.ids.capacity(), 16);
    }

    #[test]
    fn growth_is_half_the_capacity() {
        // Given
        let mut pool = Pool::new(Stride::Tag, 4);
        for raw in 1..=4 {
            pool.push(id(raw), None);
        }
        assert_eq!(pool.ids.capacity(), 4);

        // When - the fifth push grows the pool
        pool.push(id(5), None);

        // Then
        assert_eq!(pool.ids.capacity(), 6);
    }

    #[test]
    fn data_rows_are_packed_and_zero_filled() {
        // Given
        let mut pool = Pool::new(Stride::Data(4), 8);

        // When
        pool.push(id(1), Some(&[1, 2, 3, 4]));
        pool.push(id(2), None);

        // Then
        assert_eq!(pool.row_bytes(0), &[1, 2, 3, 4]);
        assert_eq!(pool.row_bytes(1), &[0, 0, 0, 0]);
    }

    #[test]
    fn foreign_rows_start_without_a_reference() {
        // Given
        let mut pool = Pool::new(Stride::Foreign, 8);

        // When
        let row = pool.push(id(7), None);

        // Then
        assert_eq!(pool.object(row), None);

        // And when
        pool.set_object(row, Some(HostRef::new(99)));
        assert_eq!(pool.object(row), Some(HostRef::new(99)));
    }

    #[test]
    fn clear_keeps_capacity_and_shrink_releases_it() {
        // Given
        let mut pool = Pool::new(Stride::Data(8), 4);
        for raw in 1..=6 {
            pool.push(id(raw), None);
        }
        let reserved = pool.reserved_bytes();
        assert!(reserved > 0);

        // When
        pool.clear();

        // Then - capacity survives a clear
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.reserved_bytes(), reserved);

        // And when
        pool.shrink();

        // Then
        assert_eq!(pool.reserved_bytes(), 0);
    }

    #[test]
    fn sweep_compacts_around_tombstones() {
        // Given
        let mut pool = Pool::new(Stride::Data(2), 8);
        for raw in 1..=5 {
            pool.push(id(raw), Some(&[raw as u8, 0]));
        }
        pool.ids_mut()[1] = entity::Id::TOMBSTONE;
        pool.ids_mut()[3] = entity::Id::TOMBSTONE;

        // When
        let removed = pool.sweep();

        // Then
        assert_eq!(removed, 2);
        assert_eq!(pool.ids(), &[id(1), id(3), id(5)]);
        assert_eq!(pool.row_bytes(0), &[1, 0]);
        assert_eq!(pool.row_bytes(1), &[3, 0]);
        assert_eq!(pool.row_bytes(2), &[5, 0]);
    }

    #[test]
    fn reference_sweep_journals_moves_and_deaths() {
        // Given
        let mut pool = Pool::new(Stride::Foreign, 8);
        for raw in 1..=4 {
            let row = pool.push(id(raw), None);
            pool.set_object(row, Some(HostRef::new(raw as u64 * 10)));
        }
        pool.set_reference();
        pool.ids_mut()[0] = entity::Id::TOMBSTONE;
        pool.ids_mut()[2] = entity::Id::TOMBSTONE;

        // When
        pool.sweep();

        // Then - survivors moved down with their references
        assert_eq!(pool.ids(), &[id(2), id(4)]);
        assert_eq!(pool.object(0), Some(HostRef::new(20)));
        assert_eq!(pool.object(1), Some(HostRef::new(40)));
        assert_eq!(
            pool.take_journal(),
            vec![
                RefEvent::Dead { row: 0 },
                RefEvent::Moved { from: 1, to: 0 },
                RefEvent::Dead { row: 2 },
                RefEvent::Moved { from: 3, to: 1 },
            ]
        );
        assert!(pool.take_journal().is_empty());
    }
}
