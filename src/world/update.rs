//! The end-of-tick pass: reap, compact, renumber.
//!
//! Between query passes the host calls [`World::update`] once. It realises
//! every pending removal by marking the removed ids across all pools and
//! compacting the survivors down, then — rarely — renumbers the whole id
//! space when the fountain has run past its threshold.
//!
//! Order pools are swept in the reverse direction: instead of looking each
//! removed id up in the (unsorted) order pool, each order entry is looked up
//! in the sorted removed set. Designated reference pools journal their sweep
//! so the host can rewrite externally cached row indices afterward through
//! [`World::update_references`].

use log::debug;

use crate::{
    component::{MAX_TYPES, REARRANGE_THRESHOLD, Stride, TypeId},
    entity,
    error::Error,
    pool::{Pool, RefEvent},
    world::World,
};

/// The host side of reference maintenance: told, in sweep order, which rows
/// of a designated reference pool moved and which died.
pub trait ReferenceHost {
    /// A surviving row moved down during compaction; externally cached row
    /// indices must follow it.
    fn moved(&mut self, from: usize, to: usize);

    /// The row died with its entity; its side-table slot has been cleared.
    fn dead(&mut self, row: usize);
}

impl World {
    /// Realise pending removals and, when the id space has run past its
    /// threshold, renumber every live id into a dense range.
    pub fn update(&mut self) {
        if !self.removed.is_empty() {
            let removed = &self.removed;
            let mut reaped = 0;
            for slot in self.pools.iter_mut() {
                let Some(pool) = slot else { continue };
                if pool.is_empty() {
                    continue;
                }
                match pool.stride() {
                    Stride::Order => reaped += reap_order(pool, removed),
                    _ => {
                        if mark_removed(pool, removed.ids()) > 0 {
                            reaped += pool.sweep();
                        }
                    }
                }
            }
            debug!(
                "update: reaped {} rows for {} removed ids",
                reaped,
                self.removed.len()
            );
            self.removed.clear();
        }

        if self.max_id >= REARRANGE_THRESHOLD {
            self.renumber();
        }
    }

    /// Replay a designated reference pool's sweep journal to the host. After
    /// this the pool is dense and the host's cached row indices are current.
    pub fn update_references(
        &mut self,
        cid: TypeId,
        host: &mut dyn ReferenceHost,
    ) -> Result<(), Error> {
        let pool = self.pool_mut(cid)?;
        if pool.stride() != Stride::Foreign || !pool.is_reference() {
            return Err(Error::NotReference(cid));
        }
        for event in pool.take_journal() {
            match event {
                RefEvent::Moved { from, to } => host.moved(from, to),
                RefEvent::Dead { row } => host.dead(row),
            }
        }
        Ok(())
    }

    /// Rewrite every live id into the dense range `1..`, in one k-way merge
    /// across the sorted pools. Order pools cannot cursor their own (append
    /// ordered) arrays, so each contributes a sorted deduplicated copy to the
    /// merge and is rewritten afterward from the collected old→new pairs, as
    /// are the release free-lists.
    fn renumber(&mut self) {
        let mut copies: Vec<Option<Vec<entity::Id>>> = (0..MAX_TYPES).map(|_| None).collect();
        for (i, slot) in self.pools.iter().enumerate() {
            let Some(pool) = slot else { continue };
            if pool.stride() == Stride::Order && !pool.is_empty() {
                let mut ids = pool.ids().to_vec();
                ids.sort_unstable();
                ids.dedup();
                copies[i] = Some(ids);
            }
        }

        let mut cursor = vec![0usize; MAX_TYPES];
        let mut map: Vec<(entity::Id, entity::Id)> = Vec::new();
        let mut next = 0u32;
        let mut last = entity::Id::TOMBSTONE;
        loop {
            // the minimum id under any cursor is the next to renumber
            let mut min = entity::Id::SENTINEL;
            let mut at = None;
            for i in 1..MAX_TYPES {
                let ids: &[entity::Id] = match &copies[i] {
                    Some(copy) => copy,
                    None => match &self.pools[i] {
                        Some(pool) => pool.ids(),
                        None => continue,
                    },
                };
                if cursor[i] < ids.len() && ids[cursor[i]] <= min {
                    min = ids[cursor[i]];
                    at = Some(i);
                }
            }
            let Some(i) = at else { break };
            if min != last {
                next += 1;
                last = min;
                map.push((min, entity::Id::new(next)));
            }
            if copies[i].is_none() {
                if let Some(pool) = &mut self.pools[i] {
                    pool.ids_mut()[cursor[i]] = entity::Id::new(next);
                }
            }
            cursor[i] += 1;
        }

        for (i, slot) in self.pools.iter_mut().enumerate() {
            if copies[i].is_none() {
                continue;
            }
            let Some(pool) = slot else { continue };
            for id in pool.ids_mut() {
                if let Ok(k) = map.binary_search_by_key(&*id, |&(old, _)| old) {
                    *id = map[k].1;
                }
            }
        }

        for list in self.dead.iter_mut() {
            let mut kept = Vec::with_capacity(list.len());
            for id in list.iter() {
                if let Ok(k) = map.binary_search_by_key(id, |&(old, _)| old) {
                    kept.push(map[k].1);
                }
            }
            *list = kept;
        }

        debug!(
            "renumber: {} live ids, max_id {} -> {}",
            map.len(),
            self.max_id,
            next
        );
        self.max_id = next;
    }
}

/// Mark every distinct removed id present in `pool` with a tombstone,
/// zeroing whole duplicate runs so no transient tag duplicate survives the
/// sweep. Returns the number of cells marked.
fn mark_removed(pool: &mut Pool, removed: &[entity::Id]) -> usize {
    let mut marked = 0;
    let mut hint = 0;
    let mut last = entity::Id::TOMBSTONE;
    for &id in removed {
        if id == last {
            continue;
        }
        last = id;
        let Some(row) = pool.lookup_hinted(id, hint) else {
            continue;
        };
        hint = row;
        let ids = pool.ids_mut();
        let mut lo = row;
        while lo > 0 && ids[lo - 1] == id {
            lo -= 1;
        }
        let mut hi = row + 1;
        while hi < ids.len() && ids[hi] == id {
            hi += 1;
        }
        for cell in &mut ids[lo..hi] {
            *cell = entity::Id::TOMBSTONE;
        }
        marked += hi - lo;
    }
    marked
}

/// Reverse-direction reap for an order pool: look each entry up in the
/// sorted removed set, then compact in append order.
fn reap_order(pool: &mut Pool, removed: &Pool) -> usize {
    let mut hit = false;
    for i in 0..pool.len() {
        let id = pool.ids()[i];
        if removed.lookup(id).is_some() {
            pool.ids_mut()[i] = entity::Id::TOMBSTONE;
            hit = true;
        }
    }
    if hit { pool.sweep() } else { 0 }
}
