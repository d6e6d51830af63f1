//! The world: a fixed table of component pools and the id fountain.
//!
//! A `World` owns up to 256 pools, one per declared component type, and hands
//! out entity ids monotonically. There is no per-entity record: an entity
//! exists exactly where some pool holds its id, and dies when it is enqueued
//! into the built-in removed tag (type 0) and reaped by the next
//! [`update`](World::update).
//!
//! # Architecture
//!
//! - **Pool table**: slot `cid` holds the storage for component type `cid`;
//!   slot 0 is the removed tag, declared at construction.
//! - **Id fountain**: `max_id` only moves forward between updates; the
//!   renumber pass of `update` is the sole thing that ever rewinds it.
//! - **Joins**: sibling resolution is a hinted binary search over the target
//!   pool's sorted id array.
//!
//! The world is strictly single-threaded. Pool buffers are owned exclusively
//! by the world; iterators borrow it for their whole lifetime.

mod update;

use std::marker::PhantomData;

use log::debug;

use crate::{
    component::{DEFAULT_POOL_CAP, HostRef, MAX_TYPES, Stride, TypeId},
    entity,
    error::Error,
    pool::Pool,
};

pub use update::ReferenceHost;

/// The central container: one pool per declared component type, plus the
/// monotonic entity id counter.
pub struct World {
    /// The built-in removed tag (type 0). Kept apart from the table so the
    /// update pass can walk every other pool against it.
    removed: Pool,

    /// The pool table; slot index is the component type id. Slot 0 stays
    /// empty (the removed pool lives above).
    pools: Vec<Option<Pool>>,

    /// Per-type released ids backing the release/reuse free-list pattern.
    dead: Vec<Vec<entity::Id>>,

    /// The last entity id handed out.
    max_id: u32,

    /// Worlds stay on the thread that made them.
    _not_send: PhantomData<*mut ()>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Construct an empty world with the removed tag declared.
    pub fn new() -> Self {
        Self {
            removed: Pool::new(Stride::Tag, DEFAULT_POOL_CAP),
            pools: (0..MAX_TYPES).map(|_| None).collect(),
            dead: (0..MAX_TYPES).map(|_| Vec::new()).collect(),
            max_id: 0,
            _not_send: PhantomData,
        }
    }

    /// The last entity id handed out.
    #[inline]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Declare a component type. A capacity hint of zero takes the default.
    pub fn declare_type(
        &mut self,
        cid: TypeId,
        stride: Stride,
        cap_hint: usize,
    ) -> Result<(), Error> {
        if cid == TypeId::REMOVED {
            return Err(Error::ReservedType(cid));
        }
        if matches!(stride, Stride::Data(0)) {
            return Err(Error::ZeroStride(cid));
        }
        let slot = &mut self.pools[cid.index()];
        if slot.is_some() {
            return Err(Error::TypeExists(cid));
        }
        let hint = if cap_hint == 0 {
            DEFAULT_POOL_CAP
        } else {
            cap_hint
        };
        *slot = Some(Pool::new(stride, hint));
        Ok(())
    }

    /// Designate a foreign pool for reference maintenance: its reap sweeps
    /// will journal row movements for [`update_references`](World::update_references).
    pub fn declare_reference(&mut self, cid: TypeId) -> Result<(), Error> {
        let pool = self.pool_mut(cid)?;
        if pool.stride() != Stride::Foreign {
            return Err(Error::NotForeign(cid));
        }
        pool.set_reference();
        Ok(())
    }

    /// Mint a fresh entity id. Ids are monotonic; only the renumber pass of
    /// [`update`](World::update) ever compacts the id space.
    pub fn new_entity(&mut self) -> Result<entity::Id, Error> {
        if self.max_id >= u32::MAX - 1 {
            return Err(Error::IdSpaceExhausted);
        }
        self.max_id += 1;
        Ok(entity::Id::new(self.max_id))
    }

    /// Append a component row for an entity. Data pools require a payload of
    /// exactly the declared stride; payload-free pools take `None`. The id
    /// must not fall below the pool's current tail.
    pub fn add_component(
        &mut self,
        id: entity::Id,
        cid: TypeId,
        payload: Option<&[u8]>,
    ) -> Result<usize, Error> {
        if let Stride::Data(k) = self.pool(cid)?.stride() {
            if payload.is_none() {
                return Err(Error::SizeMismatch {
                    cid,
                    expected: k,
                    got: 0,
                });
            }
        }
        self.append_row(id, cid, payload)
    }

    /// Append a row, allowing a zero-filled payload for data pools. The
    /// temporary-sibling writeback path encodes fields after the append.
    pub(crate) fn append_row(
        &mut self,
        id: entity::Id,
        cid: TypeId,
        payload: Option<&[u8]>,
    ) -> Result<usize, Error> {
        let pool = self.pool_mut(cid)?;
        match pool.stride() {
            Stride::Data(k) => {
                if let Some(bytes) = payload {
                    if bytes.len() != k {
                        return Err(Error::SizeMismatch {
                            cid,
                            expected: k,
                            got: bytes.len(),
                        });
                    }
                }
            }
            _ => {
                if payload.is_some() {
                    return Err(Error::StrayPayload(cid));
                }
            }
        }
        if pool.stride().is_sorted() {
            if let Some(tail) = pool.tail() {
                if id < tail {
                    return Err(Error::OutOfOrder { cid, id, tail });
                }
            }
        }
        Ok(pool.push(id, payload))
    }

    /// Drop every row of a type, keeping capacity.
    pub fn clear_type(&mut self, cid: TypeId) -> Result<(), Error> {
        self.pool_mut(cid)?.clear();
        Ok(())
    }

    /// Enqueue the entity at a row of some pool for removal. The row stays
    /// physically present until the next [`update`](World::update).
    pub fn remove_entity(&mut self, cid: TypeId, row: usize) -> Result<(), Error> {
        let id = self
            .pool(cid)?
            .id(row)
            .ok_or(Error::RowOutOfRange { cid, row })?;
        self.removed.enable(id);
        Ok(())
    }

    /// Add an entity to a tag pool, keeping the id array sorted.
    pub fn enable_tag(&mut self, cid: TypeId, id: entity::Id) -> Result<(), Error> {
        let pool = self.tag_pool_mut(cid)?;
        pool.enable(id);
        Ok(())
    }

    /// Drop an entity from a tag pool without disturbing a forward iteration
    /// over the same pool.
    pub fn disable_tag(&mut self, cid: TypeId, id: entity::Id) -> Result<(), Error> {
        let pool = self.tag_pool_mut(cid)?;
        pool.disable(id);
        Ok(())
    }

    /// Resolve the sibling row of `sib_cid` holding the same entity as
    /// `main_cid` at `main_row`, via the hinted lookup.
    pub fn sibling(
        &self,
        main_cid: TypeId,
        main_row: usize,
        sib_cid: TypeId,
    ) -> Result<Option<usize>, Error> {
        let id = self.pool(main_cid)?.id(main_row).ok_or(Error::RowOutOfRange {
            cid: main_cid,
            row: main_row,
        })?;
        Ok(self.pool(sib_cid)?.lookup(id))
    }

    /// Append a sibling row carrying the entity of `main_cid` at `main_row`.
    /// Under the iteration-append pattern the id lands at or past the
    /// sibling's tail; anything else is a contract violation.
    pub fn add_sibling(
        &mut self,
        main_cid: TypeId,
        main_row: usize,
        sib_cid: TypeId,
        payload: Option<&[u8]>,
    ) -> Result<usize, Error> {
        let id = self.pool(main_cid)?.id(main_row).ok_or(Error::RowOutOfRange {
            cid: main_cid,
            row: main_row,
        })?;
        self.append_row(id, sib_cid, payload)
    }

    /// The host reference at a row of a foreign pool.
    pub fn object(&self, cid: TypeId, row: usize) -> Result<Option<HostRef>, Error> {
        let pool = self.foreign_pool(cid)?;
        if row >= pool.len() {
            return Err(Error::RowOutOfRange { cid, row });
        }
        Ok(pool.object(row))
    }

    /// Replace the host reference at a row of a foreign pool.
    pub fn set_object(
        &mut self,
        cid: TypeId,
        row: usize,
        value: Option<HostRef>,
    ) -> Result<(), Error> {
        let pool = self.pool_mut(cid)?;
        if pool.stride() != Stride::Foreign {
            return Err(Error::NotForeign(cid));
        }
        if row >= pool.len() {
            return Err(Error::RowOutOfRange { cid, row });
        }
        pool.set_object(row, value);
        Ok(())
    }

    /// Release a row of a pool into the per-type free list. The entity keeps
    /// the component; the row is merely remembered for [`reuse`](World::reuse).
    pub fn release(&mut self, cid: TypeId, row: usize) -> Result<(), Error> {
        let id = self
            .pool(cid)?
            .id(row)
            .ok_or(Error::RowOutOfRange { cid, row })?;
        let list = &mut self.dead[cid.index()];
        if let Err(at) = list.binary_search(&id) {
            list.insert(at, id);
        }
        Ok(())
    }

    /// Pop a previously released row of a pool, if any is still live.
    /// Entries whose entity has been reaped in the meantime are skipped.
    pub fn reuse(&mut self, cid: TypeId) -> Result<Option<usize>, Error> {
        self.pool(cid)?;
        while let Some(id) = self.dead[cid.index()].pop() {
            if let Some(row) = self.pool(cid)?.lookup(id) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Memory accounting: `(reserved, live)` bytes across every pool.
    pub fn memory(&self) -> (usize, usize) {
        let mut reserved = 0;
        let mut live = 0;
        for pool in std::iter::once(&self.removed).chain(self.pools.iter().flatten()) {
            reserved += pool.reserved_bytes();
            live += pool.live_bytes();
        }
        (reserved, live)
    }

    /// Trim every pool's capacity down to its live count.
    pub fn collect(&mut self) {
        for pool in std::iter::once(&mut self.removed).chain(self.pools.iter_mut().flatten()) {
            pool.shrink();
        }
        let (reserved, live) = self.memory();
        debug!("collect: {reserved} bytes reserved, {live} live");
    }

    /// The pool for a type id. Type 0 resolves to the removed tag.
    pub(crate) fn pool(&self, cid: TypeId) -> Result<&Pool, Error> {
        if cid == TypeId::REMOVED {
            return Ok(&self.removed);
        }
        self.pools[cid.index()]
            .as_ref()
            .ok_or(Error::UnknownType(cid))
    }

    /// The pool for a type id, mutably. Type 0 resolves to the removed tag.
    pub(crate) fn pool_mut(&mut self, cid: TypeId) -> Result<&mut Pool, Error> {
        if cid == TypeId::REMOVED {
            return Ok(&mut self.removed);
        }
        self.pools[cid.index()]
            .as_mut()
            .ok_or(Error::UnknownType(cid))
    }

    fn tag_pool_mut(&mut self, cid: TypeId) -> Result<&mut Pool, Error> {
        let pool = self.pool_mut(cid)?;
        if pool.stride() != Stride::Tag {
            return Err(Error::NotTag(cid));
        }
        Ok(pool)
    }

    fn foreign_pool(&self, cid: TypeId) -> Result<&Pool, Error> {
        let pool = self.pool(cid)?;
        if pool.stride() != Stride::Foreign {
            return Err(Error::NotForeign(cid));
        }
        Ok(pool)
    }
}
