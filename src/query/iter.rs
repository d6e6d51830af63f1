//! The driving iterator: walks the main pool, joins siblings, and applies
//! writebacks at step boundaries.
//!
//! # Step protocol
//!
//! 1. If the previous call yielded a row, settle it first: rotate it to the
//!    back of an order main when the consumer postponed, otherwise apply the
//!    writeback (unless the plan is readonly).
//! 2. Fetch the next main row; a tag main lazily compacts duplicates at the
//!    visited cell. Past the end, iteration is over.
//! 3. Resolve every non-temporary sibling through the hinted lookup. An
//!    absence filter that finds its row skips the step; a required sibling
//!    that misses skips the step; an optional miss still yields.
//! 4. Deposit the `IN` values and presence flags into the consumer row.
//!
//! Writebacks see the consumer row exactly as the consumer left it. Slots of
//! keys that are not `IN` are cleared once applied, so temporaries inject at
//! most one sibling per step. Abandoning the iterator flushes nothing;
//! [`sync`](QueryIter::sync) is the explicit flush.

use crate::{
    component::{HostRef, Stride, TypeId},
    entity,
    error::Error,
    pool::Pool,
    query::{Attribs, Key, Query, row::IterRow, row::ObjectSlot},
    world::World,
};

/// An in-flight iteration of a compiled query over one world.
pub struct QueryIter<'w, 'q> {
    world: &'w mut World,
    query: &'q Query,

    /// The next main row to visit.
    index: usize,

    /// Whether the previous call yielded a row awaiting its step boundary.
    yielded: bool,

    /// Resolved pool rows of the last yielded step, by key.
    resolved: Vec<Option<usize>>,
}

impl<'w, 'q> QueryIter<'w, 'q> {
    pub(crate) fn new(world: &'w mut World, query: &'q Query) -> Self {
        let nkeys = query.keys.len();
        Self {
            world,
            query,
            index: 0,
            yielded: false,
            resolved: vec![None; nkeys],
        }
    }

    /// Advance to the next matching row. Returns `false` when the main pool
    /// is exhausted — after settling the final row's writeback.
    pub fn next(&mut self, row: &mut IterRow) -> Result<bool, Error> {
        let query = self.query;
        let postponed = row.take_postpone();
        if self.yielded {
            self.yielded = false;
            let prev = self.index - 1;
            if query.keys[0].stride == Stride::Order && postponed {
                self.rotate_to_back(prev)?;
                self.index = prev;
            } else if !query.readonly {
                self.writeback(prev, row)?;
            }
        }

        'step: loop {
            let i = self.index;
            let main = &query.keys[0];
            if main.stride == Stride::Tag {
                let pool = self.world.pool_mut(main.cid)?;
                if i < pool.len() {
                    pool.dedup_visit(i);
                }
            }
            let main_pool = self.world.pool(main.cid)?;
            if i >= main_pool.len() {
                return Ok(false);
            }
            let entity = main_pool.ids()[i];
            self.resolved[0] = Some(i);
            for (k, key) in query.keys.iter().enumerate().skip(1) {
                if key.attribs.is_temporary() {
                    self.resolved[k] = None;
                    continue;
                }
                let found = self.world.pool(key.cid)?.lookup(entity);
                if key.attribs.contains(Attribs::ABSENT) {
                    if found.is_some() {
                        self.index += 1;
                        continue 'step;
                    }
                    self.resolved[k] = None;
                } else if found.is_none() && !key.attribs.contains(Attribs::OPTIONAL) {
                    self.index += 1;
                    continue 'step;
                } else {
                    self.resolved[k] = found;
                }
            }
            self.deposit(row)?;
            self.index = i + 1;
            self.yielded = true;
            return Ok(true);
        }
    }

    /// Flush the current row's writeback without advancing. The next step
    /// boundary re-applies only what the consumer supplies after this call.
    pub fn sync(&mut self, row: &mut IterRow) -> Result<(), Error> {
        if !self.yielded {
            return Err(Error::NoCurrentRow);
        }
        if self.query.readonly {
            return Ok(());
        }
        self.writeback(self.index - 1, row)
    }

    /// Enqueue the current row's entity for removal at the next update.
    pub fn remove(&mut self) -> Result<(), Error> {
        if !self.yielded {
            return Err(Error::NoCurrentRow);
        }
        let main = &self.query.keys[0];
        let prev = self.index - 1;
        let entity = self
            .world
            .pool(main.cid)?
            .id(prev)
            .ok_or(Error::RowOutOfRange {
                cid: main.cid,
                row: prev,
            })?;
        self.world.enable_tag(TypeId::REMOVED, entity)
    }

    /// The entity of the current (last yielded) row.
    pub fn entity(&self) -> Option<entity::Id> {
        if !self.yielded {
            return None;
        }
        self.world
            .pool(self.query.keys[0].cid)
            .ok()?
            .id(self.index - 1)
    }

    /// Read the side-table reference of a foreign key for the current row.
    pub fn object(&self, key: usize) -> Result<Option<HostRef>, Error> {
        let target = self.object_target(key)?;
        Ok(self.world.pool(self.query.keys[key].cid)?.object(target))
    }

    /// Replace the side-table reference of a foreign key for the current row.
    pub fn set_object(&mut self, key: usize, value: Option<HostRef>) -> Result<(), Error> {
        let target = self.object_target(key)?;
        let cid = self.query.keys[key].cid;
        self.world.pool_mut(cid)?.set_object(target, value);
        Ok(())
    }

    fn object_target(&self, key: usize) -> Result<usize, Error> {
        if !self.yielded {
            return Err(Error::NoCurrentRow);
        }
        let k = &self.query.keys[key];
        if k.stride != Stride::Foreign {
            return Err(Error::NotForeign(k.cid));
        }
        let target = if key == 0 {
            Some(self.index - 1)
        } else {
            self.resolved[key]
        };
        target.ok_or_else(|| Error::MissingSibling {
            key: k.name.clone(),
        })
    }

    /// Deposit `IN` values and presence flags for the freshly resolved step.
    fn deposit(&self, row: &mut IterRow) -> Result<(), Error> {
        let query = self.query;
        for (k, key) in query.keys.iter().enumerate() {
            let a = key.attribs;
            let resolved = self.resolved[k];
            if a.is_filter() {
                row.slot_mut(k).present = resolved.is_some();
                continue;
            }
            if a.is_temporary() {
                row.slot_mut(k).present = false;
                continue;
            }
            let Some(r) = resolved else {
                // an optional miss: the key is reported missing
                let slot = row.slot_mut(k);
                slot.present = false;
                if a.contains(Attribs::IN) {
                    slot.tag = Some(false);
                    slot.object = ObjectSlot::Empty;
                    slot.fields.fill(None);
                }
                continue;
            };
            if !a.contains(Attribs::IN) {
                row.slot_mut(k).present = true;
                continue;
            }
            match key.stride {
                Stride::Tag => {
                    let slot = row.slot_mut(k);
                    slot.present = true;
                    slot.tag = Some(true);
                }
                Stride::Foreign => {
                    let value = self.world.pool(key.cid)?.object(r);
                    let slot = row.slot_mut(k);
                    slot.present = true;
                    slot.object = ObjectSlot::Set(value);
                }
                Stride::Data(_) => {
                    let pool = self.world.pool(key.cid)?;
                    let bytes = pool.row_bytes(r);
                    let slot = row.slot_mut(k);
                    slot.present = true;
                    for (i, field) in key.fields.iter().enumerate() {
                        slot.fields[i] = Some(field.read(bytes));
                    }
                }
                Stride::Order => row.slot_mut(k).present = true,
            }
        }
        Ok(())
    }

    /// Apply the previous row's writeback: main key first, then each
    /// sibling. A main tag evaluating `false` is deferred past the sibling
    /// pass so their writebacks never observe the disable shuffling the
    /// array they are keyed against.
    fn writeback(&mut self, prev: usize, row: &mut IterRow) -> Result<(), Error> {
        let query = self.query;
        let main = &query.keys[0];
        let entity = self
            .world
            .pool(main.cid)?
            .id(prev)
            .ok_or(Error::RowOutOfRange {
                cid: main.cid,
                row: prev,
            })?;

        let mut deferred_disable = false;
        if main.attribs.contains(Attribs::OUT) {
            match main.stride {
                Stride::Tag => match row.tag_slot(0) {
                    Some(false) => deferred_disable = true,
                    // `true` on the main key is a no-op: the row is its own
                    // proof of membership
                    _ => {}
                },
                Stride::Data(_) => encode_fields(self.world, main, 0, prev, row)?,
                Stride::Foreign => {
                    if let ObjectSlot::Set(value) = row.object_slot(0) {
                        self.world.pool_mut(main.cid)?.set_object(prev, value);
                    }
                }
                Stride::Order => {}
            }
        }

        for (k, key) in query.keys.iter().enumerate().skip(1) {
            let a = key.attribs;
            if a.is_filter() {
                continue;
            }
            if a.is_temporary() {
                match key.stride {
                    Stride::Order => {
                        if row.tag_slot(k) == Some(true) {
                            self.world.append_row(entity, key.cid, None)?;
                        }
                    }
                    Stride::Data(_) => {
                        if row.any_value(k) {
                            let new_row = self.world.append_row(entity, key.cid, None)?;
                            encode_fields(self.world, key, k, new_row, row)?;
                        }
                    }
                    Stride::Foreign => {
                        if let ObjectSlot::Set(value) = row.object_slot(k) {
                            let new_row = self.world.append_row(entity, key.cid, None)?;
                            self.world.pool_mut(key.cid)?.set_object(new_row, value);
                        }
                    }
                    Stride::Tag => {}
                }
                row.clear_slot(k);
                continue;
            }
            if a.contains(Attribs::OUT) {
                match key.stride {
                    Stride::Tag => match row.tag_slot(k) {
                        Some(true) => self.world.pool_mut(key.cid)?.enable(entity),
                        Some(false) => self.world.pool_mut(key.cid)?.disable(entity),
                        None => {}
                    },
                    Stride::Data(_) => {
                        if row.any_value(k) {
                            let target = locate(self.world.pool(key.cid)?, entity, key)?;
                            encode_fields(self.world, key, k, target, row)?;
                        }
                    }
                    Stride::Foreign => {
                        if let ObjectSlot::Set(value) = row.object_slot(k) {
                            let target = locate(self.world.pool(key.cid)?, entity, key)?;
                            self.world.pool_mut(key.cid)?.set_object(target, value);
                        }
                    }
                    Stride::Order => {}
                }
                if !a.contains(Attribs::IN) {
                    row.clear_slot(k);
                }
            }
        }

        if deferred_disable {
            self.world.pool_mut(main.cid)?.disable(entity);
        }
        if main.attribs.contains(Attribs::OUT) && !main.attribs.contains(Attribs::IN) {
            row.clear_slot(0);
        }
        Ok(())
    }

    /// Rotate a postponed order-main row to the back of the queue.
    fn rotate_to_back(&mut self, prev: usize) -> Result<(), Error> {
        let main = &self.query.keys[0];
        let pool = self.world.pool_mut(main.cid)?;
        let ids = pool.ids_mut();
        let id = ids[prev];
        ids.copy_within(prev + 1.., prev);
        let n = ids.len();
        ids[n - 1] = id;
        Ok(())
    }
}

/// Locate the existing row for an `OUT` writeback; the key declared the
/// component present, so a miss is a contract violation.
fn locate(pool: &Pool, entity: entity::Id, key: &Key) -> Result<usize, Error> {
    pool.lookup(entity).ok_or_else(|| Error::MissingSibling {
        key: key.name.clone(),
    })
}

/// Encode every supplied field of a key into a pool row.
fn encode_fields(
    world: &mut World,
    key: &Key,
    slot: usize,
    pool_row: usize,
    row: &IterRow,
) -> Result<(), Error> {
    let pool = world.pool_mut(key.cid)?;
    let bytes = pool.row_bytes_mut(pool_row);
    for (i, field) in key.fields.iter().enumerate() {
        if let Some(value) = row.value(slot, i) {
            field.write(bytes, value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::{Field, FieldKind, Value},
        query::KeySpec,
    };

    fn cid(raw: u8) -> TypeId {
        TypeId::new(raw)
    }

    fn id(raw: u32) -> entity::Id {
        entity::Id::new(raw)
    }

    fn vec2(x: f32, y: f32) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&x.to_ne_bytes());
        out[4..].copy_from_slice(&y.to_ne_bytes());
        out
    }

    fn vec2_key(c: TypeId, attribs: Attribs) -> KeySpec {
        KeySpec::new(c, "pos", attribs).with_fields(vec![
            Field::new("x", FieldKind::F32, 0),
            Field::new("y", FieldKind::F32, 4),
        ])
    }

    fn int_key(c: TypeId, attribs: Attribs) -> KeySpec {
        KeySpec::new(c, "value", attribs).with_fields(vec![Field::new("v", FieldKind::I32, 0)])
    }

    fn raw_ids(world: &World, c: TypeId) -> Vec<u32> {
        world
            .pool(c)
            .unwrap()
            .ids()
            .iter()
            .map(|e| e.raw())
            .collect()
    }

    #[test]
    fn existence_filter_narrows_iteration() {
        // Given - three positions, one marked
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(8), 0).unwrap();
        world.declare_type(cid(2), Stride::Tag, 0).unwrap();
        world
            .add_component(id(10), cid(1), Some(&vec2(1.0, 2.0)))
            .unwrap();
        world
            .add_component(id(20), cid(1), Some(&vec2(3.0, 4.0)))
            .unwrap();
        world
            .add_component(id(30), cid(1), Some(&vec2(5.0, 6.0)))
            .unwrap();
        world.add_component(id(20), cid(2), None).unwrap();

        let query = Query::compile(
            &world,
            vec![
                vec2_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "mark", Attribs::EXISTENCE),
            ],
        )
        .unwrap();

        // When
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut yields = Vec::new();
        while iter.next(&mut row).unwrap() {
            yields.push((
                iter.entity().unwrap().raw(),
                row.value(0, 0),
                row.value(0, 1),
            ));
            assert!(row.present(1));
        }

        // Then - exactly the marked row
        assert_eq!(
            yields,
            vec![(20, Some(Value::Float(3.0)), Some(Value::Float(4.0)))]
        );
    }

    #[test]
    fn disabling_the_visited_tag_never_skips_a_row() {
        // Given - values 10..50 under ids 1..5, all tagged
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Tag, 0).unwrap();
        for raw in 1..=5u32 {
            world
                .add_component(id(raw), cid(1), Some(&(raw as i32 * 10).to_ne_bytes()))
                .unwrap();
            world.add_component(id(raw), cid(2), None).unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "mark", Attribs::OUT),
            ],
        )
        .unwrap();

        // When - every step clears the tag it is standing on
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut values = Vec::new();
        while iter.next(&mut row).unwrap() {
            values.push(row.value(0, 0).unwrap());
            row.set_tag(1, false);
        }
        drop(iter);

        // Then - all five values arrived in order and the tag pool is empty
        assert_eq!(
            values,
            vec![
                Value::Int(10),
                Value::Int(20),
                Value::Int(30),
                Value::Int(40),
                Value::Int(50)
            ]
        );
        assert!(world.pool(cid(2)).unwrap().is_empty());
    }

    #[test]
    fn removals_during_iteration_settle_at_update() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        for raw in 1..=5u32 {
            world
                .add_component(id(raw), cid(1), Some(&(raw as i32).to_ne_bytes()))
                .unwrap();
        }

        let query = Query::compile(&world, vec![int_key(cid(1), Attribs::IN)]).unwrap();

        // When - the rows holding ids 3 and 5 enqueue themselves
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            let raw = iter.entity().unwrap().raw();
            if raw == 3 || raw == 5 {
                iter.remove().unwrap();
            }
        }
        drop(iter);
        world.update();

        // Then
        assert_eq!(raw_ids(&world, cid(1)), vec![1, 2, 4]);
        let pool = world.pool(cid(1)).unwrap();
        assert_eq!(pool.row_bytes(0), 1i32.to_ne_bytes());
        assert_eq!(pool.row_bytes(1), 2i32.to_ne_bytes());
        assert_eq!(pool.row_bytes(2), 4i32.to_ne_bytes());
    }

    #[test]
    fn optional_sibling_yields_with_missing() {
        // Given - A holds 1,2,3; B holds only 2
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        for raw in 1..=3u32 {
            world
                .add_component(id(raw), cid(1), Some(&(raw as i32).to_ne_bytes()))
                .unwrap();
        }
        world
            .add_component(id(2), cid(2), Some(&22i32.to_ne_bytes()))
            .unwrap();

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "extra", Attribs::IN | Attribs::OPTIONAL)
                    .with_fields(vec![Field::new("v", FieldKind::I32, 0)]),
            ],
        )
        .unwrap();

        // When
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut yields = Vec::new();
        while iter.next(&mut row).unwrap() {
            yields.push((
                iter.entity().unwrap().raw(),
                row.present(1),
                row.value(1, 0),
            ));
        }

        // Then - three rows, B present only for id 2
        assert_eq!(
            yields,
            vec![
                (1, false, None),
                (2, true, Some(Value::Int(22))),
                (3, false, None)
            ]
        );
    }

    #[test]
    fn absent_filter_inverts_the_join() {
        // Given - pools as in the optional case
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        for raw in 1..=3u32 {
            world
                .add_component(id(raw), cid(1), Some(&(raw as i32).to_ne_bytes()))
                .unwrap();
        }
        world
            .add_component(id(2), cid(2), Some(&22i32.to_ne_bytes()))
            .unwrap();

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "extra", Attribs::ABSENT),
            ],
        )
        .unwrap();

        // When
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut yields = Vec::new();
        while iter.next(&mut row).unwrap() {
            yields.push(iter.entity().unwrap().raw());
            assert!(!row.present(1));
        }

        // Then
        assert_eq!(yields, vec![1, 3]);
    }

    #[test]
    fn out_writeback_updates_data_rows() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        for raw in 1..=3u32 {
            world
                .add_component(id(raw), cid(1), Some(&0i32.to_ne_bytes()))
                .unwrap();
        }

        let query =
            Query::compile(&world, vec![int_key(cid(1), Attribs::IN | Attribs::OUT)]).unwrap();

        // When - each step doubles the entity id into the row
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            let raw = iter.entity().unwrap().raw() as i32;
            row.set_value(0, 0, Value::Int((raw * 2) as i64));
        }
        drop(iter);

        // Then
        let pool = world.pool(cid(1)).unwrap();
        assert_eq!(pool.row_bytes(0), 2i32.to_ne_bytes());
        assert_eq!(pool.row_bytes(1), 4i32.to_ne_bytes());
        assert_eq!(pool.row_bytes(2), 6i32.to_ne_bytes());
    }

    #[test]
    fn tag_out_enables_and_disables() {
        // Given - no tags yet
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Tag, 0).unwrap();
        for raw in 1..=4u32 {
            world
                .add_component(id(raw), cid(1), Some(&0i32.to_ne_bytes()))
                .unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "mark", Attribs::OUT),
            ],
        )
        .unwrap();

        // When - tag the odd ids
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            row.set_tag(1, iter.entity().unwrap().raw() % 2 == 1);
        }
        drop(iter);

        // Then
        assert_eq!(raw_ids(&world, cid(2)), vec![1, 3]);
    }

    #[test]
    fn temporary_data_sibling_is_injected_per_step() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        for raw in 1..=3u32 {
            world
                .add_component(id(raw), cid(1), Some(&(raw as i32).to_ne_bytes()))
                .unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "spawned", Attribs::NONE)
                    .with_fields(vec![Field::new("v", FieldKind::I32, 0)]),
            ],
        )
        .unwrap();

        // When - every second step supplies a temporary value
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            let raw = iter.entity().unwrap().raw();
            if raw != 2 {
                row.set_value(1, 0, Value::Int((raw * 100) as i64));
            }
        }
        drop(iter);

        // Then - new siblings exist exactly where values were supplied
        assert_eq!(raw_ids(&world, cid(2)), vec![1, 3]);
        let pool = world.pool(cid(2)).unwrap();
        assert_eq!(pool.row_bytes(0), 100i32.to_ne_bytes());
        assert_eq!(pool.row_bytes(1), 300i32.to_ne_bytes());
    }

    #[test]
    fn temporary_order_sibling_builds_a_queue() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Order, 0).unwrap();
        for raw in 1..=4u32 {
            world
                .add_component(id(raw), cid(1), Some(&0i32.to_ne_bytes()))
                .unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "queue", Attribs::NONE),
            ],
        )
        .unwrap();

        // When - enqueue the odd ids
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            if iter.entity().unwrap().raw() % 2 == 1 {
                row.set_tag(1, true);
            }
        }
        drop(iter);

        // Then
        assert_eq!(raw_ids(&world, cid(2)), vec![1, 3]);
    }

    #[test]
    fn order_main_with_postpone_rotates_the_queue() {
        // Given - a work queue of three entries
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Order, 0).unwrap();
        for raw in [1u32, 2, 3] {
            world.add_component(id(raw), cid(1), None).unwrap();
        }

        let query = Query::compile(
            &world,
            vec![KeySpec::new(cid(1), "queue", Attribs::EXISTENCE)],
        )
        .unwrap();

        // When - the first visit of entry 1 defers it
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut order = Vec::new();
        let mut postponed_once = false;
        while iter.next(&mut row).unwrap() {
            let raw = iter.entity().unwrap().raw();
            order.push(raw);
            if raw == 1 && !postponed_once {
                postponed_once = true;
                row.postpone();
            }
        }
        drop(iter);

        // Then - entry 1 came back at the end of the queue
        assert_eq!(order, vec![1, 2, 3, 1]);
        assert_eq!(raw_ids(&world, cid(1)), vec![2, 3, 1]);
    }

    #[test]
    fn sync_flushes_without_advancing() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        world
            .add_component(id(1), cid(1), Some(&1i32.to_ne_bytes()))
            .unwrap();

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN | Attribs::OUT),
                KeySpec::new(cid(2), "spawned", Attribs::NONE)
                    .with_fields(vec![Field::new("v", FieldKind::I32, 0)]),
            ],
        )
        .unwrap();

        // When - flush a value and a temporary mid-step, then abandon
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        assert!(iter.next(&mut row).unwrap());
        row.set_value(0, 0, Value::Int(99));
        row.set_value(1, 0, Value::Int(7));
        iter.sync(&mut row).unwrap();
        drop(iter);

        // Then - the out value and exactly one temporary landed
        assert_eq!(
            world.pool(cid(1)).unwrap().row_bytes(0),
            99i32.to_ne_bytes()
        );
        assert_eq!(raw_ids(&world, cid(2)), vec![1]);
        assert_eq!(world.pool(cid(2)).unwrap().row_bytes(0), 7i32.to_ne_bytes());
    }

    #[test]
    fn sync_then_step_does_not_reapply_temporaries() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        for raw in 1..=2u32 {
            world
                .add_component(id(raw), cid(1), Some(&0i32.to_ne_bytes()))
                .unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "spawned", Attribs::NONE)
                    .with_fields(vec![Field::new("v", FieldKind::I32, 0)]),
            ],
        )
        .unwrap();

        // When - sync a temporary, then keep iterating
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        assert!(iter.next(&mut row).unwrap());
        row.set_value(1, 0, Value::Int(5));
        iter.sync(&mut row).unwrap();
        while iter.next(&mut row).unwrap() {}
        drop(iter);

        // Then - the sibling was injected exactly once
        assert_eq!(raw_ids(&world, cid(2)), vec![1]);
    }

    #[test]
    fn abandoning_the_iterator_flushes_nothing() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world
            .add_component(id(1), cid(1), Some(&1i32.to_ne_bytes()))
            .unwrap();

        let query =
            Query::compile(&world, vec![int_key(cid(1), Attribs::IN | Attribs::OUT)]).unwrap();

        // When - supply a value but drop before the next step
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        assert!(iter.next(&mut row).unwrap());
        row.set_value(0, 0, Value::Int(42));
        drop(iter);

        // Then - the pending writeback was discarded
        assert_eq!(world.pool(cid(1)).unwrap().row_bytes(0), 1i32.to_ne_bytes());
    }

    #[test]
    fn readonly_plans_skip_writeback() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world
            .add_component(id(1), cid(1), Some(&1i32.to_ne_bytes()))
            .unwrap();

        let query = Query::compile(&world, vec![int_key(cid(1), Attribs::IN)]).unwrap();
        assert!(query.readonly());

        // When - a misbehaving consumer supplies values anyway
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            row.set_value(0, 0, Value::Int(1000));
        }
        drop(iter);

        // Then - nothing was written
        assert_eq!(world.pool(cid(1)).unwrap().row_bytes(0), 1i32.to_ne_bytes());
    }

    #[test]
    fn out_on_a_missing_optional_sibling_is_fatal() {
        // Given - B misses id 1
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Data(4), 0).unwrap();
        world
            .add_component(id(1), cid(1), Some(&1i32.to_ne_bytes()))
            .unwrap();

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "extra", Attribs::OPTIONAL | Attribs::OUT)
                    .with_fields(vec![Field::new("v", FieldKind::I32, 0)]),
            ],
        )
        .unwrap();

        // When - the consumer writes into the missing key anyway
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        assert!(iter.next(&mut row).unwrap());
        assert!(!row.present(1));
        row.set_value(1, 0, Value::Int(5));

        // Then - the boundary reports the contract violation
        let err = iter.next(&mut row).unwrap_err();
        assert!(matches!(err, Error::MissingSibling { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn foreign_keys_read_and_write_references() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        world.declare_type(cid(2), Stride::Foreign, 0).unwrap();
        for raw in 1..=2u32 {
            world
                .add_component(id(raw), cid(1), Some(&0i32.to_ne_bytes()))
                .unwrap();
            let row = world.add_component(id(raw), cid(2), None).unwrap();
            world
                .set_object(cid(2), row, Some(HostRef::new(raw as u64 * 11)))
                .unwrap();
        }

        let query = Query::compile(
            &world,
            vec![
                int_key(cid(1), Attribs::IN),
                KeySpec::new(cid(2), "blob", Attribs::IN | Attribs::OUT),
            ],
        )
        .unwrap();

        // When - read each reference through the row and rewrite it
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut seen = Vec::new();
        while iter.next(&mut row).unwrap() {
            seen.push(row.object(1));
            assert_eq!(iter.object(1).unwrap(), row.object(1));
            row.set_object(1, Some(HostRef::new(1000)));
        }
        drop(iter);

        // Then
        assert_eq!(seen, vec![Some(HostRef::new(11)), Some(HostRef::new(22))]);
        assert_eq!(world.object(cid(2), 0).unwrap(), Some(HostRef::new(1000)));
        assert_eq!(world.object(cid(2), 1).unwrap(), Some(HostRef::new(1000)));
    }

    #[test]
    fn iterator_object_access_targets_the_current_row() {
        // Given
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Foreign, 0).unwrap();
        world.add_component(id(1), cid(1), None).unwrap();
        world.add_component(id(2), cid(1), None).unwrap();

        let query = Query::compile(
            &world,
            vec![KeySpec::new(cid(1), "blob", Attribs::IN)],
        )
        .unwrap();

        // When - set each row's reference directly through the iterator
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        while iter.next(&mut row).unwrap() {
            let raw = iter.entity().unwrap().raw();
            iter.set_object(0, Some(HostRef::new(raw as u64))).unwrap();
        }
        drop(iter);

        // Then
        assert_eq!(world.object(cid(1), 0).unwrap(), Some(HostRef::new(1)));
        assert_eq!(world.object(cid(1), 1).unwrap(), Some(HostRef::new(2)));
    }

    #[test]
    fn disabling_the_main_tag_still_visits_every_row() {
        // Given - the main key is itself the tag being cleared
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Tag, 0).unwrap();
        for raw in 1..=4u32 {
            world.add_component(id(raw), cid(1), None).unwrap();
        }

        let query = Query::compile(
            &world,
            vec![KeySpec::new(cid(1), "mark", Attribs::OUT)],
        )
        .unwrap();

        // When - every step disables its own row
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        let mut visited = Vec::new();
        while iter.next(&mut row).unwrap() {
            visited.push(iter.entity().unwrap().raw());
            row.set_tag(0, false);
        }
        drop(iter);

        // Then - all rows were seen once and the pool drained
        assert_eq!(visited, vec![1, 2, 3, 4]);
        assert!(world.pool(cid(1)).unwrap().is_empty());
    }

    #[test]
    fn operations_before_the_first_yield_are_rejected() {
        let mut world = World::new();
        world.declare_type(cid(1), Stride::Data(4), 0).unwrap();
        let query = Query::compile(&world, vec![int_key(cid(1), Attribs::IN)]).unwrap();
        let mut row = query.row();
        let mut iter = query.iter(&mut world);
        assert_eq!(iter.remove(), Err(Error::NoCurrentRow));
        assert_eq!(iter.sync(&mut row), Err(Error::NoCurrentRow));
        assert_eq!(iter.entity(), None);
    }
}
