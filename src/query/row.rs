//! The consumer row: the structured slot a step deposits into and a
//! writeback reads from.
//!
//! One slot per plan key. On each yielded step the iterator deposits the
//! `IN` values (decoded fields, tag presence, the current host reference)
//! and presence flags; between steps the consumer fills in `OUT` fields, tag
//! booleans, host references, or the postpone signal, and the next step's
//! writeback applies them. Slots of keys that are not `IN` are cleared after
//! apply, so a temporary key never injects the same sibling twice.

use crate::{
    component::HostRef,
    field::Value,
    query::Query,
};

/// The tri-state host-reference slot: distinguishing "consumer supplied
/// nothing" from "consumer supplied no reference".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectSlot {
    #[default]
    Empty,
    Set(Option<HostRef>),
}

/// One key's portion of the consumer row.
#[derive(Debug, Default, Clone)]
pub(crate) struct Slot {
    /// Whether the key resolved to a row on the last yielded step.
    pub(crate) present: bool,
    /// The tag flag: deposited presence on read, enable/disable on write.
    pub(crate) tag: Option<bool>,
    /// The host-reference slot for foreign keys.
    pub(crate) object: ObjectSlot,
    /// Per-field dynamic values; `None` marks "nothing supplied".
    pub(crate) fields: Vec<Option<Value>>,
}

impl Slot {
    /// Forget everything the consumer or a deposit put here.
    fn clear(&mut self) {
        self.tag = None;
        self.object = ObjectSlot::Empty;
        self.fields.fill(None);
    }
}

/// A structured row shaped for one query plan.
#[derive(Debug, Clone)]
pub struct IterRow {
    slots: Vec<Slot>,
    postpone: bool,
}

impl IterRow {
    /// Build a row with one slot per key, fields sized to each key's plan.
    pub(crate) fn for_plan(query: &Query) -> Self {
        Self {
            slots: query
                .keys
                .iter()
                .map(|key| Slot {
                    fields: vec![None; key.fields.len()],
                    ..Slot::default()
                })
                .collect(),
            postpone: false,
        }
    }

    /// Whether the key resolved to a row on the last yielded step. Optional
    /// siblings report their misses here.
    #[inline]
    pub fn present(&self, key: usize) -> bool {
        self.slots[key].present
    }

    /// The deposited or supplied value of one field.
    #[inline]
    pub fn value(&self, key: usize, field: usize) -> Option<Value> {
        self.slots[key].fields[field]
    }

    /// Supply a field value for the next writeback.
    #[inline]
    pub fn set_value(&mut self, key: usize, field: usize, value: Value) {
        self.slots[key].fields[field] = Some(value);
    }

    /// Withdraw a field value: the writeback will leave the field alone.
    #[inline]
    pub fn clear_value(&mut self, key: usize, field: usize) {
        self.slots[key].fields[field] = None;
    }

    /// The tag flag of a key: presence for a deposited tag, `false` when the
    /// slot is empty.
    #[inline]
    pub fn tag(&self, key: usize) -> bool {
        self.slots[key].tag.unwrap_or(false)
    }

    /// Supply a tag boolean (`true` enables, `false` disables) or mark a
    /// temporary order key for appending.
    #[inline]
    pub fn set_tag(&mut self, key: usize, value: bool) {
        self.slots[key].tag = Some(value);
    }

    /// The deposited or supplied host reference of a foreign key.
    #[inline]
    pub fn object(&self, key: usize) -> Option<HostRef> {
        match self.slots[key].object {
            ObjectSlot::Set(value) => value,
            ObjectSlot::Empty => None,
        }
    }

    /// Supply a host reference for the next writeback.
    #[inline]
    pub fn set_object(&mut self, key: usize, value: Option<HostRef>) {
        self.slots[key].object = ObjectSlot::Set(value);
    }

    /// Ask the iterator to rotate the current row to the end of the order
    /// pool instead of advancing past it. Only meaningful when the main key
    /// is an order pool.
    #[inline]
    pub fn postpone(&mut self) {
        self.postpone = true;
    }

    /// The number of key slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Consume the postpone signal.
    pub(crate) fn take_postpone(&mut self) -> bool {
        std::mem::take(&mut self.postpone)
    }

    /// The raw tag flag, distinguishing "nothing supplied".
    #[inline]
    pub(crate) fn tag_slot(&self, key: usize) -> Option<bool> {
        self.slots[key].tag
    }

    /// The raw object slot, distinguishing "nothing supplied".
    #[inline]
    pub(crate) fn object_slot(&self, key: usize) -> ObjectSlot {
        self.slots[key].object
    }

    /// Whether the consumer supplied any field value for a key.
    pub(crate) fn any_value(&self, key: usize) -> bool {
        self.slots[key].fields.iter().any(|v| v.is_some())
    }

    /// Clear a consumed (non-`IN`) slot after its writeback applied.
    #[inline]
    pub(crate) fn clear_slot(&mut self, key: usize) {
        self.slots[key].clear();
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, key: usize) -> &mut Slot {
        &mut self.slots[key]
    }
}
