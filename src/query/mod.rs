//! Compiled queries over component pools.
//!
//! A query is compiled once from a list of keys. The first key is the **main
//! key**: its pool drives iteration order. Every other key is a **sibling**,
//! joined row-by-row through the hinted lookup. Each key carries attribute
//! bits and, for data pools, a field plan describing how to codec its row.
//!
//! # Attributes
//!
//! - [`Attribs::IN`] — field values are read out on each visit.
//! - [`Attribs::OUT`] — field values are written back at the step boundary.
//! - [`Attribs::OPTIONAL`] — the sibling row may be absent; the step still
//!   yields with the key reported missing.
//! - [`Attribs::EXISTENCE`] — boolean filter: require presence, read nothing.
//! - [`Attribs::ABSENT`] — boolean filter: require absence.
//!
//! A key carrying none of these read/write/filter bits is **temporary**: it
//! is added as a new sibling on every step whose writeback supplies a value.
//!
//! Compilation validates the plan shape; iteration never re-checks it.

mod iter;
mod row;

pub use iter::QueryIter;
pub use row::IterRow;

use std::ops::BitOr;

use fixedbitset::FixedBitSet;

use crate::{
    component::{MAX_TYPES, Stride, TypeId},
    error::Error,
    field::Field,
    world::World,
};

/// Attribute bits of one query key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Attribs(u8);

impl Attribs {
    pub const NONE: Self = Self(0);
    pub const IN: Self = Self(1);
    pub const OUT: Self = Self(1 << 1);
    pub const OPTIONAL: Self = Self(1 << 2);
    pub const EXISTENCE: Self = Self(1 << 3);
    pub const ABSENT: Self = Self(1 << 4);

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether this key is a pure boolean filter (existence or absence).
    #[inline]
    pub const fn is_filter(self) -> bool {
        self.0 & (Self::EXISTENCE.0 | Self::ABSENT.0) != 0
    }

    /// Whether this key is temporary: it neither reads, writes, nor filters,
    /// so the only thing it can do is inject a fresh sibling on writeback.
    #[inline]
    pub const fn is_temporary(self) -> bool {
        self.0 & (Self::IN.0 | Self::OUT.0 | Self::EXISTENCE.0 | Self::ABSENT.0) == 0
    }
}

impl BitOr for Attribs {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One key of a query plan, as supplied by the caller.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub cid: TypeId,
    pub name: String,
    pub attribs: Attribs,
    pub fields: Vec<Field>,
}

impl KeySpec {
    /// A key without a field plan (tags, filters, foreign keys).
    pub fn new(cid: TypeId, name: impl Into<String>, attribs: Attribs) -> Self {
        Self {
            cid,
            name: name.into(),
            attribs,
            fields: Vec::new(),
        }
    }

    /// Attach a field plan to this key.
    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }
}

/// A compiled key: the spec plus the stride captured at compile time.
#[derive(Debug, Clone)]
pub(crate) struct Key {
    pub(crate) cid: TypeId,
    pub(crate) name: String,
    pub(crate) attribs: Attribs,
    pub(crate) fields: Vec<Field>,
    pub(crate) stride: Stride,
}

/// A compiled query plan.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) keys: Vec<Key>,
    pub(crate) readonly: bool,
}

impl Query {
    /// Compile and validate a plan against a world's declared types.
    ///
    /// Compilation reads pool metadata only; it never touches pool contents.
    pub fn compile(world: &World, specs: Vec<KeySpec>) -> Result<Self, Error> {
        if specs.is_empty() {
            return Err(Error::EmptyPlan);
        }
        if specs.len() > MAX_TYPES {
            return Err(Error::TooManyKeys(specs.len()));
        }
        let mut seen = FixedBitSet::with_capacity(MAX_TYPES);
        let mut keys = Vec::with_capacity(specs.len());
        let mut readonly = true;
        for (at, spec) in specs.into_iter().enumerate() {
            if spec.cid == TypeId::REMOVED {
                return Err(Error::InvalidPlan {
                    key: spec.name,
                    reason: "the removed set cannot be queried",
                });
            }
            let stride = world.pool(spec.cid)?.stride();
            if seen.contains(spec.cid.index()) {
                return Err(Error::DuplicateKey(spec.cid));
            }
            seen.insert(spec.cid.index());

            let key = Key {
                cid: spec.cid,
                name: spec.name,
                attribs: spec.attribs,
                fields: spec.fields,
                stride,
            };
            validate_key(&key, at == 0)?;
            readonly &= key.attribs.is_filter()
                || (key.attribs.contains(Attribs::IN) && !key.attribs.contains(Attribs::OUT));
            keys.push(key);
        }
        Ok(Self { keys, readonly })
    }

    /// Whether this plan only reads: every non-filter key is `IN` without
    /// `OUT`, and nothing is temporary. Readonly iterations skip the whole
    /// writeback phase.
    #[inline]
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// The number of keys in the plan.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The position of a key by name.
    pub fn key_index(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.name == name)
    }

    /// Build a consumer row shaped for this plan.
    pub fn row(&self) -> IterRow {
        IterRow::for_plan(self)
    }

    /// Start an iteration over a world. The iterator holds the borrow for
    /// its whole lifetime; all mutation during iteration goes through the
    /// writeback channel.
    pub fn iter<'w, 'q>(&'q self, world: &'w mut World) -> QueryIter<'w, 'q> {
        QueryIter::new(world, self)
    }
}

fn validate_key(key: &Key, is_main: bool) -> Result<(), Error> {
    let a = key.attribs;
    let fail = |reason: &'static str| -> Result<(), Error> {
        Err(Error::InvalidPlan {
            key: key.name.clone(),
            reason,
        })
    };

    if a.contains(Attribs::EXISTENCE) && a.contains(Attribs::ABSENT) {
        return fail("existence and absence are mutually exclusive");
    }
    if a.is_filter() && (a.contains(Attribs::IN) || a.contains(Attribs::OUT)) {
        return fail("a filter key cannot read or write values");
    }
    if a.contains(Attribs::ABSENT) && a.contains(Attribs::OPTIONAL) {
        return fail("an absence filter cannot be optional");
    }
    if is_main {
        if a.contains(Attribs::ABSENT) {
            return fail("the main key cannot require absence");
        }
        if a.contains(Attribs::OPTIONAL) {
            return fail("the first key should not be optional");
        }
        if a.is_temporary() {
            return fail("the main key can't be temporary");
        }
    }
    match key.stride {
        Stride::Order => {
            if is_main {
                if !a.contains(Attribs::EXISTENCE) {
                    return fail("an order pool drives iteration only as an existence filter");
                }
            } else if !a.is_temporary() {
                return fail("an order pool joins only as a temporary key");
            }
            if !key.fields.is_empty() {
                return fail("an order pool carries no fields");
            }
        }
        Stride::Tag => {
            if !key.fields.is_empty() {
                return fail("a tag carries no fields");
            }
            if !is_main && a.is_temporary() {
                return fail("a tag cannot be temporary; write it through an out key");
            }
        }
        Stride::Foreign => {
            if !key.fields.is_empty() {
                return fail("a host reference carries no field plan");
            }
        }
        Stride::Data(k) => {
            for field in &key.fields {
                if !field.fits(k) {
                    return Err(Error::FieldOutOfBounds {
                        field: field.name.clone(),
                        stride: k,
                    });
                }
            }
        }
    }
    Ok(())
}
