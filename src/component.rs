//! Component type identifiers, pool strides, and crate limits.
//!
//! A component type is nothing more than a pool index paired with a
//! [`Stride`] describing its payload layout. Types are declared at runtime on
//! a [`World`](crate::world::World); there is no static registry.

/// Number of component type slots in a world.
pub const MAX_TYPES: usize = 256;

/// Capacity given to a pool on its first insert when no hint was supplied.
pub const DEFAULT_POOL_CAP: usize = 128;

/// Once `max_id` crosses this bound, the next update renumbers every live id
/// back into a dense range starting at 1.
pub const REARRANGE_THRESHOLD: u32 = 1 << 31;

/// A component type identifier: an index into the world's pool table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u8);

impl TypeId {
    /// The built-in removed tag. Declared by every world at construction;
    /// entities enqueued here are reaped by the next update.
    pub const REMOVED: Self = Self(0);

    /// Construct a type id from its raw slot index.
    #[inline]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Get the index of this type in the world's pool table.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for TypeId {
    #[inline]
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payload layout of a component pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stride {
    /// No payload; membership alone carries the meaning.
    Tag,
    /// A packed row of the given number of bytes per entity.
    Data(usize),
    /// One opaque host-managed reference per entity, kept in a side table.
    Foreign,
    /// No payload, and ids carry append order instead of id order. Usable as
    /// a work queue: only valid as a query's main key or temporary sibling.
    Order,
}

impl Stride {
    /// Bytes of packed payload per row. Zero for everything but `Data`.
    #[inline]
    pub const fn payload_size(&self) -> usize {
        match self {
            Stride::Data(k) => *k,
            _ => 0,
        }
    }

    /// Whether the pool's id array is kept sorted. Order pools are the one
    /// exception: they carry append order.
    #[inline]
    pub const fn is_sorted(&self) -> bool {
        !matches!(self, Stride::Order)
    }
}

/// An opaque reference owned by the embedding host. The core stores it,
/// moves it during compaction, and replaces it on writeback; it never
/// interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRef(u64);

impl HostRef {
    /// Construct a host reference from its raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value of this reference.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}
