//! Entity identifiers.
//!
//! An entity is nothing but a 32-bit id: there is no per-entity record, and an
//! entity exists exactly where at least one component pool holds its id. Ids
//! are handed out monotonically by [`World`](crate::world::World) and only
//! reclaimed wholesale by the renumber pass. Zero is reserved as the internal
//! tombstone written during compaction, and the all-ones value is the sentinel
//! upper bound used by the merge passes.

/// An entity identifier. This is a non-zero unique identifier for an entity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// The internal tombstone written over reaped cells during compaction.
    /// Never observable through the public surface.
    pub(crate) const TOMBSTONE: Self = Self(0);

    /// Reserved upper bound; never assigned to an entity.
    pub(crate) const SENTINEL: Self = Self(u32::MAX);

    /// Construct an id from its raw value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value of this id.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether this cell holds a compaction tombstone rather than a live id.
    #[inline]
    pub(crate) const fn is_tombstone(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Id {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[test]
fn id_ordering_follows_raw_value() {
    // Given
    let a = Id::new(1);
    let b = Id::new(2);
    let c = Id::new(0xFFFF_FFFE);

    // Then
    assert!(a < b);
    assert!(b < c);
    assert!(c < Id::SENTINEL);
}

#[test]
fn tombstone_is_zero() {
    assert!(Id::TOMBSTONE.is_tombstone());
    assert!(!Id::new(1).is_tombstone());
}
