//! A packed-pool entity component store.
//!
//! Entities are bare 32-bit ids. Each declared component type owns one dense
//! pool sorted by entity id, which makes cross-component joins a hinted
//! binary search and keeps iteration cache-friendly. Removals are deferred
//! into a built-in tag and realised by a per-tick [`World::update`] that
//! compacts every pool in place and, when the id space runs long, renumbers
//! all live ids back into a dense range.
//!
//! Queries are compiled plans over component keys; their iterator walks a
//! main pool, joins sibling pools (required, optional, absent, temporary),
//! and applies consumer writebacks at iteration step boundaries.

pub mod component;
pub mod entity;
pub mod error;
pub mod field;
pub(crate) mod pool;
pub mod query;
pub mod world;

pub use component::{HostRef, Stride, TypeId};
pub use error::Error;
pub use field::{Field, FieldKind, Value};
pub use query::{Attribs, IterRow, KeySpec, Query, QueryIter};
pub use world::{ReferenceHost, World};
