//! Columnar entity-component store.
//!
//! Components are named columns of optional values, one slot per entity
//! slot. Columns live in a BTreeMap so iteration order is deterministic.
//! Systems run entity-major: every system sees the row as updated by the
//! systems registered before it, for the entity currently being processed.
//!
//! # Invariants
//! - Every column has exactly one slot per entity slot (live or free).
//! - An absent component is an empty slot, never a missing slot.
//! - Freed slots are recycled with a bumped generation; stale handles read
//!   as empty and reject writes.

mod store;
mod system;

pub use store::{ComponentStore, EcsError, Record};
pub use system::{FnSystem, Schedule, System, SystemId, Update, system_fn};

pub use kiln_common::Entity;

pub fn crate_info() -> &'static str {
    "kiln-ecs v0.1.0"
}
