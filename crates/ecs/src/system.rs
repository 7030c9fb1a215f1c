use crate::store::{ComponentStore, Record};
use kiln_common::Entity;
use std::collections::BTreeMap;
use std::fmt;

/// Partial component update returned by a system for one entity.
///
/// `None` values clear the slot back to empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<V> {
    changes: BTreeMap<String, Option<V>>,
}

impl<V> Default for Update<V> {
    fn default() -> Self {
        Self {
            changes: BTreeMap::new(),
        }
    }
}

impl<V> Update<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: V) -> Self {
        self.changes.insert(name.into(), Some(value));
        self
    }

    pub fn clear(mut self, name: impl Into<String>) -> Self {
        self.changes.insert(name.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn into_changes(self) -> impl Iterator<Item = (String, Option<V>)> {
        self.changes.into_iter()
    }
}

/// A per-entity transform run once per pass.
///
/// `run` receives a snapshot of the entity's row taken just before this
/// system runs, plus read access to the whole store for lookups across
/// entities (active camera, applied material). The returned update is merged
/// into the store before the next system runs for the same entity.
pub trait System<V, C> {
    fn name(&self) -> &str;

    fn run(
        &mut self,
        entity: Entity,
        row: &Record<V>,
        store: &ComponentStore<V>,
        ctx: &mut C,
    ) -> Option<Update<V>>;

    /// Called once after every entity has been visited.
    fn after_pass(&mut self, _store: &ComponentStore<V>, _ctx: &mut C) {}
}

/// System backed by a closure over the row snapshot.
pub struct FnSystem<F> {
    name: String,
    func: F,
}

impl<V, C, F> System<V, C> for FnSystem<F>
where
    F: FnMut(Entity, &Record<V>, &mut C) -> Option<Update<V>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &mut self,
        entity: Entity,
        row: &Record<V>,
        _store: &ComponentStore<V>,
        ctx: &mut C,
    ) -> Option<Update<V>> {
        (self.func)(entity, row, ctx)
    }
}

/// Wrap a closure as a named system.
pub fn system_fn<V, C, F>(name: impl Into<String>, func: F) -> FnSystem<F>
where
    F: FnMut(Entity, &Record<V>, &mut C) -> Option<Update<V>>,
{
    FnSystem {
        name: name.into(),
        func,
    }
}

/// Opaque handle to a registered system. Never reused within a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u64);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system#{}", self.0)
    }
}

/// Systems in registration order.
pub struct Schedule<V, C> {
    pub(crate) systems: Vec<(SystemId, Box<dyn System<V, C>>)>,
    next_id: u64,
}

impl<V, C> Default for Schedule<V, C> {
    fn default() -> Self {
        Self {
            systems: Vec::new(),
            next_id: 0,
        }
    }
}

impl<V, C> Schedule<V, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system(&mut self, system: impl System<V, C> + 'static) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        tracing::debug!(system = system.name(), %id, "system added");
        self.systems.push((id, Box::new(system)));
        id
    }

    /// Unregister a system. Returns false if the id is unknown.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        let before = self.systems.len();
        self.systems.retain(|(sid, _)| *sid != id);
        before != self.systems.len()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|(_, s)| s.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_after_removal() {
        let mut schedule: Schedule<i32, ()> = Schedule::new();
        let a = schedule.add_system(system_fn("a", |_, _, _: &mut ()| None));
        assert!(schedule.remove_system(a));
        let b = schedule.add_system(system_fn("b", |_, _, _: &mut ()| None));
        assert_ne!(a, b);
        assert!(!schedule.remove_system(a));
        assert_eq!(schedule.names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn update_builder() {
        let update: Update<i32> = Update::new().set("x", 1).clear("y");
        assert_eq!(update.len(), 2);
        let changes: Vec<_> = update.into_changes().collect();
        assert_eq!(changes[0], ("x".to_string(), Some(1)));
        assert_eq!(changes[1], ("y".to_string(), None));
    }
}
