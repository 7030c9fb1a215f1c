use crate::system::{Schedule, Update};
use kiln_common::Entity;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Errors from component store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("component `{0}` already exists")]
    ComponentExists(String),
    #[error("unknown component `{0}`")]
    UnknownComponent(String),
    #[error("entity {0} is not alive")]
    StaleEntity(Entity),
}

/// Snapshot of one entity's non-empty components, keyed by name.
pub type Record<V> = BTreeMap<String, V>;

#[derive(Debug, Clone, PartialEq)]
struct Column<V> {
    values: Vec<Option<V>>,
    default: Option<V>,
}

/// Columnar storage of named component arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStore<V> {
    columns: BTreeMap<String, Column<V>>,
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    live: usize,
}

impl<V> Default for ComponentStore<V> {
    fn default() -> Self {
        Self {
            columns: BTreeMap::new(),
            generations: Vec::new(),
            alive: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<V: Clone> ComponentStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with empty-default columns already registered.
    pub fn with_components<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut store = Self::new();
        for name in names {
            store.columns.entry(name.to_string()).or_insert(Column {
                values: Vec::new(),
                default: None,
            });
        }
        store
    }

    /// Allocate an entity, reusing a freed slot when one exists.
    ///
    /// Every column receives the supplied initial value, or its default.
    pub fn add_entity<'a>(&mut self, initial: impl IntoIterator<Item = (&'a str, V)>) -> Entity {
        let mut initial: BTreeMap<&str, V> = initial.into_iter().collect();

        let entity = match self.free.pop() {
            Some(index) => {
                let slot = index as usize;
                self.alive[slot] = true;
                Entity::new(index, self.generations[slot])
            }
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                self.alive.push(true);
                for column in self.columns.values_mut() {
                    column.values.push(None);
                }
                Entity::new(index, 0)
            }
        };
        self.live += 1;

        let slot = entity.slot();
        for (name, column) in self.columns.iter_mut() {
            column.values[slot] = initial
                .remove(name.as_str())
                .or_else(|| column.default.clone());
        }
        for name in initial.keys() {
            debug!(component = %name, %entity, "initial value for unregistered component ignored");
        }
        entity
    }

    /// Register a column. Existing live entities get `fill`, later ones `default`.
    pub fn add_component(
        &mut self,
        name: &str,
        fill: Option<V>,
        default: Option<V>,
    ) -> Result<(), EcsError> {
        if self.columns.contains_key(name) {
            return Err(EcsError::ComponentExists(name.to_string()));
        }
        let values = self
            .alive
            .iter()
            .map(|&alive| if alive { fill.clone() } else { None })
            .collect();
        self.columns
            .insert(name.to_string(), Column { values, default });
        debug!(component = name, slots = self.alive.len(), "component added");
        Ok(())
    }

    /// Drop a column and return its data.
    pub fn remove_component(&mut self, name: &str) -> Option<Vec<Option<V>>> {
        let removed = self.columns.remove(name).map(|c| c.values);
        if removed.is_some() {
            debug!(component = name, "component removed");
        }
        removed
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Raw column slots, including those of free entity slots.
    pub fn column(&self, name: &str) -> Option<&[Option<V>]> {
        self.columns.get(name).map(|c| c.values.as_slice())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.slot();
        self.alive.get(slot).copied().unwrap_or(false) && self.generations[slot] == entity.generation
    }

    pub fn get(&self, entity: Entity, name: &str) -> Option<&V> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns.get(name)?.values[entity.slot()].as_ref()
    }

    /// Snapshot of every non-empty component of `entity`.
    ///
    /// Out-of-range and stale handles yield an empty record.
    pub fn get_by_id(&self, entity: Entity) -> Record<V> {
        if !self.is_alive(entity) {
            return Record::new();
        }
        let slot = entity.slot();
        self.columns
            .iter()
            .filter_map(|(name, column)| {
                column.values[slot]
                    .as_ref()
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }

    /// Write one slot and return the previous value.
    pub fn set(
        &mut self,
        entity: Entity,
        name: &str,
        value: Option<V>,
    ) -> Result<Option<V>, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::StaleEntity(entity));
        }
        let column = self
            .columns
            .get_mut(name)
            .ok_or_else(|| EcsError::UnknownComponent(name.to_string()))?;
        Ok(std::mem::replace(&mut column.values[entity.slot()], value))
    }

    /// Free an entity's slot. Its components are cleared and the handle goes stale.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.slot();
        for column in self.columns.values_mut() {
            column.values[slot] = None;
        }
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(entity.index);
        self.live -= 1;
        debug!(%entity, "entity despawned");
        true
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, live or free. Every column has this length.
    pub fn slot_count(&self) -> usize {
        self.alive.len()
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| Entity::new(slot as u32, self.generations[slot]))
    }

    /// Merge a partial update into the live arrays. Returns the number of
    /// slots written.
    pub fn apply(&mut self, entity: Entity, update: Update<V>) -> usize {
        if !self.is_alive(entity) {
            return 0;
        }
        let slot = entity.slot();
        let mut written = 0;
        for (name, value) in update.into_changes() {
            match self.columns.get_mut(&name) {
                Some(column) => {
                    column.values[slot] = value;
                    written += 1;
                }
                None => warn!(component = %name, %entity, "update for unknown component skipped"),
            }
        }
        written
    }

    /// Run one pass of `schedule` over every live entity.
    ///
    /// Entity-major, system-minor. Each system gets a fresh snapshot of the
    /// row, and its update is applied before the next system runs; updates to
    /// an entity never become visible to systems already past it. Returns the
    /// number of entities visited.
    pub fn run_systems<C>(&mut self, schedule: &mut Schedule<V, C>, ctx: &mut C) -> usize {
        let mut visited = 0;
        for slot in 0..self.alive.len() {
            if !self.alive[slot] {
                continue;
            }
            let entity = Entity::new(slot as u32, self.generations[slot]);
            visited += 1;
            for (_, system) in schedule.systems.iter_mut() {
                let row = self.get_by_id(entity);
                if let Some(update) = system.run(entity, &row, self, ctx) {
                    self.apply(entity, update);
                }
            }
        }
        for (_, system) in schedule.systems.iter_mut() {
            system.after_pass(self, ctx);
        }
        visited
    }
}
