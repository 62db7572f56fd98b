//! Entity identifiers and records.
//!
//! An [`EntityId`] is a plain `u64` that counts up from 1 for the lifetime of
//! its world and is never reused. The state *behind* an id -- the
//! [`EntityRecord`] -- is pooled and recycled, so a stale id simply stops
//! resolving in the store's record map; there is no generation counter to
//! check.
//!
//! [`EntityRef`] and [`EntityMut`] are borrow-scoped views over one entity,
//! the handle surface hosts use outside of systems.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{BoxedComponent, Component, ComponentTypeId, ComponentRegistry, TypeMask};
use crate::query::{QueryId, QueryIndex};
use crate::store::EntityStore;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A world-scoped, monotonically increasing entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[inline]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Per-entity state owned by the store. Pooled: `recycle` clears every
/// collection in place so their capacity survives the round-trip.
pub(crate) struct EntityRecord {
    pub id: EntityId,
    /// Bit per owned component type.
    pub mask: TypeMask,
    /// Owned component instances, keyed by type.
    pub components: HashMap<ComponentTypeId, BoxedComponent>,
    pub tags: Vec<String>,
    /// Queries this entity is currently a member of.
    pub queries: Vec<QueryId>,
    /// Components detached from the mask but not yet released to their pools.
    pub pending_removals: Vec<(ComponentTypeId, BoxedComponent)>,
    /// Set once the entity is queued for end-of-tick destruction.
    pub pending_destroy: bool,
}

impl EntityRecord {
    pub fn empty() -> Self {
        Self {
            id: EntityId::new(0),
            mask: TypeMask::ZERO,
            components: HashMap::new(),
            tags: Vec::new(),
            queries: Vec::new(),
            pending_removals: Vec::new(),
            pending_destroy: false,
        }
    }

    pub fn recycle(&mut self) {
        self.id = EntityId::new(0);
        self.mask = TypeMask::ZERO;
        self.components.clear();
        self.tags.clear();
        self.queries.clear();
        self.pending_removals.clear();
        self.pending_destroy = false;
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("components", &self.components.len())
            .field("tags", &self.tags)
            .field("pending_destroy", &self.pending_destroy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityRef / EntityMut
// ---------------------------------------------------------------------------

/// Read-only view of one entity.
pub struct EntityRef<'w> {
    pub(crate) store: &'w EntityStore,
    pub(crate) registry: &'w ComponentRegistry,
    pub(crate) id: EntityId,
}

impl<'w> EntityRef<'w> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Immutable view of the entity's `T`, or `None` if it does not own one.
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        self.store.get_component::<T>(self.registry, self.id)
    }

    pub fn has_component<T: Component>(&self) -> bool {
        self.store.has_component::<T>(self.registry, self.id)
    }

    /// Whether the entity owns every one of the given types.
    pub fn has_all_components(&self, types: &[ComponentTypeId]) -> bool {
        self.store.has_all_components(self.id, types)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.store.has_tag(self.id, tag)
    }

    pub fn tags(&self) -> &'w [String] {
        self.store.tags(self.id)
    }
}

/// Mutable view of one entity. All mutations route through the store so the
/// query index and event plumbing observe them.
pub struct EntityMut<'w> {
    pub(crate) store: &'w mut EntityStore,
    pub(crate) registry: &'w mut ComponentRegistry,
    pub(crate) queries: &'w mut QueryIndex,
    pub(crate) id: EntityId,
}

impl<'w> EntityMut<'w> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Attach a pool-fresh (default-valued) `T`. No-op if already owned.
    pub fn add_component<T: Component>(&mut self) -> &mut Self {
        self.store
            .add_component::<T>(self.registry, self.queries, self.id, None);
        self
    }

    /// Attach `T` initialized from `value`. No-op if already owned.
    pub fn add_component_with<T: Component>(&mut self, value: T) -> &mut Self {
        self.store
            .add_component(self.registry, self.queries, self.id, Some(value));
        self
    }

    /// Detach `T`; deferred to end of tick unless `force`. No-op if the
    /// entity does not own `T`.
    pub fn remove_component<T: Component>(&mut self, force: bool) -> &mut Self {
        self.store
            .remove_component::<T>(self.registry, self.queries, self.id, force);
        self
    }

    /// Detach every component the entity owns.
    pub fn remove_all_components(&mut self, force: bool) -> &mut Self {
        self.store
            .remove_all_components(self.registry, self.queries, self.id, force);
        self
    }

    pub fn has_component<T: Component>(&self) -> bool {
        self.store.has_component::<T>(self.registry, self.id)
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.store.get_component::<T>(self.registry, self.id)
    }

    /// Mutable view of the entity's `T`. Notifies every reactive query that
    /// currently contains this entity before the reference is handed out.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.store
            .get_component_mut::<T>(self.registry, self.queries, self.id)
    }

    pub fn add_tag(&mut self, tag: &str) -> &mut Self {
        self.store.add_tag(self.id, tag);
        self
    }

    pub fn remove_tag(&mut self, tag: &str) -> &mut Self {
        self.store.remove_tag(self.id, tag);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.store.has_tag(self.id, tag)
    }

    /// Remove this entity from the world; deferred to end of tick unless
    /// `force`.
    pub fn remove(self, force: bool) -> Result<(), EcsError> {
        self.store
            .remove_entity(self.registry, self.queries, self.id, force)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_accessors_and_formatting() {
        let id = EntityId::new(42);
        assert_eq!(id.id(), 42);
        assert_eq!(format!("{id}"), "42");
        assert_eq!(format!("{id:?}"), "EntityId(42)");
    }

    #[test]
    fn record_recycle_clears_everything() {
        let mut record = EntityRecord::empty();
        record.id = EntityId::new(9);
        record.mask.set(3, true);
        record.tags.push("boss".to_owned());
        record.queries.push(QueryId(0));
        record.pending_destroy = true;

        record.recycle();

        assert_eq!(record.id, EntityId::new(0));
        assert!(record.mask.not_any());
        assert!(record.tags.is_empty());
        assert!(record.queries.is_empty());
        assert!(!record.pending_destroy);
    }
}
