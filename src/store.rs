//! The authoritative entity store.
//!
//! Owns the entity list, the per-entity records, the tag reverse index, the
//! deferred-removal queues, the lifecycle event dispatcher, and the entity
//! record pool. Every mutation here is atomic with respect to the query
//! index: the index update and the resulting events complete before the
//! operation returns.
//!
//! The store deliberately has no back-pointer to the component registry or
//! the query index; callers pass them in, so there is exactly one copy of
//! each and nothing to fall out of sync.

use std::collections::HashMap;

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityId, EntityRecord};
use crate::event::{EventDispatcher, EventPayload};
use crate::pool::ObjectPool;
use crate::query::QueryIndex;
use crate::EcsError;

/// Topic fired when an entity is created.
pub const ENTITY_CREATED: &str = "EntityCreated";
/// Topic fired when an entity is removed. Fires while the entity's
/// components are still attached (listeners may inspect them) but after the
/// entity has left every query.
pub const ENTITY_REMOVED: &str = "EntityRemoved";
/// Topic fired after a component is attached.
pub const COMPONENT_ADDED: &str = "ComponentAdded";
/// Topic fired when a component is about to be detached.
pub const COMPONENT_REMOVE: &str = "ComponentRemove";

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

pub struct EntityStore {
    /// Authoritative entity list, insertion order. Entities queued for
    /// deferred destruction stay in this list until the queue is drained.
    pub(crate) entities: Vec<EntityId>,
    pub(crate) records: HashMap<EntityId, Box<EntityRecord>>,
    /// Reverse index `tag -> entities`, mutual inverse of each record's tag
    /// list.
    tag_index: HashMap<String, Vec<EntityId>>,
    /// Entities queued for destruction at end of tick.
    pending_entity_removals: Vec<EntityId>,
    /// Entities with at least one component queued for detachment.
    pending_component_removals: Vec<EntityId>,
    dispatcher: EventDispatcher,
    record_pool: ObjectPool<EntityRecord>,
    next_id: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            records: HashMap::new(),
            tag_index: HashMap::new(),
            pending_entity_removals: Vec::new(),
            pending_component_removals: Vec::new(),
            dispatcher: EventDispatcher::new(),
            record_pool: ObjectPool::new(EntityRecord::empty, EntityRecord::recycle),
            next_id: 1,
        }
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a new entity with a fresh id. Emits [`ENTITY_CREATED`].
    pub fn create_entity(&mut self) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id += 1;

        let mut record = self.record_pool.acquire();
        record.id = id;
        self.records.insert(id, record);
        self.entities.push(id);

        self.dispatcher
            .emit(ENTITY_CREATED, &EventPayload::Entity(id));
        id
    }

    /// Remove an entity. With `force` it is destroyed immediately; otherwise
    /// it is queued and destroyed by [`process_deferred`](Self::process_deferred).
    ///
    /// Either way the entity leaves every query here, then [`ENTITY_REMOVED`]
    /// fires with the components still attached.
    pub fn remove_entity(
        &mut self,
        registry: &mut ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
        force: bool,
    ) -> Result<(), EcsError> {
        let Some(record) = self.records.get_mut(&entity) else {
            return Err(EcsError::UnknownEntity(entity));
        };
        if record.pending_destroy {
            if force {
                self.destroy_entity(registry, entity);
            }
            return Ok(());
        }

        queries.on_entity_removed(entity, &mut record.queries);
        self.dispatcher
            .emit(ENTITY_REMOVED, &EventPayload::Entity(entity));

        if force {
            self.destroy_entity(registry, entity);
        } else {
            self.records
                .get_mut(&entity)
                .expect("record present above")
                .pending_destroy = true;
            self.pending_entity_removals.push(entity);
        }
        Ok(())
    }

    /// Synchronous destruction: unlink from the entity list, release every
    /// component (attached and pending) to its pool, clear tags from the
    /// reverse index, and recycle the record.
    fn destroy_entity(&mut self, registry: &mut ComponentRegistry, entity: EntityId) {
        let Some(mut record) = self.records.remove(&entity) else {
            return;
        };
        if let Some(pos) = self.entities.iter().position(|e| *e == entity) {
            self.entities.remove(pos);
        }
        for (type_id, instance) in record.components.drain() {
            registry.release(type_id, instance);
        }
        for (type_id, instance) in record.pending_removals.drain(..) {
            registry.release(type_id, instance);
        }
        for tag in record.tags.drain(..) {
            if let Some(list) = self.tag_index.get_mut(&tag) {
                if let Some(pos) = list.iter().position(|e| *e == entity) {
                    list.remove(pos);
                }
                if list.is_empty() {
                    self.tag_index.remove(&tag);
                }
            }
        }
        self.record_pool.release(record);
    }

    /// Drain both deferred queues: destroy queued entities, then release the
    /// queued component detachments of the survivors. Emits nothing.
    pub fn process_deferred(&mut self, registry: &mut ComponentRegistry) {
        let pending = std::mem::take(&mut self.pending_entity_removals);
        for entity in pending {
            self.destroy_entity(registry, entity);
        }

        let pending = std::mem::take(&mut self.pending_component_removals);
        for entity in pending {
            // Entities destroyed above no longer resolve; their pending
            // components were released with the record.
            let Some(record) = self.records.get_mut(&entity) else {
                continue;
            };
            for (type_id, instance) in record.pending_removals.drain(..) {
                registry.release(type_id, instance);
            }
        }
    }

    // -- components ---------------------------------------------------------

    /// Attach a component of type `T`, interning the type on first use.
    ///
    /// The instance comes from the type's pool; `init` (when given) overwrites
    /// the reset state. No-op if the entity already owns `T`, is unknown, or
    /// is pending removal.
    pub fn add_component<T: Component>(
        &mut self,
        registry: &mut ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
        init: Option<T>,
    ) {
        let type_id = registry.intern::<T>();
        let Some(record) = self.records.get_mut(&entity) else {
            return;
        };
        if record.pending_destroy || record.mask[type_id.index()] {
            return;
        }

        let mut instance = registry.acquire::<T>(type_id);
        if let Some(init) = init {
            *instance = init;
        }
        registry.on_attached(type_id);

        record.mask.set(type_id.index(), true);
        record.components.insert(type_id, instance);

        let record = record.as_mut();
        queries.on_component_added(entity, &record.mask, &mut record.queries, type_id);

        self.dispatcher.emit(
            COMPONENT_ADDED,
            &EventPayload::Component {
                entity,
                component: type_id,
            },
        );
    }

    /// Detach a component of type `T`. No-op if the entity does not own it.
    /// See [`remove_component_by_id`](Self::remove_component_by_id).
    pub fn remove_component<T: Component>(
        &mut self,
        registry: &mut ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
        force: bool,
    ) {
        let Some(type_id) = registry.lookup::<T>() else {
            return;
        };
        self.remove_component_by_id(registry, queries, entity, type_id, force);
    }

    /// Detach a component by type id.
    ///
    /// [`COMPONENT_REMOVE`] fires first (the component is still attached for
    /// its listeners), then the query index reacts, then the instance is
    /// either released now (`force`) or parked on the entity's pending list
    /// until [`process_deferred`](Self::process_deferred).
    pub fn remove_component_by_id(
        &mut self,
        registry: &mut ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
        type_id: ComponentTypeId,
        force: bool,
    ) {
        {
            let Some(record) = self.records.get(&entity) else {
                return;
            };
            if record.pending_destroy || !record.mask[type_id.index()] {
                return;
            }
        }
        self.dispatcher.emit(
            COMPONENT_REMOVE,
            &EventPayload::Component {
                entity,
                component: type_id,
            },
        );

        let record = self
            .records
            .get_mut(&entity)
            .expect("record present above")
            .as_mut();
        queries.on_component_removed(entity, &record.mask, &mut record.queries, type_id);

        record.mask.set(type_id.index(), false);
        let instance = record
            .components
            .remove(&type_id)
            .expect("mask bit implies instance");

        if force {
            registry.release(type_id, instance);
        } else {
            let first_pending = record.pending_removals.is_empty();
            record.pending_removals.push((type_id, instance));
            if first_pending {
                self.pending_component_removals.push(entity);
            }
        }
    }

    /// Detach every component the entity currently owns.
    pub fn remove_all_components(
        &mut self,
        registry: &mut ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
        force: bool,
    ) {
        let Some(record) = self.records.get(&entity) else {
            return;
        };
        let owned: Vec<ComponentTypeId> = record
            .mask
            .iter_ones()
            .map(|bit| ComponentTypeId(bit as u32))
            .collect();
        for type_id in owned {
            self.remove_component_by_id(registry, queries, entity, type_id, force);
        }
    }

    // -- component access ---------------------------------------------------

    /// Immutable view of the entity's `T`.
    pub fn get_component<'a, T: Component>(
        &'a self,
        registry: &ComponentRegistry,
        entity: EntityId,
    ) -> Option<&'a T> {
        let type_id = registry.lookup::<T>()?;
        let record = self.records.get(&entity)?;
        record.components.get(&type_id)?.downcast_ref::<T>()
    }

    /// Mutable view of the entity's `T`.
    ///
    /// Before the reference is handed out, every reactive query currently
    /// containing this entity emits `ComponentChanged`. This is the only
    /// mutation-notification path.
    pub fn get_component_mut<'a, T: Component>(
        &'a mut self,
        registry: &ComponentRegistry,
        queries: &mut QueryIndex,
        entity: EntityId,
    ) -> Option<&'a mut T> {
        let type_id = registry.lookup::<T>()?;
        let record = self.records.get_mut(&entity)?;
        if !record.mask[type_id.index()] {
            return None;
        }
        queries.on_component_changed(entity, type_id, &record.queries);
        record.components.get_mut(&type_id)?.downcast_mut::<T>()
    }

    pub fn has_component<T: Component>(
        &self,
        registry: &ComponentRegistry,
        entity: EntityId,
    ) -> bool {
        let Some(type_id) = registry.lookup::<T>() else {
            return false;
        };
        self.records
            .get(&entity)
            .is_some_and(|record| record.mask[type_id.index()])
    }

    pub fn has_all_components(&self, entity: EntityId, types: &[ComponentTypeId]) -> bool {
        self.records
            .get(&entity)
            .is_some_and(|record| types.iter().all(|t| record.mask[t.index()]))
    }

    // -- tags ---------------------------------------------------------------

    pub fn add_tag(&mut self, entity: EntityId, tag: &str) {
        let Some(record) = self.records.get_mut(&entity) else {
            return;
        };
        if record.pending_destroy || record.tags.iter().any(|t| t == tag) {
            return;
        }
        record.tags.push(tag.to_owned());
        self.tag_index.entry(tag.to_owned()).or_default().push(entity);
    }

    pub fn remove_tag(&mut self, entity: EntityId, tag: &str) {
        let Some(record) = self.records.get_mut(&entity) else {
            return;
        };
        let Some(pos) = record.tags.iter().position(|t| t == tag) else {
            return;
        };
        record.tags.remove(pos);
        if let Some(list) = self.tag_index.get_mut(tag) {
            if let Some(pos) = list.iter().position(|e| *e == entity) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.tag_index.remove(tag);
            }
        }
    }

    pub fn has_tag(&self, entity: EntityId, tag: &str) -> bool {
        self.records
            .get(&entity)
            .is_some_and(|record| record.tags.iter().any(|t| t == tag))
    }

    pub fn tags(&self, entity: EntityId) -> &[String] {
        self.records
            .get(&entity)
            .map(|record| record.tags.as_slice())
            .unwrap_or(&[])
    }

    /// All entities carrying `tag`, in tagging order.
    pub fn entities_by_tag(&self, tag: &str) -> &[EntityId] {
        self.tag_index
            .get(tag)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    // -- introspection ------------------------------------------------------

    /// Whether the entity is in the store (pending-removal entities still
    /// are, until the deferred queue drains).
    pub fn contains(&self, entity: EntityId) -> bool {
        self.records.contains_key(&entity)
    }

    pub fn is_pending_removal(&self, entity: EntityId) -> bool {
        self.records
            .get(&entity)
            .is_some_and(|record| record.pending_destroy)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The authoritative entity list, insertion order.
    pub fn all_entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// The lifecycle event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn events_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    /// Counters of the entity record pool: `(total, free, used)`.
    pub fn record_pool_counters(&self) -> (usize, usize, usize) {
        (
            self.record_pool.total(),
            self.record_pool.free(),
            self.record_pool.used(),
        )
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.entities.len())
            .field("pending_removals", &self.pending_entity_removals.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
