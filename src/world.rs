//! The [`World`] is the composition root: it owns the component registry,
//! the entity store, the query index, the scheduler, and the world-level
//! event bus, and drives one tick of the simulation.

use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::component::{short_type_name, Component, ComponentRegistry, ComponentTypeId, TypeMask};
use crate::entity::{EntityId, EntityMut, EntityRef};
use crate::event::{EventDispatcher, EventPayload, Handler};
use crate::query::{
    QueryId, QueryIndex, ResolvedFilter, QUERY_COMPONENT_CHANGED, QUERY_ENTITY_ADDED,
    QUERY_ENTITY_REMOVED,
};
use crate::scheduler::{Scheduler, SystemAttrs};
use crate::stats::{ComponentStats, DispatcherStats, QueryStats, SystemStats, WorldStats};
use crate::store::EntityStore;
use crate::system::{
    component_buffer_handler, entity_buffer_handler, message_buffer_handler, ComponentFilter,
    EventLog, QueryEventKind, Subscription, SubscriptionTarget, System, SystemConfig,
    SystemContext, SystemData,
};
use crate::EcsError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

pub struct World {
    registry: ComponentRegistry,
    store: EntityStore,
    queries: QueryIndex,
    scheduler: Scheduler,
    /// Application-defined cross-system signals.
    bus: EventDispatcher,
    /// Gates `tick`; toggled by `stop`/`play`.
    enabled: bool,
}

impl World {
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            store: EntityStore::new(),
            queries: QueryIndex::new(),
            scheduler: Scheduler::new(),
            bus: EventDispatcher::new(),
            enabled: true,
        }
    }

    // -- registration -------------------------------------------------------

    /// Register a component type ahead of first use. Optional: attaching an
    /// unregistered type registers it on the fly.
    pub fn register_component<T: Component>(&mut self) -> ComponentTypeId {
        self.registry.intern::<T>()
    }

    /// Register `T` as a world-owned singleton and create its lone instance.
    pub fn register_singleton_component<T: Component>(&mut self) -> ComponentTypeId {
        self.registry.register_singleton::<T>()
    }

    pub fn singleton<T: Component>(&self) -> Option<&T> {
        self.registry.singleton::<T>()
    }

    pub fn singleton_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.registry.singleton_mut::<T>()
    }

    /// Register a system: runs its `init`, resolves the declared queries and
    /// event subscriptions, and inserts it at its priority.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateSystem`] if a system of the same type is already
    /// registered; [`EcsError::EmptyQuery`] if a declared query has no
    /// required component.
    pub fn register_system<S: System>(
        &mut self,
        mut system: S,
        attrs: SystemAttrs,
    ) -> Result<(), EcsError> {
        let type_id = TypeId::of::<S>();
        let name = short_type_name::<S>().to_owned();
        if self.scheduler.contains(type_id) {
            return Err(EcsError::DuplicateSystem(name));
        }

        let config = system.init();
        let mut data = SystemData::default();
        if let Err(err) = self.bind_config(config, &mut data) {
            Self::unbind(&mut self.queries, &mut self.bus, &data);
            return Err(err);
        }

        self.scheduler
            .insert(name, type_id, attrs.priority, Box::new(system), data);
        Ok(())
    }

    /// Remove a system by type, unsubscribing every handler it registered.
    /// Returns whether it was registered.
    pub fn remove_system<S: System>(&mut self) -> bool {
        let Some(entry) = self.scheduler.remove(TypeId::of::<S>()) else {
            return false;
        };
        Self::unbind(&mut self.queries, &mut self.bus, &entry.data);
        true
    }

    pub fn set_system_enabled<S: System>(&mut self, enabled: bool) -> bool {
        match self.scheduler.entry_mut(TypeId::of::<S>()) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn system_enabled<S: System>(&self) -> Option<bool> {
        self.scheduler.entry(TypeId::of::<S>()).map(|e| e.enabled)
    }

    /// Resolve a [`SystemConfig`] into bindings, buffers, and subscriptions.
    fn bind_config(&mut self, config: SystemConfig, data: &mut SystemData) -> Result<(), EcsError> {
        for query_config in config.queries {
            let resolved = Self::resolve_filters(&mut self.registry, &query_config.components);
            let query_id = self.queries.get_or_create(&resolved, &mut self.store)?;
            data.bindings.insert(query_config.name.clone(), query_id);

            for event_config in query_config.events {
                let (topic, handler, buffer) = match event_config.kind {
                    QueryEventKind::EntityAdded => {
                        let buffer = Rc::new(RefCell::new(EventLog::entities()));
                        (
                            QUERY_ENTITY_ADDED,
                            entity_buffer_handler(buffer.clone()),
                            buffer,
                        )
                    }
                    QueryEventKind::EntityRemoved => {
                        let buffer = Rc::new(RefCell::new(EventLog::entities()));
                        (
                            QUERY_ENTITY_REMOVED,
                            entity_buffer_handler(buffer.clone()),
                            buffer,
                        )
                    }
                    QueryEventKind::EntityChanged => {
                        self.queries.make_reactive(query_id);
                        let buffer = Rc::new(RefCell::new(EventLog::entities()));
                        (
                            QUERY_COMPONENT_CHANGED,
                            entity_buffer_handler(buffer.clone()),
                            buffer,
                        )
                    }
                    QueryEventKind::ComponentChanged => {
                        self.queries.make_reactive(query_id);
                        if event_config.components.is_empty() {
                            // No filter given: entity-keyed, deduplicated.
                            let buffer = Rc::new(RefCell::new(EventLog::entities()));
                            (
                                QUERY_COMPONENT_CHANGED,
                                entity_buffer_handler(buffer.clone()),
                                buffer,
                            )
                        } else {
                            let mut filter = TypeMask::ZERO;
                            for component in &event_config.components {
                                let id = (component.intern)(&mut self.registry);
                                filter.set(id.index(), true);
                            }
                            let buffer = Rc::new(RefCell::new(EventLog::components()));
                            (
                                QUERY_COMPONENT_CHANGED,
                                component_buffer_handler(buffer.clone(), filter),
                                buffer,
                            )
                        }
                    }
                };

                self.queries
                    .get_mut(query_id)
                    .dispatcher
                    .subscribe(topic, handler.clone());
                data.subscriptions.push(Subscription {
                    target: SubscriptionTarget::Query(query_id),
                    topic: topic.to_owned(),
                    handler,
                });
                data.query_buffers
                    .entry(query_config.name.clone())
                    .or_default()
                    .insert(event_config.name, buffer);
            }
        }

        for world_event in config.events {
            let buffer = Rc::new(RefCell::new(EventLog::messages()));
            let handler = message_buffer_handler(buffer.clone());
            self.bus.subscribe(&world_event.topic, handler.clone());
            data.subscriptions.push(Subscription {
                target: SubscriptionTarget::WorldBus,
                topic: world_event.topic,
                handler,
            });
            data.world_buffers.insert(world_event.name, buffer);
        }
        Ok(())
    }

    fn resolve_filters(
        registry: &mut ComponentRegistry,
        filters: &[ComponentFilter],
    ) -> Vec<ResolvedFilter> {
        filters
            .iter()
            .map(|filter| {
                let id = (filter.intern)(registry);
                let name = registry.info(id).name.clone();
                ResolvedFilter::new(id, filter.negated, &name)
            })
            .collect()
    }

    fn unbind(queries: &mut QueryIndex, bus: &mut EventDispatcher, data: &SystemData) {
        for subscription in &data.subscriptions {
            match subscription.target {
                SubscriptionTarget::Query(query_id) => {
                    queries
                        .get_mut(query_id)
                        .dispatcher
                        .unsubscribe(&subscription.topic, &subscription.handler);
                }
                SubscriptionTarget::WorldBus => {
                    bus.unsubscribe(&subscription.topic, &subscription.handler);
                }
            }
        }
    }

    // -- queries outside systems --------------------------------------------

    /// Intern a query for host-side inspection. Shares the query object with
    /// any system declaring the same filters.
    pub fn register_query(&mut self, filters: &[ComponentFilter]) -> Result<QueryId, EcsError> {
        let resolved = Self::resolve_filters(&mut self.registry, filters);
        self.queries.get_or_create(&resolved, &mut self.store)
    }

    /// Live entity list of an interned query.
    pub fn query_entities(&self, id: QueryId) -> &[EntityId] {
        self.queries.get(id).entities()
    }

    /// Canonical key of an interned query.
    pub fn query_key(&self, id: QueryId) -> &str {
        self.queries.get(id).key()
    }

    // -- entities -----------------------------------------------------------

    pub fn create_entity(&mut self) -> EntityId {
        self.store.create_entity()
    }

    pub fn entity(&self, entity: EntityId) -> Option<EntityRef<'_>> {
        if !self.store.contains(entity) {
            return None;
        }
        Some(EntityRef {
            store: &self.store,
            registry: &self.registry,
            id: entity,
        })
    }

    pub fn entity_mut(&mut self, entity: EntityId) -> Option<EntityMut<'_>> {
        if !self.store.contains(entity) {
            return None;
        }
        Some(EntityMut {
            store: &mut self.store,
            registry: &mut self.registry,
            queries: &mut self.queries,
            id: entity,
        })
    }

    pub fn remove_entity(&mut self, entity: EntityId, force: bool) -> Result<(), EcsError> {
        self.store
            .remove_entity(&mut self.registry, &mut self.queries, entity, force)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.store.contains(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.store.entity_count()
    }

    // -- components ---------------------------------------------------------

    pub fn add_component<T: Component>(&mut self, entity: EntityId) {
        self.store
            .add_component::<T>(&mut self.registry, &mut self.queries, entity, None);
    }

    pub fn add_component_with<T: Component>(&mut self, entity: EntityId, value: T) {
        self.store
            .add_component(&mut self.registry, &mut self.queries, entity, Some(value));
    }

    pub fn remove_component<T: Component>(&mut self, entity: EntityId, force: bool) {
        self.store
            .remove_component::<T>(&mut self.registry, &mut self.queries, entity, force);
    }

    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.store.get_component::<T>(&self.registry, entity)
    }

    /// Mutable component view; notifies every reactive query containing
    /// `entity`.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.store
            .get_component_mut::<T>(&self.registry, &mut self.queries, entity)
    }

    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        self.store.has_component::<T>(&self.registry, entity)
    }

    // -- tags ---------------------------------------------------------------

    pub fn add_tag(&mut self, entity: EntityId, tag: &str) {
        self.store.add_tag(entity, tag);
    }

    pub fn remove_tag(&mut self, entity: EntityId, tag: &str) {
        self.store.remove_tag(entity, tag);
    }

    pub fn has_tag(&self, entity: EntityId, tag: &str) -> bool {
        self.store.has_tag(entity, tag)
    }

    pub fn entities_by_tag(&self, tag: &str) -> &[EntityId] {
        self.store.entities_by_tag(tag)
    }

    // -- tick ---------------------------------------------------------------

    /// Run one tick: every enabled system in priority order (buffers cleared
    /// after each execute), then the deferred-removal flush. A stopped world
    /// ignores the call.
    pub fn tick(&mut self, delta: f32, time: f64) {
        if !self.enabled {
            return;
        }

        let mut entries = self.scheduler.take_entries();
        for entry in entries.iter_mut() {
            if !entry.enabled {
                continue;
            }
            let started = Instant::now();
            let mut ctx = SystemContext {
                store: &mut self.store,
                registry: &mut self.registry,
                queries: &mut self.queries,
                bus: &mut self.bus,
                data: &entry.data,
            };
            entry.system.execute(&mut ctx, delta, time);
            entry.execute_time = started.elapsed();
            entry.data.clear_events();
        }
        self.scheduler.put_entries(entries);

        self.store.process_deferred(&mut self.registry);
    }

    /// Drain the deferred-removal queues without running systems.
    pub fn process_deferred(&mut self) {
        self.store.process_deferred(&mut self.registry);
    }

    /// Stop gating: subsequent `tick` calls are ignored until `play`.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn play(&mut self) {
        self.enabled = true;
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }

    // -- events -------------------------------------------------------------

    /// Emit an application event on the world bus.
    pub fn emit_event(&mut self, topic: &str, payload: serde_json::Value) {
        self.bus.emit(topic, &EventPayload::Message(payload));
    }

    pub fn add_event_listener(&mut self, topic: &str, handler: Handler) {
        self.bus.subscribe(topic, handler);
    }

    pub fn remove_event_listener(&mut self, topic: &str, handler: &Handler) -> bool {
        self.bus.unsubscribe(topic, handler)
    }

    /// Subscribe to the store's lifecycle topics (`EntityCreated`,
    /// `EntityRemoved`, `ComponentAdded`, `ComponentRemove`).
    pub fn add_lifecycle_listener(&mut self, topic: &str, handler: Handler) {
        self.store.events_mut().subscribe(topic, handler);
    }

    pub fn remove_lifecycle_listener(&mut self, topic: &str, handler: &Handler) -> bool {
        self.store.events_mut().unsubscribe(topic, handler)
    }

    // -- stats --------------------------------------------------------------

    /// Snapshot of runtime counters: per-system timing and query keys,
    /// per-query sizes, per-component pool usage, dispatcher counters.
    pub fn stats(&self) -> WorldStats {
        let systems = self
            .scheduler
            .entries()
            .iter()
            .map(|entry| {
                let mut keys: Vec<String> = entry
                    .data
                    .bindings
                    .values()
                    .map(|&id| self.queries.get(id).key().to_owned())
                    .collect();
                keys.sort();
                SystemStats {
                    name: entry.name.clone(),
                    priority: entry.priority,
                    enabled: entry.enabled,
                    execute_time_ms: entry.execute_time.as_secs_f64() * 1000.0,
                    queries: keys,
                }
            })
            .collect();

        let queries = self
            .queries
            .iter()
            .map(|query| {
                (
                    query.key().to_owned(),
                    QueryStats {
                        num_components: query.filter_count(),
                        num_entities: query.entities().len(),
                        reactive: query.is_reactive(),
                    },
                )
            })
            .collect();

        let components = self
            .registry
            .infos()
            .iter()
            .map(|info| {
                let (pool_total, pool_free, pool_used) =
                    self.registry.pool_counters(info.id).unwrap_or((0, 0, 0));
                let name = if info.singleton {
                    ComponentRegistry::singleton_binding(&info.name)
                } else {
                    info.name.clone()
                };
                (
                    name,
                    ComponentStats {
                        pool_total,
                        pool_free,
                        pool_used,
                        live: self.registry.live_count(info.id),
                        singleton: info.singleton,
                    },
                )
            })
            .collect();

        WorldStats {
            num_entities: self.store.entity_count(),
            systems,
            queries,
            components,
            store_events: DispatcherStats {
                fired: self.store.events().fired(),
                handled: self.store.events().handled(),
            },
            world_events: DispatcherStats {
                fired: self.bus.fired(),
                handled: self.bus.handled(),
            },
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.store.entity_count())
            .field("queries", &self.queries.len())
            .field("systems", &self.scheduler.len())
            .field("running", &self.enabled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
