//! Systems: per-tick behavior over queries and event buffers.
//!
//! A system declares what it consumes by returning a [`SystemConfig`] from
//! `init`: named queries (component filter lists built with [`comp`] and
//! [`not`]), per-query event subscriptions, and world-bus subscriptions. The
//! runtime resolves the config at registration time and hands the system a
//! [`SystemContext`] each tick through which it reads its queries and
//! buffers and mutates the world.
//!
//! Event buffers accumulate between this system's executes and are cleared
//! by the scheduler immediately after each execute returns. Entity-keyed
//! buffers deduplicate within that window; component-filtered
//! `ComponentChanged` buffers are change-logs and do not.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::component::{Component, ComponentRegistry, ComponentTypeId, TypeMask};
use crate::entity::{EntityId, EntityMut, EntityRef};
use crate::event::{EventDispatcher, EventPayload, Handler};
use crate::query::{QueryId, QueryIndex};
use crate::store::EntityStore;
use crate::EcsError;

// ---------------------------------------------------------------------------
// System trait
// ---------------------------------------------------------------------------

/// Per-tick behavior. Implementations are registered with
/// [`World::register_system`](crate::world::World::register_system).
pub trait System: 'static {
    /// Called once at registration; declares consumed queries and events.
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new()
    }

    /// Called once per tick while the system is enabled.
    fn execute(&mut self, ctx: &mut SystemContext<'_>, delta: f32, time: f64);
}

// ---------------------------------------------------------------------------
// Config grammar
// ---------------------------------------------------------------------------

/// One term of a query filter list. Carries a registration thunk so the
/// component type is interned when the config is resolved.
#[derive(Clone, Copy)]
pub struct ComponentFilter {
    pub(crate) negated: bool,
    pub(crate) intern: fn(&mut ComponentRegistry) -> ComponentTypeId,
}

/// Filter term requiring the component type `T`.
pub fn comp<T: Component>() -> ComponentFilter {
    ComponentFilter {
        negated: false,
        intern: ComponentRegistry::intern::<T>,
    }
}

/// Filter term forbidding the component type `T` (the `Not` sentinel).
pub fn not<T: Component>() -> ComponentFilter {
    ComponentFilter {
        negated: true,
        intern: ComponentRegistry::intern::<T>,
    }
}

/// Which per-query topic a buffer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEventKind {
    /// Entity started matching the query.
    EntityAdded,
    /// Entity stopped matching the query.
    EntityRemoved,
    /// A member entity was mutated (entity-keyed, deduplicated). Marks the
    /// query reactive.
    EntityChanged,
    /// A member entity was mutated (component change-log, not deduplicated
    /// when a component filter is given). Marks the query reactive.
    ComponentChanged,
}

/// A named event buffer on one query.
pub struct QueryEventConfig {
    pub name: String,
    pub kind: QueryEventKind,
    /// For `ComponentChanged`: restrict the log to these component types.
    pub components: Vec<ComponentFilter>,
}

/// A named query and its event buffers.
pub struct QueryConfig {
    pub name: String,
    pub components: Vec<ComponentFilter>,
    pub events: Vec<QueryEventConfig>,
}

impl QueryConfig {
    pub fn new(name: &str, components: Vec<ComponentFilter>) -> Self {
        Self {
            name: name.to_owned(),
            components,
            events: Vec::new(),
        }
    }

    /// Subscribe a buffer named `name` to a membership or change topic.
    pub fn event(mut self, name: &str, kind: QueryEventKind) -> Self {
        self.events.push(QueryEventConfig {
            name: name.to_owned(),
            kind,
            components: Vec::new(),
        });
        self
    }

    /// Subscribe a `ComponentChanged` change-log buffer restricted to the
    /// given component types.
    pub fn component_event(mut self, name: &str, components: Vec<ComponentFilter>) -> Self {
        self.events.push(QueryEventConfig {
            name: name.to_owned(),
            kind: QueryEventKind::ComponentChanged,
            components,
        });
        self
    }
}

/// A named buffer fed from a world-bus topic.
pub struct WorldEventConfig {
    pub name: String,
    pub topic: String,
}

/// Everything a system consumes, declared from `init`.
#[derive(Default)]
pub struct SystemConfig {
    pub queries: Vec<QueryConfig>,
    pub events: Vec<WorldEventConfig>,
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: QueryConfig) -> Self {
        self.queries.push(query);
        self
    }

    /// Buffer world-bus events from `topic` under `name`.
    pub fn world_event(mut self, name: &str, topic: &str) -> Self {
        self.events.push(WorldEventConfig {
            name: name.to_owned(),
            topic: topic.to_owned(),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Event buffers
// ---------------------------------------------------------------------------

/// A per-system, per-tick event buffer. Cleared (length to zero, capacity
/// kept) by the scheduler after the owning system's execute.
pub(crate) enum EventLog {
    /// Entity-keyed, deduplicated within the tick.
    Entities {
        list: Vec<EntityId>,
        seen: HashSet<EntityId>,
    },
    /// Component change-log; repeated mutations repeat.
    Components {
        list: Vec<(EntityId, ComponentTypeId)>,
    },
    /// World-bus payloads, in emission order.
    Messages { list: Vec<serde_json::Value> },
}

impl EventLog {
    pub fn entities() -> Self {
        EventLog::Entities {
            list: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn components() -> Self {
        EventLog::Components { list: Vec::new() }
    }

    pub fn messages() -> Self {
        EventLog::Messages { list: Vec::new() }
    }

    pub fn push_entity(&mut self, entity: EntityId) {
        if let EventLog::Entities { list, seen } = self {
            if seen.insert(entity) {
                list.push(entity);
            }
        }
    }

    pub fn push_component(&mut self, entity: EntityId, component: ComponentTypeId) {
        if let EventLog::Components { list } = self {
            list.push((entity, component));
        }
    }

    pub fn push_message(&mut self, value: serde_json::Value) {
        if let EventLog::Messages { list } = self {
            list.push(value);
        }
    }

    pub fn clear(&mut self) {
        match self {
            EventLog::Entities { list, seen } => {
                list.clear();
                seen.clear();
            }
            EventLog::Components { list } => list.clear(),
            EventLog::Messages { list } => list.clear(),
        }
    }
}

pub(crate) type EventBufferHandle = Rc<RefCell<EventLog>>;

/// Handler feeding an entity-keyed buffer. Accepts both entity payloads
/// (membership topics) and component payloads (`EntityChanged`), keying by
/// entity either way.
pub(crate) fn entity_buffer_handler(buffer: EventBufferHandle) -> Handler {
    Rc::new(move |payload| {
        match payload {
            EventPayload::Entity(entity) => buffer.borrow_mut().push_entity(*entity),
            EventPayload::Component { entity, .. } => buffer.borrow_mut().push_entity(*entity),
            EventPayload::Message(_) => {}
        }
        Ok(())
    })
}

/// Handler feeding a component change-log, restricted to `filter`.
pub(crate) fn component_buffer_handler(buffer: EventBufferHandle, filter: TypeMask) -> Handler {
    Rc::new(move |payload| {
        if let EventPayload::Component { entity, component } = payload {
            if filter[component.index()] {
                buffer.borrow_mut().push_component(*entity, *component);
            }
        }
        Ok(())
    })
}

/// Handler feeding a world-bus message buffer.
pub(crate) fn message_buffer_handler(buffer: EventBufferHandle) -> Handler {
    Rc::new(move |payload| {
        if let EventPayload::Message(value) = payload {
            buffer.borrow_mut().push_message(value.clone());
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// SystemData
// ---------------------------------------------------------------------------

/// Where a subscription was placed, so it can be undone on system removal.
pub(crate) enum SubscriptionTarget {
    Query(QueryId),
    WorldBus,
}

pub(crate) struct Subscription {
    pub target: SubscriptionTarget,
    pub topic: String,
    pub handler: Handler,
}

/// Runtime state the scheduler keeps per registered system: resolved query
/// bindings, event buffers, and the subscriptions feeding them.
#[derive(Default)]
pub(crate) struct SystemData {
    /// Query name -> interned query.
    pub bindings: HashMap<String, QueryId>,
    /// Query name -> buffer name -> buffer.
    pub query_buffers: HashMap<String, HashMap<String, EventBufferHandle>>,
    /// World-event name -> buffer.
    pub world_buffers: HashMap<String, EventBufferHandle>,
    pub subscriptions: Vec<Subscription>,
}

impl SystemData {
    /// Reset every buffer to length zero, keeping capacity.
    pub fn clear_events(&self) {
        for buffers in self.query_buffers.values() {
            for buffer in buffers.values() {
                buffer.borrow_mut().clear();
            }
        }
        for buffer in self.world_buffers.values() {
            buffer.borrow_mut().clear();
        }
    }
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// The world surface a system sees during `execute`.
///
/// Query and buffer reads return owned snapshots so the system may mutate
/// the world while iterating them; re-reading observes the system's own
/// mutations, and entity lists stay live between systems within a tick.
pub struct SystemContext<'w> {
    pub(crate) store: &'w mut EntityStore,
    pub(crate) registry: &'w mut ComponentRegistry,
    pub(crate) queries: &'w mut QueryIndex,
    pub(crate) bus: &'w mut EventDispatcher,
    pub(crate) data: &'w SystemData,
}

impl<'w> SystemContext<'w> {
    // -- query and buffer reads ---------------------------------------------

    /// Current entities of the named query, in membership order.
    pub fn entities(&self, query: &str) -> Vec<EntityId> {
        self.data
            .bindings
            .get(query)
            .map(|&id| self.queries.get(id).entities().to_vec())
            .unwrap_or_default()
    }

    /// Drain-view of an entity-keyed event buffer (`EntityAdded`,
    /// `EntityRemoved`, `EntityChanged`).
    pub fn entity_events(&self, query: &str, buffer: &str) -> Vec<EntityId> {
        match self.query_buffer(query, buffer) {
            Some(handle) => match &*handle.borrow() {
                EventLog::Entities { list, .. } => list.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Drain-view of a component change-log buffer.
    pub fn component_events(&self, query: &str, buffer: &str) -> Vec<(EntityId, ComponentTypeId)> {
        match self.query_buffer(query, buffer) {
            Some(handle) => match &*handle.borrow() {
                EventLog::Components { list } => list.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Drain-view of a world-event buffer.
    pub fn messages(&self, name: &str) -> Vec<serde_json::Value> {
        match self.data.world_buffers.get(name) {
            Some(handle) => match &*handle.borrow() {
                EventLog::Messages { list } => list.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn query_buffer(&self, query: &str, buffer: &str) -> Option<&EventBufferHandle> {
        self.data.query_buffers.get(query)?.get(buffer)
    }

    // -- entity lifecycle ---------------------------------------------------

    pub fn create_entity(&mut self) -> EntityId {
        self.store.create_entity()
    }

    /// Remove an entity; deferred to end of tick unless `force`.
    pub fn remove_entity(&mut self, entity: EntityId, force: bool) -> Result<(), EcsError> {
        self.store
            .remove_entity(self.registry, self.queries, entity, force)
    }

    pub fn entity(&self, entity: EntityId) -> Option<EntityRef<'_>> {
        if !self.store.contains(entity) {
            return None;
        }
        Some(EntityRef {
            store: &*self.store,
            registry: &*self.registry,
            id: entity,
        })
    }

    pub fn entity_mut(&mut self, entity: EntityId) -> Option<EntityMut<'_>> {
        if !self.store.contains(entity) {
            return None;
        }
        Some(EntityMut {
            store: &mut *self.store,
            registry: &mut *self.registry,
            queries: &mut *self.queries,
            id: entity,
        })
    }

    // -- components ---------------------------------------------------------

    /// Attach a pool-fresh (default-valued) `T` to `entity`.
    pub fn add_component<T: Component>(&mut self, entity: EntityId) {
        self.store
            .add_component::<T>(self.registry, self.queries, entity, None);
    }

    /// Attach `T` initialized from `value`.
    pub fn add_component_with<T: Component>(&mut self, entity: EntityId, value: T) {
        self.store
            .add_component(self.registry, self.queries, entity, Some(value));
    }

    pub fn remove_component<T: Component>(&mut self, entity: EntityId, force: bool) {
        self.store
            .remove_component::<T>(self.registry, self.queries, entity, force);
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.store.get_component::<T>(self.registry, entity)
    }

    /// Mutable component view; notifies reactive queries containing `entity`.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.store
            .get_component_mut::<T>(self.registry, self.queries, entity)
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.store.has_component::<T>(self.registry, entity)
    }

    /// Registered id of `T`, for matching change-log entries.
    pub fn component_type_id<T: Component>(&mut self) -> ComponentTypeId {
        self.registry.intern::<T>()
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

    pub fn entities_by_tag(&self, tag: &str) -> Vec<EntityId> {
        self.store.entities_by_tag(tag).to_vec()
    }

    // -- singletons and the world bus ---------------------------------------

    pub fn singleton<T: Component>(&self) -> Option<&T> {
        self.registry.singleton::<T>()
    }

    pub fn singleton_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.registry.singleton_mut::<T>()
    }

    /// Emit an application event on the world bus. Subscribed systems see it
    /// in their buffers; listeners run synchronously.
    pub fn emit(&mut self, topic: &str, payload: serde_json::Value) {
        self.bus.emit(topic, &EventPayload::Message(payload));
    }

    pub fn entity_count(&self) -> usize {
        self.store.entity_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn e(raw: u64) -> EntityId {
        EntityId::new(raw)
    }

    #[test]
    fn entity_log_dedups_within_window() {
        let mut log = EventLog::entities();
        log.push_entity(e(1));
        log.push_entity(e(2));
        log.push_entity(e(1));
        match &log {
            EventLog::Entities { list, .. } => assert_eq!(list, &[e(1), e(2)]),
            _ => unreachable!(),
        }

        // Clearing opens a new window; the same entity records again.
        log.clear();
        log.push_entity(e(1));
        match &log {
            EventLog::Entities { list, .. } => assert_eq!(list, &[e(1)]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn component_log_keeps_repeats() {
        let mut log = EventLog::components();
        let c = ComponentTypeId(0);
        log.push_component(e(1), c);
        log.push_component(e(1), c);
        match &log {
            EventLog::Components { list } => assert_eq!(list.len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn component_handler_respects_filter() {
        let buffer = Rc::new(RefCell::new(EventLog::components()));
        let mut filter = TypeMask::ZERO;
        filter.set(1, true);
        let handler = component_buffer_handler(buffer.clone(), filter);

        handler(&EventPayload::Component {
            entity: e(1),
            component: ComponentTypeId(0),
        })
        .unwrap();
        handler(&EventPayload::Component {
            entity: e(1),
            component: ComponentTypeId(1),
        })
        .unwrap();

        match &*buffer.borrow() {
            EventLog::Components { list } => {
                assert_eq!(list, &[(e(1), ComponentTypeId(1))]);
            }
            _ => unreachable!(),
        };
    }

    #[test]
    fn entity_handler_accepts_both_payload_shapes() {
        let buffer = Rc::new(RefCell::new(EventLog::entities()));
        let handler = entity_buffer_handler(buffer.clone());

        handler(&EventPayload::Entity(e(1))).unwrap();
        handler(&EventPayload::Component {
            entity: e(2),
            component: ComponentTypeId(0),
        })
        .unwrap();

        match &*buffer.borrow() {
            EventLog::Entities { list, .. } => assert_eq!(list, &[e(1), e(2)]),
            _ => unreachable!(),
        };
    }

    #[test]
    fn config_builder_collects_sections() {
        #[derive(Debug, Default)]
        struct Pos;
        impl Component for Pos {}

        let config = SystemConfig::new()
            .query(
                QueryConfig::new("moving", vec![comp::<Pos>()])
                    .event("appeared", QueryEventKind::EntityAdded)
                    .component_event("edits", vec![comp::<Pos>()]),
            )
            .world_event("collisions", "collision");

        assert_eq!(config.queries.len(), 1);
        assert_eq!(config.queries[0].events.len(), 2);
        assert_eq!(config.events[0].topic, "collision");
    }
}
