//! Queries and the query index.
//!
//! A query is a compiled predicate over component ownership: the entity must
//! own every *required* type and none of the *forbidden* ones. Queries are
//! interned by canonical key, hold a live entity list in insertion order,
//! and carry a local dispatcher whose topics announce membership changes and
//! (for reactive queries) component mutations.
//!
//! The index is maintained incrementally: every store mutation calls one of
//! the `on_*` hooks below before control returns to the caller, so a query's
//! entity list is always exact at any observable point.

use std::collections::HashMap;
use std::fmt;

use crate::component::{mask_disjoint, mask_superset, ComponentTypeId, TypeMask};
use crate::entity::EntityId;
use crate::event::{EventDispatcher, EventPayload};
use crate::store::EntityStore;
use crate::EcsError;

/// Topic fired when an entity starts matching a query.
pub const QUERY_ENTITY_ADDED: &str = "EntityAdded";
/// Topic fired when an entity stops matching a query.
pub const QUERY_ENTITY_REMOVED: &str = "EntityRemoved";
/// Topic fired when a member entity's component is mutably borrowed.
/// Only reactive queries emit it.
pub const QUERY_COMPONENT_CHANGED: &str = "ComponentChanged";

// ---------------------------------------------------------------------------
// QueryId and resolved filters
// ---------------------------------------------------------------------------

/// Dense handle to an interned query.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) u32);

impl QueryId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.0)
    }
}

/// A filter term with its component type already interned.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedFilter {
    pub id: ComponentTypeId,
    pub negated: bool,
    /// Canonical token: lowercased type name, `!`-prefixed when negated.
    pub token: String,
}

impl ResolvedFilter {
    pub fn new(id: ComponentTypeId, negated: bool, name: &str) -> Self {
        let mut token = String::with_capacity(name.len() + 1);
        if negated {
            token.push('!');
        }
        token.push_str(&name.to_lowercase());
        Self { id, negated, token }
    }
}

/// Canonical key for a filter list: sorted tokens joined with `-`.
/// Permutations of the same filters produce the same key.
pub(crate) fn query_key(filters: &[ResolvedFilter]) -> String {
    let mut tokens: Vec<&str> = filters.iter().map(|f| f.token.as_str()).collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join("-")
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// An interned predicate plus its matching entity set and event topics.
pub struct Query {
    key: String,
    required: TypeMask,
    forbidden: TypeMask,
    /// Number of distinct filter terms, for the stats surface.
    filter_count: usize,
    /// Matching entities, insertion order.
    entities: Vec<EntityId>,
    /// True once any subscriber observes component mutations.
    reactive: bool,
    pub(crate) dispatcher: EventDispatcher,
}

impl Query {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The live entity list, in the order entities started matching.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn is_reactive(&self) -> bool {
        self.reactive
    }

    pub(crate) fn filter_count(&self) -> usize {
        self.filter_count
    }

    /// Does an entity with this component mask match?
    pub(crate) fn matches(&self, mask: &TypeMask) -> bool {
        mask_superset(mask, &self.required) && mask_disjoint(mask, &self.forbidden)
    }

    fn admit(&mut self, entity: EntityId) {
        self.entities.push(entity);
        self.dispatcher
            .emit(QUERY_ENTITY_ADDED, &EventPayload::Entity(entity));
    }

    fn expel(&mut self, entity: EntityId) {
        if let Some(pos) = self.entities.iter().position(|e| *e == entity) {
            self.entities.remove(pos);
        }
        self.dispatcher
            .emit(QUERY_ENTITY_REMOVED, &EventPayload::Entity(entity));
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("entities", &self.entities.len())
            .field("reactive", &self.reactive)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QueryIndex
// ---------------------------------------------------------------------------

/// All queries of a world, interned by canonical key.
#[derive(Debug, Default)]
pub struct QueryIndex {
    queries: Vec<Query>,
    by_key: HashMap<String, QueryId>,
}

impl QueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: QueryId) -> &Query {
        &self.queries[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: QueryId) -> &mut Query {
        &mut self.queries[id.index()]
    }

    pub fn by_key(&self, key: &str) -> Option<QueryId> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Query> {
        self.queries.iter()
    }

    /// Intern a query for the given filters, scanning the store's current
    /// entities for initial membership. Two filter lists with the same
    /// canonical key share one query. Initial membership is silent: no
    /// `EntityAdded` fires during construction.
    pub(crate) fn get_or_create(
        &mut self,
        filters: &[ResolvedFilter],
        store: &mut EntityStore,
    ) -> Result<QueryId, EcsError> {
        if !filters.iter().any(|f| !f.negated) {
            return Err(EcsError::EmptyQuery);
        }
        let key = query_key(filters);
        if let Some(&existing) = self.by_key.get(&key) {
            return Ok(existing);
        }

        let mut required = TypeMask::ZERO;
        let mut forbidden = TypeMask::ZERO;
        for filter in filters {
            if filter.negated {
                forbidden.set(filter.id.index(), true);
            } else {
                required.set(filter.id.index(), true);
            }
        }

        let id = QueryId(self.queries.len() as u32);
        let mut query = Query {
            key: key.clone(),
            required,
            forbidden,
            filter_count: required.count_ones() + forbidden.count_ones(),
            entities: Vec::new(),
            reactive: false,
            dispatcher: EventDispatcher::new(),
        };

        // One pass over the live entity list, in store order.
        for &entity in &store.entities {
            let Some(record) = store.records.get_mut(&entity) else {
                continue;
            };
            if record.pending_destroy {
                continue;
            }
            if query.matches(&record.mask) {
                query.entities.push(entity);
                record.queries.push(id);
            }
        }

        self.queries.push(query);
        self.by_key.insert(key, id);
        Ok(id)
    }

    /// Mark a query reactive; from now on it emits `ComponentChanged`.
    pub(crate) fn make_reactive(&mut self, id: QueryId) {
        self.queries[id.index()].reactive = true;
    }

    // -- membership maintenance ---------------------------------------------
    //
    // `entity_queries` is the entity's back-reference list; it is the
    // authority on membership, so containment checks are O(queries held by
    // this entity) rather than a scan of the query's entity list.

    /// A component of type `added` was attached; `mask` already contains it.
    pub(crate) fn on_component_added(
        &mut self,
        entity: EntityId,
        mask: &TypeMask,
        entity_queries: &mut Vec<QueryId>,
        added: ComponentTypeId,
    ) {
        let bit = added.index();
        for (idx, query) in self.queries.iter_mut().enumerate() {
            let id = QueryId(idx as u32);
            if query.forbidden[bit] {
                if let Some(pos) = entity_queries.iter().position(|q| *q == id) {
                    entity_queries.remove(pos);
                    query.expel(entity);
                }
            } else if query.required[bit] && !entity_queries.contains(&id) && query.matches(mask) {
                entity_queries.push(id);
                query.admit(entity);
            }
        }
    }

    /// A component of type `removed` is about to be detached; `mask` still
    /// contains it, so negated matching evaluates the post-removal mask.
    pub(crate) fn on_component_removed(
        &mut self,
        entity: EntityId,
        mask: &TypeMask,
        entity_queries: &mut Vec<QueryId>,
        removed: ComponentTypeId,
    ) {
        let bit = removed.index();
        let mut future = *mask;
        future.set(bit, false);
        for (idx, query) in self.queries.iter_mut().enumerate() {
            let id = QueryId(idx as u32);
            if query.forbidden[bit] {
                if !entity_queries.contains(&id) && query.matches(&future) {
                    entity_queries.push(id);
                    query.admit(entity);
                }
            } else if query.required[bit] {
                if let Some(pos) = entity_queries.iter().position(|q| *q == id) {
                    entity_queries.remove(pos);
                    query.expel(entity);
                }
            }
        }
    }

    /// The entity is leaving the world: drop it from every query it is in.
    pub(crate) fn on_entity_removed(&mut self, entity: EntityId, entity_queries: &mut Vec<QueryId>) {
        for id in entity_queries.drain(..) {
            self.queries[id.index()].expel(entity);
        }
    }

    /// A member entity's component was mutably borrowed; notify reactive
    /// queries that contain it.
    pub(crate) fn on_component_changed(
        &mut self,
        entity: EntityId,
        component: ComponentTypeId,
        entity_queries: &[QueryId],
    ) {
        for &id in entity_queries {
            let query = &mut self.queries[id.index()];
            if query.reactive {
                query.dispatcher.emit(
                    QUERY_COMPONENT_CHANGED,
                    &EventPayload::Component { entity, component },
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
