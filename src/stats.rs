//! The serializable stats tree returned by
//! [`World::stats`](crate::world::World::stats).

use std::collections::BTreeMap;

use serde::Serialize;

/// Snapshot of runtime counters across the world.
#[derive(Debug, Clone, Serialize)]
pub struct WorldStats {
    /// Number of entities in the store, deferred removals included.
    pub num_entities: usize,
    /// Per-system counters, in execution order.
    pub systems: Vec<SystemStats>,
    /// Per-query counters, keyed by canonical query key.
    pub queries: BTreeMap<String, QueryStats>,
    /// Per-component-type counters, keyed by type name (singletons under
    /// their first-letter-lowercased binding name).
    pub components: BTreeMap<String, ComponentStats>,
    /// Counters of the store's lifecycle dispatcher.
    pub store_events: DispatcherStats,
    /// Counters of the world event bus.
    pub world_events: DispatcherStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    /// Wall-clock duration of the last execute, in milliseconds.
    pub execute_time_ms: f64,
    /// Canonical keys of the queries the system consumes.
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    /// Number of filter terms (required + forbidden).
    pub num_components: usize,
    /// Current number of matching entities.
    pub num_entities: usize,
    pub reactive: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ComponentStats {
    pub pool_total: usize,
    pub pool_free: usize,
    pub pool_used: usize,
    /// Instances currently attached to entities.
    pub live: usize,
    pub singleton: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatcherStats {
    pub fired: u64,
    pub handled: u64,
}
