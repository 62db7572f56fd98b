//! Component type registration and metadata.
//!
//! Every component type used by the runtime is interned in a
//! [`ComponentRegistry`], which assigns it a dense [`ComponentTypeId`]. The
//! id indexes the registry's pool, counter, and metadata tables and is the
//! bit position used in [`TypeMask`]s, so query matching is a pair of bitset
//! tests instead of string comparisons. The registered string name survives
//! for query keys, stats, and diagnostics.
//!
//! Registration is lazy: attaching a component (or naming it in a query
//! filter) interns the type on first use.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use bitvec::prelude::*;

use crate::pool::ObjectPool;

/// Maximum number of distinct component types a world can register.
pub const MAX_COMPONENT_TYPES: usize = 128;

/// Fixed-width bitset over registered component types, indexed by
/// [`ComponentTypeId`].
pub type TypeMask = BitArr!(for MAX_COMPONENT_TYPES);

/// `required ⊆ mask`?
pub(crate) fn mask_superset(mask: &TypeMask, required: &TypeMask) -> bool {
    required.iter_ones().all(|bit| mask[bit])
}

/// `forbidden ∩ mask = ∅`?
pub(crate) fn mask_disjoint(mask: &TypeMask, forbidden: &TypeMask) -> bool {
    forbidden.iter_ones().all(|bit| !mask[bit])
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Data attached to entities. Components carry no behavior.
///
/// Instances are recycled through per-type pools, so every acquire restores
/// the instance to a defined initial state by calling [`reset`](Self::reset).
/// The provided implementation assigns `Self::default()`; override it when a
/// cheaper field-wise wipe is available (e.g. to keep heap capacity).
pub trait Component: Default + Send + Sync + 'static {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Type-erased component instance as held by an entity record.
pub(crate) type BoxedComponent = Box<dyn Any + Send + Sync>;

/// Last path segment of a Rust type name, used as the component's public name.
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, dense identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Bit position of this type in a [`TypeMask`].
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    /// Short type name, e.g. `"Position"`.
    pub name: String,
    /// Rust `TypeId` for runtime type checks.
    pub type_id: TypeId,
    /// Whether this type was registered as a world-owned singleton.
    pub singleton: bool,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Type-erased release: downcasts the pool and the instance back to their
/// concrete types and pushes the instance onto the free list. One per
/// registered type, captured at intern time when `T` is still known.
type ReleaseFn = fn(&mut (dyn Any + Send + Sync), BoxedComponent);

/// Type-erased counter read for the stats surface; same capture pattern as
/// [`ReleaseFn`].
type CountersFn = fn(&(dyn Any + Send + Sync)) -> (usize, usize, usize);

fn release_into<T: Component>(pool: &mut (dyn Any + Send + Sync), instance: BoxedComponent) {
    let pool = pool
        .downcast_mut::<ObjectPool<T>>()
        .expect("pool type mismatch on release");
    let instance = instance
        .downcast::<T>()
        .expect("instance type mismatch on release");
    pool.release(instance);
}

fn counters_of<T: Component>(pool: &(dyn Any + Send + Sync)) -> (usize, usize, usize) {
    let pool = pool
        .downcast_ref::<ObjectPool<T>>()
        .expect("pool type mismatch on counter read");
    (pool.total(), pool.free(), pool.used())
}

/// Interns component types and owns one [`ObjectPool`] per type, the
/// per-type live-instance counters, and the world-owned singleton instances.
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Indexed by `ComponentTypeId.0`, as are the tables below.
    infos: Vec<ComponentInfo>,
    /// Pools are created on first acquire, not at intern time.
    pools: Vec<Option<Box<dyn Any + Send + Sync>>>,
    releases: Vec<ReleaseFn>,
    counters: Vec<CountersFn>,
    live: Vec<usize>,
    singletons: HashMap<ComponentTypeId, BoxedComponent>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            infos: Vec::new(),
            pools: Vec::new(),
            releases: Vec::new(),
            counters: Vec::new(),
            live: Vec::new(),
            singletons: HashMap::new(),
        }
    }

    /// Register `T` if it is unknown and return its id.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_COMPONENT_TYPES`] distinct types are
    /// registered in one world.
    pub fn intern<T: Component>(&mut self) -> ComponentTypeId {
        let rust_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_id) {
            return existing;
        }
        assert!(
            self.infos.len() < MAX_COMPONENT_TYPES,
            "component type limit ({MAX_COMPONENT_TYPES}) reached"
        );
        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: short_type_name::<T>().to_owned(),
            type_id: rust_id,
            singleton: false,
        });
        self.pools.push(None);
        self.releases.push(release_into::<T>);
        self.counters.push(counters_of::<T>);
        self.live.push(0);
        self.by_type.insert(rust_id, id);
        id
    }

    /// Look up a registered type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered type id.
    pub fn info(&self, id: ComponentTypeId) -> &ComponentInfo {
        &self.infos[id.index()]
    }

    /// All registered types, in registration order.
    pub fn infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    // -- pooled instances ---------------------------------------------------

    /// Take a reset instance of `T` out of its pool, creating the pool on
    /// first use.
    pub(crate) fn acquire<T: Component>(&mut self, id: ComponentTypeId) -> Box<T> {
        let slot = &mut self.pools[id.index()];
        let pool = slot.get_or_insert_with(|| {
            Box::new(ObjectPool::<T>::new(T::default, <T as Component>::reset))
        });
        pool.downcast_mut::<ObjectPool<T>>()
            .expect("pool type mismatch on acquire")
            .acquire()
    }

    /// Return a detached instance to its pool and drop the live count.
    pub(crate) fn release(&mut self, id: ComponentTypeId, instance: BoxedComponent) {
        let idx = id.index();
        if let Some(pool) = self.pools[idx].as_deref_mut() {
            (self.releases[idx])(pool, instance);
        }
        self.live[idx] = self.live[idx].saturating_sub(1);
    }

    /// Counter maintenance when a component is attached to an entity.
    pub(crate) fn on_attached(&mut self, id: ComponentTypeId) {
        self.live[id.index()] += 1;
    }

    /// Number of instances of `id` currently attached to entities (including
    /// instances queued for deferred detachment).
    pub fn live_count(&self, id: ComponentTypeId) -> usize {
        self.live[id.index()]
    }

    /// `(total, free, used)` of the type's pool, if one has been created.
    pub fn pool_counters(&self, id: ComponentTypeId) -> Option<(usize, usize, usize)> {
        let pool = self.pools[id.index()].as_deref()?;
        Some((self.counters[id.index()])(pool))
    }

    // -- singletons ---------------------------------------------------------

    /// Register `T` as a world-owned singleton and create its lone instance.
    /// Idempotent.
    pub fn register_singleton<T: Component>(&mut self) -> ComponentTypeId {
        let id = self.intern::<T>();
        self.infos[id.index()].singleton = true;
        self.singletons
            .entry(id)
            .or_insert_with(|| Box::new(T::default()));
        id
    }

    /// Immutable access to the singleton instance of `T`.
    pub fn singleton<T: Component>(&self) -> Option<&T> {
        let id = self.lookup::<T>()?;
        self.singletons.get(&id)?.downcast_ref::<T>()
    }

    /// Mutable access to the singleton instance of `T`.
    ///
    /// Singletons belong to no entity and no query, so this path emits no
    /// change events.
    pub fn singleton_mut<T: Component>(&mut self) -> Option<&mut T> {
        let id = self.lookup::<T>()?;
        self.singletons.get_mut(&id)?.downcast_mut::<T>()
    }

    /// The stable lookup name a singleton is exposed under: the type name
    /// with its first letter lowercased.
    pub fn singleton_binding(name: &str) -> String {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.infos.len())
            .field("singletons", &self.singletons.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    #[derive(Debug, Default, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }
    impl Component for Vel {}

    #[test]
    fn intern_is_idempotent() {
        let mut reg = ComponentRegistry::new();
        let a = reg.intern::<Pos>();
        let b = reg.intern::<Pos>();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let mut reg = ComponentRegistry::new();
        let p = reg.intern::<Pos>();
        let v = reg.intern::<Vel>();
        assert_ne!(p, v);
        assert_eq!(reg.info(p).name, "Pos");
        assert_eq!(reg.info(v).name, "Vel");
    }

    #[test]
    fn lookup_unregistered_is_none() {
        let reg = ComponentRegistry::new();
        assert_eq!(reg.lookup::<Pos>(), None);
    }

    #[test]
    fn acquire_release_round_trip() {
        let mut reg = ComponentRegistry::new();
        let id = reg.intern::<Pos>();
        let mut instance = reg.acquire::<Pos>(id);
        instance.x = 3.0;
        reg.on_attached(id);
        assert_eq!(reg.live_count(id), 1);

        reg.release(id, instance);
        assert_eq!(reg.live_count(id), 0);

        // Recycled instance comes back reset.
        let instance = reg.acquire::<Pos>(id);
        assert_eq!(*instance, Pos::default());
    }

    #[test]
    fn pool_counters_surface() {
        let mut reg = ComponentRegistry::new();
        let id = reg.intern::<Pos>();
        assert_eq!(reg.pool_counters(id), None, "no pool before first acquire");

        let a = reg.acquire::<Pos>(id);
        let _b = reg.acquire::<Pos>(id);
        let (total, free, used) = reg.pool_counters(id).unwrap();
        assert_eq!(used, 2);
        assert_eq!(total, free + used);

        reg.release(id, a);
        let (_, _, used) = reg.pool_counters(id).unwrap();
        assert_eq!(used, 1);
    }

    #[test]
    fn singleton_lifecycle() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register_singleton::<Pos>();
        assert!(reg.info(id).singleton);

        reg.singleton_mut::<Pos>().unwrap().x = 5.0;
        assert_eq!(reg.singleton::<Pos>().unwrap().x, 5.0);

        // Re-registration keeps the existing instance.
        reg.register_singleton::<Pos>();
        assert_eq!(reg.singleton::<Pos>().unwrap().x, 5.0);
    }

    #[test]
    fn singleton_binding_lowercases_first_letter() {
        assert_eq!(ComponentRegistry::singleton_binding("GameState"), "gameState");
        assert_eq!(ComponentRegistry::singleton_binding("hud"), "hud");
        assert_eq!(ComponentRegistry::singleton_binding(""), "");
    }

    #[test]
    fn mask_tests() {
        let mut owned = TypeMask::ZERO;
        owned.set(0, true);
        owned.set(3, true);

        let mut required = TypeMask::ZERO;
        required.set(0, true);
        assert!(mask_superset(&owned, &required));
        required.set(5, true);
        assert!(!mask_superset(&owned, &required));

        let mut forbidden = TypeMask::ZERO;
        forbidden.set(7, true);
        assert!(mask_disjoint(&owned, &forbidden));
        forbidden.set(3, true);
        assert!(!mask_disjoint(&owned, &forbidden));
    }
}
