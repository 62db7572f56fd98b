//! Reflex ECS -- reactive entity-component-system runtime.
//!
//! Entities are identity handles carrying typed components drawn from
//! per-type object pools. Queries (`required ∧ ¬forbidden` over component
//! ownership) are interned by canonical signature and maintained
//! incrementally on every mutation, so their entity lists are exact at any
//! observable point. Systems run single-threaded in priority order each
//! tick, consuming live query lists and per-tick event buffers fed by the
//! store's reactive plumbing; entity and component destruction requested
//! during a tick is deferred until every system has run.
//!
//! # Quick Start
//!
//! ```
//! use reflex_ecs::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Default)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! struct Movement;
//!
//! impl System for Movement {
//!     fn init(&mut self) -> SystemConfig {
//!         SystemConfig::new().query(QueryConfig::new(
//!             "moving",
//!             vec![comp::<Position>(), comp::<Velocity>()],
//!         ))
//!     }
//!
//!     fn execute(&mut self, ctx: &mut SystemContext<'_>, delta: f32, _time: f64) {
//!         for entity in ctx.entities("moving") {
//!             let vel = ctx.get::<Velocity>(entity).unwrap();
//!             let (dx, dy) = (vel.dx, vel.dy);
//!             let pos = ctx.get_mut::<Position>(entity).unwrap();
//!             pos.x += dx * delta;
//!             pos.y += dy * delta;
//!         }
//!     }
//! }
//!
//! let mut world = World::new();
//! let entity = world.create_entity();
//! world.add_component_with(entity, Position { x: 0.0, y: 0.0 });
//! world.add_component_with(entity, Velocity { dx: 1.0, dy: 2.0 });
//! world.register_system(Movement, SystemAttrs::default()).unwrap();
//!
//! world.tick(1.0, 0.0);
//! assert_eq!(world.get_component::<Position>(entity).unwrap().x, 1.0);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod event;
pub mod pool;
pub mod query;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod system;
pub mod world;

use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A query was declared with zero required (non-negated) component types.
    #[error("query needs at least one required (non-negated) component type")]
    EmptyQuery,

    /// `remove_entity` was called for an entity that is not in the store.
    #[error("entity {0} is not in the store")]
    UnknownEntity(EntityId),

    /// A system of this type is already registered.
    #[error("system type '{0}' is already registered")]
    DuplicateSystem(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentRegistry, ComponentTypeId, MAX_COMPONENT_TYPES};
    pub use crate::entity::{EntityId, EntityMut, EntityRef};
    pub use crate::event::{EventDispatcher, EventPayload, Handler};
    pub use crate::pool::ObjectPool;
    pub use crate::query::{Query, QueryId};
    pub use crate::scheduler::{Scheduler, SystemAttrs};
    pub use crate::stats::WorldStats;
    pub use crate::store::EntityStore;
    pub use crate::system::{
        comp, not, QueryConfig, QueryEventKind, System, SystemConfig, SystemContext,
    };
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    // -- test component types -----------------------------------------------

    #[derive(Debug, Default, PartialEq)]
    struct A {
        value: u32,
    }
    impl Component for A {}

    #[derive(Debug, Default, PartialEq)]
    struct B;
    impl Component for B {}

    #[derive(Debug, Default, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {
        fn reset(&mut self) {
            self.x = 0.0;
            self.y = 0.0;
        }
    }

    // -- basic membership ---------------------------------------------------

    #[test]
    fn query_tracks_required_components() {
        let mut world = World::new();
        let e1 = world.create_entity();
        world.add_component::<A>(e1);
        world.add_component::<B>(e1);

        let q = world.register_query(&[comp::<A>()]).unwrap();
        assert_eq!(world.query_entities(q), &[e1]);

        world.remove_component::<A>(e1, true);
        assert_eq!(world.query_entities(q), &[] as &[EntityId]);
    }

    #[test]
    fn negated_query_reacts_to_both_directions() {
        let mut world = World::new();
        let q = world.register_query(&[comp::<A>(), not::<B>()]).unwrap();

        let e1 = world.create_entity();
        world.add_component::<A>(e1);
        assert_eq!(world.query_entities(q), &[e1]);

        world.add_component::<B>(e1);
        assert_eq!(world.query_entities(q), &[] as &[EntityId]);

        world.remove_component::<B>(e1, true);
        assert_eq!(world.query_entities(q), &[e1]);
    }

    #[test]
    fn permuted_filters_share_one_query() {
        let mut world = World::new();
        let q1 = world.register_query(&[comp::<A>(), not::<B>()]).unwrap();
        let q2 = world.register_query(&[not::<B>(), comp::<A>()]).unwrap();
        assert_eq!(q1, q2);
        assert_eq!(world.query_key(q1), "!b-a");
    }

    #[test]
    fn query_without_required_types_fails() {
        let mut world = World::new();
        assert!(matches!(
            world.register_query(&[not::<B>()]),
            Err(EcsError::EmptyQuery)
        ));
    }

    // -- pooling ------------------------------------------------------------

    #[test]
    fn recycled_component_instances_come_back_reset() {
        let mut world = World::new();
        let e1 = world.create_entity();
        world.add_component_with(e1, Pos { x: 3.0, y: 4.0 });
        world.remove_component::<Pos>(e1, true);

        // A fresh attach without init values must see the reset state, not
        // the previous owner's (3, 4).
        let e2 = world.create_entity();
        world.add_component::<Pos>(e2);
        let pos = world.get_component::<Pos>(e2).unwrap();
        assert_eq!((pos.x, pos.y), (0.0, 0.0));

        let stats = world.stats();
        assert_eq!(stats.components["Pos"].pool_used, 1);
        assert_eq!(
            stats.components["Pos"].pool_total,
            stats.components["Pos"].pool_free + stats.components["Pos"].pool_used
        );
    }

    // -- entity surface -----------------------------------------------------

    #[test]
    fn entity_views_cover_the_handle_surface() {
        let mut world = World::new();
        let id = world.create_entity();

        {
            let mut entity = world.entity_mut(id).unwrap();
            entity
                .add_component_with(A { value: 7 })
                .add_component::<B>()
                .add_tag("boss");
            assert!(entity.has_component::<A>());
            assert_eq!(entity.get::<A>().unwrap().value, 7);
            entity.get_mut::<A>().unwrap().value = 8;
        }

        let a_id = world.register_component::<A>();
        let b_id = world.register_component::<B>();
        let entity = world.entity(id).unwrap();
        assert!(entity.has_all_components(&[a_id, b_id]));
        assert!(entity.has_tag("boss"));
        assert_eq!(entity.get::<A>().unwrap().value, 8);

        world.entity_mut(id).unwrap().remove(true).unwrap();
        assert!(world.entity(id).is_none());
    }

    #[test]
    fn removing_component_twice_and_reading_missing_are_noops() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<A>(e);
        world.remove_component::<A>(e, true);
        world.remove_component::<A>(e, true);
        assert_eq!(world.get_component::<A>(e), None);
        assert!(!world.has_component::<A>(e));
    }

    #[test]
    fn unknown_entity_removal_is_an_error() {
        let mut world = World::new();
        let e = world.create_entity();
        world.remove_entity(e, true).unwrap();
        assert!(matches!(
            world.remove_entity(e, true),
            Err(EcsError::UnknownEntity(_))
        ));
    }

    // -- a full pipeline ----------------------------------------------------

    #[derive(Debug, Default)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    struct Movement;

    impl System for Movement {
        fn init(&mut self) -> SystemConfig {
            SystemConfig::new().query(QueryConfig::new(
                "moving",
                vec![comp::<Pos>(), comp::<Velocity>()],
            ))
        }

        fn execute(&mut self, ctx: &mut SystemContext<'_>, delta: f32, _time: f64) {
            for entity in ctx.entities("moving") {
                let vel = ctx.get::<Velocity>(entity).unwrap();
                let (dx, dy) = (vel.dx, vel.dy);
                let pos = ctx.get_mut::<Pos>(entity).unwrap();
                pos.x += dx * delta;
                pos.y += dy * delta;
            }
        }
    }

    #[test]
    fn movement_pipeline_advances_positions() {
        let mut world = World::new();
        let mover = world.create_entity();
        world.add_component_with(mover, Pos { x: 0.0, y: 0.0 });
        world.add_component_with(mover, Velocity { dx: 1.5, dy: -0.5 });

        let still = world.create_entity();
        world.add_component_with(still, Pos { x: 10.0, y: 10.0 });

        world
            .register_system(Movement, SystemAttrs::default())
            .unwrap();

        for i in 0..10 {
            world.tick(1.0, i as f64);
        }

        let pos = world.get_component::<Pos>(mover).unwrap();
        assert_eq!((pos.x, pos.y), (15.0, -5.0));
        let pos = world.get_component::<Pos>(still).unwrap();
        assert_eq!((pos.x, pos.y), (10.0, 10.0));

        let stats = world.stats();
        assert_eq!(stats.systems.len(), 1);
        assert_eq!(stats.systems[0].queries, vec!["pos-velocity".to_owned()]);
    }
}
