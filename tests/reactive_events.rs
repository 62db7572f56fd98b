//! Integration tests for the reactive event plumbing: per-system buffer
//! windows, dedup semantics, and deferred-removal visibility.

use std::cell::RefCell;
use std::rc::Rc;

use reflex_ecs::prelude::*;

#[derive(Debug, Default)]
struct Health {
    hp: i32,
}
impl Component for Health {}

type EntityLog = Rc<RefCell<Vec<Vec<EntityId>>>>;
type CountLog = Rc<RefCell<Vec<usize>>>;

// ---------------------------------------------------------------------------
// Observer and mutator systems
// ---------------------------------------------------------------------------

/// Records its `EntityChanged` buffer at every execute.
struct ChangeObserver {
    log: EntityLog,
}

impl System for ChangeObserver {
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new().query(
            QueryConfig::new("tracked", vec![comp::<Health>()])
                .event("changed", QueryEventKind::EntityChanged),
        )
    }

    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.log
            .borrow_mut()
            .push(ctx.entity_events("tracked", "changed"));
    }
}

/// Attaches `Health` to its target and mutates it, on the first tick only.
struct Mutator {
    target: EntityId,
    ticks: u32,
}

impl System for Mutator {
    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.ticks += 1;
        if self.ticks == 1 {
            ctx.add_component::<Health>(self.target);
            ctx.get_mut::<Health>(self.target).unwrap().hp = 10;
        }
    }
}

#[test]
fn changes_by_a_later_system_arrive_next_tick() {
    let mut world = World::new();
    let target = world.create_entity();
    let log: EntityLog = Rc::new(RefCell::new(Vec::new()));

    // Observer runs before the mutator, so the mutation lands in its buffer
    // after this tick's clear and is observed at the start of the next tick.
    world
        .register_system(ChangeObserver { log: log.clone() }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(Mutator { target, ticks: 0 }, SystemAttrs::priority(1))
        .unwrap();

    world.tick(0.016, 0.0);
    world.tick(0.016, 0.016);
    world.tick(0.016, 0.032);

    assert_eq!(&*log.borrow(), &[vec![], vec![target], vec![]]);
}

#[test]
fn changes_by_an_earlier_system_arrive_same_tick() {
    let mut world = World::new();
    let target = world.create_entity();
    let log: EntityLog = Rc::new(RefCell::new(Vec::new()));

    world
        .register_system(Mutator { target, ticks: 0 }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(ChangeObserver { log: log.clone() }, SystemAttrs::priority(1))
        .unwrap();

    world.tick(0.016, 0.0);
    world.tick(0.016, 0.016);

    assert_eq!(&*log.borrow(), &[vec![target], vec![]]);
}

// ---------------------------------------------------------------------------
// Dedup asymmetry
// ---------------------------------------------------------------------------

/// Mutates its target twice per tick, on the first tick only.
struct DoubleMutator {
    target: EntityId,
    ticks: u32,
}

impl System for DoubleMutator {
    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.ticks += 1;
        if self.ticks == 1 {
            ctx.add_component::<Health>(self.target);
            ctx.get_mut::<Health>(self.target).unwrap().hp = 1;
            ctx.get_mut::<Health>(self.target).unwrap().hp = 2;
        }
    }
}

/// Observes the same query through an entity-keyed buffer and a
/// component-filtered change-log.
struct DualObserver {
    entity_counts: CountLog,
    component_counts: CountLog,
}

impl System for DualObserver {
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new().query(
            QueryConfig::new("tracked", vec![comp::<Health>()])
                .event("changed", QueryEventKind::EntityChanged)
                .component_event("edits", vec![comp::<Health>()]),
        )
    }

    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.entity_counts
            .borrow_mut()
            .push(ctx.entity_events("tracked", "changed").len());
        self.component_counts
            .borrow_mut()
            .push(ctx.component_events("tracked", "edits").len());
    }
}

#[test]
fn entity_buffers_dedup_but_component_logs_do_not() {
    let mut world = World::new();
    let target = world.create_entity();
    let entity_counts: CountLog = Rc::new(RefCell::new(Vec::new()));
    let component_counts: CountLog = Rc::new(RefCell::new(Vec::new()));

    world
        .register_system(DoubleMutator { target, ticks: 0 }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(
            DualObserver {
                entity_counts: entity_counts.clone(),
                component_counts: component_counts.clone(),
            },
            SystemAttrs::priority(1),
        )
        .unwrap();

    world.tick(0.016, 0.0);
    world.tick(0.016, 0.016);

    // Two mutations in one tick: one entry in the deduplicated buffer, two
    // in the change-log.
    assert_eq!(&*entity_counts.borrow(), &[1, 0]);
    assert_eq!(&*component_counts.borrow(), &[2, 0]);
}

// ---------------------------------------------------------------------------
// Deferred removal during a tick
// ---------------------------------------------------------------------------

/// Queues its target for removal on the first tick.
struct Reaper {
    target: EntityId,
    ticks: u32,
}

impl System for Reaper {
    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.ticks += 1;
        if self.ticks == 1 {
            ctx.remove_entity(self.target, false).unwrap();
        }
    }
}

/// Runs after the reaper and records `(store count, query count)`.
struct Census {
    log: Rc<RefCell<Vec<(usize, usize)>>>,
}

impl System for Census {
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new().query(QueryConfig::new("tracked", vec![comp::<Health>()]))
    }

    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.log
            .borrow_mut()
            .push((ctx.entity_count(), ctx.entities("tracked").len()));
    }
}

#[test]
fn deferred_removal_is_invisible_to_queries_but_still_in_store() {
    let mut world = World::new();
    let target = world.create_entity();
    world.add_component::<Health>(target);
    let log = Rc::new(RefCell::new(Vec::new()));

    world
        .register_system(Reaper { target, ticks: 0 }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(Census { log: log.clone() }, SystemAttrs::priority(1))
        .unwrap();

    world.tick(0.016, 0.0);

    // Mid-tick, after the reaper: gone from the query, still in the store.
    assert_eq!(log.borrow()[0], (1, 0));
    // The end-of-tick flush destroyed it.
    assert!(!world.contains(target));

    world.tick(0.016, 0.016);
    assert_eq!(log.borrow()[1], (0, 0));
}

#[test]
fn deferred_removal_leaves_an_inspection_window() {
    let mut world = World::new();
    let target = world.create_entity();
    world.add_component_with(target, Health { hp: 3 });
    let q = world.register_query(&[comp::<Health>()]).unwrap();

    world.remove_entity(target, false).unwrap();

    // Components stay readable until the flush, but no query sees the
    // entity anymore.
    assert_eq!(world.get_component::<Health>(target).unwrap().hp, 3);
    assert_eq!(world.query_entities(q), &[] as &[EntityId]);
    assert!(world.contains(target));

    world.process_deferred();
    assert!(world.get_component::<Health>(target).is_none());
    assert!(!world.contains(target));
}

// ---------------------------------------------------------------------------
// Membership event buffers
// ---------------------------------------------------------------------------

/// Removes its target's `Health` (forced) on the first tick.
struct Detacher {
    target: EntityId,
    ticks: u32,
}

impl System for Detacher {
    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.ticks += 1;
        if self.ticks == 1 {
            ctx.remove_component::<Health>(self.target, true);
        }
    }
}

/// Records its `EntityAdded` and `EntityRemoved` buffers every execute.
struct MembershipObserver {
    added: EntityLog,
    removed: EntityLog,
}

impl System for MembershipObserver {
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new().query(
            QueryConfig::new("tracked", vec![comp::<Health>()])
                .event("appeared", QueryEventKind::EntityAdded)
                .event("vanished", QueryEventKind::EntityRemoved),
        )
    }

    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.added
            .borrow_mut()
            .push(ctx.entity_events("tracked", "appeared"));
        self.removed
            .borrow_mut()
            .push(ctx.entity_events("tracked", "vanished"));
    }
}

#[test]
fn membership_buffers_see_adds_and_removes() {
    let mut world = World::new();
    let target = world.create_entity();
    let added: EntityLog = Rc::new(RefCell::new(Vec::new()));
    let removed: EntityLog = Rc::new(RefCell::new(Vec::new()));

    world
        .register_system(Detacher { target, ticks: 0 }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(
            MembershipObserver {
                added: added.clone(),
                removed: removed.clone(),
            },
            SystemAttrs::priority(1),
        )
        .unwrap();

    // Host-side attach before the first tick lands in the added buffer.
    world.add_component::<Health>(target);

    world.tick(0.016, 0.0);
    assert_eq!(&*added.borrow(), &[vec![target]]);
    assert_eq!(&*removed.borrow(), &[vec![target]]);

    world.tick(0.016, 0.016);
    assert_eq!(added.borrow()[1], vec![] as Vec<EntityId>);
    assert_eq!(removed.borrow()[1], vec![] as Vec<EntityId>);
}

// ---------------------------------------------------------------------------
// World-bus events
// ---------------------------------------------------------------------------

/// Emits one collision event on the first tick.
struct CollisionEmitter {
    ticks: u32,
}

impl System for CollisionEmitter {
    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        self.ticks += 1;
        if self.ticks == 1 {
            ctx.emit("collision", serde_json::json!({ "impulse": 4.2 }));
        }
    }
}

/// Buffers collision events and records how many it saw per tick.
struct CollisionConsumer {
    log: CountLog,
}

impl System for CollisionConsumer {
    fn init(&mut self) -> SystemConfig {
        SystemConfig::new().world_event("collisions", "collision")
    }

    fn execute(&mut self, ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {
        let messages = ctx.messages("collisions");
        if let Some(first) = messages.first() {
            assert_eq!(first["impulse"], 4.2);
        }
        self.log.borrow_mut().push(messages.len());
    }
}

#[test]
fn world_events_buffer_between_systems() {
    let mut world = World::new();
    let log: CountLog = Rc::new(RefCell::new(Vec::new()));

    world
        .register_system(CollisionEmitter { ticks: 0 }, SystemAttrs::priority(0))
        .unwrap();
    world
        .register_system(CollisionConsumer { log: log.clone() }, SystemAttrs::priority(1))
        .unwrap();

    world.tick(0.016, 0.0);
    world.tick(0.016, 0.016);

    assert_eq!(&*log.borrow(), &[1, 0]);
}
