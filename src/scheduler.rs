//! Priority-ordered system scheduling.
//!
//! The scheduler owns the registered systems and keeps them sorted by
//! ascending priority, ties broken by registration order. The tick pass
//! itself runs in [`World::tick`](crate::world::World::tick), which lends
//! the entry list out so systems can borrow the rest of the world while
//! they execute.

use std::any::TypeId;
use std::time::Duration;

use crate::system::{System, SystemData};

// ---------------------------------------------------------------------------
// SystemAttrs
// ---------------------------------------------------------------------------

/// Registration attributes. Lower priority runs earlier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAttrs {
    pub priority: i32,
}

impl SystemAttrs {
    pub fn priority(priority: i32) -> Self {
        Self { priority }
    }
}

// ---------------------------------------------------------------------------
// SystemEntry
// ---------------------------------------------------------------------------

pub(crate) struct SystemEntry {
    pub name: String,
    /// Rust type of the system, the identity used for removal and lookup.
    pub type_id: TypeId,
    pub priority: i32,
    /// Registration sequence number; the priority tie-break.
    pub order: usize,
    pub enabled: bool,
    /// Wall-clock duration of the last execute.
    pub execute_time: Duration,
    pub system: Box<dyn System>,
    pub data: SystemData,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Scheduler {
    entries: Vec<SystemEntry>,
    next_order: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry and restore priority order.
    pub(crate) fn insert(
        &mut self,
        name: String,
        type_id: TypeId,
        priority: i32,
        system: Box<dyn System>,
        data: SystemData,
    ) {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.push(SystemEntry {
            name,
            type_id,
            priority,
            order,
            enabled: true,
            execute_time: Duration::ZERO,
            system,
            data,
        });
        self.entries.sort_by_key(|e| (e.priority, e.order));
    }

    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.entries.iter().any(|e| e.type_id == type_id)
    }

    pub(crate) fn remove(&mut self, type_id: TypeId) -> Option<SystemEntry> {
        let pos = self.entries.iter().position(|e| e.type_id == type_id)?;
        Some(self.entries.remove(pos))
    }

    pub(crate) fn entry_mut(&mut self, type_id: TypeId) -> Option<&mut SystemEntry> {
        self.entries.iter_mut().find(|e| e.type_id == type_id)
    }

    pub(crate) fn entry(&self, type_id: TypeId) -> Option<&SystemEntry> {
        self.entries.iter().find(|e| e.type_id == type_id)
    }

    pub(crate) fn entries(&self) -> &[SystemEntry] {
        &self.entries
    }

    /// Lend the entry list out for a tick pass. The caller must hand it back
    /// via [`put_entries`](Self::put_entries).
    pub(crate) fn take_entries(&mut self) -> Vec<SystemEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn put_entries(&mut self, entries: Vec<SystemEntry>) {
        self.entries = entries;
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered system names, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.system_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemContext;

    struct A;
    struct B;
    struct C;

    impl System for A {
        fn execute(&mut self, _ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {}
    }
    impl System for B {
        fn execute(&mut self, _ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {}
    }
    impl System for C {
        fn execute(&mut self, _ctx: &mut SystemContext<'_>, _delta: f32, _time: f64) {}
    }

    fn insert<S: System>(scheduler: &mut Scheduler, name: &str, priority: i32, system: S) {
        scheduler.insert(
            name.to_owned(),
            TypeId::of::<S>(),
            priority,
            Box::new(system),
            SystemData::default(),
        );
    }

    #[test]
    fn orders_by_priority_then_registration() {
        let mut scheduler = Scheduler::new();
        insert(&mut scheduler, "A", 10, A);
        insert(&mut scheduler, "B", 1, B);
        insert(&mut scheduler, "C", 10, C);

        assert_eq!(scheduler.system_names(), vec!["B", "A", "C"]);
    }

    #[test]
    fn remove_by_type_identity() {
        let mut scheduler = Scheduler::new();
        insert(&mut scheduler, "A", 0, A);
        insert(&mut scheduler, "B", 0, B);

        assert!(scheduler.remove(TypeId::of::<A>()).is_some());
        assert!(scheduler.remove(TypeId::of::<A>()).is_none());
        assert_eq!(scheduler.system_names(), vec!["B"]);
    }

    #[test]
    fn take_and_put_round_trip() {
        let mut scheduler = Scheduler::new();
        insert(&mut scheduler, "A", 0, A);
        let entries = scheduler.take_entries();
        assert!(scheduler.is_empty());
        scheduler.put_entries(entries);
        assert_eq!(scheduler.len(), 1);
    }
}
