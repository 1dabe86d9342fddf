#![allow(dead_code)]
//! Common test utilities: a manager wired to in-memory collaborators and a
//! bounded tick loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde_json::json;

use slotforge_core::domain::ObjectRecord;
use slotforge_core::impls::{InMemorySlotStore, InMemoryWorld};
use slotforge_core::ports::{FixedClock, SaveObserver};
use slotforge_core::{SaveFilter, SaveManager, SavePreset, SlotError, SlotId, SlotInfo};

pub struct Harness {
    pub manager: SaveManager,
    pub world: InMemoryWorld,
    pub store: Arc<InMemorySlotStore>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_preset(test_preset())
    }

    pub fn with_preset(preset: SavePreset) -> Self {
        let store = Arc::new(InMemorySlotStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let manager = SaveManager::new(preset, store.clone(), clock.clone()).unwrap();
        Self {
            manager,
            world: test_world(),
            store,
            clock,
        }
    }

    pub fn tick(&mut self) {
        self.manager.tick(&mut self.world);
    }

    /// Tick until the roster is empty. Returns the number of ticks.
    pub fn tick_until_idle(&mut self) -> usize {
        self.tick_until(|h| !h.manager.has_tasks())
    }

    pub fn tick_until(&mut self, done: impl Fn(&Self) -> bool) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut ticks = 0;
        while !done(self) {
            assert!(Instant::now() < deadline, "condition not reached after {ticks} ticks");
            self.tick();
            ticks += 1;
            std::thread::sleep(Duration::from_millis(1));
        }
        ticks
    }

    /// Save into `slot` (overwriting) and run it to completion.
    pub fn save(&mut self, slot: i32) {
        let (log, on_done) = info_recorder();
        self.manager
            .save_slot(slot.into(), true, None, on_done)
            .unwrap();
        self.tick_until_idle();
        assert!(log.borrow()[0].is_ok(), "save into {slot} failed");
    }

    /// Phase of the single task in the roster.
    pub fn phase(&self) -> &'static str {
        self.manager.tasks().first().map_or("none", |t| t.phase())
    }
}

pub fn test_preset() -> SavePreset {
    SavePreset {
        max_slots: 10,
        worker_threads: 1,
        shutdown_timeout_ms: 200,
        ..SavePreset::default()
    }
}

pub fn test_world() -> InMemoryWorld {
    let mut world = InMemoryWorld::new("town");
    world.spawn_global(ObjectRecord::new("player", "Player", json!({ "hp": 10, "gold": 3 })));
    world.spawn_global(ObjectRecord::new("arrow", "Projectile", json!(null)).with_tag("transient"));
    world.load_region(
        "market",
        vec![ObjectRecord::new("stall", "Stall", json!({ "stock": 5 }))],
    );
    world
}

/// A callback that records every result it receives.
pub fn recorder<T: 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnOnce(T) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |value| sink.borrow_mut().push(value))
}

pub type Log<T> = Rc<RefCell<Vec<Result<T, SlotError>>>>;

pub fn info_recorder() -> (Log<SlotInfo>, impl FnOnce(Result<SlotInfo, SlotError>) + 'static) {
    recorder()
}

pub fn infos_recorder() -> (
    Log<Vec<SlotInfo>>,
    impl FnOnce(Result<Vec<SlotInfo>, SlotError>) + 'static,
) {
    recorder()
}

pub fn delete_recorder() -> (Log<Vec<SlotId>>, impl FnOnce(Result<Vec<SlotId>, SlotError>) + 'static) {
    recorder()
}

/// Observer that appends every hook to a shared log.
pub struct LogObserver {
    pub log: Rc<RefCell<Vec<String>>>,
}

impl SaveObserver for LogObserver {
    fn on_save_began(&self, _filter: &SaveFilter) {
        self.log.borrow_mut().push("save_began".into());
    }

    fn on_save_finished(&self, _filter: &SaveFilter, success: bool) {
        self.log.borrow_mut().push(format!("save_finished:{success}"));
    }

    fn on_load_began(&self, _filter: &SaveFilter) {
        self.log.borrow_mut().push("load_began".into());
    }

    fn on_load_finished(&self, _filter: &SaveFilter, success: bool) {
        self.log.borrow_mut().push(format!("load_finished:{success}"));
    }
}
