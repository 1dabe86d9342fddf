//! Integration tests for SaveManager: preconditions, exclusion, activation
//! and callback delivery, driven through a tick loop.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{Harness, LogObserver, delete_recorder, info_recorder, infos_recorder, test_preset};
use slotforge_core::domain::Conflict;
use slotforge_core::ports::SaveObserver;
use slotforge_core::{OpStatus, SavePreset, SlotError, SlotId, SlotInfo, TaskKind};

fn ids(infos: &[SlotInfo]) -> Vec<i32> {
    infos.iter().map(|info| info.id.get()).collect()
}

// ============================================================================
// Round trip / activation
// ============================================================================

#[test]
fn save_then_load_restores_world_and_activates_slot() {
    let mut h = Harness::new();
    h.save(3);
    let saved = h.manager.active_data().unwrap().clone();
    assert_eq!(h.manager.active_slot().unwrap().id, SlotId::new(3));

    h.world.set_global_state("player", json!({ "hp": 1, "gold": 0 }));
    h.world.set_region_state("market", "stall", json!({ "stock": 0 }));

    let (log, on_done) = info_recorder();
    h.manager.load_slot(SlotId::new(3), on_done).unwrap();
    h.tick_until_idle();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].as_ref().unwrap().id, SlotId::new(3));
    assert_eq!(h.manager.active_data(), Some(&saved));
    assert!(h.manager.is_in_slot());
    assert_eq!(
        h.world.global("player").unwrap().state,
        json!({ "hp": 10, "gold": 3 })
    );
    assert_eq!(h.world.region("market").unwrap()[0].state, json!({ "stock": 5 }));
}

#[test]
fn failed_save_leaves_active_slot_unchanged() {
    let mut h = Harness::new();
    h.save(1);
    h.store.fail_writes(true);

    let (log, on_done) = info_recorder();
    h.manager.save_slot(SlotId::new(2), true, None, on_done).unwrap();
    h.tick_until_idle();

    assert!(matches!(log.borrow()[0], Err(SlotError::Io(_))));
    assert_eq!(h.manager.active_slot().unwrap().id, SlotId::new(1));
    assert!(!h.store.contains(SlotId::new(2)));
}

#[test]
fn failed_load_leaves_active_slot_unchanged() {
    let mut h = Harness::new();
    h.save(1);
    h.save(2);
    h.store.put_raw_data(SlotId::new(1), b"not a snapshot".to_vec());

    let (log, on_done) = info_recorder();
    h.manager.load_slot(SlotId::new(1), on_done).unwrap();
    h.tick_until_idle();

    assert!(matches!(log.borrow()[0], Err(SlotError::Decode(_))));
    assert_eq!(h.manager.active_slot().unwrap().id, SlotId::new(2));
}

#[test]
fn failed_overwrite_keeps_previous_slot_contents() {
    let mut h = Harness::new();
    h.save(1);
    let before = h.manager.active_data().unwrap().clone();

    h.world.set_global_state("player", json!({ "hp": 999, "gold": 0 }));
    h.store.fail_info_writes(true);
    let (saved, on_done) = info_recorder();
    h.manager.save_slot(SlotId::new(1), true, None, on_done).unwrap();
    h.tick_until_idle();
    assert!(saved.borrow()[0].is_err());
    h.store.fail_info_writes(false);

    let (loaded, on_done) = info_recorder();
    h.manager.load_slot(SlotId::new(1), on_done).unwrap();
    h.tick_until_idle();

    assert!(loaded.borrow()[0].is_ok());
    assert_eq!(
        h.world.global("player").unwrap().state,
        json!({ "hp": 10, "gold": 3 })
    );
    assert_eq!(h.manager.active_data(), Some(&before));
}

#[test]
fn save_current_and_reload_target_the_active_slot() {
    let mut h = Harness::new();
    h.save(4);

    let (saved, on_done) = info_recorder();
    h.manager.save_current_slot(None, on_done).unwrap();
    h.tick_until_idle();
    assert_eq!(saved.borrow()[0].as_ref().unwrap().id, SlotId::new(4));

    h.world.set_global_state("player", json!({ "hp": 0, "gold": 0 }));
    let (loaded, on_done) = info_recorder();
    h.manager.reload_current_slot(on_done).unwrap();
    h.tick_until_idle();

    assert_eq!(loaded.borrow()[0].as_ref().unwrap().id, SlotId::new(4));
    assert_eq!(h.world.global("player").unwrap().state["hp"], json!(10));
}

#[test]
fn saved_info_carries_metadata() {
    let mut h = Harness::new();
    h.world.set_played_time(std::time::Duration::from_secs(90));
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    h.clock.set(at);

    let (log, on_done) = info_recorder();
    h.manager
        .save_slot(SlotId::new(2), true, Some(h.manager.preset().screenshot), on_done)
        .unwrap();
    h.tick_until_idle();

    let log = log.borrow();
    let info = log[0].as_ref().unwrap();
    assert_eq!(info.name, "Slot 2");
    assert_eq!(info.save_date, at);
    assert_eq!(info.played_time.as_secs(), 90);
    assert_eq!(info.map, "town");
    assert_eq!(info.version, h.manager.preset().version);
    assert_eq!(info.screenshot.as_ref().map(|s| (s.width, s.height)), Some((640, 360)));
}

// ============================================================================
// Preconditions
// ============================================================================

#[test]
fn save_without_overwrite_on_existing_slot_is_rejected() {
    let mut h = Harness::new();
    h.save(1);

    let (log, on_done) = info_recorder();
    let err = h
        .manager
        .save_slot(SlotId::new(1), false, None, on_done)
        .unwrap_err();

    assert!(matches!(err, SlotError::SlotConflict(Conflict::Overwrite(id)) if id == SlotId::new(1)));
    assert!(!h.manager.has_tasks());
    h.tick();
    assert!(log.borrow().is_empty());
}

#[test]
fn load_of_missing_slot_is_rejected() {
    let mut h = Harness::new();
    h.save(2);

    let (log, on_done) = info_recorder();
    let err = h.manager.load_slot(SlotId::new(7), on_done).unwrap_err();

    assert!(matches!(err, SlotError::SlotNotFound(id) if id == SlotId::new(7)));
    assert!(err.is_rejection());
    assert!(!h.manager.has_tasks());
    assert!(log.borrow().is_empty());
    assert_eq!(h.manager.active_slot().unwrap().id, SlotId::new(2));
}

#[test]
fn out_of_range_ids_are_rejected() {
    let mut h = Harness::new();

    assert!(matches!(
        h.manager.save_slot(SlotId::new(10), true, None, |_| {}),
        Err(SlotError::InvalidSlotId(_))
    ));
    assert!(matches!(
        h.manager.load_slot(SlotId::new(-1), |_| {}),
        Err(SlotError::InvalidSlotId(_))
    ));
    assert!(matches!(
        h.manager.delete_slot(SlotId::new(11)),
        Err(SlotError::InvalidSlotId(_))
    ));
    assert!(!h.manager.is_valid_slot(SlotId::new(10)));
    assert!(h.manager.is_valid_slot(SlotId::new(9)));
}

#[test]
fn unbounded_preset_accepts_large_ids() {
    let mut h = Harness::with_preset(SavePreset {
        max_slots: 0,
        ..test_preset()
    });

    h.save(500);

    assert!(h.store.contains(SlotId::new(500)));
}

// ============================================================================
// Exclusion
// ============================================================================

#[test]
fn only_one_save_or_load_at_a_time() {
    let mut h = Harness::new();
    h.save(1);
    h.manager.save_slot(SlotId::new(1), true, None, |_| {}).unwrap();

    let busy = |err: SlotError| {
        matches!(
            err,
            SlotError::SlotConflict(Conflict::Busy {
                running: TaskKind::Save
            })
        )
    };
    assert!(busy(h.manager.load_slot(SlotId::new(1), |_| {}).unwrap_err()));
    assert!(busy(h.manager.save_slot(SlotId::new(2), true, None, |_| {}).unwrap_err()));
    assert!(h.manager.load_all_slot_infos(false, |_| {}).is_ok());
    assert!(h.manager.is_saving_or_loading());
    assert!(!h.manager.is_loading());

    h.tick_until_idle();
    assert!(h.manager.load_slot(SlotId::new(1), |_| {}).is_ok());
    assert!(h.manager.is_loading());
}

#[test]
fn delete_all_is_rejected_while_a_save_runs() {
    let mut h = Harness::new();
    h.store.hold_writes();
    let (saved, on_done) = info_recorder();
    h.manager.save_slot(SlotId::new(2), true, None, on_done).unwrap();
    h.tick_until(|h| h.phase() == "writing");

    let err = h.manager.delete_all_slots(|_| {}).unwrap_err();
    assert!(matches!(
        err,
        SlotError::SlotConflict(Conflict::Busy {
            running: TaskKind::Save
        })
    ));

    h.store.release_writes();
    h.tick_until_idle();
    assert!(saved.borrow()[0].is_ok());

    let (deleted, on_done) = delete_recorder();
    h.manager.delete_all_slots(on_done).unwrap();
    h.tick_until_idle();

    assert_eq!(deleted.borrow()[0].as_ref().unwrap(), &vec![SlotId::new(2)]);
    assert!(h.store.slot_ids().is_empty());
    assert!(!h.manager.is_in_slot());
}

#[test]
fn delete_slot_conflicts_only_with_tasks_on_that_slot() {
    let mut h = Harness::new();
    h.save(1);
    h.save(5);
    h.manager.save_slot(SlotId::new(5), true, None, |_| {}).unwrap();

    assert!(matches!(
        h.manager.delete_slot(SlotId::new(5)),
        Err(SlotError::SlotConflict(_))
    ));
    h.manager.delete_slot(SlotId::new(1)).unwrap();

    assert_eq!(h.store.slot_ids(), vec![SlotId::new(5)]);
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn deleting_missing_slot_fails_and_changes_nothing() {
    let mut h = Harness::new();
    h.save(1);
    let writes = h.store.write_count();

    let err = h.manager.delete_slot(SlotId::new(9)).unwrap_err();

    assert!(matches!(err, SlotError::SlotNotFound(_)));
    assert_eq!(h.store.slot_ids(), vec![SlotId::new(1)]);
    assert_eq!(h.store.write_count(), writes);
    assert!(h.manager.is_in_slot());
}

#[test]
fn deleting_active_slot_clears_it() {
    let mut h = Harness::new();
    h.save(1);

    h.manager.delete_slot(SlotId::new(1)).unwrap();

    assert!(!h.manager.is_in_slot());
    assert!(h.manager.active_slot().is_none());
    assert!(!h.store.contains(SlotId::new(1)));
}

// ============================================================================
// Listing
// ============================================================================

#[test]
fn listing_sorted_by_recency_returns_newest_first() {
    let mut h = Harness::new();
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let t3 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    h.clock.set(t2);
    h.save(1);
    h.clock.set(t3);
    h.save(2);
    h.clock.set(t1);
    h.save(3);

    let (sorted, on_done) = infos_recorder();
    h.manager.load_all_slot_infos(true, on_done).unwrap();
    let (plain, on_done) = infos_recorder();
    h.manager.load_all_slot_infos(false, on_done).unwrap();
    h.tick_until_idle();

    assert_eq!(ids(sorted.borrow()[0].as_ref().unwrap()), vec![2, 1, 3]);
    assert_eq!(ids(plain.borrow()[0].as_ref().unwrap()), vec![1, 2, 3]);
    assert_eq!(ids(&h.manager.load_all_slot_infos_sync(true).unwrap()), vec![2, 1, 3]);
}

#[test]
fn listing_never_touches_the_active_slot() {
    let mut h = Harness::new();
    h.save(1);
    h.save(2);
    let active = h.manager.active_slot().cloned();

    let infos = h.manager.load_all_slot_infos_sync(false).unwrap();

    assert_eq!(infos.len(), 2);
    assert_eq!(h.manager.active_slot().cloned(), active);
}

#[test]
fn single_slot_info() {
    let mut h = Harness::new();
    h.save(1);

    let (found, on_done) = info_recorder();
    h.manager.load_slot_info(SlotId::new(1), on_done).unwrap();
    let (missing, on_done) = info_recorder();
    h.manager.load_slot_info(SlotId::new(5), on_done).unwrap();
    h.tick_until_idle();

    assert_eq!(found.borrow()[0].as_ref().unwrap().id, SlotId::new(1));
    assert!(matches!(missing.borrow()[0], Err(SlotError::SlotNotFound(_))));
}

#[test]
fn listing_skips_ids_outside_the_preset() {
    let mut h = Harness::new();
    h.save(2);
    h.store.put_info(SlotInfo::empty(SlotId::new(12), "test"));

    assert_eq!(ids(&h.manager.load_all_slot_infos_sync(false).unwrap()), vec![2]);

    let (listed, on_done) = infos_recorder();
    h.manager.load_all_slot_infos(false, on_done).unwrap();
    h.tick_until_idle();
    assert_eq!(ids(listed.borrow()[0].as_ref().unwrap()), vec![2]);
}

#[test]
fn is_slot_saved_follows_saves_and_deletes() {
    let mut h = Harness::new();
    assert!(!h.manager.is_slot_saved(SlotId::new(4)));

    h.save(4);
    assert!(h.manager.is_slot_saved(SlotId::new(4)));

    h.manager.delete_slot(SlotId::new(4)).unwrap();
    assert!(!h.manager.is_slot_saved(SlotId::new(4)));
}

#[test]
fn current_info_defaults_without_loading() {
    let mut h = Harness::new();

    let info = h.manager.current_info().clone();

    assert_eq!(info.id, SlotId::new(0));
    assert!(h.manager.current_data().regions.is_empty());
    assert!(!h.manager.is_in_slot());

    h.save(3);
    assert_eq!(h.manager.current_info().id, SlotId::new(3));
}

// ============================================================================
// Callbacks and observers
// ============================================================================

#[test]
fn each_callback_fires_exactly_once() {
    let mut h = Harness::new();
    let (saved, on_save) = info_recorder();
    h.manager.save_slot(SlotId::new(1), true, None, on_save).unwrap();
    let (listed, on_list) = infos_recorder();
    h.manager.load_all_slot_infos(false, on_list).unwrap();
    h.tick_until_idle();
    let (loaded, on_load) = info_recorder();
    h.manager.load_slot(SlotId::new(1), on_load).unwrap();
    h.tick_until_idle();

    for _ in 0..5 {
        h.tick();
    }

    assert_eq!(saved.borrow().len(), 1);
    assert_eq!(listed.borrow().len(), 1);
    assert_eq!(loaded.borrow().len(), 1);
}

#[test]
fn observers_fire_before_the_callback() {
    let mut h = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let observer: Arc<dyn SaveObserver> = Arc::new(LogObserver { log: log.clone() });
    h.manager.subscribe(observer.clone());

    let sink = log.clone();
    h.manager
        .save_slot(SlotId::new(1), true, None, move |r| {
            sink.borrow_mut().push(format!("callback:{}", r.is_ok()))
        })
        .unwrap();
    h.tick_until_idle();
    let sink = log.clone();
    h.manager
        .load_slot(SlotId::new(1), move |r| {
            sink.borrow_mut().push(format!("callback:{}", r.is_ok()))
        })
        .unwrap();
    h.tick_until_idle();

    assert_eq!(
        *log.borrow(),
        vec![
            "save_began",
            "save_finished:true",
            "callback:true",
            "load_began",
            "load_finished:true",
            "callback:true",
        ]
    );

    assert!(h.manager.unsubscribe(&observer));
    h.save(2);
    assert_eq!(log.borrow().len(), 6);
}

#[test]
fn observers_see_failed_saves() {
    let mut h = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    h.manager.subscribe(Arc::new(LogObserver { log: log.clone() }));
    h.store.fail_writes(true);

    h.manager.save_slot(SlotId::new(1), true, None, |_| {}).unwrap();
    h.tick_until_idle();

    assert_eq!(*log.borrow(), vec!["save_began", "save_finished:false"]);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn deinitialize_cancels_in_flight_tasks() {
    let mut h = Harness::with_preset(SavePreset {
        shutdown_timeout_ms: 50,
        ..test_preset()
    });
    let observed = Rc::new(RefCell::new(Vec::new()));
    h.manager.subscribe(Arc::new(LogObserver {
        log: observed.clone(),
    }));
    h.store.hold_writes();

    let (writing, on_done) = info_recorder();
    h.manager.save_slot(SlotId::new(1), true, None, on_done).unwrap();
    h.tick_until(|h| h.phase() == "writing");
    let (listing, on_list) = infos_recorder();
    h.manager.load_all_slot_infos(false, on_list).unwrap();

    h.manager.deinitialize();
    h.store.release_writes();

    assert!(matches!(writing.borrow().as_slice(), [Err(SlotError::Cancelled)]));
    assert!(matches!(listing.borrow().as_slice(), [Err(SlotError::Cancelled)]));
    // 開始前に cancel された listing は began/finished を出さない
    assert_eq!(*observed.borrow(), vec!["save_began", "save_finished:false"]);
    assert!(!h.manager.has_tasks());
    assert!(!h.manager.is_in_slot());
    assert!(!h.store.contains(SlotId::new(1)));

    assert!(matches!(
        h.manager.save_slot(SlotId::new(2), true, None, |_| {}),
        Err(SlotError::NotRunning)
    ));
    h.manager.deinitialize();
}

#[test]
fn dropping_the_manager_delivers_pending_callbacks() {
    let h = Harness::new();
    let Harness { mut manager, .. } = h;
    let (log, on_done) = info_recorder();
    manager.save_slot(SlotId::new(1), true, None, on_done).unwrap();

    drop(manager);

    assert!(matches!(log.borrow().as_slice(), [Err(SlotError::Cancelled)]));
}

// ============================================================================
// Latent entry points
// ============================================================================

#[test]
fn latent_save_resolves_after_ticks() {
    let mut h = Harness::new();

    let mut latent = h.manager.save_slot_latent(SlotId::new(1), true, None);
    assert!(latent.poll().is_pending());
    h.tick_until_idle();

    assert_eq!(latent.poll(), Poll::Ready(OpStatus::Succeeded));
    assert_eq!(latent.into_result().unwrap().unwrap().id, SlotId::new(1));
}

#[test]
fn latent_reports_rejection_and_failure() {
    let mut h = Harness::new();

    let mut rejected = h.manager.load_slot_latent(SlotId::new(3));
    assert_eq!(rejected.poll(), Poll::Ready(OpStatus::Rejected));

    h.store.fail_writes(true);
    let mut failed = h.manager.save_slot_latent(SlotId::new(3), true, None);
    h.tick_until_idle();
    assert_eq!(failed.poll(), Poll::Ready(OpStatus::Failed));

    h.store.fail_writes(false);
    h.save(4);
    let mut deleted = h.manager.delete_all_slots_latent();
    h.tick_until_idle();
    assert_eq!(deleted.poll(), Poll::Ready(OpStatus::Succeeded));
    assert_eq!(deleted.into_result().unwrap().unwrap(), vec![SlotId::new(4)]);
}

#[test]
fn latent_listing_resolves_with_infos() {
    let mut h = Harness::new();
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    h.save(1);
    h.clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    h.save(2);

    let mut latent = h.manager.load_all_slot_infos_latent(true);
    assert!(latent.poll().is_pending());
    h.tick_until_idle();

    assert_eq!(latent.poll(), Poll::Ready(OpStatus::Succeeded));
    assert_eq!(ids(&latent.into_result().unwrap().unwrap()), vec![2, 1]);

    h.manager.deinitialize();
    let mut rejected = h.manager.load_all_slot_infos_latent(false);
    assert_eq!(rejected.poll(), Poll::Ready(OpStatus::Rejected));
}
