use super::test_utilities::*;
use appmetr::storage::{BatchStorage, HeapStorage};
use appmetr::{Action, AppMetr, AppMetrConfig, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

fn started(config: AppMetrConfig, storage: Arc<RecordingStorage>, clock: Arc<ManualClock>) -> AppMetr {
    let appmetr = AppMetr::new(config, ScriptedSender::accepting())
        .unwrap()
        .with_storage(storage)
        .with_clock(clock);
    appmetr.start().unwrap();
    appmetr
}

#[test]
fn test_single_action_batches_flush_on_every_track() {
    let storage = RecordingStorage::new();
    let config = AppMetrConfig {
        max_batch_actions: 1,
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), Arc::new(ManualClock::new(0)));

    let test1 = Action::event("test1");
    let test2 = Action::event("test2");
    assert_eq!(appmetr.track(test1.clone()), Ok(true));
    assert_eq!(appmetr.track(test2.clone()), Ok(true));

    assert_eq!(storage.stored(), vec![vec![test1], vec![test2]]);
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_elapsed_period_flushes_before_appending() {
    let storage = RecordingStorage::new();
    let clock = Arc::new(ManualClock::new(1_000));
    let config = AppMetrConfig {
        flush_period: Duration::from_secs(1),
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), clock.clone());

    let e1 = Action::event("e1");
    appmetr.track(e1.clone()).unwrap();
    assert_eq!(storage.store_calls(), 0);

    clock.set_millis(2_000);
    appmetr.track(Action::event("e2")).unwrap();

    assert_eq!(storage.stored(), vec![vec![e1]]);
    assert_eq!(appmetr.pending_actions(), 1);
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_flush_stores_actions_in_insertion_order() {
    let storage = RecordingStorage::new();
    let appmetr = started(test_config(), storage.clone(), Arc::new(ManualClock::new(0)));

    let actions: Vec<Action> = (0..5)
        .map(|i| Action::event(format!("ordered-{i}")).with_user_id("u"))
        .collect();
    for action in &actions {
        assert_eq!(appmetr.track(action.clone()), Ok(true));
    }
    assert_eq!(storage.store_calls(), 0);

    assert_eq!(appmetr.flush(), Ok(true));
    assert_eq!(storage.stored(), vec![actions]);
    assert_eq!(appmetr.pending_actions(), 0);
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_byte_threshold_triggers_flush() {
    let storage = RecordingStorage::new();
    let big = Action::event("payload").with_property("blob", "x".repeat(200));
    let config = AppMetrConfig {
        max_batch_bytes: big.approximate_size() + 1,
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), Arc::new(ManualClock::new(0)));

    appmetr.track(big.clone()).unwrap();
    assert_eq!(storage.store_calls(), 0);
    appmetr.track(big).unwrap();
    assert_eq!(storage.store_calls(), 1);
    assert_eq!(storage.stored()[0].len(), 2);
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_zero_max_batch_actions_disables_count_check() {
    let storage = RecordingStorage::new();
    let config = AppMetrConfig {
        max_batch_actions: 0,
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), Arc::new(ManualClock::new(0)));

    for i in 0..50 {
        appmetr.track(Action::event(format!("e{i}"))).unwrap();
    }
    assert_eq!(storage.store_calls(), 0);
    assert!(!appmetr.need_flush());
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_flush_if_needed_only_flushes_past_thresholds() {
    let storage = RecordingStorage::new();
    let clock = Arc::new(ManualClock::new(0));
    let config = AppMetrConfig {
        flush_period: Duration::from_millis(500),
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), clock.clone());

    appmetr.track(Action::event("waiting")).unwrap();
    assert_eq!(appmetr.flush_if_needed(), Ok(true));
    assert_eq!(storage.store_calls(), 0);

    clock.advance_millis(500);
    assert!(appmetr.need_flush());
    assert_eq!(appmetr.flush_if_needed(), Ok(true));
    assert_eq!(storage.store_calls(), 1);
    appmetr.hard_stop().unwrap();
}

#[test]
fn test_rejecting_storage_keeps_actions_for_retry() {
    let storage = RecordingStorage::with_heap(HeapStorage::non_blocking(1));
    let config = AppMetrConfig {
        max_batch_actions: 1,
        ..test_config()
    };
    let appmetr = started(config, storage.clone(), Arc::new(ManualClock::new(0)));

    assert_eq!(appmetr.track(Action::event("first")), Ok(false));
    assert_eq!(appmetr.pending_actions(), 1);

    assert_eq!(appmetr.track(Action::event("second")), Ok(false));
    assert_eq!(appmetr.pending_actions(), 2);
    assert_eq!(storage.stored()[1].len(), 2);
    assert!(storage.is_empty());
    appmetr.hard_stop().unwrap();
}
