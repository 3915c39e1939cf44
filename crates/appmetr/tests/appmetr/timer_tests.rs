use super::test_utilities::*;
use appmetr::{Action, AppMetr, AppMetrConfig, FlushTimer, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

fn timed_appmetr(storage: Arc<RecordingStorage>, clock: Arc<ManualClock>) -> Arc<AppMetr> {
    let config = AppMetrConfig {
        flush_period: Duration::from_secs(1),
        ..test_config()
    };
    let appmetr = AppMetr::new(config, ScriptedSender::accepting())
        .unwrap()
        .with_storage(storage)
        .with_clock(clock);
    appmetr.start().unwrap();
    Arc::new(appmetr)
}

#[test]
fn test_timer_flushes_once_period_elapses() {
    let storage = RecordingStorage::new();
    let clock = Arc::new(ManualClock::new(0));
    let appmetr = timed_appmetr(storage.clone(), clock.clone());
    let timer = FlushTimer::spawn(&appmetr, Duration::from_millis(10)).unwrap();

    appmetr.track(Action::event("timed")).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(storage.store_calls(), 0);

    clock.advance_millis(1_000);
    wait_until("periodic flush", || storage.store_calls() == 1);
    assert_eq!(appmetr.pending_actions(), 0);

    timer.stop();
    appmetr.stop().unwrap();
}

#[test]
fn test_trigger_runs_check_without_waiting_for_period() {
    let storage = RecordingStorage::new();
    let clock = Arc::new(ManualClock::new(0));
    let appmetr = timed_appmetr(storage.clone(), clock.clone());
    let timer = FlushTimer::spawn(&appmetr, Duration::from_secs(3600)).unwrap();

    appmetr.track(Action::event("triggered")).unwrap();
    clock.advance_millis(1_000);
    timer.trigger();

    wait_until("triggered flush", || storage.store_calls() == 1);
    timer.stop();
    appmetr.stop().unwrap();
}

#[test]
fn test_timer_does_not_keep_orchestrator_alive() {
    let storage = RecordingStorage::new();
    let appmetr = timed_appmetr(storage.clone(), Arc::new(ManualClock::new(0)));
    let timer = FlushTimer::spawn(&appmetr, Duration::from_millis(10)).unwrap();

    appmetr.track(Action::event("flushed on drop")).unwrap();
    drop(appmetr);

    // the last strong reference may be released on the timer thread
    wait_until("flush on drop", || storage.store_calls() == 1);
    timer.stop();
}
