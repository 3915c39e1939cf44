use super::test_utilities::*;
use appmetr::storage::{BatchStorage, FileStorage, HeapStorage};
use appmetr::{Action, AppMetr, AppMetrConfig, AppMetrError, BinaryBatch, SendError};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use test_log::test;

#[test]
fn test_stop_on_persistent_storage_leaves_unsent_batches() {
    let temp_dir = create_test_dir("stop_persistent");
    let storage = Arc::new(FileStorage::open(temp_dir.path()).unwrap());
    let sender = ScriptedSender::failing();

    let appmetr = AppMetr::new(test_config(), sender)
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    appmetr.track(Action::event("kept on disk")).unwrap();
    appmetr.stop().unwrap();

    assert!(!storage.is_empty());
    let reopened = FileStorage::open(temp_dir.path()).unwrap();
    assert_eq!(reopened.pending_batch_ids(), vec![0]);
}

#[test]
fn test_soft_stop_blocks_until_sender_recovers() {
    let temp_dir = create_test_dir("soft_stop");
    let storage = Arc::new(FileStorage::open(temp_dir.path()).unwrap());
    let sender = ScriptedSender::failing();

    let appmetr = AppMetr::new(test_config(), sender.clone())
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    appmetr.track(Action::event("must arrive")).unwrap();

    let recovering_sender = sender.clone();
    let recovery = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        recovering_sender.set_fallback(Reply::Accept);
    });

    let started = Instant::now();
    appmetr.soft_stop().unwrap();
    recovery.join().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(storage.is_empty());
    assert!(sender.calls() >= 2);
    assert_eq!(appmetr.upload_stats().uploaded_batches, 1);
}

#[test]
fn test_soft_stop_rejects_tracks_while_draining() {
    let sender = ScriptedSender::failing();
    let appmetr = Arc::new(AppMetr::new(test_config(), sender.clone()).unwrap());
    appmetr.start().unwrap();
    appmetr.track(Action::event("pending")).unwrap();

    let stopping = appmetr.clone();
    let stopper = thread::spawn(move || stopping.soft_stop());

    wait_until("soft stop to begin", || !appmetr.is_running());
    assert_eq!(
        appmetr.track(Action::event("late")),
        Err(AppMetrError::NotRunning)
    );

    sender.set_fallback(Reply::Accept);
    stopper.join().unwrap().unwrap();
    assert!(appmetr.storage().is_empty());
}

#[test]
fn test_stop_on_heap_waits_for_upload() {
    let storage = Arc::new(HeapStorage::new());
    let slow = |_: &str, _: &str, _: &[u8]| -> Result<bool, SendError> {
        thread::sleep(Duration::from_millis(50));
        Ok(true)
    };

    let appmetr = AppMetr::new(test_config(), Arc::new(slow))
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    for i in 0..3 {
        appmetr.track(Action::event(format!("e{i}"))).unwrap();
        appmetr.flush().unwrap();
    }
    appmetr.stop().unwrap();

    assert!(storage.is_empty());
    assert_eq!(appmetr.upload_stats().uploaded_batches, 3);
}

#[test]
fn test_hard_stop_returns_after_grace_period() {
    let sender = ScriptedSender::accepting();
    let recorder = sender.clone();
    let stuck = move |url: &str, token: &str, bytes: &[u8]| -> Result<bool, SendError> {
        let result = appmetr::BatchSender::send(recorder.as_ref(), url, token, bytes);
        thread::sleep(Duration::from_secs(3));
        result
    };
    let config = AppMetrConfig {
        hard_stop_grace: Duration::from_millis(100),
        ..test_config()
    };

    let appmetr = AppMetr::new(config, Arc::new(stuck)).unwrap();
    appmetr.start().unwrap();
    appmetr.track(Action::event("in flight")).unwrap();
    appmetr.flush().unwrap();
    wait_until("send to start", || sender.calls() == 1);

    let started = Instant::now();
    appmetr.hard_stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!appmetr.is_running());
}

#[test]
fn test_hard_stop_does_not_wait_for_full_heap() {
    let heap = HeapStorage::new().with_max_bytes(400);
    assert!(heap.push(BinaryBatch::new(1, vec![0; 399])).unwrap());
    let storage = Arc::new(heap);
    let config = AppMetrConfig {
        hard_stop_grace: Duration::from_millis(100),
        ..test_config()
    };

    let appmetr = Arc::new(
        AppMetr::new(config, ScriptedSender::failing())
            .unwrap()
            .with_storage(storage.clone()),
    );
    appmetr.start().unwrap();
    appmetr.track(Action::event("no room left")).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let stopping = appmetr.clone();
    thread::spawn(move || {
        let _ = done_tx.send(stopping.hard_stop());
    });

    let result = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("hard_stop blocked on a full heap");
    assert_eq!(result, Ok(()));
    assert!(!appmetr.is_running());
    // the queued batch survives, the buffered action did not fit
    assert_eq!(storage.len(), 1);
    assert_eq!(appmetr.track(Action::event("late")), Err(AppMetrError::NotRunning));
}

#[test]
fn test_operations_after_stop_are_rejected() {
    let appmetr = AppMetr::new(test_config(), ScriptedSender::accepting()).unwrap();
    appmetr.start().unwrap();
    appmetr.stop().unwrap();

    assert_eq!(appmetr.track(Action::event("late")), Err(AppMetrError::NotRunning));
    assert_eq!(appmetr.flush(), Err(AppMetrError::NotRunning));
    assert_eq!(appmetr.soft_stop(), Err(AppMetrError::NotRunning));
    assert_eq!(appmetr.start(), Err(AppMetrError::Stopped));
}

#[test]
fn test_drop_while_running_persists_buffer() {
    let temp_dir = create_test_dir("drop_running");
    {
        let storage = Arc::new(FileStorage::open(temp_dir.path()).unwrap());
        let appmetr = AppMetr::new(test_config(), ScriptedSender::failing())
            .unwrap()
            .with_storage(storage);
        appmetr.start().unwrap();
        appmetr.track(Action::event("buffered")).unwrap();
    }

    let reopened = FileStorage::open(temp_dir.path()).unwrap();
    assert_eq!(reopened.pending_batch_ids(), vec![0]);
}
