use super::test_utilities::*;
use appmetr::encoding::decode_batch;
use appmetr::storage::{BatchStorage, FileStorage, HeapStorage};
use appmetr::{Action, ActionKind, AppMetr, AppMetrConfig, AppMetrError, SendError, UploadError};
use parking_lot::Mutex;
use std::sync::Arc;
use test_log::test;

#[test]
fn test_failed_batch_is_retried_until_accepted() {
    let storage = Arc::new(HeapStorage::new());
    let sender = ScriptedSender::new(vec![Reply::Fail, Reply::Fail], Reply::Accept);

    // every send must still see the batch queued
    let observed_empty = Arc::new(Mutex::new(Vec::new()));
    let observed_storage = storage.clone();
    let inner_sender = sender.clone();
    let observed = observed_empty.clone();
    let checking_sender = move |url: &str, token: &str, bytes: &[u8]| -> Result<bool, SendError> {
        observed.lock().push(observed_storage.is_empty());
        appmetr::BatchSender::send(inner_sender.as_ref(), url, token, bytes)
    };

    let appmetr = AppMetr::new(test_config(), Arc::new(checking_sender))
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    appmetr.track(Action::event("retry me")).unwrap();
    appmetr.flush().unwrap();

    wait_until("batch upload", || appmetr.upload_stats().uploaded_batches == 1);
    assert!(storage.is_empty());
    assert_eq!(sender.calls(), 3);
    assert_eq!(*observed_empty.lock(), vec![false, false, false]);

    let stats = appmetr.upload_stats();
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.uploaded_batches, 1);
    assert_eq!(stats.dropped_batches, 0);
    appmetr.stop().unwrap();
}

#[test]
fn test_failed_batch_is_dropped_without_retry() {
    let storage = Arc::new(HeapStorage::new());
    let sender = ScriptedSender::failing();
    let config = AppMetrConfig {
        retry_batch_upload: false,
        ..test_config()
    };

    let appmetr = AppMetr::new(config, sender.clone())
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    appmetr.track(Action::event("dropped")).unwrap();
    appmetr.flush().unwrap();

    wait_until("batch drop", || appmetr.upload_stats().dropped_batches == 1);
    assert!(storage.is_empty());
    assert_eq!(sender.calls(), 1);
    assert!(appmetr.last_upload_error().is_none());
    appmetr.stop().unwrap();
}

#[test]
fn test_batches_are_uploaded_in_order_with_url_and_token() {
    let sender = ScriptedSender::accepting();
    let appmetr = AppMetr::new(test_config(), sender.clone())
        .unwrap()
        .with_server_id("server-under-test");
    appmetr.start().unwrap();

    for i in 0..3 {
        appmetr.track(Action::event(format!("batch-{i}"))).unwrap();
        appmetr.flush().unwrap();
    }
    appmetr.stop().unwrap();

    let sent = sender.sent();
    assert_eq!(sent.len(), 3);
    for (i, batch) in sent.iter().enumerate() {
        assert_eq!(batch.url, TEST_URL);
        assert_eq!(batch.token, TEST_TOKEN);
        let decoded = decode_batch(&batch.bytes).unwrap();
        assert_eq!(decoded.server_id, "server-under-test");
        assert_eq!(decoded.batch.len(), 1);
        assert_eq!(
            decoded.batch[0].kind(),
            &ActionKind::Event {
                event: format!("batch-{i}")
            }
        );
    }
    assert_eq!(appmetr.upload_stats().uploaded_batches, 3);
}

#[test]
fn test_sender_error_is_latched_and_rejects_tracking() {
    let sender = ScriptedSender::new(vec![Reply::Fatal], Reply::Accept);
    let appmetr = AppMetr::new(test_config(), sender.clone()).unwrap();
    appmetr.start().unwrap();
    appmetr.track(Action::event("fatal")).unwrap();
    appmetr.flush().unwrap();

    wait_until("latched error", || appmetr.last_upload_error().is_some());
    let expected = UploadError::Sender(SendError::Protocol {
        reason: "scripted failure".to_string(),
    });
    assert_eq!(appmetr.last_upload_error(), Some(expected.clone()));
    assert_eq!(
        appmetr.track(Action::event("after")),
        Err(AppMetrError::UploadFailed(expected.clone()))
    );
    assert_eq!(appmetr.flush(), Err(AppMetrError::UploadFailed(expected)));
    assert_eq!(sender.calls(), 1);

    appmetr.hard_stop().unwrap();
}

#[test]
fn test_sender_panic_is_latched() {
    let sender = ScriptedSender::new(vec![Reply::Panic], Reply::Accept);
    let appmetr = AppMetr::new(test_config(), sender).unwrap();
    appmetr.start().unwrap();
    appmetr.track(Action::event("panic")).unwrap();
    appmetr.flush().unwrap();

    wait_until("latched panic", || appmetr.last_upload_error().is_some());
    match appmetr.last_upload_error() {
        Some(UploadError::Panicked { reason }) => assert_eq!(reason, "scripted panic"),
        other => panic!("expected a latched panic, got {other:?}"),
    }
    assert!(matches!(
        appmetr.track(Action::event("after")),
        Err(AppMetrError::UploadFailed(UploadError::Panicked { .. }))
    ));

    appmetr.hard_stop().unwrap();
}

#[test]
fn test_storage_error_is_latched_and_rejects_tracking() {
    let temp_dir = create_test_dir("storage_error");
    let storage = Arc::new(FileStorage::open(temp_dir.path()).unwrap());
    let appmetr = AppMetr::new(test_config(), ScriptedSender::accepting())
        .unwrap()
        .with_storage(storage.clone());
    appmetr.start().unwrap();
    appmetr.track(Action::event("unwritable")).unwrap();

    // index writes go through `lastBatchId.tmp`; a directory in its place fails them
    let blocker = temp_dir.path().join("lastBatchId.tmp");
    std::fs::create_dir(&blocker).unwrap();

    assert!(matches!(appmetr.flush(), Err(AppMetrError::Storage(_))));
    assert!(matches!(
        appmetr.last_upload_error(),
        Some(UploadError::Storage(_))
    ));
    assert!(!appmetr.is_running());
    assert!(matches!(
        appmetr.track(Action::event("after")),
        Err(AppMetrError::UploadFailed(UploadError::Storage(_)))
    ));
    assert!(storage.is_empty());
    assert_eq!(appmetr.pending_actions(), 1);

    // once the disk recovers, stopping still persists what was buffered
    std::fs::remove_dir(&blocker).unwrap();
    appmetr.hard_stop().unwrap();
    let reopened = FileStorage::open(temp_dir.path()).unwrap();
    assert_eq!(reopened.pending_batch_ids(), vec![0]);
}
