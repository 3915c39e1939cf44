use super::test_utilities::*;
use appmetr::storage::file::{REBATCH_THRESHOLD_ITEM_COUNT, rebatch};
use appmetr::storage::{BatchStorage, FileStorage};
use appmetr::{BinaryBatch, DeflateJsonBatchFactory};
use std::time::Duration;
use test_log::test;

fn drain(storage: &FileStorage) -> Vec<BinaryBatch> {
    let mut batches = Vec::new();
    while let Some(batch) = storage.get_timeout(Duration::ZERO).unwrap() {
        storage.remove().unwrap();
        batches.push(batch);
    }
    batches
}

#[test]
fn test_oversized_batch_is_split_preserving_order() {
    let temp_dir = create_test_dir("rebatch_split");
    let storage = FileStorage::open(temp_dir.path()).unwrap();
    storage.store(&test_actions("big", 5), &test_factory()).unwrap();
    storage.store(&test_actions("small", 1), &test_factory()).unwrap();

    let report = rebatch(&storage, 2).unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.split, 1);
    assert_eq!(report.written, 4);
    assert_eq!(report.skipped, 0);

    let batches = drain(&storage);
    let names: Vec<Vec<String>> = batches.iter().map(|b| event_names(&decode(b))).collect();
    assert_eq!(
        names,
        vec![
            vec!["big-0", "big-1"],
            vec!["big-2", "big-3"],
            vec!["big-4"],
            vec!["small-0"],
        ]
    );
    assert!(batches.windows(2).all(|w| w[0].batch_id() < w[1].batch_id()));
    assert!(batches.iter().all(|b| b.batch_id() >= 2));
}

#[test]
fn test_rebatch_keeps_server_id() {
    let temp_dir = create_test_dir("rebatch_server");
    let storage = FileStorage::open(temp_dir.path()).unwrap();
    storage
        .store(&test_actions("a", 3), &DeflateJsonBatchFactory::new("origin"))
        .unwrap();

    rebatch(&storage, 1).unwrap();

    for batch in drain(&storage) {
        assert_eq!(decode(&batch).server_id, "origin");
    }
}

#[test]
fn test_queue_within_limit_is_untouched() {
    let temp_dir = create_test_dir("rebatch_noop");
    let storage = FileStorage::open(temp_dir.path()).unwrap();
    storage.store(&test_actions("a", 3), &test_factory()).unwrap();

    let report = rebatch(&storage, REBATCH_THRESHOLD_ITEM_COUNT).unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.written, 0);
    assert_eq!(storage.pending_batch_ids(), vec![0]);
}

#[test]
fn test_undecodable_batch_is_carried_over() {
    let temp_dir = create_test_dir("rebatch_skip");
    let storage = FileStorage::open(temp_dir.path()).unwrap();
    storage.write_batch(BinaryBatch::new(0, b"garbage".to_vec())).unwrap();
    storage.store(&test_actions("big", 3), &test_factory()).unwrap();

    let report = rebatch(&storage, 2).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written, 2);

    let batches = drain(&storage);
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].bytes(), b"garbage");
    assert_eq!(event_names(&decode(&batches[1])), vec!["big-0", "big-1"]);
}
