use super::file_storage::FileStorage;
use crate::batch::BinaryBatch;
use crate::encoding::{DeflateJsonBatchFactory, decode_batch};
use crate::error::StorageError;
use crate::storage::r#trait::BatchStorage;
use log::{debug, info, warn};
use std::time::Duration;

/// Batches holding more actions than this are split by [`rebatch`].
pub const REBATCH_THRESHOLD_ITEM_COUNT: usize = 1000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebatchReport {
    pub examined: usize,
    pub written: usize,
    pub split: usize,
    pub skipped: usize,
}

/// Split oversized batches of an idle queue into batches of at most `max_actions_per_batch`.
///
/// When any pending batch needs splitting, every pending batch is rewritten at the tail in
/// its original order, so the queue stays FIFO. Undecodable batches are carried over as raw
/// bytes. Nothing is rewritten when no batch exceeds the limit.
pub fn rebatch(
    storage: &FileStorage,
    max_actions_per_batch: usize,
) -> Result<RebatchReport, StorageError> {
    let max_actions = max_actions_per_batch.max(1);
    let mut report = RebatchReport::default();

    if !needs_rebatch(storage, max_actions)? {
        report.examined = storage.pending_batch_ids().len();
        debug!("No batch in {:?} exceeds {max_actions} actions", storage.directory());
        return Ok(report);
    }

    let boundary = storage.next_batch_id();
    while let Some(head) = storage.get_timeout(Duration::ZERO)? {
        if head.batch_id() >= boundary {
            break;
        }
        report.examined += 1;

        match decode_batch(head.bytes()) {
            Ok(batch) => {
                let factory = DeflateJsonBatchFactory::new(batch.server_id.clone());
                let chunks: Vec<_> = batch.batch.chunks(max_actions).collect();
                if chunks.len() > 1 {
                    report.split += 1;
                }
                for chunk in chunks {
                    storage.store(chunk, &factory)?;
                    report.written += 1;
                }
            }
            Err(e) => {
                warn!("Carrying over undecodable batch {}: {e}", head.batch_id());
                let carried = BinaryBatch::new(storage.next_batch_id(), head.into_bytes());
                storage.write_batch(carried)?;
                report.skipped += 1;
            }
        }
        storage.remove()?;
    }

    info!(
        "Rebatched {:?}: examined {}, wrote {}, split {}, skipped {}",
        storage.directory(),
        report.examined,
        report.written,
        report.split,
        report.skipped
    );
    Ok(report)
}

fn needs_rebatch(storage: &FileStorage, max_actions: usize) -> Result<bool, StorageError> {
    for batch_id in storage.pending_batch_ids() {
        let Some(binary) = storage.read_batch(batch_id)? else {
            continue;
        };
        if let Ok(batch) = decode_batch(binary.bytes()) {
            if batch.len() > max_actions {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
