use crate::action::Action;
use crate::batch::BinaryBatch;
use crate::encoding::BatchFactory;
use crate::error::StorageError;
use std::time::Duration;

/// Slice used by blocking reads so waiting consumers can notice shutdown.
pub const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Bounded FIFO queue of encoded batches shared by producers and one uploading consumer.
///
/// Implementations are internally synchronized: any number of threads may call
/// [`store`](BatchStorage::store) while a single consumer loops over
/// [`get_timeout`](BatchStorage::get_timeout) and [`remove`](BatchStorage::remove).
pub trait BatchStorage: Send + Sync {
    /// Encode `actions` under a fresh batch id and append the result.
    ///
    /// Returns `Ok(false)` when the append was rejected for capacity. Depending on the
    /// implementation this may block until space is available.
    fn store(&self, actions: &[Action], factory: &dyn BatchFactory) -> Result<bool, StorageError>;

    /// Like [`store`](BatchStorage::store) but never waits for capacity: a full queue
    /// returns `Ok(false)`. Storages that never block can keep the default.
    fn try_store(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
    ) -> Result<bool, StorageError> {
        self.store(actions, factory)
    }

    /// Wait up to `timeout` for the oldest batch and return it without removing it.
    fn get_timeout(&self, timeout: Duration) -> Result<Option<BinaryBatch>, StorageError>;

    /// Block until a batch is queued and return the oldest one without removing it.
    fn get(&self) -> Result<BinaryBatch, StorageError> {
        loop {
            if let Some(batch) = self.get_timeout(WAIT_SLICE)? {
                return Ok(batch);
            }
        }
    }

    fn peek(&self) -> Result<BinaryBatch, StorageError> {
        self.get()
    }

    /// Drop the oldest batch. Only valid after it was returned by a read.
    fn remove(&self) -> Result<(), StorageError>;

    /// True when queued batches survive a process restart.
    fn is_persistent(&self) -> bool {
        false
    }

    fn is_empty(&self) -> bool;

    /// Release background resources. Stores after shutdown may fail.
    fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
