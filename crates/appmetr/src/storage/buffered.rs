use crate::action::Action;
use crate::batch::BinaryBatch;
use crate::encoding::BatchFactory;
use crate::error::StorageError;
use crate::storage::file::FileStorage;
use crate::storage::heap::HeapStorage;
use crate::storage::r#trait::{BatchStorage, WAIT_SLICE};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

struct Shared {
    heap: HeapStorage,
    file: FileStorage,
    next_batch_id: Mutex<u64>,
    drain_error: Mutex<Option<StorageError>>,
    stopped: AtomicBool,
}

/// Disk queue fronted by a bounded in-memory staging heap.
///
/// `store` only touches the heap; a drain thread moves batches to the [`FileStorage`].
/// Readers see a batch once it is on disk. The first drain failure is latched and
/// returned by every later `store`.
pub struct BufferedFileStorage {
    shared: Arc<Shared>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedFileStorage {
    pub fn open<P: AsRef<Path>>(dir: P, heap: HeapStorage) -> Result<Self, StorageError> {
        Self::with_file_storage(FileStorage::open(dir)?, heap)
    }

    pub fn with_file_storage(file: FileStorage, heap: HeapStorage) -> Result<Self, StorageError> {
        let thread_name = format!(
            "appmetr-drain-{}",
            file.directory()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let shared = Arc::new(Shared {
            next_batch_id: Mutex::new(file.next_batch_id()),
            heap,
            file,
            drain_error: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let drain_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || drain_loop(drain_shared))
            .map_err(|e| StorageError::Unavailable {
                context: format!("buffered storage drain thread: {e}"),
            })?;

        Ok(Self {
            shared,
            drain: Mutex::new(Some(handle)),
        })
    }

    pub fn file_storage(&self) -> &FileStorage {
        &self.shared.file
    }

    /// Batches accepted by `store` that are not yet on disk.
    pub fn buffered_len(&self) -> usize {
        self.shared.heap.len()
    }

    pub fn last_drain_error(&self) -> Option<StorageError> {
        self.shared.drain_error.lock().clone()
    }
}

fn drain_loop(shared: Arc<Shared>) {
    debug!("Drain thread started for {:?}", shared.file.directory());
    loop {
        match shared.heap.get_timeout(WAIT_SLICE) {
            Ok(Some(batch)) => {
                if let Err(e) = move_to_disk(&shared, batch) {
                    error!("Buffered storage failed to persist batch: {e}");
                    *shared.drain_error.lock() = Some(e);
                    // wake producers blocked on a heap that will never drain again
                    if let Err(e) = shared.heap.shutdown() {
                        warn!("Closing the staging heap after a drain failure failed: {e}");
                    }
                    break;
                }
            }
            Ok(None) => {
                if shared.stopped.load(Ordering::SeqCst) && shared.heap.is_empty() {
                    break;
                }
            }
            Err(e) => {
                error!("Buffered storage failed to read staged batch: {e}");
                *shared.drain_error.lock() = Some(e);
                break;
            }
        }
    }
    debug!("Drain thread stopped for {:?}", shared.file.directory());
}

fn move_to_disk(shared: &Shared, batch: BinaryBatch) -> Result<(), StorageError> {
    shared.file.write_batch(batch)?;
    shared.heap.remove()
}

impl BufferedFileStorage {
    fn stage(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
        wait_for_space: bool,
    ) -> Result<bool, StorageError> {
        let mut next_batch_id = self.shared.next_batch_id.lock();
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::shut_down("buffered storage store"));
        }
        if let Some(e) = self.shared.drain_error.lock().clone() {
            return Err(e);
        }

        let batch = factory.create_batch(actions, *next_batch_id)?;
        let accepted = if wait_for_space {
            self.shared.heap.push(batch)?
        } else {
            self.shared.heap.try_push(batch)?
        };
        if accepted {
            *next_batch_id += 1;
        }
        Ok(accepted)
    }
}

impl BatchStorage for BufferedFileStorage {
    fn store(&self, actions: &[Action], factory: &dyn BatchFactory) -> Result<bool, StorageError> {
        self.stage(actions, factory, true)
    }

    fn try_store(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
    ) -> Result<bool, StorageError> {
        self.stage(actions, factory, false)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<Option<BinaryBatch>, StorageError> {
        self.shared.file.get_timeout(timeout)
    }

    fn remove(&self) -> Result<(), StorageError> {
        self.shared.file.remove()
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.shared.heap.is_empty() && self.shared.file.is_empty()
    }

    /// Stop accepting stores, wait for the heap to reach disk, then join the drain thread.
    fn shutdown(&self) -> Result<(), StorageError> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        // a store that passed the `stopped` check must not land after the drain exits
        if let Err(e) = self.shared.heap.shutdown() {
            warn!("Closing the staging heap for {:?} failed: {e}", self.shared.file.directory());
        }
        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Drain thread for {:?} panicked", self.shared.file.directory());
            }
            info!(
                "Buffered storage at {:?} shut down",
                self.shared.file.directory()
            );
        }
        match self.last_drain_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for BufferedFileStorage {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Buffered storage shut down with a latched error: {e}");
        }
    }
}
