use super::common::{INDEX_FILE_NAME, SyncMode, TMP_SUFFIX, ensure_directory_exists};
use super::file_io::FileIo;
use super::format::{BatchFileFormat, CurrentFormat};
use crate::action::Action;
use crate::batch::BinaryBatch;
use crate::encoding::BatchFactory;
use crate::error::{StorageError, StorageErrorSource};
use crate::storage::r#trait::BatchStorage;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

struct FileState {
    pending: VecDeque<u64>,
    next_batch_id: u64,
}

/// Disk-backed batch queue: one file per batch plus a `lastBatchId` file holding the next id.
///
/// The directory must be owned by a single process; nothing guards against two
/// instances allocating the same ids.
pub struct FileStorage {
    dir: PathBuf,
    index_path: PathBuf,
    sync_mode: SyncMode,
    format: Box<dyn BatchFileFormat>,
    state: Mutex<FileState>,
    batch_added: Condvar,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        Self::open_with_format(dir, Box::new(CurrentFormat))
    }

    /// Open `dir` reading batches through `format`, recovering pending ids and the id sequence.
    pub fn open_with_format<P: AsRef<Path>>(
        dir: P,
        format: Box<dyn BatchFileFormat>,
    ) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        ensure_directory_exists(&dir).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to create queue directory {dir:?}"))
        })?;
        let index_path = dir.join(INDEX_FILE_NAME);

        let pending = scan_pending_ids(&dir, format.as_ref())?;
        let from_index = read_index(&index_path)?;
        let after_highest = pending.back().map_or(0, |id| id + 1);
        let next_batch_id = from_index.unwrap_or(0).max(after_highest);

        info!(
            "Opened batch queue at {dir:?}: {} pending, next batch id {next_batch_id}",
            pending.len()
        );

        Ok(Self {
            dir,
            index_path,
            sync_mode: SyncMode::None,
            format,
            state: Mutex::new(FileState {
                pending,
                next_batch_id,
            }),
            batch_added: Condvar::new(),
        })
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn next_batch_id(&self) -> u64 {
        self.state.lock().next_batch_id
    }

    pub fn pending_batch_ids(&self) -> Vec<u64> {
        self.state.lock().pending.iter().copied().collect()
    }

    /// Read a pending batch by id without touching queue order.
    pub fn read_batch(&self, batch_id: u64) -> Result<Option<BinaryBatch>, StorageError> {
        Ok(self
            .format
            .read_batch(&self.dir, batch_id)?
            .map(|bytes| BinaryBatch::new(batch_id, bytes)))
    }

    /// Persist an already encoded batch under its own id and queue it.
    pub fn write_batch(&self, batch: BinaryBatch) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, batch)
    }

    fn write_locked(
        &self,
        state: &mut MutexGuard<'_, FileState>,
        batch: BinaryBatch,
    ) -> Result<(), StorageError> {
        let batch_id = batch.batch_id();
        if batch_id < state.next_batch_id {
            return Err(StorageError::WriteFailed {
                context: format!("batch queue {:?}", self.dir),
                source: Box::new(StorageErrorSource::Custom(format!(
                    "batch id {batch_id} is behind next id {}",
                    state.next_batch_id
                ))),
            });
        }

        // index first: a failed write leaves an unused id, never a queued batch
        let next_batch_id = batch_id + 1;
        self.persist_index(next_batch_id)?;
        state.next_batch_id = next_batch_id;

        let path = self.format.batch_path(&self.dir, batch_id);
        FileIo::write_atomically(&path, batch.bytes(), self.sync_mode)?;
        state.pending.push_back(batch_id);

        debug!("Stored batch {batch_id} ({} bytes)", batch.len());
        self.batch_added.notify_all();
        Ok(())
    }

    fn persist_index(&self, next_batch_id: u64) -> Result<(), StorageError> {
        FileIo::write_atomically(
            &self.index_path,
            next_batch_id.to_string().as_bytes(),
            self.sync_mode,
        )
    }

    /// Oldest readable batch, skipping ids whose files are missing or empty.
    fn read_oldest(&self, state: &mut FileState) -> Result<Option<BinaryBatch>, StorageError> {
        while let Some(&batch_id) = state.pending.front() {
            match self.format.read_batch(&self.dir, batch_id)? {
                Some(bytes) => return Ok(Some(BinaryBatch::new(batch_id, bytes))),
                None => {
                    warn!("Batch {batch_id} in {:?} is missing or unreadable, skipping", self.dir);
                    state.pending.pop_front();
                }
            }
        }
        Ok(None)
    }
}

impl BatchStorage for FileStorage {
    fn store(&self, actions: &[Action], factory: &dyn BatchFactory) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        let batch = factory.create_batch(actions, state.next_batch_id)?;
        self.write_locked(&mut state, batch)?;
        Ok(true)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<Option<BinaryBatch>, StorageError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(batch) = self.read_oldest(&mut state)? {
                return Ok(Some(batch));
            }
            if self.batch_added.wait_until(&mut state, deadline).timed_out() {
                return self.read_oldest(&mut state);
            }
        }
    }

    fn remove(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let Some(&batch_id) = state.pending.front() else {
            debug!("Remove called on an empty batch queue {:?}", self.dir);
            return Ok(());
        };
        self.format.delete_batch(&self.dir, batch_id)?;
        state.pending.pop_front();
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}

fn scan_pending_ids(
    dir: &Path,
    format: &dyn BatchFileFormat,
) -> Result<VecDeque<u64>, StorageError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StorageError::from_io_error(e, &format!("Failed to scan {dir:?}")))?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| StorageError::from_io_error(e, &format!("Failed to scan {dir:?}")))?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };

        if file_name.ends_with(TMP_SUFFIX) {
            warn!("Removing leftover temp file {file_name} from {dir:?}");
            FileIo::remove_if_exists(&entry.path())?;
        } else if let Some(batch_id) = format.batch_id_from_file_name(&file_name) {
            ids.push(batch_id);
        }
    }

    ids.sort_unstable();
    ids.dedup();
    Ok(ids.into())
}

fn read_index(index_path: &Path) -> Result<Option<u64>, StorageError> {
    let Some(bytes) = FileIo::read_if_exists(index_path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    match text.trim().parse::<u64>() {
        Ok(next_batch_id) => Ok(Some(next_batch_id)),
        Err(e) => {
            warn!("Ignoring unreadable batch index {index_path:?} ({text:?}): {e}");
            Ok(None)
        }
    }
}
