use crate::error::StorageError;
use crate::storage::buffered::BufferedFileStorage;
use crate::storage::file::{FileStorage, LegacyFileStorage, SyncMode};
use crate::storage::heap::{HeapStorage, OverflowPolicy};
use crate::storage::r#trait::BatchStorage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Declarative choice of batch storage, as it appears in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    Heap {
        #[serde(default)]
        max_bytes: u64,
    },
    NonBlockingHeap {
        max_bytes: u64,
    },
    File {
        data_dir: PathBuf,
        #[serde(default)]
        sync_mode: SyncMode,
    },
    BufferedFile {
        data_dir: PathBuf,
        #[serde(default)]
        sync_mode: SyncMode,
        #[serde(default)]
        buffer_bytes: u64,
        #[serde(default = "default_buffer_policy")]
        overflow: OverflowPolicy,
    },
    LegacyFile {
        data_dir: PathBuf,
        #[serde(default)]
        sync_mode: SyncMode,
    },
}

fn default_buffer_policy() -> OverflowPolicy {
    OverflowPolicy::Block
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::new_heap()
    }
}

impl StorageBackend {
    pub fn new_heap() -> Self {
        StorageBackend::Heap { max_bytes: 0 }
    }

    pub fn new_file_with_path<P: AsRef<Path>>(sync_mode: SyncMode, data_dir: P) -> Self {
        StorageBackend::File {
            data_dir: data_dir.as_ref().to_path_buf(),
            sync_mode,
        }
    }

    pub fn is_persistent(&self) -> bool {
        !matches!(
            self,
            StorageBackend::Heap { .. } | StorageBackend::NonBlockingHeap { .. }
        )
    }

    pub fn data_dir(&self) -> Option<&Path> {
        match self {
            StorageBackend::Heap { .. } | StorageBackend::NonBlockingHeap { .. } => None,
            StorageBackend::File { data_dir, .. }
            | StorageBackend::BufferedFile { data_dir, .. }
            | StorageBackend::LegacyFile { data_dir, .. } => Some(data_dir),
        }
    }

    pub fn build(&self) -> Result<Arc<dyn BatchStorage>, StorageError> {
        let storage: Arc<dyn BatchStorage> = match self {
            StorageBackend::Heap { max_bytes } => {
                Arc::new(HeapStorage::new().with_max_bytes(*max_bytes))
            }
            StorageBackend::NonBlockingHeap { max_bytes } => {
                Arc::new(HeapStorage::non_blocking(*max_bytes))
            }
            StorageBackend::File {
                data_dir,
                sync_mode,
            } => Arc::new(FileStorage::open(data_dir)?.with_sync_mode(*sync_mode)),
            StorageBackend::BufferedFile {
                data_dir,
                sync_mode,
                buffer_bytes,
                overflow,
            } => {
                let file = FileStorage::open(data_dir)?.with_sync_mode(*sync_mode);
                let heap = HeapStorage::with_policy(*overflow).with_max_bytes(*buffer_bytes);
                Arc::new(BufferedFileStorage::with_file_storage(file, heap)?)
            }
            StorageBackend::LegacyFile {
                data_dir,
                sync_mode,
            } => Arc::new(LegacyFileStorage::open(data_dir)?.with_sync_mode(*sync_mode)),
        };
        Ok(storage)
    }
}
