//! Read-only support for queue directories written by older SDK versions.
//!
//! Old builds wrote `batchFile#{id:011}` files holding the whole typed batch object.
//! They are re-encoded into the current wire format when read, so the uploader never
//! sees the difference.

use super::common::{
    CORRUPT_SUFFIX, LEGACY_BATCH_FILE_PREFIX, batch_file_name, parse_batch_id,
};
use super::file_io::FileIo;
use super::file_storage::FileStorage;
use super::format::{BatchFileFormat, CurrentFormat};
use crate::encoding::{decode_typed_batch, encode_batch};
use crate::error::StorageError;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Current-format reads with a fallback to the legacy file of the same id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyFallbackFormat {
    current: CurrentFormat,
}

impl LegacyFallbackFormat {
    fn legacy_path(&self, dir: &Path, batch_id: u64) -> PathBuf {
        dir.join(batch_file_name(LEGACY_BATCH_FILE_PREFIX, batch_id))
    }

    fn quarantine(&self, path: &Path) -> Result<(), StorageError> {
        let target = FileIo::with_suffix(path, CORRUPT_SUFFIX);
        FileIo::rename(path, &target)
    }
}

impl BatchFileFormat for LegacyFallbackFormat {
    fn batch_id_from_file_name(&self, file_name: &str) -> Option<u64> {
        self.current
            .batch_id_from_file_name(file_name)
            .or_else(|| parse_batch_id(file_name, LEGACY_BATCH_FILE_PREFIX))
    }

    fn read_batch(&self, dir: &Path, batch_id: u64) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(bytes) = self.current.read_batch(dir, batch_id)? {
            return Ok(Some(bytes));
        }

        let path = self.legacy_path(dir, batch_id);
        let Some(bytes) = FileIo::read_if_exists(&path)? else {
            return Ok(None);
        };

        match decode_typed_batch(&bytes).and_then(|batch| encode_batch(&batch)) {
            Ok(encoded) => {
                info!("Migrated legacy batch file {path:?}");
                Ok(Some(encoded))
            }
            Err(e) => {
                warn!("Legacy batch file {path:?} is unreadable, moving it aside: {e}");
                self.quarantine(&path)?;
                Ok(None)
            }
        }
    }

    fn delete_batch(&self, dir: &Path, batch_id: u64) -> Result<(), StorageError> {
        if FileIo::remove_if_exists(&self.current.batch_path(dir, batch_id))? {
            return Ok(());
        }
        let legacy = self.legacy_path(dir, batch_id);
        if !FileIo::remove_if_exists(&legacy)? {
            warn!("Neither current nor legacy file exists for batch {batch_id} in {dir:?}");
        }
        Ok(())
    }

    fn batch_path(&self, dir: &Path, batch_id: u64) -> PathBuf {
        self.current.batch_path(dir, batch_id)
    }
}

/// Constructor for a [`FileStorage`] that can drain a legacy queue directory.
pub struct LegacyFileStorage;

impl LegacyFileStorage {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<FileStorage, StorageError> {
        FileStorage::open_with_format(dir, Box::new(LegacyFallbackFormat::default()))
    }
}
