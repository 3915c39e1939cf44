use super::common::{SyncMode, TMP_SUFFIX};
use crate::error::StorageError;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Whole-file helpers for the one-file-per-batch queue layout.
pub struct FileIo;

impl FileIo {
    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn create_with_write_truncate_permissions(path: &Path) -> Result<File, StorageError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                StorageError::from_io_error(
                    e,
                    &format!("Failed to create file with write+truncate permissions: {path:?}"),
                )
            })
    }

    /// Read a whole file, returning `None` when it does not exist.
    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::from_io_error(
                    e,
                    &format!("Failed to open file with read-only permissions: {path:?}"),
                ));
            }
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to read {path:?}")))?;
        Ok(Some(data))
    }

    /// Write `data` to a temp sibling and rename it over `path`, so readers never see a torn file.
    #[tracing::instrument(level = "debug", skip(path, data), fields(path = %path.display(), len = data.len()))]
    pub fn write_atomically(
        path: &Path,
        data: &[u8],
        sync_mode: SyncMode,
    ) -> Result<(), StorageError> {
        let tmp_path = Self::tmp_path(path);
        let mut handle = Self::create_with_write_truncate_permissions(&tmp_path)?;
        handle
            .write_all(data)
            .map_err(|e| StorageError::from_io_error(e, "Failed to write data"))?;
        if sync_mode == SyncMode::Immediate {
            Self::synchronize_to_disk(&mut handle)?;
        }
        drop(handle);

        std::fs::rename(&tmp_path, path).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to rename {tmp_path:?} to {path:?}"))
        })
    }

    /// Delete a file. Returns whether it existed.
    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io_error(
                e,
                &format!("Failed to delete {path:?}"),
            )),
        }
    }

    #[tracing::instrument(level = "debug", skip(from, to), fields(from = %from.display(), to = %to.display()))]
    pub fn rename(from: &Path, to: &Path) -> Result<(), StorageError> {
        std::fs::rename(from, to).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to rename {from:?} to {to:?}"))
        })
    }

    #[tracing::instrument(level = "debug", skip(handle))]
    pub fn synchronize_to_disk(handle: &mut File) -> Result<(), StorageError> {
        handle
            .sync_all()
            .map_err(|e| StorageError::from_io_error(e, "Failed to sync file to disk"))
    }

    pub fn tmp_path(path: &Path) -> PathBuf {
        Self::with_suffix(path, TMP_SUFFIX)
    }

    pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}
