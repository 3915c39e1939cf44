use super::common::{BATCH_FILE_PREFIX, batch_file_name, parse_batch_id};
use super::file_io::FileIo;
use crate::error::StorageError;
use log::warn;
use std::path::{Path, PathBuf};

/// How batch files are named, read and deleted inside a queue directory.
///
/// [`super::FileStorage`] owns ordering and the id sequence; the format only maps ids to
/// files. Swapping the format is how older on-disk layouts stay readable.
pub trait BatchFileFormat: Send + Sync {
    /// Batch id encoded in a directory entry name, if this format owns the entry.
    fn batch_id_from_file_name(&self, file_name: &str) -> Option<u64>;

    /// Encoded bytes for `batch_id`, or `None` when nothing usable is on disk.
    fn read_batch(&self, dir: &Path, batch_id: u64) -> Result<Option<Vec<u8>>, StorageError>;

    fn delete_batch(&self, dir: &Path, batch_id: u64) -> Result<(), StorageError>;

    /// Path that new batches are written to.
    fn batch_path(&self, dir: &Path, batch_id: u64) -> PathBuf;
}

/// `batchFile-{id:011}` files holding exactly the bytes that get uploaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentFormat;

impl BatchFileFormat for CurrentFormat {
    fn batch_id_from_file_name(&self, file_name: &str) -> Option<u64> {
        parse_batch_id(file_name, BATCH_FILE_PREFIX)
    }

    fn read_batch(&self, dir: &Path, batch_id: u64) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.batch_path(dir, batch_id);
        match FileIo::read_if_exists(&path)? {
            Some(bytes) if bytes.is_empty() => {
                warn!("Batch file {path:?} is empty, removing it");
                FileIo::remove_if_exists(&path)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn delete_batch(&self, dir: &Path, batch_id: u64) -> Result<(), StorageError> {
        let path = self.batch_path(dir, batch_id);
        if !FileIo::remove_if_exists(&path)? {
            warn!("Batch file {path:?} was already gone");
        }
        Ok(())
    }

    fn batch_path(&self, dir: &Path, batch_id: u64) -> PathBuf {
        dir.join(batch_file_name(BATCH_FILE_PREFIX, batch_id))
    }
}
