use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Leave flushing to the OS page cache.
    #[default]
    None,
    /// fsync every batch file and index update before acknowledging the store.
    Immediate,
}

pub const BATCH_FILE_PREFIX: &str = "batchFile-";
pub const LEGACY_BATCH_FILE_PREFIX: &str = "batchFile#";
pub const INDEX_FILE_NAME: &str = "lastBatchId";
pub const TMP_SUFFIX: &str = ".tmp";
pub const CORRUPT_SUFFIX: &str = ".corrupt";

// ================================================================================================
// FILE NAMING
// ================================================================================================

pub fn batch_file_name(prefix: &str, batch_id: u64) -> String {
    format!("{prefix}{batch_id:011}")
}

/// Parse `<prefix><digits>`; anything else (temp files, quarantined files) is not a batch.
pub fn parse_batch_id(file_name: &str, prefix: &str) -> Option<u64> {
    let digits = file_name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn ensure_directory_exists<P: AsRef<Path>>(dir: P) -> Result<(), std::io::Error> {
    let dir = dir.as_ref();
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
