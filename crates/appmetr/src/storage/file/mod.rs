pub mod common;
pub mod file_io;
pub mod file_storage;
pub mod format;
pub mod legacy;
pub mod rebatch;

pub use common::SyncMode;
pub use file_io::FileIo;
pub use file_storage::FileStorage;
pub use format::{BatchFileFormat, CurrentFormat};
pub use legacy::{LegacyFallbackFormat, LegacyFileStorage};
pub use rebatch::{REBATCH_THRESHOLD_ITEM_COUNT, RebatchReport, rebatch};
