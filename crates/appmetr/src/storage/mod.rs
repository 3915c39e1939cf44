pub mod backend;
pub mod buffered;
pub mod file;
pub mod heap;
pub mod r#trait;

// Re-exports for ergonomics
pub use backend::StorageBackend;
pub use buffered::BufferedFileStorage;
pub use file::{FileStorage, LegacyFileStorage, SyncMode};
pub use heap::{HeapStorage, OverflowPolicy};
pub use r#trait::{BatchStorage, WAIT_SLICE};
