pub mod action;
pub mod batch;
mod buffer;
pub mod clock;
pub mod config;
pub mod encoding;
pub mod error;
pub mod orchestrator;
pub mod sender;
pub mod storage;
pub mod telemetry;
pub mod timer;
mod uploader;

pub use action::{Action, ActionKind, ExperimentStatus, Payment, Properties};
pub use batch::{Batch, BinaryBatch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppMetrConfig;
pub use encoding::{BatchFactory, DeflateJsonBatchFactory};
pub use error::{AppMetrError, SendError, StorageError, StorageErrorSource, UploadError};
pub use orchestrator::AppMetr;
pub use sender::BatchSender;
pub use timer::FlushTimer;
pub use uploader::UploadStats;

// Re-export log macros for convenience
pub use log::{debug, error, info, trace, warn};
