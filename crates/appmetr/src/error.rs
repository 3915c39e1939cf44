use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum AppMetrError {
    NotRunning,
    AlreadyRunning,
    Stopped,
    UploadFailed(UploadError),
    Storage(StorageError),
    InvalidConfig { field: String, reason: String },
    ThreadSpawn { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ReadFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    WriteFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    InsufficientSpace {
        context: String,
    },
    PermissionDenied {
        context: String,
    },
    DataCorruption {
        context: String,
        details: String,
    },
    Unavailable {
        context: String,
    },
    ShutDown {
        context: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorSource {
    Io(String),
    Serialization(String),
    Custom(String),
}

/// Errors a [`crate::BatchSender`] reports when a batch can never be delivered by retrying.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    InvalidUrl { url: String, reason: String },
    ClientBuild { reason: String },
    Protocol { reason: String },
}

/// Cause latched by the uploader when it gives up.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadError {
    Sender(SendError),
    Storage(StorageError),
    Panicked { reason: String },
}

impl fmt::Display for AppMetrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMetrError::NotRunning => write!(f, "AppMetr is not running"),
            AppMetrError::AlreadyRunning => write!(f, "AppMetr is already running"),
            AppMetrError::Stopped => write!(f, "AppMetr was stopped and cannot be restarted"),
            AppMetrError::UploadFailed(err) => write!(f, "Uploader stopped: {err}"),
            AppMetrError::Storage(err) => write!(f, "Storage error: {err}"),
            AppMetrError::InvalidConfig { field, reason } => {
                write!(f, "Invalid config field '{field}': {reason}")
            }
            AppMetrError::ThreadSpawn { reason } => {
                write!(f, "Failed to spawn worker thread: {reason}")
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed { context, source } => {
                write!(f, "Read failed in {context}: {source}")
            }
            StorageError::WriteFailed { context, source } => {
                write!(f, "Write failed in {context}: {source}")
            }
            StorageError::InsufficientSpace { context } => {
                write!(f, "Insufficient space in {context}")
            }
            StorageError::PermissionDenied { context } => {
                write!(f, "Permission denied in {context}")
            }
            StorageError::DataCorruption { context, details } => {
                write!(f, "Data corruption in {context}: {details}")
            }
            StorageError::Unavailable { context } => {
                write!(f, "Storage unavailable in {context}")
            }
            StorageError::ShutDown { context } => write!(f, "Storage shut down in {context}"),
        }
    }
}

impl fmt::Display for StorageErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorSource::Io(msg) => write!(f, "IO error: {msg}"),
            StorageErrorSource::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            StorageErrorSource::Custom(msg) => write!(f, "Custom error: {msg}"),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::InvalidUrl { url, reason } => write!(f, "Invalid url '{url}': {reason}"),
            SendError::ClientBuild { reason } => write!(f, "Failed to build client: {reason}"),
            SendError::Protocol { reason } => write!(f, "Protocol error: {reason}"),
        }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Sender(err) => write!(f, "sender failed: {err}"),
            UploadError::Storage(err) => write!(f, "storage failed: {err}"),
            UploadError::Panicked { reason } => write!(f, "sender panicked: {reason}"),
        }
    }
}

impl std::error::Error for AppMetrError {}
impl std::error::Error for StorageError {}
impl std::error::Error for StorageErrorSource {}
impl std::error::Error for SendError {}
impl std::error::Error for UploadError {}

impl AppMetrError {
    /// True for conditions the caller can fix by changing how the SDK is driven.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppMetrError::NotRunning
                | AppMetrError::AlreadyRunning
                | AppMetrError::Stopped
                | AppMetrError::InvalidConfig { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppMetrError::UploadFailed(_) | AppMetrError::Storage(_) | AppMetrError::ThreadSpawn { .. }
        )
    }

    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            AppMetrError::Storage(StorageError::InsufficientSpace { .. })
        )
    }

    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        AppMetrError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for AppMetrError {
    fn from(err: StorageError) -> Self {
        AppMetrError::Storage(err)
    }
}

impl From<UploadError> for AppMetrError {
    fn from(err: UploadError) -> Self {
        AppMetrError::UploadFailed(err)
    }
}

impl From<SendError> for UploadError {
    fn from(err: SendError) -> Self {
        UploadError::Sender(err)
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        UploadError::Storage(err)
    }
}

impl StorageError {
    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                context: context.to_string(),
            },
            std::io::ErrorKind::OutOfMemory | std::io::ErrorKind::StorageFull => {
                StorageError::InsufficientSpace {
                    context: context.to_string(),
                }
            }
            std::io::ErrorKind::NotFound | std::io::ErrorKind::UnexpectedEof => {
                StorageError::ReadFailed {
                    context: context.to_string(),
                    source: Box::new(StorageErrorSource::Io(e.to_string())),
                }
            }
            _ => StorageError::WriteFailed {
                context: context.to_string(),
                source: Box::new(StorageErrorSource::Io(e.to_string())),
            },
        }
    }

    pub fn from_serialization_error(e: impl std::fmt::Display, context: &str) -> Self {
        StorageError::DataCorruption {
            context: context.to_string(),
            details: e.to_string(),
        }
    }

    pub fn shut_down(context: &str) -> Self {
        StorageError::ShutDown {
            context: context.to_string(),
        }
    }
}
