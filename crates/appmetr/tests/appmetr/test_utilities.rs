use appmetr::storage::{BatchStorage, HeapStorage};
use appmetr::{Action, AppMetrConfig, BatchFactory, BinaryBatch, SendError, StorageError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TEST_URL: &str = "http://localhost:9/api";
pub const TEST_TOKEN: &str = "test-token";

/// Config with short retry pauses and a flush period long enough to never fire on its own.
pub fn test_config() -> AppMetrConfig {
    AppMetrConfig {
        flush_period: Duration::from_secs(3600),
        failed_upload_timeout: Duration::from_millis(10),
        hard_stop_grace: Duration::from_millis(200),
        ..AppMetrConfig::new(TEST_TOKEN, TEST_URL)
    }
}

pub fn create_test_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("appmetr_{prefix}_"))
        .tempdir()
        .expect("Failed to create temporary directory")
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Senders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    Fail,
    Fatal,
    Panic,
}

#[derive(Debug, Clone)]
pub struct SentBatch {
    pub url: String,
    pub token: String,
    pub bytes: Vec<u8>,
}

/// Sender that answers from a script, then repeats `fallback` forever.
pub struct ScriptedSender {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    sent: Mutex<Vec<SentBatch>>,
}

impl ScriptedSender {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(Vec::new(), Reply::Accept)
    }

    pub fn failing() -> Arc<Self> {
        Self::new(Vec::new(), Reply::Fail)
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().clone()
    }
}

impl appmetr::BatchSender for ScriptedSender {
    fn send(&self, url: &str, token: &str, batch: &[u8]) -> Result<bool, SendError> {
        self.sent.lock().push(SentBatch {
            url: url.to_string(),
            token: token.to_string(),
            bytes: batch.to_vec(),
        });
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock());
        match reply {
            Reply::Accept => Ok(true),
            Reply::Fail => Ok(false),
            Reply::Fatal => Err(SendError::Protocol {
                reason: "scripted failure".to_string(),
            }),
            Reply::Panic => panic!("scripted panic"),
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Heap storage that remembers the action lists handed to every `store` call.
#[derive(Default)]
pub struct RecordingStorage {
    inner: HeapStorage,
    stored: Mutex<Vec<Vec<Action>>>,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_heap(inner: HeapStorage) -> Arc<Self> {
        Arc::new(Self {
            inner,
            stored: Mutex::new(Vec::new()),
        })
    }

    pub fn stored(&self) -> Vec<Vec<Action>> {
        self.stored.lock().clone()
    }

    pub fn store_calls(&self) -> usize {
        self.stored.lock().len()
    }
}

impl BatchStorage for RecordingStorage {
    fn store(&self, actions: &[Action], factory: &dyn BatchFactory) -> Result<bool, StorageError> {
        self.stored.lock().push(actions.to_vec());
        self.inner.store(actions, factory)
    }

    fn try_store(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
    ) -> Result<bool, StorageError> {
        self.stored.lock().push(actions.to_vec());
        self.inner.try_store(actions, factory)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<Option<BinaryBatch>, StorageError> {
        self.inner.get_timeout(timeout)
    }

    fn remove(&self) -> Result<(), StorageError> {
        self.inner.remove()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        self.inner.shutdown()
    }
}
