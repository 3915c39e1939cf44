use crate::action::Action;
use crate::buffer::ActionBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::AppMetrConfig;
use crate::encoding::DeflateJsonBatchFactory;
use crate::error::{AppMetrError, UploadError};
use crate::sender::BatchSender;
use crate::storage::{BatchStorage, WAIT_SLICE};
use crate::uploader::{UploadContext, UploadCounters, UploadStats, Uploader};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Whether a flush may wait for storage capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    Wait,
    NoWait,
}

struct State {
    lifecycle: Lifecycle,
    buffer: ActionBuffer,
    factory: DeflateJsonBatchFactory,
    last_flush_millis: u64,
    uploader: Option<Uploader>,
}

// =============================================================================
// AppMetr
// =============================================================================

/// Tracks actions into batches, queues them in a [`BatchStorage`] and uploads them
/// from a dedicated thread.
///
/// `track`, `flush` and the stop operations are serialized by one lock. Flushing runs
/// under that lock, so a storage that blocks on capacity slows the tracking caller.
pub struct AppMetr {
    config: AppMetrConfig,
    sender: Arc<dyn BatchSender>,
    storage: Arc<dyn BatchStorage>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    last_error: Arc<Mutex<Option<UploadError>>>,
    counters: Arc<UploadCounters>,
}

impl AppMetr {
    /// Validate `config` and build the storage it names.
    pub fn new(config: AppMetrConfig, sender: Arc<dyn BatchSender>) -> Result<Self, AppMetrError> {
        config.validate()?;
        let storage = config.storage.build()?;
        let server_id = uuid::Uuid::new_v4().to_string();

        Ok(Self {
            config,
            sender,
            storage,
            clock: Arc::new(SystemClock),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Created,
                buffer: ActionBuffer::default(),
                factory: DeflateJsonBatchFactory::new(server_id),
                last_flush_millis: 0,
                uploader: None,
            }),
            last_error: Arc::new(Mutex::new(None)),
            counters: Arc::new(UploadCounters::default()),
        })
    }

    pub fn with_storage(mut self, storage: Arc<dyn BatchStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_server_id(self, server_id: impl Into<String>) -> Self {
        self.set_server_id(server_id);
        self
    }

    pub fn config(&self) -> &AppMetrConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn BatchStorage> {
        &self.storage
    }

    pub fn server_id(&self) -> String {
        self.state.lock().factory.server_id().to_string()
    }

    /// Tag batches flushed from now on with `server_id`.
    pub fn set_server_id(&self, server_id: impl Into<String>) {
        self.state.lock().factory = DeflateJsonBatchFactory::new(server_id);
    }

    /// True between `start` and a stop, unless the uploader has latched a fatal error.
    /// A failed instance still needs one of the stop operations to release its threads.
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running && self.last_error.lock().is_none()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Cause of the uploader's exit, if it gave up.
    pub fn last_upload_error(&self) -> Option<UploadError> {
        self.last_error.lock().clone()
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.counters.snapshot()
    }

    /// Number of tracked actions not yet handed to storage.
    pub fn pending_actions(&self) -> usize {
        self.state.lock().buffer.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn start(&self) -> Result<(), AppMetrError> {
        let mut state = self.state.lock();
        match state.lifecycle {
            Lifecycle::Running => return Err(AppMetrError::AlreadyRunning),
            Lifecycle::Stopped => return Err(AppMetrError::Stopped),
            Lifecycle::Created => {}
        }

        let uploader = Uploader::spawn(UploadContext {
            storage: self.storage.clone(),
            sender: self.sender.clone(),
            url: self.config.url.clone(),
            token: self.config.token.clone(),
            retry_batch_upload: self.config.retry_batch_upload,
            failed_upload_timeout: self.config.failed_upload_timeout,
            last_error: self.last_error.clone(),
            counters: self.counters.clone(),
        })?;

        state.uploader = Some(uploader);
        state.last_flush_millis = self.clock.now_millis();
        state.lifecycle = Lifecycle::Running;
        info!(
            "AppMetr started (server id {}, {} storage)",
            state.factory.server_id(),
            if self.storage.is_persistent() {
                "persistent"
            } else {
                "in-memory"
            }
        );
        Ok(())
    }

    /// Flush and stop uploading.
    ///
    /// With persistent storage the uploader is cancelled right away and unsent batches stay
    /// on disk. With in-memory storage this waits until every queued batch is uploaded or the
    /// uploader has failed.
    pub fn stop(&self) -> Result<(), AppMetrError> {
        let mut state = self.state.lock();
        let uploader = self.begin_stop(&mut state)?;

        let flushed = if self.storage.is_persistent() {
            uploader.cancel();
            let flushed = self.flush_for_stop(&mut state, FlushMode::Wait);
            drop(state);
            flushed
        } else {
            let flushed = self.flush_for_stop(&mut state, FlushMode::Wait);
            drop(state);
            self.wait_until_drained(&uploader);
            uploader.cancel();
            flushed
        };

        uploader.join();
        self.finish_stop("stop");
        flushed
    }

    /// Cancel the uploader, hand the buffer to storage if it has room right now, and wait at
    /// most `hard_stop_grace` for the uploader to exit.
    ///
    /// Never waits for storage capacity: a full storage discards the buffered actions.
    pub fn hard_stop(&self) -> Result<(), AppMetrError> {
        let mut state = self.state.lock();
        let uploader = self.begin_stop(&mut state)?;
        uploader.cancel();
        let flushed = self.flush_for_stop(&mut state, FlushMode::NoWait);
        drop(state);

        uploader.join_within(self.config.hard_stop_grace);
        self.finish_stop("hard stop");
        flushed
    }

    /// Stop accepting actions and block until storage is empty.
    pub fn soft_stop(&self) -> Result<(), AppMetrError> {
        let mut state = self.state.lock();
        let uploader = self.begin_stop(&mut state)?;
        let flushed = self.flush_for_stop(&mut state, FlushMode::Wait);
        drop(state);

        self.wait_until_drained(&uploader);
        uploader.cancel();
        uploader.join();
        self.finish_stop("soft stop");
        flushed
    }

    fn begin_stop(&self, state: &mut MutexGuard<'_, State>) -> Result<Uploader, AppMetrError> {
        if state.lifecycle != Lifecycle::Running {
            return Err(AppMetrError::NotRunning);
        }
        state.lifecycle = Lifecycle::Stopped;
        state.uploader.take().ok_or(AppMetrError::NotRunning)
    }

    fn flush_for_stop(&self, state: &mut State, mode: FlushMode) -> Result<(), AppMetrError> {
        match self.flush_locked(state, mode) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    "Storage rejected the final flush, {} actions discarded",
                    state.buffer.len()
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn wait_until_drained(&self, uploader: &Uploader) {
        while !self.storage.is_empty() {
            if uploader.is_finished() {
                warn!("Uploader exited before storage drained");
                return;
            }
            std::thread::sleep(WAIT_SLICE);
        }
    }

    fn finish_stop(&self, mode: &str) {
        if let Err(e) = self.storage.shutdown() {
            error!("Storage shutdown after {mode} failed: {e}");
        }
        info!("AppMetr stopped ({mode}), {:?}", self.counters.snapshot());
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    /// Buffer `action`, flushing when a threshold is reached.
    ///
    /// An elapsed flush period flushes the earlier actions before `action` is appended.
    /// A crossed size or count threshold flushes after it. Returns the result of the last
    /// flush performed, or `true` when none ran. The action stays buffered even when a
    /// flush is rejected.
    pub fn track(&self, action: Action) -> Result<bool, AppMetrError> {
        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;

        let mut flushed = true;
        if self.period_elapsed(&state) {
            flushed = self.flush_locked(&mut state, FlushMode::Wait)?;
        }

        state.buffer.push(action);

        if state
            .buffer
            .is_full(self.config.max_batch_bytes, self.config.max_batch_actions)
        {
            flushed = self.flush_locked(&mut state, FlushMode::Wait)?;
        }
        Ok(flushed)
    }

    /// Hand buffered actions to storage as one batch.
    ///
    /// Returns `Ok(false)` when the storage rejected the batch; the actions stay buffered.
    pub fn flush(&self) -> Result<bool, AppMetrError> {
        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;
        self.flush_locked(&mut state, FlushMode::Wait)
    }

    pub fn flush_if_needed(&self) -> Result<bool, AppMetrError> {
        let mut state = self.state.lock();
        self.ensure_accepting(&state)?;
        if self.need_flush_locked(&state) {
            self.flush_locked(&mut state, FlushMode::Wait)
        } else {
            Ok(true)
        }
    }

    pub fn need_flush(&self) -> bool {
        let state = self.state.lock();
        self.need_flush_locked(&state)
    }

    fn need_flush_locked(&self, state: &State) -> bool {
        state
            .buffer
            .is_full(self.config.max_batch_bytes, self.config.max_batch_actions)
            || self.period_elapsed(state)
    }

    fn period_elapsed(&self, state: &State) -> bool {
        let elapsed = self
            .clock
            .now_millis()
            .saturating_sub(state.last_flush_millis);
        elapsed >= self.config.flush_period.as_millis() as u64
    }

    fn ensure_accepting(&self, state: &State) -> Result<(), AppMetrError> {
        if state.lifecycle != Lifecycle::Running {
            return Err(AppMetrError::NotRunning);
        }
        if let Some(e) = self.last_error.lock().clone() {
            return Err(AppMetrError::UploadFailed(e));
        }
        Ok(())
    }

    fn flush_locked(&self, state: &mut State, mode: FlushMode) -> Result<bool, AppMetrError> {
        let now = self.clock.now_millis();
        if state.buffer.is_empty() {
            state.last_flush_millis = now;
            return Ok(true);
        }

        let count = state.buffer.len();
        let stored = match mode {
            FlushMode::Wait => self.storage.store(state.buffer.actions(), &state.factory),
            FlushMode::NoWait => self.storage.try_store(state.buffer.actions(), &state.factory),
        };
        match stored {
            Ok(true) => {
                debug!("Flushed {count} actions ({} bytes estimated)", state.buffer.bytes());
                state.buffer.clear();
                state.last_flush_millis = now;
                Ok(true)
            }
            Ok(false) => {
                warn!("Storage rejected a batch of {count} actions, keeping them buffered");
                Ok(false)
            }
            Err(e) => {
                error!("Failed to store a batch of {count} actions: {e}");
                let mut last_error = self.last_error.lock();
                if last_error.is_none() {
                    *last_error = Some(UploadError::Storage(e.clone()));
                }
                if let Some(uploader) = &state.uploader {
                    uploader.cancel();
                }
                Err(AppMetrError::Storage(e))
            }
        }
    }
}

impl Drop for AppMetr {
    fn drop(&mut self) {
        if self.lifecycle() == Lifecycle::Running {
            if let Err(e) = self.hard_stop() {
                warn!("AppMetr dropped while running, hard stop failed: {e}");
            }
        }
    }
}
