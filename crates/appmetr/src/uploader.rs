//! Background thread that moves batches from storage to the sender.

use crate::batch::BinaryBatch;
use crate::error::{AppMetrError, UploadError};
use crate::sender::BatchSender;
use crate::storage::{BatchStorage, WAIT_SLICE};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Cancellation flag with an interruptible sleep.
#[derive(Default)]
pub(crate) struct ShutdownSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        *cancelled = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleep for `duration` or until cancelled. Returns true when cancelled.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            self.wake
                .wait_while_for(&mut cancelled, |cancelled| !*cancelled, duration);
        }
        *cancelled
    }
}

/// Upload counters snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Batches the sender accepted.
    pub uploaded_batches: u64,
    pub uploaded_bytes: u64,
    /// Sends that returned a transient failure.
    pub failed_attempts: u64,
    /// Batches removed without being delivered because retries are disabled.
    pub dropped_batches: u64,
}

#[derive(Default)]
pub(crate) struct UploadCounters {
    uploaded_batches: AtomicU64,
    uploaded_bytes: AtomicU64,
    failed_attempts: AtomicU64,
    dropped_batches: AtomicU64,
}

impl UploadCounters {
    pub(crate) fn snapshot(&self) -> UploadStats {
        UploadStats {
            uploaded_batches: self.uploaded_batches.load(Ordering::Relaxed),
            uploaded_bytes: self.uploaded_bytes.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

/// Everything the upload loop needs, moved onto its thread.
pub(crate) struct UploadContext {
    pub storage: Arc<dyn BatchStorage>,
    pub sender: Arc<dyn BatchSender>,
    pub url: String,
    pub token: String,
    pub retry_batch_upload: bool,
    pub failed_upload_timeout: Duration,
    pub last_error: Arc<Mutex<Option<UploadError>>>,
    pub counters: Arc<UploadCounters>,
}

pub(crate) struct Uploader {
    signal: Arc<ShutdownSignal>,
    handle: JoinHandle<()>,
}

impl Uploader {
    pub(crate) fn spawn(context: UploadContext) -> Result<Self, AppMetrError> {
        let signal = Arc::new(ShutdownSignal::default());
        let loop_signal = signal.clone();
        let handle = std::thread::Builder::new()
            .name("appmetr-uploader".to_string())
            .spawn(move || upload_loop(context, &loop_signal))
            .map_err(|e| AppMetrError::ThreadSpawn {
                reason: e.to_string(),
            })?;
        Ok(Self { signal, handle })
    }

    pub(crate) fn cancel(&self) {
        self.signal.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            error!("Uploader thread panicked");
        }
    }

    /// Join if the thread exits within `grace`, otherwise leave it detached.
    /// Returns true when the thread was joined.
    pub(crate) fn join_within(self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Uploader still busy after {grace:?}, detaching it");
                return false;
            }
            std::thread::sleep(JOIN_POLL);
        }
        self.join();
        true
    }
}

fn upload_loop(context: UploadContext, signal: &ShutdownSignal) {
    info!("Uploader started for {}", context.url);
    if let Err(e) = drive(&context, signal) {
        error!("Uploader stopped on unrecoverable error: {e}");
        *context.last_error.lock() = Some(e);
    }
    info!("Uploader stopped");
}

fn drive(context: &UploadContext, signal: &ShutdownSignal) -> Result<(), UploadError> {
    while !signal.is_cancelled() {
        let Some(batch) = context.storage.get_timeout(WAIT_SLICE)? else {
            continue;
        };
        if signal.is_cancelled() {
            break;
        }

        if send_batch(context, &batch)? {
            context.storage.remove()?;
            context.counters.uploaded_batches.fetch_add(1, Ordering::Relaxed);
            context
                .counters
                .uploaded_bytes
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            debug!("Uploaded batch {} ({} bytes)", batch.batch_id(), batch.len());
            continue;
        }

        context.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Upload of batch {} failed, pausing {:?}",
            batch.batch_id(),
            context.failed_upload_timeout
        );
        let cancelled = signal.sleep(context.failed_upload_timeout);
        if !context.retry_batch_upload {
            context.storage.remove()?;
            context.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
            warn!("Dropped batch {} after a failed upload", batch.batch_id());
        }
        if cancelled {
            break;
        }
        trace!("Resuming uploads after failure of batch {}", batch.batch_id());
    }
    Ok(())
}

fn send_batch(context: &UploadContext, batch: &BinaryBatch) -> Result<bool, UploadError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        context
            .sender
            .send(&context.url, &context.token, batch.bytes())
    }));
    match outcome {
        Ok(result) => Ok(result?),
        Err(payload) => Err(UploadError::Panicked {
            reason: panic_reason(payload.as_ref()),
        }),
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
