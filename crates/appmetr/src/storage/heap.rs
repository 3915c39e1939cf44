use crate::action::Action;
use crate::batch::BinaryBatch;
use crate::clock::{Clock, SystemClock};
use crate::encoding::BatchFactory;
use crate::error::StorageError;
use crate::storage::r#trait::BatchStorage;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// What a full heap does with a batch that does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until the consumer frees enough space.
    Block,
    /// Refuse the batch and report `false`.
    Reject,
}

struct HeapState {
    queue: VecDeque<BinaryBatch>,
    occupied_bytes: u64,
    previous_batch_id: Option<u64>,
    closed: bool,
}

/// In-memory batch queue bounded by encoded bytes.
///
/// Batch ids are wall-clock millis, bumped past the previous id when the clock has not moved.
pub struct HeapStorage {
    policy: OverflowPolicy,
    max_bytes: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<HeapState>,
    batch_added: Condvar,
    space_freed: Condvar,
}

impl Default for HeapStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapStorage {
    /// Unbounded heap that blocks producers once a capacity is configured.
    pub fn new() -> Self {
        Self::with_policy(OverflowPolicy::Block)
    }

    /// Heap that rejects batches beyond `max_bytes` instead of waiting.
    pub fn non_blocking(max_bytes: u64) -> Self {
        Self::with_policy(OverflowPolicy::Reject).with_max_bytes(max_bytes)
    }

    pub fn with_policy(policy: OverflowPolicy) -> Self {
        Self {
            policy,
            max_bytes: 0,
            clock: Arc::new(SystemClock),
            state: Mutex::new(HeapState {
                queue: VecDeque::new(),
                occupied_bytes: 0,
                previous_batch_id: None,
                closed: false,
            }),
            batch_added: Condvar::new(),
            space_freed: Condvar::new(),
        }
    }

    /// Capacity in encoded bytes. Zero means unbounded.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.state.lock().occupied_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Append an already encoded batch under the overflow policy, keeping its id.
    pub fn push(&self, batch: BinaryBatch) -> Result<bool, StorageError> {
        self.push_with(batch, self.policy)
    }

    /// Append an already encoded batch, returning `Ok(false)` instead of waiting when full.
    pub fn try_push(&self, batch: BinaryBatch) -> Result<bool, StorageError> {
        self.push_with(batch, OverflowPolicy::Reject)
    }

    fn push_with(&self, batch: BinaryBatch, policy: OverflowPolicy) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        loop {
            self.ensure_open(&state)?;
            if self.fits(&state, batch.len()) {
                self.append(&mut state, batch);
                return Ok(true);
            }
            if !self.wait_for_space(&mut state, batch.len(), policy)? {
                return Ok(false);
            }
        }
    }

    fn store_with(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
        policy: OverflowPolicy,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut batch = self.encode(&state, actions, factory)?;
        loop {
            if self.fits(&state, batch.len()) {
                state.previous_batch_id = Some(batch.batch_id());
                self.append(&mut state, batch);
                return Ok(true);
            }
            if !self.wait_for_space(&mut state, batch.len(), policy)? {
                return Ok(false);
            }
            self.ensure_open(&state)?;
            // another producer may have appended while we waited
            if state
                .previous_batch_id
                .is_some_and(|previous| batch.batch_id() <= previous)
            {
                batch = self.encode(&state, actions, factory)?;
            }
        }
    }

    fn next_batch_id(&self, state: &HeapState) -> u64 {
        let now = self.clock.now_millis();
        match state.previous_batch_id {
            Some(previous) if now <= previous => previous + 1,
            _ => now,
        }
    }

    fn encode(
        &self,
        state: &HeapState,
        actions: &[Action],
        factory: &dyn BatchFactory,
    ) -> Result<BinaryBatch, StorageError> {
        let batch_id = self.next_batch_id(state);
        factory.create_batch(actions, batch_id)
    }

    fn fits(&self, state: &HeapState, len: usize) -> bool {
        self.max_bytes == 0 || state.occupied_bytes + len as u64 <= self.max_bytes
    }

    fn ensure_open(&self, state: &HeapState) -> Result<(), StorageError> {
        if state.closed {
            return Err(StorageError::shut_down("heap storage store"));
        }
        Ok(())
    }

    /// Returns `Ok(false)` when the policy rejects, `Ok(true)` after waking up.
    fn wait_for_space(
        &self,
        state: &mut MutexGuard<'_, HeapState>,
        len: usize,
        policy: OverflowPolicy,
    ) -> Result<bool, StorageError> {
        match policy {
            OverflowPolicy::Reject => {
                debug!(
                    "Rejecting batch of {len} bytes, heap holds {} of {} bytes",
                    state.occupied_bytes, self.max_bytes
                );
                Ok(false)
            }
            OverflowPolicy::Block => {
                if len as u64 > self.max_bytes {
                    return Err(StorageError::InsufficientSpace {
                        context: format!(
                            "heap storage: batch of {len} bytes exceeds capacity of {} bytes",
                            self.max_bytes
                        ),
                    });
                }
                trace!("Heap full, waiting for {len} bytes");
                self.space_freed.wait(state);
                Ok(true)
            }
        }
    }

    fn append(&self, state: &mut HeapState, batch: BinaryBatch) {
        state.occupied_bytes += batch.len() as u64;
        state.queue.push_back(batch);
        self.batch_added.notify_all();
    }
}

impl BatchStorage for HeapStorage {
    fn store(&self, actions: &[Action], factory: &dyn BatchFactory) -> Result<bool, StorageError> {
        self.store_with(actions, factory, self.policy)
    }

    fn try_store(
        &self,
        actions: &[Action],
        factory: &dyn BatchFactory,
    ) -> Result<bool, StorageError> {
        self.store_with(actions, factory, OverflowPolicy::Reject)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<Option<BinaryBatch>, StorageError> {
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            self.batch_added
                .wait_while_for(&mut state, |s| s.queue.is_empty(), timeout);
        }
        Ok(state.queue.front().cloned())
    }

    fn remove(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        match state.queue.pop_front() {
            Some(batch) => {
                state.occupied_bytes -= batch.len() as u64;
                self.space_freed.notify_all();
            }
            None => debug!("Remove called on an empty heap storage"),
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.closed = true;
        self.space_freed.notify_all();
        Ok(())
    }
}
