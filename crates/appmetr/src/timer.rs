use crate::error::AppMetrError;
use crate::orchestrator::AppMetr;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Default)]
struct TimerState {
    stopped: bool,
    triggered: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Calls [`AppMetr::flush_if_needed`] every `period` from its own thread.
///
/// Holds only a weak reference, so the timer never keeps an orchestrator alive.
pub struct FlushTimer {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushTimer {
    pub fn spawn(appmetr: &Arc<AppMetr>, period: Duration) -> Result<Self, AppMetrError> {
        let shared = Arc::new(TimerShared::default());
        let loop_shared = shared.clone();
        let target = Arc::downgrade(appmetr);

        let handle = std::thread::Builder::new()
            .name("appmetr-flush-timer".to_string())
            .spawn(move || timer_loop(&loop_shared, &target, period))
            .map_err(|e| AppMetrError::ThreadSpawn {
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run a flush check now instead of waiting for the period.
    pub fn trigger(&self) {
        let mut state = self.shared.state.lock();
        state.triggered = true;
        self.shared.wake.notify_all();
    }

    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Flush timer thread panicked");
            }
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(shared: &TimerShared, target: &Weak<AppMetr>, period: Duration) {
    debug!("Flush timer started with period {period:?}");
    loop {
        {
            let mut state = shared.state.lock();
            shared.wake.wait_while_for(
                &mut state,
                |state| !state.stopped && !state.triggered,
                period,
            );
            if state.stopped {
                break;
            }
            state.triggered = false;
        }

        let Some(appmetr) = target.upgrade() else {
            debug!("Orchestrator dropped, flush timer exiting");
            break;
        };
        match appmetr.flush_if_needed() {
            Ok(true) => trace!("Periodic flush check done"),
            Ok(false) => warn!("Periodic flush rejected by storage"),
            Err(AppMetrError::NotRunning) => trace!("Orchestrator not running, skipping flush"),
            Err(e) => warn!("Periodic flush failed: {e}"),
        }
    }
    debug!("Flush timer stopped");
}
