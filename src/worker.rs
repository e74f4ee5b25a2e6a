//! The asynchronous refresh worker (spec.md §4.4): a single background
//! thread that coalesces back-to-back async refresh requests into at most
//! one additional pass. Grounded on `xh_core_refresh_thread_func`'s
//! condvar wait/wake loop and its `pthread_setname_np(..., "xh_refresh_loop")`
//! naming, carried over as `std::thread::Builder::name`.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};

struct Shared {
    pending: Mutex<State>,
    wake: Condvar,
}

struct State {
    /// Set by `request`, cleared once the worker picks it up.
    requested: bool,
    /// Set by `shutdown`; the worker exits its loop once it observes this.
    stopping: bool,
}

/// Owns the background thread's handle and the state it waits on. Dropped
/// (via `Engine::clear`) only after `shutdown` has been called and the
/// thread joined.
pub struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread, which immediately blocks waiting for the
    /// first request. `run_refresh` is called with the refresh lock
    /// ordering spec.md §5 mandates already the caller's responsibility to
    /// uphold inside its own body.
    pub fn spawn(run_refresh: impl Fn() + Send + Sync + 'static) -> Result<Self> {
        let shared = Arc::new(Shared { pending: Mutex::new(State { requested: false, stopping: false }), wake: Condvar::new() });
        let thread_shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new()
            .name("xh_refresh_loop".to_string())
            .spawn(move || worker_loop(thread_shared, run_refresh))
            .map_err(Error::WorkerSpawnFailed)?;

        Ok(Self { shared, handle: Some(handle) })
    }

    /// Requests a refresh pass. If the worker is already mid-pass when this
    /// is called, at most one further pass runs afterward — concurrent
    /// callers never queue up more than that single coalesced pass.
    pub fn request(&self) {
        let mut state = self.shared.pending.lock().unwrap_or_else(|p| p.into_inner());
        if state.requested {
            log::trace!("refresh already pending, coalescing with it");
        } else {
            log::trace!("requesting a refresh pass");
        }
        state.requested = true;
        self.shared.wake.notify_one();
    }

    /// Signals the worker to exit and joins it. Matches `xh_core_clear`'s
    /// teardown of the refresh thread before it tears down hook state.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.pending.lock().unwrap_or_else(|p| p.into_inner());
            state.stopping = true;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::debug!("refresh worker thread joined");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, run_refresh: impl Fn()) {
    loop {
        let mut state = shared.pending.lock().unwrap_or_else(|p| p.into_inner());
        while !state.requested && !state.stopping {
            state = shared.wake.wait(state).unwrap_or_else(|p| p.into_inner());
        }
        if state.stopping {
            return;
        }
        state.requested = false;
        drop(state);

        run_refresh();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn request_triggers_a_refresh_pass() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut worker = Worker::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("worker spawns");

        worker.request();
        std::thread::sleep(Duration::from_millis(50));
        worker.shutdown();

        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn shutdown_joins_without_a_pending_request() {
        let mut worker = Worker::spawn(|| {}).expect("worker spawns");
        worker.shutdown();
        assert!(worker.handle.is_none());
    }
}
