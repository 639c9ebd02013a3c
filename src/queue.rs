//! Background work queue.
//!
//! A fixed pool of worker threads pulls units of work in enqueue order.
//! A failing (or panicking) unit is recorded and the worker moves on to the
//! next unit. Cancellation is cooperative: [`WorkQueue::abort`] drops all
//! pending units and raises a flag that running units poll at their own
//! safe points.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, error, info};

use crate::error::format_exception;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A unit of work. Errors are captured by the queue, not propagated.
pub type WorkUnit = Box<dyn FnOnce(&WorkContext) -> anyhow::Result<()> + Send + 'static>;

type IdleHandler = Box<dyn Fn() + Send + Sync + 'static>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<(String, WorkUnit)>,
    active: usize,
    last_status: Option<String>,
    busy_since: Option<Instant>,
    accumulated: Duration,
    exceptions: Vec<anyhow::Error>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
    cancel: CancelToken,
    idle_handlers: Mutex<Vec<IdleHandler>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, name: String, unit: WorkUnit) {
        let mut state = self.lock();
        debug!(unit = %name, "enqueued");
        state.pending.push_back((name, unit));
        self.work_ready.notify_one();
    }

    fn set_status(&self, status: String) {
        self.lock().last_status = Some(status);
    }
}

/// Handle given to a running unit of work.
pub struct WorkContext {
    shared: Arc<Shared>,
}

impl WorkContext {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.shared.set_status(status.into());
    }

    /// Queues a follow-up unit behind everything already pending.
    pub fn enqueue<F>(&self, name: impl Into<String>, unit: F)
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_cancelled() {
            debug!("follow-up unit dropped after abort");
            return;
        }
        self.shared.push(name.into(), Box::new(unit));
    }
}

/// Sequential (or small-pool) executor with status and fault capture.
pub struct WorkQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            cancel: CancelToken::new(),
            idle_handlers: Mutex::new(Vec::new()),
        });

        let workers = (0..workers.max(1))
            .filter_map(|idx| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("work-queue-{idx}"))
                    .spawn(move || worker_loop(shared))
                    .map_err(|err| error!(%err, "failed to spawn worker"))
                    .ok()
            })
            .collect();

        Self { shared, workers }
    }

    pub fn enqueue<F>(&self, name: impl Into<String>, unit: F)
    where
        F: FnOnce(&WorkContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.shared.push(name.into(), Box::new(unit));
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.active == 0 && state.pending.is_empty()
    }

    /// Drops pending units and asks running ones to stop.
    pub fn abort(&self) {
        let mut state = self.shared.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        self.shared.cancel.cancel();
        info!(dropped, "abort requested");
        if state.active == 0 {
            self.shared.cancel.reset();
            self.shared.idle.notify_all();
        }
    }

    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while state.active > 0 || !state.pending.is_empty() {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn last_status(&self) -> Option<String> {
        self.shared.lock().last_status.clone()
    }

    /// Time spent with at least one unit running.
    pub fn active_time(&self) -> Duration {
        let state = self.shared.lock();
        state.accumulated + state.busy_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Faults captured since the last call.
    pub fn fetch_exceptions(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut self.shared.lock().exceptions)
    }

    /// Registers a callback fired each time the queue drains.
    pub fn on_idle<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .idle_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(handler));
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let (name, unit) = {
            let mut state = shared.lock();
            let (name, unit) = loop {
                if let Some(next) = state.pending.pop_front() {
                    break next;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            };
            // Counted active under the same lock so waiters never see a gap
            state.active += 1;
            if state.busy_since.is_none() {
                state.busy_since = Some(Instant::now());
            }
            state.last_status = Some(name.clone());
            (name, unit)
        };

        debug!(unit = %name, "started");
        let ctx = WorkContext {
            shared: Arc::clone(&shared),
        };
        let outcome = match catch_unwind(AssertUnwindSafe(|| unit(&ctx))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow!("unit of work {name} panicked: {msg}"))
            }
        };

        let drained = {
            let mut state = shared.lock();
            if let Err(err) = outcome {
                let (short, detail) = format_exception(&err);
                error!(unit = %name, "ERROR: {short}\n{detail}");
                state.exceptions.push(err);
            }
            state.active -= 1;
            let drained = state.active == 0 && state.pending.is_empty();
            if state.active == 0 {
                if let Some(since) = state.busy_since.take() {
                    state.accumulated += since.elapsed();
                }
            }
            if drained {
                shared.cancel.reset();
                shared.idle.notify_all();
            }
            drained
        };

        if drained {
            debug!("queue idle");
            let handlers = shared
                .idle_handlers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for handler in handlers.iter() {
                handler();
            }
        }
    }
}
