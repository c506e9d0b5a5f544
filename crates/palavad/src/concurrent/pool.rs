//! Elastic worker pool.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{POOL_TARGET, PoolBuilder, PoolError, QueueMode, Rejection, Task};

struct State {
    queue: VecDeque<Task>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

struct Shared {
    settings: PoolBuilder,
    state: Mutex<State>,
    available: Condvar,
    terminated: Condvar,
}

/// Pool of OS threads that grows between a core and a maximum size.
///
/// Submission follows the classic executor rules: below the core size a new
/// worker is started for the task; otherwise the task is queued according to
/// the [`QueueMode`]; when the queue refuses it, a worker is added up to the
/// maximum size; beyond that the task is rejected. Workers above the core
/// size retire after the keep-alive elapses without work.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub(super) fn new(settings: PoolBuilder) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                terminated: Condvar::new(),
            }),
        }
    }

    /// Submits `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Rejected`] when the pool is saturated or shut
    /// down, and [`PoolError::Spawn`] when a needed worker cannot be started.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(task);
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.shutdown {
            return Err(PoolError::rejected(Rejection::ShutDown));
        }
        if state.workers < shared.settings.min_size {
            return self.spawn_worker(state, Some(task));
        }
        match offer(&mut state, shared.settings.queue, task) {
            Ok(()) => {
                shared.available.notify_one();
                if state.workers == 0 {
                    return self.spawn_worker(state, None);
                }
                Ok(())
            }
            Err(task) if state.workers < shared.settings.max_size => {
                self.spawn_worker(state, Some(task))
            }
            Err(_) => Err(PoolError::rejected(Rejection::Saturated)),
        }
    }

    /// Stops accepting work. Queued tasks still run; idle workers exit.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            debug!(
                target: POOL_TARGET,
                workers = state.workers,
                queued = state.queue.len(),
                "worker pool shutting down"
            );
        }
        if state.workers == 0 {
            self.shared.terminated.notify_all();
        }
        self.shared.available.notify_all();
    }

    /// Waits up to `timeout` for every worker to exit after
    /// [`WorkerPool::shutdown`]. Returns `true` when all have exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.shutdown && state.workers == 0) {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.workers == 0;
            }
        }
        true
    }

    /// Returns `true` once [`WorkerPool::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Number of live workers.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of workers waiting for work.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().idle
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    fn spawn_worker(
        &self,
        mut state: MutexGuard<'_, State>,
        first: Option<Task>,
    ) -> Result<(), PoolError> {
        state.workers += 1;
        let workers = state.workers;
        drop(state);

        let shared = Arc::clone(&self.shared);
        let spawned = self
            .shared
            .settings
            .factory
            .spawn(Box::new(move || run_worker(&shared, first)));
        match spawned {
            Ok(()) => {
                debug!(target: POOL_TARGET, workers, "worker started");
                Ok(())
            }
            Err(source) => {
                let mut state = self.shared.state.lock();
                state.workers -= 1;
                if state.shutdown && state.workers == 0 {
                    self.shared.terminated.notify_all();
                }
                Err(PoolError::Spawn { source })
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        formatter
            .debug_struct("WorkerPool")
            .field("settings", &self.shared.settings)
            .field("workers", &state.workers)
            .field("idle", &state.idle)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn offer(state: &mut State, mode: QueueMode, task: Task) -> Result<(), Task> {
    let accepts = match mode {
        QueueMode::Unbounded => true,
        QueueMode::Bounded(capacity) => state.queue.len() < capacity,
        QueueMode::Direct => state.idle > state.queue.len(),
    };
    if accepts {
        state.queue.push_back(task);
        Ok(())
    } else {
        Err(task)
    }
}

fn run_worker(shared: &Shared, first: Option<Task>) {
    let mut next = first.or_else(|| take_task(shared));
    while let Some(task) = next {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!(target: POOL_TARGET, "pooled task panicked");
        }
        next = take_task(shared);
    }
}

/// Blocks until a task is available. Returns `None` when the worker should
/// exit, after removing it from the worker count.
fn take_task(shared: &Shared) -> Option<Task> {
    let settings = &shared.settings;
    let mut state = shared.state.lock();
    loop {
        if let Some(task) = state.queue.pop_front() {
            return Some(task);
        }
        if state.shutdown {
            break;
        }
        let may_retire = state.workers > settings.min_size;
        state.idle += 1;
        let timed_out = if may_retire {
            shared
                .available
                .wait_for(&mut state, settings.keep_alive)
                .timed_out()
        } else {
            shared.available.wait(&mut state);
            false
        };
        state.idle -= 1;
        if timed_out && state.queue.is_empty() && state.workers > settings.min_size {
            debug!(target: POOL_TARGET, "idle worker retiring");
            break;
        }
    }
    state.workers -= 1;
    if state.workers == 0 {
        shared.terminated.notify_all();
    }
    None
}
