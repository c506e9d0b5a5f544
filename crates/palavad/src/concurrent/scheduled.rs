//! Fixed-size pool for delayed and periodic tasks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{POOL_TARGET, PoolError, Rejection, Task, ThreadFactory};

type Periodic = Arc<dyn Fn() + Send + Sync + 'static>;

enum Work {
    Once(Task),
    Repeating { period: Duration, run: Periodic },
}

struct Entry {
    due: Instant,
    sequence: u64,
    cancelled: Arc<AtomicBool>,
    work: Work,
}

// BinaryHeap is a max-heap; order entries so the earliest due pops first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Entry {}

struct State {
    entries: BinaryHeap<Entry>,
    next_sequence: u64,
    threads: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    terminated: Condvar,
}

/// Handle on a scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl ScheduledTask {
    /// Prevents future runs and drops the pending entry. A run already in
    /// progress completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            shared
                .state
                .lock()
                .entries
                .retain(|entry| !Arc::ptr_eq(&entry.cancelled, &self.cancelled));
        }
    }

    /// Returns `true` once [`ScheduledTask::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs tasks after a delay or at a fixed rate on a fixed set of threads.
///
/// Shutting down discards tasks that have not started yet.
pub struct ScheduledPool {
    shared: Arc<Shared>,
}

impl ScheduledPool {
    pub(super) fn start(threads: usize, factory: Arc<dyn ThreadFactory>) -> Result<Self, PoolError> {
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: BinaryHeap::new(),
                    next_sequence: 0,
                    threads: 0,
                    shutdown: false,
                }),
                wake: Condvar::new(),
                terminated: Condvar::new(),
            }),
        };
        for _ in 0..threads {
            pool.shared.state.lock().threads += 1;
            let shared = Arc::clone(&pool.shared);
            if let Err(source) = factory.spawn(Box::new(move || run_timer(&shared))) {
                pool.shared.state.lock().threads -= 1;
                pool.shutdown();
                return Err(PoolError::Spawn { source });
            }
        }
        debug!(target: POOL_TARGET, threads, "scheduled pool started");
        Ok(pool)
    }

    /// Runs `task` once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::DelayTooLong`] when `delay` overflows the clock
    /// and [`PoolError::Rejected`] after [`ScheduledPool::shutdown`].
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<ScheduledTask, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(delay, Work::Once(Box::new(task)))
    }

    /// Runs `task` first after `initial_delay`, then every `period` measured
    /// from the previous scheduled start, until cancelled or shut down.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidPeriod`] for a zero period,
    /// [`PoolError::DelayTooLong`] when `initial_delay` overflows the clock
    /// and [`PoolError::Rejected`] after [`ScheduledPool::shutdown`].
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<ScheduledTask, PoolError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(PoolError::InvalidPeriod);
        }
        self.enqueue(
            initial_delay,
            Work::Repeating {
                period,
                run: Arc::new(task),
            },
        )
    }

    /// Stops every thread and discards pending tasks.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            debug!(
                target: POOL_TARGET,
                pending = state.entries.len(),
                "scheduled pool shutting down"
            );
            state.entries.clear();
        }
        if state.threads == 0 {
            self.shared.terminated.notify_all();
        }
        self.shared.wake.notify_all();
    }

    /// Waits up to `timeout` for every thread to exit after
    /// [`ScheduledPool::shutdown`]. Returns `true` when all have exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.shutdown && state.threads == 0) {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.threads == 0;
            }
        }
        true
    }

    /// Number of tasks waiting for their due time.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    fn enqueue(&self, delay: Duration, work: Work) -> Result<ScheduledTask, PoolError> {
        let due = Instant::now()
            .checked_add(delay)
            .ok_or(PoolError::DelayTooLong { delay })?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(PoolError::rejected(Rejection::ShutDown));
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push(Entry {
            due,
            sequence,
            cancelled: Arc::clone(&cancelled),
            work,
        });
        self.shared.wake.notify_one();
        Ok(ScheduledTask {
            cancelled,
            shared: Arc::downgrade(&self.shared),
        })
    }
}

impl Drop for ScheduledPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ScheduledPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        formatter
            .debug_struct("ScheduledPool")
            .field("threads", &state.threads)
            .field("pending", &state.entries.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn run_timer(shared: &Shared) {
    while let Some(entry) = next_due(shared) {
        if entry.cancelled.load(Ordering::Acquire) {
            continue;
        }
        match entry.work {
            Work::Once(task) => run_guarded(task),
            Work::Repeating { period, run } => {
                run_guarded(|| run());
                match entry.due.checked_add(period) {
                    Some(due) => reschedule(shared, due, entry.cancelled, period, run),
                    None => warn!(target: POOL_TARGET, "periodic task ran past the clock's range"),
                }
            }
        }
    }
}

fn next_due(shared: &Shared) -> Option<Entry> {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            state.threads -= 1;
            if state.threads == 0 {
                shared.terminated.notify_all();
            }
            return None;
        }
        let now = Instant::now();
        match state.entries.peek().map(|entry| entry.due) {
            Some(due) if due <= now => return state.entries.pop(),
            Some(due) => {
                shared.wake.wait_until(&mut state, due);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}

fn reschedule(
    shared: &Shared,
    due: Instant,
    cancelled: Arc<AtomicBool>,
    period: Duration,
    run: Periodic,
) {
    if cancelled.load(Ordering::Acquire) {
        return;
    }
    let mut state = shared.state.lock();
    if state.shutdown {
        return;
    }
    let sequence = state.next_sequence;
    state.next_sequence += 1;
    state.entries.push(Entry {
        due,
        sequence,
        cancelled,
        work: Work::Repeating { period, run },
    });
    shared.wake.notify_one();
}

fn run_guarded(task: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!(target: POOL_TARGET, "scheduled task panicked");
    }
}
