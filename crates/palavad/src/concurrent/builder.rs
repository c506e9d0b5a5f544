//! Fluent pool configuration.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use palava_config::{Config, QueueDiscipline};

use super::{PoolError, ScheduledPool, Task, WorkerPool};

/// Workers kept alive when idle unless configured otherwise.
pub const DEFAULT_MIN_SIZE: usize = 4;
/// Upper bound on workers unless configured otherwise.
pub const DEFAULT_MAX_SIZE: usize = 64;
/// Idle time before workers above the core size retire.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
/// Name prefix of threads started by the default factory.
pub const DEFAULT_THREAD_PREFIX: &str = "palava-worker";

/// How submitted tasks wait for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Queue without limit; the pool never grows past its core size.
    #[default]
    Unbounded,
    /// Queue up to the given number of tasks, then grow towards the maximum.
    Bounded(usize),
    /// Hand tasks straight to an idle worker, or grow towards the maximum.
    Direct,
}

impl QueueMode {
    /// Mode described by configuration.
    #[must_use]
    pub fn from_discipline(discipline: QueueDiscipline, capacity: usize) -> Self {
        match discipline {
            QueueDiscipline::Unbounded => Self::Unbounded,
            QueueDiscipline::Bounded => Self::Bounded(capacity),
            QueueDiscipline::Direct => Self::Direct,
        }
    }
}

/// Starts the OS threads pools run their workers on.
pub trait ThreadFactory: Send + Sync {
    /// Runs `work` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be started.
    fn spawn(&self, work: Task) -> io::Result<()>;
}

/// Factory naming threads `<prefix>-<n>` with a per-factory counter.
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    counter: AtomicUsize,
}

impl NamedThreadFactory {
    /// Factory using `prefix` for thread names.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicUsize::new(1),
        }
    }
}

impl Default for NamedThreadFactory {
    fn default() -> Self {
        Self::new(DEFAULT_THREAD_PREFIX)
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, work: Task) -> io::Result<()> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{index}", self.prefix))
            .spawn(work)
            .map(drop)
    }
}

/// Builder for [`WorkerPool`] and [`ScheduledPool`].
#[derive(Clone)]
pub struct PoolBuilder {
    pub(super) min_size: usize,
    pub(super) max_size: usize,
    pub(super) keep_alive: Duration,
    pub(super) queue: QueueMode,
    pub(super) factory: Arc<dyn ThreadFactory>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue: QueueMode::default(),
            factory: Arc::new(NamedThreadFactory::default()),
        }
    }
}

impl PoolBuilder {
    /// Builder holding the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder holding the pool settings from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .min_size(config.pool_min_size)
            .max_size(config.pool_max_size)
            .keep_alive(config.pool_keep_alive())
            .queue(QueueMode::from_discipline(
                config.pool_queue,
                config.pool_queue_capacity,
            ))
    }

    /// Workers kept alive when idle.
    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Upper bound on concurrently running workers.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Idle time before workers above the core size retire.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Queue discipline for tasks waiting on a worker.
    #[must_use]
    pub fn queue(mut self, queue: QueueMode) -> Self {
        self.queue = queue;
        self
    }

    /// Factory that starts worker threads.
    #[must_use]
    pub fn thread_factory(mut self, factory: impl ThreadFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Builds an on-demand worker pool. No thread starts until work arrives.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSize`] or [`PoolError::InvalidCapacity`]
    /// for inconsistent settings.
    pub fn build(&self) -> Result<WorkerPool, PoolError> {
        self.validate()?;
        Ok(WorkerPool::new(self.clone()))
    }

    /// Builds a pool for delayed and periodic tasks, running
    /// `max(min_size, 1)` threads. Maximum size, keep-alive and queue mode do
    /// not apply.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] when a thread cannot be started.
    pub fn build_scheduled(&self) -> Result<ScheduledPool, PoolError> {
        ScheduledPool::start(self.min_size.max(1), Arc::clone(&self.factory))
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 || self.min_size > self.max_size {
            return Err(PoolError::InvalidSize {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.queue == QueueMode::Bounded(0) {
            return Err(PoolError::InvalidCapacity);
        }
        Ok(())
    }
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PoolBuilder")
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("keep_alive", &self.keep_alive)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
