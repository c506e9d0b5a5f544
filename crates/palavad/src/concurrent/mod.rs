//! Thread pools that run connection handlers and timed work.
//!
//! [`PoolBuilder`] configures core and maximum worker counts, the idle
//! keep-alive, the [`QueueMode`] and the [`ThreadFactory`]. It produces
//! either a [`WorkerPool`] for immediate work or a [`ScheduledPool`] for
//! delayed and periodic work.

mod builder;
mod errors;
mod pool;
mod scheduled;

pub use self::builder::{
    DEFAULT_KEEP_ALIVE, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE, DEFAULT_THREAD_PREFIX,
    NamedThreadFactory, PoolBuilder, QueueMode, ThreadFactory,
};
pub use self::errors::{PoolError, Rejection};
pub use self::pool::WorkerPool;
pub use self::scheduled::{ScheduledPool, ScheduledTask};

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::concurrent");

/// Unit of work handed to a pool or a [`ThreadFactory`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;
