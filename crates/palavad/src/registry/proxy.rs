//! Multicast handles over a live binding.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use super::{Listeners, notify_each};

/// Forwards each call to every listener registered under one key at the time
/// of the call, in registration order.
///
/// Listener capabilities implement their own trait for `Proxy<dyn Trait>` by
/// delegating every method to [`Proxy::fan_out`]. A listener that panics is
/// logged and skipped so the remaining listeners still hear the event.
pub struct Proxy<T: ?Sized> {
    listeners: Listeners<T>,
}

impl<T: ?Sized> Proxy<T> {
    pub(super) fn new(listeners: Listeners<T>) -> Self {
        Self { listeners }
    }

    /// Invokes `call` on each current listener.
    pub fn fan_out<F>(&self, mut call: F)
    where
        F: FnMut(&T),
    {
        let snapshot = self.listeners.snapshot();
        notify_each(&self.listeners.slot.key, &snapshot, |listener| {
            call(listener);
            Ok::<(), Infallible>(())
        });
    }

    /// Number of listeners a call would currently reach.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` when no listener would be reached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners a call would currently reach.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<T>> {
        self.listeners.snapshot()
    }
}

impl<T: ?Sized> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Proxy<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Proxy")
            .field("listeners", &self.listeners)
            .finish()
    }
}
