//! Type-keyed publish/subscribe store.
//!
//! Components register listeners under a [`Key`]: the capability they
//! implement (usually a `dyn Trait`) plus optional metadata. Other components
//! look those listeners up, notify them, or obtain a [`Proxy`] that fans calls
//! out to whoever is registered at the time of the call.
//!
//! Bindings for a key are never dropped once created; removing listeners
//! empties them instead, so [`Listeners`] views and proxies stay live.

mod key;
mod proxy;

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use self::key::ErasedKey;

pub use self::key::{Key, Matcher};
pub use self::proxy::Proxy;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Failure reported by [`Registry::notify`], carrying the key and position of
/// the listener that failed.
#[derive(Debug, Error)]
#[error("listener #{index} registered under {key} failed: {source}")]
pub struct NotifyError<E>
where
    E: StdError + 'static,
{
    /// Rendered key the listener was registered under.
    pub key: String,
    /// Zero-based position of the failing listener in registration order.
    pub index: usize,
    /// Error returned by the listener.
    #[source]
    pub source: E,
}

struct Slot<T: ?Sized> {
    key: ErasedKey,
    listeners: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Slot<T> {
    fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners.read().clone()
    }
}

struct Binding {
    order: u64,
    slot: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Bindings {
    by_key: HashMap<ErasedKey, Binding>,
    next_order: u64,
}

/// Shared listener registry. Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct Registry {
    bindings: Arc<RwLock<Bindings>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.read();
        formatter
            .debug_struct("Registry")
            .field("keys", &bindings.by_key.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` under `key`. Registering the same listener twice under
    /// one key is a no-op. Returns `true` when the listener was added.
    pub fn register<T>(&self, key: &Key<T>, listener: Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let slot = self.slot(key);
        let mut listeners = slot.listeners.write();
        if listeners.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        debug!(
            target: REGISTRY_TARGET,
            key = ?key,
            count = listeners.len(),
            "listener registered"
        );
        true
    }

    /// Adds `listener` under the metadata-free key for `T`.
    pub fn register_type<T>(&self, listener: Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(&Key::<T>::of(), listener)
    }

    /// Live view of the listeners registered under `key`.
    #[must_use]
    pub fn listeners<T>(&self, key: &Key<T>) -> Listeners<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Listeners { slot: self.slot(key) }
    }

    /// Multicast handle for `key`. See [`Proxy`].
    #[must_use]
    pub fn proxy<T>(&self, key: &Key<T>) -> Proxy<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Proxy::new(self.listeners(key))
    }

    /// Applies `operation` to each listener under `key` in registration order,
    /// stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first listener failure wrapped in [`NotifyError`]; later
    /// listeners are not invoked.
    pub fn notify<T, E, F>(&self, key: &Key<T>, operation: F) -> Result<(), NotifyError<E>>
    where
        T: ?Sized + Send + Sync + 'static,
        E: StdError + 'static,
        F: FnMut(&T) -> Result<(), E>,
    {
        notify_all(key.erased(), &self.slot(key).snapshot(), operation)
    }

    /// Applies `operation` to every listener under `key`, logging failures and
    /// panics instead of stopping. Returns the number of listeners that failed.
    pub fn notify_silent<T, E, F>(&self, key: &Key<T>, operation: F) -> usize
    where
        T: ?Sized + Send + Sync + 'static,
        E: fmt::Display,
        F: FnMut(&T) -> Result<(), E>,
    {
        notify_each(key.erased(), &self.slot(key).snapshot(), operation)
    }

    /// Removes `listener` from `key`. Returns `true` when it was registered.
    pub fn remove<T>(&self, key: &Key<T>, listener: &Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.existing_slot(key.erased())
            .is_some_and(|slot: Arc<Slot<T>>| remove_from(&slot, listener))
    }

    /// Removes `listener` from every key of capability `T`. Returns the keys it
    /// was removed from.
    pub fn remove_everywhere<T>(&self, listener: &Arc<T>) -> Vec<Key<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slots_matching(&Matcher::<T>::any())
            .into_iter()
            .filter(|slot| remove_from(slot, listener))
            .map(|slot| Key::from_erased(slot.key.clone()))
            .collect()
    }

    /// Removes every listener registered under `key` and returns them.
    pub fn remove_all<T>(&self, key: &Key<T>) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.existing_slot(key.erased())
            .map(|slot: Arc<Slot<T>>| std::mem::take(&mut *slot.listeners.write()))
            .unwrap_or_default()
    }

    /// Listeners under every key selected by `matcher`, keys in registration
    /// order.
    #[must_use]
    pub fn listeners_matching<T>(&self, matcher: &Matcher<T>) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slots_matching(matcher)
            .iter()
            .flat_map(|slot| slot.snapshot())
            .collect()
    }

    /// [`Registry::notify`] across every key selected by `matcher`.
    ///
    /// # Errors
    ///
    /// Returns the first listener failure; later listeners are not invoked.
    pub fn notify_matching<T, E, F>(
        &self,
        matcher: &Matcher<T>,
        mut operation: F,
    ) -> Result<(), NotifyError<E>>
    where
        T: ?Sized + Send + Sync + 'static,
        E: StdError + 'static,
        F: FnMut(&T) -> Result<(), E>,
    {
        for slot in self.slots_matching(matcher) {
            notify_all(&slot.key, &slot.snapshot(), &mut operation)?;
        }
        Ok(())
    }

    /// Removes and returns every listener under keys selected by `matcher`.
    pub fn remove_all_matching<T>(&self, matcher: &Matcher<T>) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slots_matching(matcher)
            .iter()
            .flat_map(|slot| std::mem::take(&mut *slot.listeners.write()))
            .collect()
    }

    fn slot<T>(&self, key: &Key<T>) -> Arc<Slot<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if let Some(slot) = self.existing_slot(key.erased()) {
            return slot;
        }
        let mut bindings = self.bindings.write();
        let order = bindings.next_order;
        let binding = bindings
            .by_key
            .entry(key.erased().clone())
            .or_insert_with(|| Binding {
                order,
                slot: Arc::new(Slot::<T> {
                    key: key.erased().clone(),
                    listeners: RwLock::new(Vec::new()),
                }),
            });
        let slot = Arc::clone(&binding.slot);
        if binding.order == order {
            bindings.next_order += 1;
        }
        downcast_slot(slot).unwrap_or_else(|| {
            // A key's type id fixes its slot type, so the downcast cannot fail.
            Arc::new(Slot {
                key: key.erased().clone(),
                listeners: RwLock::new(Vec::new()),
            })
        })
    }

    fn existing_slot<T>(&self, key: &ErasedKey) -> Option<Arc<Slot<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bindings = self.bindings.read();
        bindings
            .by_key
            .get(key)
            .and_then(|binding| downcast_slot(Arc::clone(&binding.slot)))
    }

    fn slots_matching<T>(&self, matcher: &Matcher<T>) -> Vec<Arc<Slot<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bindings = self.bindings.read();
        let mut matching: Vec<_> = bindings
            .by_key
            .iter()
            .filter(|(key, _)| matcher.matches(key))
            .filter_map(|(_, binding)| {
                downcast_slot::<T>(Arc::clone(&binding.slot)).map(|slot| (binding.order, slot))
            })
            .collect();
        matching.sort_by_key(|(order, _)| *order);
        matching.into_iter().map(|(_, slot)| slot).collect()
    }
}

/// Live, read-only view of the listeners bound to one key.
///
/// Iteration works on a point-in-time snapshot, so concurrent registration
/// never tears a traversal.
pub struct Listeners<T: ?Sized> {
    slot: Arc<Slot<T>>,
}

impl<T: ?Sized> Listeners<T> {
    /// Listeners currently registered, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.slot.snapshot()
    }

    /// Number of listeners currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slot.listeners.read().len()
    }

    /// Returns `true` when no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when `listener` is registered.
    #[must_use]
    pub fn contains(&self, listener: &Arc<T>) -> bool {
        self.slot
            .listeners
            .read()
            .iter()
            .any(|existing| same_listener(existing, listener))
    }

    /// Iterates over a snapshot of the current listeners.
    pub fn iter(&self) -> std::vec::IntoIter<Arc<T>> {
        self.snapshot().into_iter()
    }
}

impl<T: ?Sized> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Listeners<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Listeners")
            .field("key", &self.slot.key)
            .field("len", &self.len())
            .finish()
    }
}

fn downcast_slot<T>(slot: Arc<dyn Any + Send + Sync>) -> Option<Arc<Slot<T>>>
where
    T: ?Sized + Send + Sync + 'static,
{
    slot.downcast::<Slot<T>>().ok()
}

fn same_listener<T: ?Sized>(left: &Arc<T>, right: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

fn remove_from<T: ?Sized>(slot: &Slot<T>, listener: &Arc<T>) -> bool {
    let mut listeners = slot.listeners.write();
    let before = listeners.len();
    listeners.retain(|existing| !same_listener(existing, listener));
    listeners.len() != before
}

fn notify_all<T, E, F>(
    key: &ErasedKey,
    listeners: &[Arc<T>],
    mut operation: F,
) -> Result<(), NotifyError<E>>
where
    T: ?Sized,
    E: StdError + 'static,
    F: FnMut(&T) -> Result<(), E>,
{
    for (index, listener) in listeners.iter().enumerate() {
        operation(listener).map_err(|source| NotifyError {
            key: format!("{key:?}"),
            index,
            source,
        })?;
    }
    Ok(())
}

fn notify_each<T, E, F>(key: &ErasedKey, listeners: &[Arc<T>], mut operation: F) -> usize
where
    T: ?Sized,
    E: fmt::Display,
    F: FnMut(&T) -> Result<(), E>,
{
    let mut failures = 0;
    for (index, listener) in listeners.iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(|| operation(listener))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                failures += 1;
                warn!(
                    target: REGISTRY_TARGET,
                    key = ?key,
                    index,
                    error = %error,
                    "listener failed during silent notification"
                );
            }
            Err(_) => {
                failures += 1;
                warn!(
                    target: REGISTRY_TARGET,
                    key = ?key,
                    index,
                    "listener panicked during silent notification"
                );
            }
        }
    }
    failures
}
