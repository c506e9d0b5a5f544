//! Registry keys and query matchers.

use std::any::{Any, TypeId, type_name};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Metadata attached to a key. Equality and hashing must stay stable for as
/// long as the key is in use.
trait KeyMeta: Any + Send + Sync + fmt::Debug {
    fn eq_meta(&self, other: &dyn KeyMeta) -> bool;
    fn hash_meta(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

impl<M> KeyMeta for M
where
    M: Any + Eq + Hash + Send + Sync + fmt::Debug,
{
    fn eq_meta(&self, other: &dyn KeyMeta) -> bool {
        other
            .as_any()
            .downcast_ref::<M>()
            .is_some_and(|other| self == other)
    }

    fn hash_meta(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<M>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased identity of a [`Key`], used as the binding map's key.
#[derive(Clone)]
pub(super) struct ErasedKey {
    pub(super) type_id: TypeId,
    pub(super) type_name: &'static str,
    meta: Option<Arc<dyn KeyMeta>>,
}

impl PartialEq for ErasedKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
            && match (&self.meta, &other.meta) {
                (None, None) => true,
                (Some(left), Some(right)) => left.eq_meta(right.as_ref()),
                _ => false,
            }
    }
}

impl Eq for ErasedKey {}

impl Hash for ErasedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.meta.as_ref().map(|meta| meta.hash_meta()).hash(state);
    }
}

impl fmt::Debug for ErasedKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.meta {
            Some(meta) => write!(formatter, "{}[{meta:?}]", self.type_name),
            None => formatter.write_str(self.type_name),
        }
    }
}

/// Registration key: the listener capability `T` plus optional metadata.
///
/// Two keys are equal when they name the same capability and carry equal
/// metadata (or none).
pub struct Key<T: ?Sized> {
    erased: ErasedKey,
    _capability: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> Key<T> {
    /// Key for capability `T` without metadata.
    #[must_use]
    pub fn of() -> Self {
        Self::from_erased(ErasedKey {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            meta: None,
        })
    }

    /// Key for capability `T` qualified by `meta`.
    #[must_use]
    pub fn with_meta<M>(meta: M) -> Self
    where
        M: Any + Eq + Hash + Send + Sync + fmt::Debug,
    {
        Self::from_erased(ErasedKey {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            meta: Some(Arc::new(meta)),
        })
    }

    /// Metadata downcast to `M`, if the key carries metadata of that type.
    #[must_use]
    pub fn meta<M: Any>(&self) -> Option<&M> {
        self.erased
            .meta
            .as_deref()
            .and_then(|meta| meta.as_any().downcast_ref::<M>())
    }

    /// Returns `true` when the key carries metadata.
    #[must_use]
    pub fn has_meta(&self) -> bool {
        self.erased.meta.is_some()
    }

    pub(super) fn from_erased(erased: ErasedKey) -> Self {
        Self {
            erased,
            _capability: PhantomData,
        }
    }

    pub(super) fn erased(&self) -> &ErasedKey {
        &self.erased
    }
}

impl<T: ?Sized> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            erased: self.erased.clone(),
            _capability: PhantomData,
        }
    }
}

impl<T: ?Sized> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.erased == other.erased
    }
}

impl<T: ?Sized> Eq for Key<T> {}

impl<T: ?Sized> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.erased.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Key<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Key({:?})", self.erased)
    }
}

type MetaPredicate = dyn Fn(Option<&dyn Any>) -> bool + Send + Sync;

/// Predicate over the keys registered for capability `T`.
///
/// Matchers select keys for queries, notification and bulk removal. They have
/// no stable identity, so the registry offers no way to register under one.
pub struct Matcher<T: ?Sized> {
    predicate: Arc<MetaPredicate>,
    _capability: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> Matcher<T> {
    /// Matches every key registered for `T`, with or without metadata.
    #[must_use]
    pub fn any() -> Self {
        Self::from_predicate(|_| true)
    }

    /// Matches keys whose metadata is an `M` satisfying `predicate`.
    #[must_use]
    pub fn meta<M, F>(predicate: F) -> Self
    where
        M: Any,
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        Self::from_predicate(move |meta| {
            meta.and_then(|meta| meta.downcast_ref::<M>())
                .is_some_and(&predicate)
        })
    }

    fn from_predicate(predicate: impl Fn(Option<&dyn Any>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            _capability: PhantomData,
        }
    }

    pub(super) fn matches(&self, key: &ErasedKey) -> bool {
        key.type_id == TypeId::of::<T>()
            && (self.predicate)(key.meta.as_deref().map(KeyMeta::as_any))
    }
}

impl<T: ?Sized> Clone for Matcher<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            _capability: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Matcher<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Matcher<{}>", type_name::<T>())
    }
}
