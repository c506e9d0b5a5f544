//! Interceptors wrapped around command execution.

use std::fmt;
use std::sync::Arc;

use super::{Command, CommandError, CommandType};
use crate::call::{Call, Content};
use crate::scope::Scope;

/// Interceptor that runs around a command.
///
/// A filter either answers the call itself or hands it on with
/// [`FilterChain::proceed`], optionally inspecting or replacing the result.
pub trait Filter: Send + Sync {
    /// Handles `call`, delegating to `chain` to continue.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] to reject the call or to pass on a failure
    /// from further down the chain.
    fn filter(
        &self,
        call: &Call,
        scope: &Scope,
        chain: FilterChain<'_>,
    ) -> Result<Content, CommandError>;
}

/// Remainder of a filter chain, ending in the target command.
pub struct FilterChain<'chain> {
    filters: &'chain [Arc<dyn Filter>],
    command: &'chain dyn Command,
}

impl<'chain> FilterChain<'chain> {
    pub(crate) fn new(filters: &'chain [Arc<dyn Filter>], command: &'chain dyn Command) -> Self {
        Self { filters, command }
    }

    /// Type of the command at the end of the chain.
    #[must_use]
    pub fn command_type(&self) -> CommandType {
        self.command.command_type()
    }

    /// Runs the next filter, or the command once no filter is left.
    ///
    /// # Errors
    ///
    /// Propagates whatever the next filter or the command returns.
    pub fn proceed(self, call: &Call, scope: &Scope) -> Result<Content, CommandError> {
        match self.filters.split_first() {
            Some((next, rest)) => next.filter(call, scope, Self::new(rest, self.command)),
            None => self.command.execute(call, scope),
        }
    }
}

type Predicate = dyn Fn(CommandType) -> bool + Send + Sync;

/// Filter plus the predicate selecting the commands it applies to.
///
/// Definitions are contributed under `Key::<FilterDefinition>` in the
/// registry and applied outermost-first in registration order.
#[derive(Clone)]
pub struct FilterDefinition {
    label: String,
    predicate: Arc<Predicate>,
    filter: Arc<dyn Filter>,
}

impl FilterDefinition {
    /// Applies `filter` to commands whose type satisfies `predicate`.
    pub fn new<P>(label: impl Into<String>, predicate: P, filter: Arc<dyn Filter>) -> Self
    where
        P: Fn(CommandType) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
            filter,
        }
    }

    /// Applies `filter` to every command.
    pub fn all(label: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        Self::new(label, |_| true, filter)
    }

    /// Applies `filter` to commands of type `T` only. Legacy jobs match on
    /// the job type.
    pub fn for_type<T: ?Sized + 'static>(label: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        Self::new(label, |command_type: CommandType| command_type.is::<T>(), filter)
    }

    /// Returns `true` when the filter applies to `command_type`.
    #[must_use]
    pub fn matches(&self, command_type: CommandType) -> bool {
        (self.predicate)(command_type)
    }

    /// Filter to apply.
    #[must_use]
    pub fn filter(&self) -> &Arc<dyn Filter> {
        &self.filter
    }

    /// Name used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FilterDefinition")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
