//! Binds the scope, assembles the filter chain and runs the command.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{CommandError, CommandManager, Filter, FilterChain, FilterDefinition};
use crate::call::{Call, Content};
use crate::registry::{Key, Matcher, Proxy, Registry};
use crate::request::Request;
use crate::scope::Scope;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Observer of individual dispatches.
pub trait CallListener: Send + Sync {
    /// A dispatch is about to resolve its command.
    fn call_started(&self, _call: &Call) {}

    /// A dispatch finished with `outcome`.
    fn call_finished(&self, _call: &Call, _outcome: Result<&Content, &CommandError>) {}
}

impl CallListener for Proxy<dyn CallListener> {
    fn call_started(&self, call: &Call) {
        self.fan_out(|listener| listener.call_started(call));
    }

    fn call_finished(&self, call: &Call, outcome: Result<&Content, &CommandError>) {
        self.fan_out(|listener| listener.call_finished(call, outcome));
    }
}

/// Runs calls against resolved commands inside the worker's scope.
pub struct Dispatcher {
    commands: CommandManager,
    filters: Vec<Arc<FilterDefinition>>,
    listeners: Proxy<dyn CallListener>,
}

impl Dispatcher {
    /// Dispatcher over `commands`, applying the filter definitions registered
    /// in `registry` at construction time.
    #[must_use]
    pub fn new(commands: CommandManager, registry: &Registry) -> Self {
        let filters = registry.listeners_matching(&Matcher::<FilterDefinition>::any());
        debug!(
            target: DISPATCH_TARGET,
            filters = filters.len(),
            "dispatcher assembled"
        );
        Self {
            commands,
            filters,
            listeners: registry.proxy(&Key::of()),
        }
    }

    /// Command manager used for resolution.
    #[must_use]
    pub fn commands(&self) -> &CommandManager {
        &self.commands
    }

    /// Binds `scope` to `call` and `request`, then runs the filtered command.
    /// The binding is released and the request destroyed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the scope is already bound, the command
    /// cannot be resolved, or a filter or the command fails.
    pub fn execute(
        &self,
        scope: &mut Scope,
        call: Call,
        request: Request,
    ) -> Result<Content, CommandError> {
        let guard = scope.enter(call, request)?;
        let call = guard.call()?;
        self.listeners.call_started(call);
        let outcome = self.run(call, &guard);
        self.listeners.call_finished(call, outcome.as_ref());
        outcome
    }

    fn run(&self, call: &Call, scope: &Scope) -> Result<Content, CommandError> {
        let command = self.commands.for_name(call.name())?;
        let command_type = command.command_type();
        let filters: Vec<Arc<dyn Filter>> = self
            .filters
            .iter()
            .filter(|definition| definition.matches(command_type))
            .map(|definition| Arc::clone(definition.filter()))
            .collect();
        debug!(
            target: DISPATCH_TARGET,
            name = call.name(),
            command = command_type.name(),
            filters = filters.len(),
            "dispatching call"
        );
        FilterChain::new(&filters, command.as_ref()).proceed(call, scope)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("commands", &self.commands)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}
