//! Fully-qualified command names and the factories that build them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::job::{Job, JobCommand};
use super::{BoxError, Command};
use crate::context::ServerContext;

type Factory = Arc<dyn Fn(&ServerContext) -> Result<Arc<dyn Command>, BoxError> + Send + Sync>;

/// Registry of constructible commands keyed by fully-qualified name.
#[derive(Clone, Default)]
pub struct CommandCatalog {
    factories: BTreeMap<String, Factory>,
}

impl CommandCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in `palava.*` commands.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        super::builtin::register(&mut catalog);
        catalog
    }

    /// Registers a command built by `factory`. Replaces any previous entry
    /// with the same name.
    pub fn register<C, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        C: Command,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.register_with(name, move |_| Ok(factory()))
    }

    /// Registers a command whose construction needs server services and may
    /// fail.
    pub fn register_with<C, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        C: Command,
        F: Fn(&ServerContext) -> Result<C, BoxError> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |server: &ServerContext| {
            factory(server).map(|command| Arc::new(command) as Arc<dyn Command>)
        });
        self.factories.insert(name.into(), factory);
        self
    }

    /// Registers a legacy job, run through [`JobCommand`].
    pub fn register_job<J, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.register_with(name, move |server: &ServerContext| {
            Ok(JobCommand::new(factory(), server.clone()))
        })
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the command registered under `name`. `None` means no such
    /// command.
    pub(crate) fn instantiate(
        &self,
        name: &str,
        server: &ServerContext,
    ) -> Option<Result<Arc<dyn Command>, BoxError>> {
        self.factories.get(name).map(|factory| factory(server))
    }
}

impl fmt::Debug for CommandCatalog {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandCatalog")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
