//! Name resolution with a per-name instance cache.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{AliasTable, Command, CommandCatalog, CommandError};
use crate::context::ServerContext;

const MANAGER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::command");

/// Resolves aliased names to command instances.
///
/// Each fully-qualified name is built at most once per manager and shared by
/// all later lookups.
pub struct CommandManager {
    aliases: AliasTable,
    catalog: CommandCatalog,
    server: ServerContext,
    cache: DashMap<String, Arc<dyn Command>>,
}

impl CommandManager {
    /// Manager over `catalog` using `aliases`, handing `server` to factories.
    #[must_use]
    pub fn new(aliases: AliasTable, catalog: CommandCatalog, server: ServerContext) -> Self {
        Self {
            aliases,
            catalog,
            server,
            cache: DashMap::new(),
        }
    }

    /// Command registered for `aliased` once aliases are applied.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NotFound`] when the resolved name is unknown or
    /// its factory fails.
    pub fn for_name(&self, aliased: &str) -> Result<Arc<dyn Command>, CommandError> {
        let resolved = self.aliases.resolve(aliased);
        if let Some(cached) = self.cache.get(&resolved) {
            return Ok(Arc::clone(cached.value()));
        }

        let not_found = |source| CommandError::NotFound {
            name: aliased.to_owned(),
            resolved: resolved.clone(),
            source,
        };
        let command = match self.catalog.instantiate(&resolved, &self.server) {
            Some(Ok(command)) => command,
            Some(Err(source)) => return Err(not_found(Some(source))),
            None => return Err(not_found(None)),
        };
        debug!(
            target: MANAGER_TARGET,
            name = aliased,
            resolved = %resolved,
            "command instantiated"
        );
        let entry = self.cache.entry(resolved).or_insert(command);
        Ok(Arc::clone(entry.value()))
    }

    /// Alias table in use.
    #[must_use]
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Server services handed to command factories.
    #[must_use]
    pub fn server(&self) -> &ServerContext {
        &self.server
    }

    /// Number of cached command instances.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandManager")
            .field("aliases", &self.aliases)
            .field("catalog", &self.catalog)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}
