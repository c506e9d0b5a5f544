//! Short names and namespace prefixes for commands.

use std::collections::BTreeMap;

use tracing::debug;

use crate::registry::{Matcher, Registry};

const ALIAS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::command");

/// Alias contributed through the registry under `Key::<AliasDefinition>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasDefinition {
    alias: String,
    namespace: String,
}

impl AliasDefinition {
    /// Maps `alias` to `namespace`.
    #[must_use]
    pub fn new(alias: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            namespace: namespace.into(),
        }
    }

    /// Short name or prefix.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Namespace it stands for.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Fixed alias table consulted before every command lookup.
///
/// A name that matches an alias exactly is replaced by its namespace. Failing
/// that, the segment before the first `.` is looked up, so with
/// `@palava -> palava` the name `@palava.system.version` resolves to
/// `palava.system.version`. Names without a matching alias pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    /// Table holding the given `alias -> namespace` pairs.
    pub fn new<I, A, N>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (A, N)>,
        A: Into<String>,
        N: Into<String>,
    {
        Self {
            aliases: aliases
                .into_iter()
                .map(|(alias, namespace)| (alias.into(), namespace.into()))
                .collect(),
        }
    }

    /// Table holding the configured aliases plus every [`AliasDefinition`]
    /// registered in `registry`. Registered definitions win over configured
    /// ones with the same alias.
    #[must_use]
    pub fn with_registered(configured: &BTreeMap<String, String>, registry: &Registry) -> Self {
        let mut table = Self::new(configured.clone());
        for definition in registry.listeners_matching(&Matcher::<AliasDefinition>::any()) {
            table.insert(definition.as_ref().clone());
        }
        table
    }

    /// Adds or replaces one alias.
    pub fn insert(&mut self, definition: AliasDefinition) {
        debug!(
            target: ALIAS_TARGET,
            alias = definition.alias(),
            namespace = definition.namespace(),
            "alias defined"
        );
        self.aliases.insert(definition.alias, definition.namespace);
    }

    /// Fully-qualified name for `aliased`.
    #[must_use]
    pub fn resolve(&self, aliased: &str) -> String {
        if let Some(namespace) = self.aliases.get(aliased) {
            return namespace.clone();
        }
        if let Some((prefix, rest)) = aliased.split_once('.')
            && let Some(namespace) = self.aliases.get(prefix)
        {
            return format!("{namespace}.{rest}");
        }
        aliased.to_owned()
    }

    /// Number of aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Returns `true` when no alias is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
