//! Command resolution and dispatch.
//!
//! A request names its command by an aliased name. The [`CommandManager`]
//! resolves aliases against the [`AliasTable`], builds the command from the
//! [`CommandCatalog`] on first use and caches it. The [`Dispatcher`] binds
//! the worker's [`Scope`](crate::scope::Scope), wraps the command in the filters
//! whose predicates match its [`CommandType`] and runs the chain.

mod alias;
pub mod builtin;
mod catalog;
mod dispatcher;
mod errors;
mod filter;
mod job;
mod manager;
#[cfg(test)]
mod tests;

use std::any::{TypeId, type_name};
use std::fmt;

pub use self::alias::{AliasDefinition, AliasTable};
pub use self::catalog::CommandCatalog;
pub use self::dispatcher::{CallListener, Dispatcher};
pub use self::errors::{BoxError, CommandError};
pub use self::filter::{Filter, FilterChain, FilterDefinition};
pub use self::job::{Job, JobCommand, JobError, Response};
pub use self::manager::CommandManager;

use crate::call::{Call, Content};
use crate::scope::Scope;

/// Concrete type behind a command, used to select filters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandType {
    id: TypeId,
    name: &'static str,
}

impl CommandType {
    /// Type descriptor for `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Returns `true` when this describes `T`.
    #[must_use]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Rust type name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CommandType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "CommandType({})", self.name)
    }
}

/// Server-side logic addressed by name.
pub trait Command: Send + Sync + 'static {
    /// Runs the command for `call`. `scope` is bound to the same call and
    /// its request for the duration of the invocation.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command fails.
    fn execute(&self, call: &Call, scope: &Scope) -> Result<Content, CommandError>;

    /// Type used to select filters. Adapters report the type they wrap.
    fn command_type(&self) -> CommandType {
        CommandType::of::<Self>()
    }
}
