//! Worker-local binding of the call being dispatched.
//!
//! Every connection task owns one [`Scope`]. The dispatcher binds the current
//! call and request with [`Scope::enter`] and hands commands and filters a
//! shared `&Scope`; the returned [`ScopeGuard`] clears the binding when it
//! goes out of scope, including while unwinding from a panic.

use std::ops::Deref;
use std::sync::Arc;

use thiserror::Error;

use crate::call::Call;
use crate::request::Request;
use crate::session::Session;

/// Errors raised when the scope is used outside its binding rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    /// A lookup ran outside a dispatch.
    #[error("no {what} is bound outside a dispatch")]
    NotBound {
        /// What was looked up.
        what: &'static str,
    },
    /// A dispatch tried to bind while another binding is active.
    #[error("scope is already bound to a call")]
    AlreadyBound,
    /// The current request runs without a session.
    #[error("the current request has no session")]
    NoSession,
}

struct Binding {
    call: Call,
    request: Request,
}

/// Holder for the call and request of the dispatch running on this worker.
#[derive(Default)]
pub struct Scope {
    binding: Option<Binding>,
}

impl Scope {
    /// Creates an unbound scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `call` and `request` until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::AlreadyBound`] when a previous binding was never
    /// released.
    pub fn enter(&mut self, call: Call, request: Request) -> Result<ScopeGuard<'_>, ScopeError> {
        if self.binding.is_some() {
            return Err(ScopeError::AlreadyBound);
        }
        self.binding = Some(Binding { call, request });
        Ok(ScopeGuard { scope: self })
    }

    /// Returns `true` while a dispatch is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Call being dispatched.
    ///
    /// # Errors
    ///
    /// Fails with [`ScopeError::NotBound`] outside a dispatch.
    pub fn call(&self) -> Result<&Call, ScopeError> {
        self.binding
            .as_ref()
            .map(|binding| &binding.call)
            .ok_or(ScopeError::NotBound { what: "call" })
    }

    /// Request being dispatched.
    ///
    /// # Errors
    ///
    /// Fails with [`ScopeError::NotBound`] outside a dispatch.
    pub fn request(&self) -> Result<&Request, ScopeError> {
        self.binding
            .as_ref()
            .map(|binding| &binding.request)
            .ok_or(ScopeError::NotBound { what: "request" })
    }

    /// Session of the request being dispatched.
    ///
    /// # Errors
    ///
    /// Fails with [`ScopeError::NotBound`] outside a dispatch and with
    /// [`ScopeError::NoSession`] when the request has no session.
    pub fn session(&self) -> Result<&Arc<Session>, ScopeError> {
        self.request()?.session().ok_or(ScopeError::NoSession)
    }
}

/// Keeps a [`Scope`] bound; unbinds and destroys the request on drop.
pub struct ScopeGuard<'scope> {
    scope: &'scope mut Scope,
}

impl Deref for ScopeGuard<'_> {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(binding) = self.scope.binding.take() {
            binding.request.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::panic::{self, AssertUnwindSafe};

    use rstest::{fixture, rstest};

    use super::*;
    use crate::protocol::{CallType, Header};

    #[fixture]
    fn call() -> Call {
        Call::new(Header::new(CallType::Json, "echo", "", 0), Vec::new())
    }

    #[fixture]
    fn request() -> Request {
        Request::new(BTreeMap::new(), None)
    }

    #[test]
    fn lookups_fail_fast_outside_a_dispatch() {
        let scope = Scope::new();
        assert_eq!(
            scope.call().err(),
            Some(ScopeError::NotBound { what: "call" })
        );
        assert_eq!(
            scope.request().err(),
            Some(ScopeError::NotBound { what: "request" })
        );
        assert!(scope.session().is_err());
    }

    #[rstest]
    fn binding_lasts_for_the_guard(call: Call, request: Request) {
        let mut scope = Scope::new();
        {
            let guard = scope.enter(call, request).expect("enter");
            assert_eq!(guard.call().map(Call::name), Ok("echo"));
            assert_eq!(guard.session().err(), Some(ScopeError::NoSession));
        }
        assert!(!scope.is_bound());
    }

    #[rstest]
    fn guard_unbinds_while_unwinding(call: Call, request: Request) {
        let mut scope = Scope::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = scope.enter(call, request).expect("enter");
            panic!("command failed");
        }));
        assert!(outcome.is_err());
        assert!(!scope.is_bound());
    }

    #[rstest]
    fn leaked_binding_is_reported(call: Call, request: Request) {
        let mut scope = Scope::new();
        std::mem::forget(scope.enter(call, request).expect("enter"));
        assert!(matches!(
            scope.enter(
                Call::new(Header::new(CallType::Json, "again", "", 0), Vec::new()),
                Request::new(BTreeMap::new(), None),
            ),
            Err(ScopeError::AlreadyBound)
        ));
    }
}
