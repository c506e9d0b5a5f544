//! Behavioural suites for the bridge server.

pub(crate) mod support;
