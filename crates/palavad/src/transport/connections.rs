//! Connections handed to the pool and not yet finished.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::handler::Closer;
use super::{ConnectionStream, LISTENER_TARGET};

/// Close handles of every connection still being served.
#[derive(Default)]
pub(crate) struct OpenConnections {
    next: AtomicU64,
    open: Mutex<HashMap<u64, Closer>>,
}

impl OpenConnections {
    /// Records `stream` until the returned entry is dropped.
    pub(crate) fn track(self: &Arc<Self>, stream: &ConnectionStream) -> io::Result<Tracked> {
        let closer = stream.closer()?;
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.open.lock().insert(id, closer);
        Ok(Tracked {
            connections: Arc::clone(self),
            id,
        })
    }

    /// Shuts down every tracked connection. Returns how many were open.
    pub(crate) fn close_all(&self) -> usize {
        let closers: Vec<Closer> = self.open.lock().drain().map(|(_, closer)| closer).collect();
        for closer in &closers {
            if let Err(error) = closer.close() {
                warn!(target: LISTENER_TARGET, error = %error, "cannot close connection");
            }
        }
        if !closers.is_empty() {
            debug!(target: LISTENER_TARGET, count = closers.len(), "closed open connections");
        }
        closers.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.open.lock().len()
    }
}

/// Membership of one connection in [`OpenConnections`].
pub(crate) struct Tracked {
    connections: Arc<OpenConnections>,
    id: u64,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.connections.open.lock().remove(&self.id);
    }
}
