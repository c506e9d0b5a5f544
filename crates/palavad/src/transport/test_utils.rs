//! Handlers used by the listener tests.

use std::io::Read;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{ConnectionHandler, ConnectionStream};

/// Records the peer label of every connection it serves.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    peers: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub(crate) fn peers(&self) -> Vec<String> {
        self.peers.lock().clone()
    }

    /// Waits up to two seconds for `expected` connections.
    pub(crate) fn wait_for(&self, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.peers.lock().len() >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl ConnectionHandler for RecordingHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.peers.lock().push(stream.peer().to_owned());
    }
}

/// Keeps each connection open until the test releases the barrier.
pub(crate) struct HoldingHandler {
    pub(crate) release: Arc<Barrier>,
}

impl ConnectionHandler for HoldingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.release.wait();
    }
}

/// Reads each connection to end-of-stream, then records it.
#[derive(Default)]
pub(crate) struct DrainingHandler {
    pub(crate) finished: RecordingHandler,
}

impl ConnectionHandler for DrainingHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink);
        self.finished.handle(stream);
    }
}
