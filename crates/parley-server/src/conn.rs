//! Live connection tracking and outbound queues.
//!
//! Each accepted socket gets an id, an unbounded outbound channel with
//! a byte cap accounted alongside it, and a shutdown flag its read
//! loop watches. The writer task drains the channel in small chunks;
//! enqueueing past the cap silently drops the frame.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use parley_proto::encode_frame;

/// Connection identifier — the runtime's "fd".
pub type ConnId = u64;

/// Size of one socket write when draining the outbound queue.
pub const WRITE_CHUNK: usize = 4096;

/// Handle held in the map for one live connection.
pub struct ConnHandle {
    outbox: mpsc::UnboundedSender<Bytes>,
    /// Bytes sitting in the outbound queue, shared with the writer.
    queued: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

/// The owning map of live connections, keyed by id.
pub struct ConnectionMap {
    inner: Mutex<HashMap<ConnId, ConnHandle>>,
    max_write_buffer: usize,
}

impl ConnectionMap {
    pub fn new(max_write_buffer: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_write_buffer,
        }
    }

    /// Register a freshly accepted connection.
    pub fn insert(
        &self,
        id: ConnId,
        outbox: mpsc::UnboundedSender<Bytes>,
        queued: Arc<AtomicUsize>,
        shutdown: watch::Sender<bool>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            id,
            ConnHandle {
                outbox,
                queued,
                shutdown,
            },
        );
    }

    /// Drop a connection from the map.
    ///
    /// Signals the read loop to stop and closes the outbound channel so
    /// the writer drains whatever is queued and then closes the socket.
    /// Safe to call twice.
    pub fn remove(&self, id: ConnId) -> bool {
        let handle = self.inner.lock().unwrap().remove(&id);
        match handle {
            Some(handle) => {
                let _ = handle.shutdown.send(true);
                // Dropping the handle drops the only sender; the writer
                // sees the channel close after the queued tail.
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.inner.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode and enqueue a frame.
    ///
    /// Returns `false` when the connection is gone or the write cap
    /// would be exceeded — the frame is dropped in both cases, and the
    /// caller cannot distinguish drop from delivery (by contract).
    pub fn send_frame(&self, id: ConnId, msg_type: u16, payload: &[u8]) -> bool {
        let Ok(frame) = encode_frame(msg_type, payload) else {
            trace!(conn = id, msg_type, len = payload.len(), "frame too large, dropped");
            return false;
        };
        self.enqueue(id, frame)
    }

    /// Serialize a JSON body and enqueue it.
    pub fn send_json(&self, id: ConnId, msg_type: u16, body: &serde_json::Value) -> bool {
        self.send_frame(id, msg_type, body.to_string().as_bytes())
    }

    fn enqueue(&self, id: ConnId, frame: Bytes) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(handle) = inner.get(&id) else {
            return false;
        };

        let len = frame.len();
        // Reserve the bytes first; back out if the cap is crossed.
        let prior = handle.queued.fetch_add(len, Ordering::AcqRel);
        if prior + len > self.max_write_buffer {
            handle.queued.fetch_sub(len, Ordering::AcqRel);
            debug!(conn = id, queued = prior, "write buffer full, frame dropped");
            return false;
        }

        if handle.outbox.send(frame).is_err() {
            handle.queued.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Ids of every live connection, for shutdown sweeps.
    pub fn ids(&self) -> Vec<ConnId> {
        self.inner.lock().unwrap().keys().copied().collect()
    }
}
