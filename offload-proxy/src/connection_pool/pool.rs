//! Lock-free pool of idle outbound connections using DashMap and SegQueue.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::client::conn::http1::SendRequest;

/// Request sender for one HTTP/1.1 connection to a remote server.
pub type Sender = SendRequest<Empty<Bytes>>;

/// Idle HTTP/1.1 senders keyed by `address:port`, reused across dispatches.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    idle_connections: Arc<DashMap<String, Arc<SegQueue<Sender>>>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops an idle sender to `authority`, skipping connections that have closed.
    ///
    /// The caller still has to wait for `ready()` before sending.
    pub fn try_pop(&self, authority: &str) -> Option<Sender> {
        let queue = self.idle_connections.get(authority)?.value().clone();
        while let Some(sender) = queue.pop() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    /// Returns a sender to the pool once its response has been fully read.
    pub fn push(&self, authority: &str, sender: Sender) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle_connections
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        queue.push(sender);
    }

    /// Number of idle senders held for `authority`.
    pub fn idle(&self, authority: &str) -> usize {
        self.idle_connections
            .get(authority)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
