//! Connection registry.
//!
//! Tracks every live connection with its peer address, writable-interest
//! flag, and FIFO outbound queue. Slab-backed for O(1) insert, lookup, and
//! remove; slot indices double as mio tokens. The registry does no I/O --
//! the event loop owns all socket operations and is the only mutator, so
//! no locking is needed.

use mio::net::TcpStream;
use slab::Slab;
use std::collections::VecDeque;
use std::net::SocketAddr;

/// A single client connection and its outbound state.
///
/// Removing the slab entry drops the stream, the interest flag, and the
/// queue together, so deregistration can never leave a dangling queue
/// behind for a later iteration to trip on.
pub struct Connection {
    /// The non-blocking socket, registered with the poll under this
    /// connection's slab index.
    pub stream: TcpStream,
    /// Remote address, captured at accept time for logging.
    pub peer: SocketAddr,
    /// Whether the connection is currently registered for writable
    /// readiness. Mirrors the mio interest set.
    pub wants_write: bool,
    /// Responses awaiting transmission, oldest first. A partially written
    /// message has its remainder put back at the front.
    outbound: VecDeque<Vec<u8>>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            wants_write: false,
            outbound: VecDeque::new(),
        }
    }

    /// Append a response to the outbound queue.
    pub fn enqueue(&mut self, response: Vec<u8>) {
        self.outbound.push_back(response);
    }

    /// Take the oldest pending response, if any.
    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    /// Put the unsent remainder of a message back at the head of the
    /// queue so the next writable event resumes it before anything else.
    pub fn requeue_front(&mut self, remainder: Vec<u8>) {
        self.outbound.push_front(remainder);
    }

    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }
}

/// Registry of active connections using slab allocation.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn register(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Remove a connection, returning it for final teardown I/O.
    ///
    /// Idempotent: removing an absent id is a no-op, not an error.
    pub fn deregister(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Append a response to a connection's outbound queue. Quietly does
    /// nothing if the connection is already gone.
    pub fn enqueue_response(&mut self, id: usize, response: Vec<u8>) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.enqueue(response);
        }
    }

    /// Take the oldest pending response for a connection.
    pub fn dequeue_response(&mut self, id: usize) -> Option<Vec<u8>> {
        self.connections.get_mut(id).and_then(Connection::dequeue)
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }

    /// Iterate over the writable-interest subset.
    pub fn iter_write_interested(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter().filter(|(_, c)| c.wants_write)
    }

    /// Remove and yield every connection, for shutdown teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};

    /// Build a connected mio stream pair via a throwaway listener.
    fn connected_stream() -> io::Result<(Connection, StdStream)> {
        let listener = StdListener::bind("127.0.0.1:0")?;
        let client = StdStream::connect(listener.local_addr()?)?;
        let (accepted, peer) = listener.accept()?;
        accepted.set_nonblocking(true)?;
        let conn = Connection::new(TcpStream::from_std(accepted), peer);
        Ok((conn, client))
    }

    #[test]
    fn test_queue_is_fifo() {
        let (mut conn, _client) = connected_stream().unwrap();
        assert!(!conn.has_pending());

        conn.enqueue(b"first".to_vec());
        conn.enqueue(b"second".to_vec());
        assert!(conn.has_pending());

        assert_eq!(conn.dequeue().unwrap(), b"first");
        assert_eq!(conn.dequeue().unwrap(), b"second");
        assert!(conn.dequeue().is_none());
    }

    #[test]
    fn test_requeue_front_resumes_before_queue() {
        let (mut conn, _client) = connected_stream().unwrap();
        conn.enqueue(b"queued".to_vec());
        conn.requeue_front(b"remainder".to_vec());

        assert_eq!(conn.dequeue().unwrap(), b"remainder");
        assert_eq!(conn.dequeue().unwrap(), b"queued");
    }

    #[test]
    fn test_register_deregister() {
        let mut registry = ConnectionRegistry::new(2);
        let (c1, _k1) = connected_stream().unwrap();
        let (c2, _k2) = connected_stream().unwrap();
        let (c3, _k3) = connected_stream().unwrap();

        let id1 = registry.register(c1).unwrap();
        let id2 = registry.register(c2).unwrap();

        // At capacity
        assert!(registry.register(c3).is_none());
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(id1).is_some());
        assert!(!registry.contains(id1));
        // Idempotent: second removal is a no-op
        assert!(registry.deregister(id1).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id2));
    }

    #[test]
    fn test_enqueue_on_absent_connection_is_noop() {
        let mut registry = ConnectionRegistry::new(4);
        registry.enqueue_response(7, b"nobody home".to_vec());
        assert!(registry.dequeue_response(7).is_none());
    }

    #[test]
    fn test_write_interest_subset() {
        let mut registry = ConnectionRegistry::new(4);
        let (c1, _k1) = connected_stream().unwrap();
        let (c2, _k2) = connected_stream().unwrap();

        let id1 = registry.register(c1).unwrap();
        let _id2 = registry.register(c2).unwrap();

        registry.get_mut(id1).unwrap().wants_write = true;

        let interested: Vec<usize> =
            registry.iter_write_interested().map(|(id, _)| id).collect();
        assert_eq!(interested, vec![id1]);
    }
}
