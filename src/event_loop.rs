//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue
//! on macOS.
//!
//! One thread owns the poll, the listener, and the connection registry.
//! Within an iteration, readable events are always serviced before the
//! writable side of the same event. mio delivers edge-triggered readiness,
//! so both sides drain until WouldBlock: reads in bounded chunks (one chunk
//! is one message), writes one queued message at a time, with a short
//! write's remainder going back to the head of the queue.

use crate::config::Config;
use crate::dispatch::{Directive, Dispatcher, Handler};
use crate::registry::{Connection, ConnectionRegistry};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Upper bound on a single read. One recv is one message; anything longer
/// is truncated at this boundary.
pub const READ_CHUNK: usize = 1024;

const MAX_CONNECTIONS: usize = 1024;
const EVENT_CAPACITY: usize = 256;

/// Whether an event should keep the loop running or end it.
enum Flow {
    Continue,
    Shutdown,
}

/// The readiness-multiplexing core.
///
/// Owns all I/O state. Constructed with the listener already bound, so a
/// client may connect as soon as the constructor returns, before `run` is
/// even scheduled.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl EventLoop {
    /// Bind the listener and set up the poll. Binding happens here, not in
    /// `run`, so callers can connect immediately after construction.
    pub fn new(config: &Config, handler: Box<dyn Handler>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let listener = create_listener(config.bind_addr())?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            local_addr,
            registry: ConnectionRegistry::new(MAX_CONNECTIONS),
            dispatcher: Dispatcher::new(handler),
            stop: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared flag that, once set and followed by a wake, ends the loop at
    /// its next iteration boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Run until a shutdown request arrives, the stop flag is raised, or
    /// the poll itself fails. Only a poll failure produces `Err`.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "Server listening");

        loop {
            self.poll.poll(&mut self.events, None)?;

            if self.stop.load(Ordering::Acquire) {
                self.teardown();
                return Ok(());
            }

            let mut shutdown = false;
            for event in self.events.iter() {
                match event.token() {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => {
                        accept_connections(&self.listener, &mut self.poll, &mut self.registry);
                    }
                    Token(conn_id) => {
                        // The connection may have been closed earlier in
                        // this same batch of events.
                        if !self.registry.contains(conn_id) {
                            continue;
                        }

                        if event.is_error() {
                            close_connection(&mut self.poll, &mut self.registry, conn_id, true);
                            continue;
                        }

                        if event.is_readable() || event.is_read_closed() {
                            match handle_readable(
                                conn_id,
                                &mut self.poll,
                                &mut self.registry,
                                &self.dispatcher,
                            ) {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Shutdown) => {
                                    // Terminate immediately: remaining
                                    // events in this batch go unserviced.
                                    shutdown = true;
                                    break;
                                }
                                Err(e) => {
                                    debug!(conn_id, error = %e, "Connection error");
                                    close_connection(
                                        &mut self.poll,
                                        &mut self.registry,
                                        conn_id,
                                        false,
                                    );
                                    continue;
                                }
                            }
                        }

                        if !self.registry.contains(conn_id) {
                            continue;
                        }

                        if event.is_writable() {
                            if let Err(e) =
                                handle_writable(conn_id, &mut self.poll, &mut self.registry)
                            {
                                debug!(conn_id, error = %e, "Connection error");
                                close_connection(
                                    &mut self.poll,
                                    &mut self.registry,
                                    conn_id,
                                    false,
                                );
                            }
                        }
                    }
                }
            }

            if shutdown {
                self.stop.store(true, Ordering::Release);
                self.teardown();
                return Ok(());
            }
        }
    }

    /// Graceful teardown: half-close every connection first, release the
    /// listener last.
    fn teardown(&mut self) {
        let count = self.registry.len();
        for mut conn in self.registry.drain() {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            let _ = conn.stream.shutdown(Shutdown::Write);
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
        info!(closed = count, "Server stopped");
    }
}

fn accept_connections(listener: &TcpListener, poll: &mut Poll, registry: &mut ConnectionRegistry) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                // Streams accepted through the mio listener are already
                // non-blocking.
                let conn_id = match registry.register(Connection::new(stream, peer)) {
                    Some(id) => id,
                    None => {
                        warn!(peer = %peer, "Connection limit reached, rejecting");
                        continue;
                    }
                };

                // Re-borrow after insert
                let conn = registry.get_mut(conn_id).unwrap();
                if let Err(e) =
                    poll.registry()
                        .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
                {
                    error!(peer = %peer, error = %e, "Failed to register connection");
                    registry.deregister(conn_id);
                    continue;
                }

                info!(conn_id, peer = %peer, "Connection established");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                // Accept failures never take down the loop.
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

fn handle_readable(
    conn_id: usize,
    poll: &mut Poll,
    registry: &mut ConnectionRegistry,
    dispatcher: &Dispatcher,
) -> io::Result<Flow> {
    let conn = registry
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match conn.stream.read(&mut buf) {
            // Empty read means the peer closed its side; deregister rather
            // than leaving a dead socket in the readable set.
            Ok(0) => return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer closed")),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let request = String::from_utf8_lossy(&buf[..n]);
        debug!(conn_id, peer = %conn.peer, request = %request, "Message received");

        match dispatcher.dispatch(conn.peer, &request) {
            Directive::Reply(text) => {
                conn.enqueue(text.into_bytes());
                if !conn.wants_write {
                    conn.wants_write = true;
                    poll.registry().reregister(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                }
            }
            Directive::ReplyAndShutdown(text) => {
                // The loop is about to tear everything down; push the ack
                // out now instead of waiting for a writable event that
                // will never be polled.
                conn.enqueue(text.into_bytes());
                flush_outbound(conn);
                return Ok(Flow::Shutdown);
            }
            Directive::NoReply => {}
        }
    }
}

fn handle_writable(
    conn_id: usize,
    poll: &mut Poll,
    registry: &mut ConnectionRegistry,
) -> io::Result<()> {
    let conn = registry
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    loop {
        let message = match conn.dequeue() {
            Some(message) => message,
            None => {
                // Queue drained: stop asking for writable readiness.
                if conn.wants_write {
                    conn.wants_write = false;
                    poll.registry()
                        .reregister(&mut conn.stream, Token(conn_id), Interest::READABLE)?;
                }
                return Ok(());
            }
        };

        match conn.stream.write(&message) {
            Ok(n) if n < message.len() => {
                // Short write: the remainder goes back to the queue head
                // and resumes on the next writable event.
                conn.requeue_front(message[n..].to_vec());
                return Ok(());
            }
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.requeue_front(message);
                return Ok(());
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                conn.requeue_front(message);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Best-effort synchronous drain of a connection's queue, used only on the
/// shutdown path. Gives up on WouldBlock or any error.
fn flush_outbound(conn: &mut Connection) {
    while let Some(message) = conn.dequeue() {
        let mut offset = 0;
        while offset < message.len() {
            match conn.stream.write(&message[offset..]) {
                Ok(0) => return,
                Ok(n) => offset += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    conn.requeue_front(message[offset..].to_vec());
                    return;
                }
                Err(_) => return,
            }
        }
    }
}

fn close_connection(
    poll: &mut Poll,
    registry: &mut ConnectionRegistry,
    conn_id: usize,
    abortive: bool,
) {
    if let Some(mut conn) = registry.deregister(conn_id) {
        let _ = poll.registry().deregister(&mut conn.stream);
        if abortive {
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        debug!(conn_id, peer = %conn.peer, "Connection closed");
    }
}

/// Create the listening socket: non-blocking with SO_REUSEADDR so quick
/// restarts do not trip over TIME_WAIT.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    Ok(socket.into())
}
