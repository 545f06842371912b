//! Server lifecycle.
//!
//! `Server::start` binds the listener synchronously, then runs the event
//! loop on a dedicated thread. The thread handle and the cancellation
//! signal stay private; the public surface is start/stop/join.

use crate::config::Config;
use crate::dispatch::Handler;
use crate::event_loop::EventLoop;
use mio::Waker;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// A running server instance.
///
/// Dropping the handle stops the server and waits for the loop thread to
/// finish.
pub struct Server {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind and launch the event loop.
    ///
    /// The listener is bound before this returns, so a client may connect
    /// the moment `start` succeeds; there is no window where the loop
    /// thread has not yet reached the bind.
    pub fn start<H: Handler>(config: Config, handler: H) -> Result<Self, ServerError> {
        let mut event_loop =
            EventLoop::new(&config, Box::new(handler)).map_err(ServerError::Bind)?;

        let local_addr = event_loop.local_addr();
        let stop = event_loop.stop_flag();
        let waker = event_loop.waker();

        let thread = std::thread::Builder::new()
            .name("lineserv-loop".to_string())
            .spawn(move || {
                if let Err(e) = event_loop.run() {
                    error!(error = %e, "Event loop failed");
                }
            })
            .map_err(ServerError::Spawn)?;

        Ok(Self {
            local_addr,
            stop,
            waker,
            thread: Some(thread),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the loop to tear down, and wait for it.
    ///
    /// Safe to call from any thread relative to the loop; the loop sees
    /// the flag at its next iteration boundary at the latest. Calling
    /// `stop` when already stopped is a no-op.
    pub fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            let _ = self.waker.wake();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Block until the loop ends on its own, e.g. via a shutdown request.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors launching a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[source] io::Error),
}
