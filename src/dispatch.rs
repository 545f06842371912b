//! Request dispatching.
//!
//! Maps a decoded request string to a typed directive for the event loop.
//! Two control requests are intercepted before the injected handler sees
//! anything: a liveness probe and a shutdown request. Everything else is
//! delegated; an empty delegated answer is turned into a warning reply so
//! the requester never gets a silent drop.

use std::net::SocketAddr;
use tracing::{info, warn};

/// Liveness probe request, answered without consulting the handler.
pub const PING_REQUEST: &str = "l4_ping";
/// Fixed acknowledgement for the liveness probe.
pub const PING_REPLY: &str = "OK <l4_ping>";
/// Shutdown request, answered and then acted on by the event loop.
pub const SHUTDOWN_REQUEST: &str = "shutdown";
/// Fixed acknowledgement for the shutdown request.
pub const SHUTDOWN_REPLY: &str = "OK <shutdown>";

/// Instruction for the event loop, produced once per dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Enqueue this response on the connection's outbound queue.
    Reply(String),
    /// Enqueue this response, then terminate the loop.
    ReplyAndShutdown(String),
    /// Nothing to send.
    NoReply,
}

/// Application callback for requests outside the control vocabulary.
///
/// Called synchronously on the loop thread, so it must not block.
/// Returning `None` (or an empty string) means the request was not
/// recognized; the dispatcher answers with a warning on the handler's
/// behalf.
pub trait Handler: Send + 'static {
    fn handle(&self, request: &str) -> Option<String>;
}

impl<F> Handler for F
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    fn handle(&self, request: &str) -> Option<String> {
        self(request)
    }
}

/// Handler that recognizes nothing. Every delegated request falls through
/// to the dispatcher's unknown-request reply.
pub struct NoopHandler;

impl Handler for NoopHandler {
    fn handle(&self, _request: &str) -> Option<String> {
        None
    }
}

/// Dispatcher owning the injected handler.
pub struct Dispatcher {
    handler: Box<dyn Handler>,
}

impl Dispatcher {
    pub fn new(handler: Box<dyn Handler>) -> Self {
        Self { handler }
    }

    /// Produce exactly one directive for a request. Never fails.
    pub fn dispatch(&self, peer: SocketAddr, request: &str) -> Directive {
        match request {
            PING_REQUEST => Directive::Reply(PING_REPLY.to_string()),
            SHUTDOWN_REQUEST => {
                info!(peer = %peer, "Received a shutdown request, goodbye");
                Directive::ReplyAndShutdown(SHUTDOWN_REPLY.to_string())
            }
            _ => match self.handler.handle(request) {
                Some(response) if !response.is_empty() => Directive::Reply(response),
                _ => {
                    warn!(peer = %peer, request, "Unknown request");
                    Directive::Reply(format!(
                        "WARNING: server got an unknown request from you: \"{request}\""
                    ))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_ping_intercepted() {
        let dispatcher = Dispatcher::new(Box::new(NoopHandler));
        assert_eq!(
            dispatcher.dispatch(peer(), PING_REQUEST),
            Directive::Reply(PING_REPLY.to_string())
        );
    }

    #[test]
    fn test_shutdown_intercepted() {
        let dispatcher = Dispatcher::new(Box::new(NoopHandler));
        assert_eq!(
            dispatcher.dispatch(peer(), SHUTDOWN_REQUEST),
            Directive::ReplyAndShutdown(SHUTDOWN_REPLY.to_string())
        );
    }

    #[test]
    fn test_delegated_to_handler() {
        let dispatcher = Dispatcher::new(Box::new(|request: &str| {
            (request == "hndlr_ping").then(|| "OK <hndlr_ping>".to_string())
        }));
        assert_eq!(
            dispatcher.dispatch(peer(), "hndlr_ping"),
            Directive::Reply("OK <hndlr_ping>".to_string())
        );
    }

    #[test]
    fn test_control_vocabulary_shadows_handler() {
        // Even a handler that claims the probe token never sees it.
        let dispatcher = Dispatcher::new(Box::new(|_: &str| Some("hijacked".to_string())));
        assert_eq!(
            dispatcher.dispatch(peer(), PING_REQUEST),
            Directive::Reply(PING_REPLY.to_string())
        );
    }

    #[test]
    fn test_unknown_request_gets_warning_reply() {
        let dispatcher = Dispatcher::new(Box::new(NoopHandler));
        match dispatcher.dispatch(peer(), "xyz") {
            Directive::Reply(text) => assert!(text.contains("xyz")),
            other => panic!("expected warning reply, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_handler_response_treated_as_unknown() {
        let dispatcher = Dispatcher::new(Box::new(|_: &str| Some(String::new())));
        match dispatcher.dispatch(peer(), "blank") {
            Directive::Reply(text) => assert!(text.starts_with("WARNING")),
            other => panic!("expected warning reply, got {other:?}"),
        }
    }
}
