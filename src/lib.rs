//! lineserv: a non-blocking line-oriented TCP dispatch server.
//!
//! Many concurrent clients are served from a single readiness-driven
//! event loop. Requests are short UTF-8 text messages (one recv is one
//! message, bounded at 1024 bytes); responses are queued per connection
//! and delivered as the socket becomes writable.
//!
//! Two control requests are handled by the server itself: `l4_ping`
//! answers a fixed acknowledgement, and `shutdown` answers then tears the
//! server down. Everything else goes to the [`Handler`] you inject.
//!
//! ```no_run
//! use lineserv::{client, Config, Server};
//!
//! let config = Config::new("127.0.0.1", 9999)?;
//! let mut server = Server::start(config, |request: &str| {
//!     (request == "hello").then(|| "world".to_string())
//! })?;
//!
//! let reply = client::send_request("hello", "127.0.0.1", 9999)?;
//! assert_eq!(reply, "world");
//!
//! server.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod event_loop;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError};
pub use dispatch::{Directive, Handler, NoopHandler};
pub use server::{Server, ServerError};
