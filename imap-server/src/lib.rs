//! IMAP4rev1/IMAP4rev2 server engine: connection framing, command
//! dispatcher, built-in command handlers, mailbox/session trackers,
//! the extension composition harness and the backend `Session`
//! contract (spec.md C3-C7, C9).
//!
//! A caller wires up a server by constructing a [`dispatcher::Dispatcher`]
//! with [`handlers::register_builtins`], applying whatever
//! [`extension::Extension`]s it wants via [`extension::install`], then
//! driving a [`connection::Connection`] per accepted socket: read a
//! [`command::Command`], look the name up in the dispatcher, call the
//! resulting handler with a [`dispatcher::CommandContext`] borrowing the
//! connection and a concrete [`session::Session`] implementation.

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod extension;
pub mod handlers;
pub mod response;
pub mod serve;
pub mod session;
pub mod tracker;

pub use config::ServerConfig;
pub use connection::{ConnState, Connection, ConnectionError};
pub use dispatcher::{CommandContext, Dispatcher, Extras, Handler, Outcome};
pub use serve::{serve_connection, ServeOutcome};
pub use session::{Session, SessionError, SessionResult};
