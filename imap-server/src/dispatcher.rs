//! Case-insensitive command registry with layered handler wrapping
//! (spec.md §4.4): `register`/`wrap`/`get` plus the `CommandContext`
//! every handler and wrapper receives.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::Command;
use crate::connection::Connection;
use crate::session::{Session, SessionResult};

/// A small typed side-channel (spec.md §4.4 "a side-channel key/value
/// map lets wrappers pass data to inner layers"), keyed by type the
/// way `Session::as_move`'s downcast-probe style already does
/// elsewhere in this crate.
#[derive(Default)]
pub struct Extras(HashMap<TypeId, Box<dyn Any + Send>>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.0.remove(&TypeId::of::<T>()).and_then(|v| v.downcast().ok()).map(|b| *b)
    }
}

/// What a handler reports back to the dispatcher on success: the
/// optional bracketed response code and the human-readable completion
/// text (spec.md §6 "status responses").
#[derive(Debug, Clone)]
pub struct Outcome {
    pub code: Option<String>,
    pub text: String,
}

impl Outcome {
    pub fn completed(name: &str) -> Self {
        Self { code: None, text: format!("{name} completed") }
    }

    pub fn with_code(code: impl Into<String>, name: &str) -> Self {
        Self { code: Some(code.into()), text: format!("{name} completed") }
    }
}

/// Everything a handler or wrapper needs (spec.md §4.4): the parsed
/// command, the connection (state, tracker, response writing), the
/// backend session, and the wrapper side channel.
pub struct CommandContext<'a, IO, S> {
    pub command: &'a Command,
    pub connection: &'a mut Connection<IO>,
    pub session: &'a mut S,
    pub extras: &'a mut Extras,
}

/// One command's behavior. Built-in handlers implement this directly;
/// extensions implement it over an `inner: Arc<dyn Handler<IO, S>>`
/// they either delegate to or short-circuit (spec.md §4.7).
#[async_trait]
pub trait Handler<IO, S>: Send + Sync
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    async fn call(&self, ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>;
}

/// Case-insensitive registry with stacking wrappers (spec.md §4.4).
pub struct Dispatcher<IO, S> {
    handlers: HashMap<String, Arc<dyn Handler<IO, S>>>,
}

impl<IO, S> Default for Dispatcher<IO, S> {
    fn default() -> Self {
        Self { handlers: HashMap::new() }
    }
}

impl<IO, S> Dispatcher<IO, S>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-folds `name` to upper; a later registration for the same
    /// name overwrites the earlier one.
    pub fn register(&mut self, name: &str, handler: Arc<dyn Handler<IO, S>>) {
        self.handlers.insert(name.to_ascii_uppercase(), handler);
    }

    /// If `name` isn't registered this is a no-op. Otherwise the
    /// current handler `H` is replaced by `wrapper(H)`. Calling this
    /// `Wrap(cmd, A)` then `Wrap(cmd, B)` yields `B(A(H))` — the
    /// last-added wrapper runs outermost.
    pub fn wrap<F>(&mut self, name: &str, wrapper: F)
    where
        F: FnOnce(Arc<dyn Handler<IO, S>>) -> Arc<dyn Handler<IO, S>>,
    {
        let key = name.to_ascii_uppercase();
        if let Some(inner) = self.handlers.remove(&key) {
            self.handlers.insert(key, wrapper(inner));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler<IO, S>>> {
        self.handlers.get(&name.to_ascii_uppercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;
    use std::sync::Mutex;

    struct RecordingHandler {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Handler<tokio::io::DuplexStream, crate::session::tests::NullSession> for RecordingHandler {
        async fn call(
            &self,
            _ctx: &mut CommandContext<'_, tokio::io::DuplexStream, crate::session::tests::NullSession>,
        ) -> SessionResult<Outcome> {
            self.log.lock().unwrap().push(self.label);
            Ok(Outcome::completed(self.label))
        }
    }

    struct OrderWrapper {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        inner: Arc<dyn Handler<tokio::io::DuplexStream, crate::session::tests::NullSession>>,
    }

    #[async_trait]
    impl Handler<tokio::io::DuplexStream, crate::session::tests::NullSession> for OrderWrapper {
        async fn call(
            &self,
            ctx: &mut CommandContext<'_, tokio::io::DuplexStream, crate::session::tests::NullSession>,
        ) -> SessionResult<Outcome> {
            self.log.lock().unwrap().push(self.label);
            let outcome = self.inner.call(ctx).await;
            outcome.map_err(|e| match e {
                SessionError::No(m) => SessionError::No(format!("{}/{m}", self.label)),
                other => other,
            })
        }
    }

    #[tokio::test]
    async fn wrap_runs_last_added_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d: Dispatcher<tokio::io::DuplexStream, crate::session::tests::NullSession> = Dispatcher::new();
        d.register("SEARCH", Arc::new(RecordingHandler { label: "base", log: log.clone() }));
        d.wrap("SEARCH", |inner| Arc::new(OrderWrapper { label: "A", log: log.clone(), inner }));
        d.wrap("SEARCH", |inner| Arc::new(OrderWrapper { label: "B", log: log.clone(), inner }));

        let handler = d.get("search").expect("lookup is case-insensitive");

        let (_client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(
            server,
            crate::config::ServerConfig::default(),
            imap_types::capability::ServerCapability::default(),
            false,
        );
        let command = Command {
            tag: "A1".to_string(),
            kind: imap_types::NumKind::Seq,
            name: "SEARCH".to_string(),
            body: crate::command::CommandBody::Noop,
        };
        let mut session = crate::session::tests::NullSession;
        let mut extras = Extras::new();
        let mut ctx =
            CommandContext { command: &command, connection: &mut conn, session: &mut session, extras: &mut extras };

        let outcome = handler.call(&mut ctx).await.unwrap();
        assert_eq!(outcome.text, "base completed");
        assert_eq!(*log.lock().unwrap(), vec!["B", "A", "base"]);
    }

    #[test]
    fn wrap_on_unregistered_name_is_noop() {
        let mut d: Dispatcher<tokio::io::DuplexStream, crate::session::tests::NullSession> = Dispatcher::new();
        d.wrap("SEARCH", |inner| inner);
        assert!(d.get("SEARCH").is_none());
    }

    #[test]
    fn extras_round_trips_by_type() {
        let mut extras = Extras::new();
        assert!(extras.get::<u32>().is_none());
        extras.insert(42u32);
        assert_eq!(extras.get::<u32>(), Some(&42));
        assert_eq!(extras.remove::<u32>(), Some(42));
        assert!(extras.get::<u32>().is_none());
    }
}
