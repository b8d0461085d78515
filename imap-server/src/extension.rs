//! The extension composition harness (spec.md §4.7 / C7): how a named
//! capability contributes new command handlers, wraps existing ones,
//! and advertises an optional session sub-capability.
//!
//! There is no analogous module in the teacher (`aero-proto`'s IMAP
//! dispatch is one large `match` per connection state, see
//! `aero-proto/src/imap/command/{authenticated,selected}.rs`); this is
//! the "composition framework" spec.md §1 calls out as part of the
//! core, built directly on [`crate::dispatcher::Dispatcher::wrap`] and
//! grounded on that module's already-implemented last-wrapper-outermost
//! stacking (`dispatcher.rs`'s `wrap_runs_last_added_outermost` test).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use imap_types::capability::Capability;

use crate::dispatcher::{Dispatcher, Handler};
use crate::session::Session;

/// A named capability's contribution to the dispatcher (spec.md §4.7
/// "4-tuple"). `new_commands` and `wrap` are applied in
/// [`install`]; `dependencies` are capability tokens that must already
/// be installed (or be a core capability the server always advertises)
/// before this extension is allowed to register.
pub struct Extension<IO, S> {
    pub name: Capability,
    pub dependencies: Vec<Capability>,
    pub new_commands: Vec<(&'static str, Arc<dyn Handler<IO, S>>)>,
    /// Applied to every command name this extension wants to wrap. Each
    /// entry is `(command name, wrapper)`; `wrapper(inner)` either
    /// returns a new handler or, if the feature genuinely doesn't apply
    /// to this command (should not normally happen — wrapping is
    /// opt-in per name), `inner` unchanged.
    #[allow(clippy::type_complexity)]
    pub wrappers: Vec<(&'static str, Box<dyn FnOnce(Arc<dyn Handler<IO, S>>) -> Arc<dyn Handler<IO, S>> + Send>)>,
}

impl<IO, S> Extension<IO, S> {
    pub fn new(name: Capability) -> Self {
        Self {
            name,
            dependencies: Vec::new(),
            new_commands: Vec::new(),
            wrappers: Vec::new(),
        }
    }

    pub fn requires(mut self, dep: Capability) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn command(mut self, name: &'static str, handler: Arc<dyn Handler<IO, S>>) -> Self {
        self.new_commands.push((name, handler));
        self
    }

    pub fn wraps<F>(mut self, name: &'static str, wrapper: F) -> Self
    where
        F: FnOnce(Arc<dyn Handler<IO, S>>) -> Arc<dyn Handler<IO, S>> + Send + 'static,
    {
        self.wrappers.push((name, Box::new(wrapper)));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension {0} depends on {1}, which is not installed")]
    MissingDependency(String, String),
}

/// Installs `extensions` into `dispatcher` in the given order (spec.md
/// §4.7 "Composition": iterating over installed extensions in
/// registration order and, for each, applying every extension's
/// `WrapHandler`). Because [`Dispatcher::wrap`] places the newest
/// wrapper outermost, installing `[Esearch, ContextSearch, SearchRes]`
/// in that order yields the call chain
/// `SearchRes(ContextSearch(Esearch(builtin(Search))))` — exactly
/// spec.md's worked example. Refuses (and leaves the dispatcher
/// unmodified for the offending extension) when a declared dependency
/// is absent from `installed_caps`; the caller is expected to pass the
/// server's base capability set plus whatever earlier entries in
/// `extensions` already installed.
pub fn install<IO, S>(
    dispatcher: &mut Dispatcher<IO, S>,
    installed_caps: &mut HashSet<Capability>,
    extensions: Vec<Extension<IO, S>>,
) -> Result<(), ExtensionError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    for ext in extensions {
        for dep in &ext.dependencies {
            if !installed_caps.contains(dep) {
                return Err(ExtensionError::MissingDependency(ext.name.to_string(), dep.to_string()));
            }
        }
        for (name, handler) in ext.new_commands {
            dispatcher.register(name, handler);
        }
        for (name, wrapper) in ext.wrappers {
            dispatcher.wrap(name, wrapper);
        }
        installed_caps.insert(ext.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::dispatcher::{CommandContext, Outcome};
    use crate::session::{tests::NullSession, SessionResult};
    use async_trait::async_trait;

    struct Base;
    #[async_trait]
    impl Handler<tokio::io::DuplexStream, NullSession> for Base {
        async fn call(&self, _ctx: &mut CommandContext<'_, tokio::io::DuplexStream, NullSession>) -> SessionResult<Outcome> {
            Ok(Outcome::completed("SEARCH"))
        }
    }

    struct TagAppend(&'static str, Arc<dyn Handler<tokio::io::DuplexStream, NullSession>>);
    #[async_trait]
    impl Handler<tokio::io::DuplexStream, NullSession> for TagAppend {
        async fn call(&self, ctx: &mut CommandContext<'_, tokio::io::DuplexStream, NullSession>) -> SessionResult<Outcome> {
            let mut outcome = self.1.call(ctx).await?;
            outcome.text = format!("{}/{}", self.0, outcome.text);
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn installs_in_order_with_last_wrapper_outermost() {
        let mut d: Dispatcher<tokio::io::DuplexStream, NullSession> = Dispatcher::new();
        d.register("SEARCH", Arc::new(Base));
        let mut caps = HashSet::from([Capability::Imap4Rev2]);

        let esearch = Extension::new(Capability::Esearch).wraps("SEARCH", |inner| Arc::new(TagAppend("esearch", inner)));
        let context_search = Extension::new(Capability::ContextSearch)
            .requires(Capability::Esearch)
            .wraps("SEARCH", |inner| Arc::new(TagAppend("context", inner)));
        let searchres = Extension::new(Capability::SearchRes)
            .wraps("SEARCH", |inner| Arc::new(TagAppend("searchres", inner)));

        install(&mut d, &mut caps, vec![esearch, context_search, searchres]).unwrap();

        let handler = d.get("SEARCH").unwrap();
        let (_client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(
            server,
            crate::config::ServerConfig::default(),
            imap_types::capability::ServerCapability::default(),
            false,
        );
        let command = crate::command::Command {
            tag: "A1".into(),
            kind: imap_types::NumKind::Seq,
            name: "SEARCH".into(),
            body: crate::command::CommandBody::Noop,
        };
        let mut session = NullSession;
        let mut extras = crate::dispatcher::Extras::new();
        let mut ctx = CommandContext { command: &command, connection: &mut conn, session: &mut session, extras: &mut extras };
        let outcome = handler.call(&mut ctx).await.unwrap();
        assert_eq!(outcome.text, "searchres/context/esearch/SEARCH");
    }

    #[test]
    fn missing_dependency_is_refused() {
        let mut d: Dispatcher<tokio::io::DuplexStream, NullSession> = Dispatcher::new();
        d.register("SEARCH", Arc::new(Base));
        let mut caps = HashSet::new();
        let context_search = Extension::new(Capability::ContextSearch).requires(Capability::Esearch);
        let err = install(&mut d, &mut caps, vec![context_search]).unwrap_err();
        assert!(matches!(err, ExtensionError::MissingDependency(_, _)));
    }
}
