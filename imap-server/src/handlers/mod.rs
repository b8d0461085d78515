//! Built-in command handlers (spec.md §4.5 / C5): one `Handler` per
//! connection-state group, wired into a fresh [`crate::Dispatcher`] by
//! [`register_builtins`]. Mirrors the teacher's per-state dispatch
//! modules (`aero-proto/src/imap/command/{authenticated,selected}.rs`:
//! a `dispatch` match delegating to private async methods) except each
//! command here is its own free function so it can be registered,
//! wrapped and tested independently through [`crate::dispatcher::Dispatcher`].
//!
//! The registry itself doesn't know which commands are legal in which
//! [`crate::connection::ConnState`] — each handler checks that for
//! itself via [`require_state`], the same way `aero-proto`'s per-state
//! modules are only ever reached once the outer flow has already
//! matched on connection state, just inverted: here one flat registry
//! stands in for three, and the check moves inside the leaf.

mod anystate;
mod authenticated;
mod not_authenticated;
mod selected;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use imap_types::ResponseCode;

use crate::connection::ConnState;
use crate::dispatcher::{CommandContext, Dispatcher, Handler, Outcome};
use crate::response::BufferedWriter;
use crate::session::{Session, SessionError, SessionResult, UpdateWriter};
use crate::tracker::{SessionTracker, Update};

/// Set by the `STARTTLS` handler in [`CommandContext::extras`] to tell
/// [`crate::serve::serve_connection`] to perform the actual transport
/// upgrade after the tagged `OK` has been flushed — the handler itself
/// can't do it since [`crate::connection::Connection::upgrade_tls`]
/// changes the connection's `IO` type parameter, which a `&mut
/// Connection<IO>` borrowed through [`CommandContext`] can't do.
pub struct StartTlsRequested;

fn require_state(state: ConnState, allowed: &[ConnState]) -> SessionResult<()> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(SessionError::bad(format!("command not permitted in state {state:?}")))
    }
}

fn conn_err(e: crate::connection::ConnectionError) -> SessionError {
    match e {
        crate::connection::ConnectionError::Io(io) => SessionError::Io(io),
        other => SessionError::bad(other.to_string()),
    }
}

/// Drains `tracker`'s queued [`Update`]s (spec.md §4.6 C6 fan-out) into
/// wire bytes, the way a [`crate::session::Session::poll`] backend call
/// drains its own updates through an [`UpdateWriter`] — the two are
/// concatenated by the caller since they are independent sources of
/// EXISTS/EXPUNGE/FETCH-flags notifications (cross-session fan-out vs.
/// whatever the backend discovers on its own). `allow_expunge` is
/// forwarded straight to [`SessionTracker::flush`].
pub(crate) fn flush_session_tracker(tracker: &SessionTracker, allow_expunge: bool) -> SessionResult<Vec<u8>> {
    let mut writer = BufferedWriter::new();
    let mut result: SessionResult<()> = Ok(());
    tracker.flush(allow_expunge, |update| {
        if result.is_err() {
            return;
        }
        result = match update {
            Update::Exists(n) => writer.exists(*n),
            Update::Expunge(seq) => writer.expunge(*seq),
            Update::FetchFlags { seq, uid, flags } => writer.fetch_flags(*seq, *uid, flags),
        };
    });
    result?;
    Ok(writer.into_bytes())
}

/// Renders a [`ResponseCode`] the way [`crate::connection`]'s greeting
/// already does for `CAPABILITY` (bracket contents only, no `[`/`]` —
/// [`imap_wire::encode::Encoder::status_response`] adds those).
pub(crate) fn render_code(code: &ResponseCode) -> String {
    match code {
        ResponseCode::Capability(caps) => {
            let rendered = caps.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
            format!("CAPABILITY {rendered}")
        }
        ResponseCode::PermanentFlags(flags) => format!("PERMANENTFLAGS ({})", flags.join(" ")),
        ResponseCode::UidValidity(v) => format!("UIDVALIDITY {v}"),
        ResponseCode::UidNext(v) => format!("UIDNEXT {v}"),
        ResponseCode::Unseen(v) => format!("UNSEEN {v}"),
        ResponseCode::HighestModSeq(v) => format!("HIGHESTMODSEQ {v}"),
        ResponseCode::AppendUid(uidvalidity, uid) => format!("APPENDUID {uidvalidity} {uid}"),
        ResponseCode::CopyUid(uidvalidity, source, dest) => format!("COPYUID {uidvalidity} {source} {dest}"),
        ResponseCode::ReadOnly => "READ-ONLY".to_string(),
        ResponseCode::ReadWrite => "READ-WRITE".to_string(),
        ResponseCode::TryCreate => "TRYCREATE".to_string(),
        ResponseCode::PrivacyRequired => "PRIVACYREQUIRED".to_string(),
        ResponseCode::AlreadyExists => "ALREADYEXISTS".to_string(),
        ResponseCode::NonExistent => "NONEXISTENT".to_string(),
        ResponseCode::NoUpdate(tag) => format!("NOUPDATE {tag}"),
        ResponseCode::Other(name, Some(value)) => format!("{name} {value}"),
        ResponseCode::Other(name, None) => name.clone(),
    }
}

/// A single registry entry dispatching on its own name. One struct
/// covers every built-in command so `register_builtins` doesn't need a
/// type per command; each arm borrows straight from `ctx.command.name`
/// (already uppercased by [`crate::connection::parse_command_buffer`]).
struct Builtin;

#[async_trait]
impl<IO, S> Handler<IO, S> for Builtin
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    async fn call(&self, ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome> {
        match ctx.command.name.as_str() {
            "CAPABILITY" => anystate::capability(ctx).await,
            "NOOP" => anystate::noop(ctx).await,
            "LOGOUT" => anystate::logout(ctx).await,

            "STARTTLS" => not_authenticated::starttls(ctx).await,
            "LOGIN" => not_authenticated::login(ctx).await,
            "AUTHENTICATE" => not_authenticated::authenticate(ctx).await,

            "ENABLE" => authenticated::enable(ctx).await,
            "SELECT" => authenticated::select(ctx, false).await,
            "EXAMINE" => authenticated::select(ctx, true).await,
            "CREATE" => authenticated::create(ctx).await,
            "DELETE" => authenticated::delete(ctx).await,
            "RENAME" => authenticated::rename(ctx).await,
            "SUBSCRIBE" => authenticated::subscribe(ctx).await,
            "UNSUBSCRIBE" => authenticated::unsubscribe(ctx).await,
            "LIST" => authenticated::list(ctx).await,
            "LSUB" => authenticated::lsub(ctx).await,
            "STATUS" => authenticated::status(ctx).await,
            "APPEND" => authenticated::append(ctx).await,
            "IDLE" => authenticated::idle(ctx).await,
            "NAMESPACE" => authenticated::namespace(ctx).await,
            "ID" => authenticated::id(ctx).await,

            "CLOSE" => selected::close(ctx).await,
            "UNSELECT" => selected::unselect(ctx).await,
            "EXPUNGE" => selected::expunge(ctx).await,
            "SEARCH" => selected::search(ctx).await,
            "FETCH" => selected::fetch(ctx).await,
            "STORE" => selected::store(ctx).await,
            "COPY" => selected::copy(ctx).await,
            "MOVE" => selected::move_cmd(ctx).await,
            "SORT" => selected::sort(ctx).await,
            "THREAD" => selected::thread(ctx).await,

            other => Err(SessionError::bad(format!("unrecognized command {other}"))),
        }
    }
}

const BUILTIN_NAMES: &[&str] = &[
    "CAPABILITY", "NOOP", "LOGOUT", "STARTTLS", "LOGIN", "AUTHENTICATE", "ENABLE", "SELECT",
    "EXAMINE", "CREATE", "DELETE", "RENAME", "SUBSCRIBE", "UNSUBSCRIBE", "LIST", "LSUB", "STATUS",
    "APPEND", "IDLE", "NAMESPACE", "ID", "CLOSE", "UNSELECT", "EXPUNGE", "SEARCH", "FETCH",
    "STORE", "COPY", "MOVE", "SORT", "THREAD",
];

/// Registers every built-in command (spec.md §4.5) under a fresh
/// dispatcher. Extensions install afterwards via [`crate::extension::install`],
/// wrapping whichever of these names they extend.
pub fn register_builtins<IO, S>(dispatcher: &mut Dispatcher<IO, S>)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    let handler: Arc<dyn Handler<IO, S>> = Arc::new(Builtin);
    for name in BUILTIN_NAMES {
        dispatcher.register(name, handler.clone());
    }
}
