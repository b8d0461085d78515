//! The per-connection command loop (spec.md §4.3/§4.4's "drive a
//! Connection" sketch in this crate's top-level docs): read a command,
//! dispatch it, write the tagged status response, repeat until LOGOUT
//! or EOF.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{ConnState, Connection, ConnectionError};
use crate::dispatcher::{CommandContext, Dispatcher, Extras};
use crate::handlers::StartTlsRequested;
use crate::session::{Session, SessionError};

/// How a connection's command loop ended.
pub enum ServeOutcome<IO> {
    /// `LOGOUT` was processed (tagged `OK` already flushed) or the peer
    /// closed the socket.
    Closed,
    /// `STARTTLS` succeeded and the tagged `OK` was flushed; the caller
    /// must perform the TLS handshake over the returned connection's
    /// inner stream and resume [`serve_connection`] with the upgraded
    /// `Connection<NewIO>` this produces (see
    /// [`Connection::upgrade_tls`] — it consumes `self` and changes the
    /// `IO` type parameter, which this generic loop can't do itself).
    StartTls(Connection<IO>),
}

/// Drives one connection to completion (or to a STARTTLS handoff).
/// `preauth` marks a connection that arrived already authenticated by a
/// trusted outer transport (spec.md §3's PREAUTH shortcut).
pub async fn serve_connection<IO, S>(
    mut conn: Connection<IO>,
    dispatcher: Arc<Dispatcher<IO, S>>,
    mut session: S,
    preauth: bool,
) -> Result<ServeOutcome<IO>, ConnectionError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    conn.write_greeting(preauth).await?;

    loop {
        let command = match conn.read_command().await {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(ServeOutcome::Closed),
            Err(ConnectionError::Parse(e)) => {
                // A malformed command doesn't end the connection: the
                // client gets a tagged BAD and may retry (spec.md §7
                // "Protocol violation"). There's no tag to echo back
                // since parsing never got that far in some cases, so
                // fall back to `*`.
                conn.write_status("*", "BAD", None, &e.to_string()).await?;
                continue;
            }
            Err(other) => return Err(other),
        };

        let Some(handler) = dispatcher.get(&command.name) else {
            conn.write_status(&command.tag, "BAD", None, &format!("unrecognized command {}", command.name))
                .await?;
            continue;
        };

        let mut extras = Extras::new();
        let outcome = {
            let mut ctx = CommandContext {
                command: &command,
                connection: &mut conn,
                session: &mut session,
                extras: &mut extras,
            };
            handler.call(&mut ctx).await
        };

        match outcome {
            Ok(outcome) => {
                conn.write_status(&command.tag, "OK", outcome.code.as_deref(), &outcome.text).await?;
                if extras.remove::<StartTlsRequested>().is_some() {
                    return Ok(ServeOutcome::StartTls(conn));
                }
                if conn.state == ConnState::Logout {
                    return Ok(ServeOutcome::Closed);
                }
            }
            Err(SessionError::No(msg)) => {
                conn.write_status(&command.tag, "NO", None, &msg).await?;
            }
            Err(SessionError::NoWithCode { code, message }) => {
                conn.write_status(&command.tag, "NO", Some(&code), &message).await?;
            }
            Err(SessionError::Bad(msg)) => {
                conn.write_status(&command.tag, "BAD", None, &msg).await?;
            }
            Err(SessionError::Io(e)) => return Err(ConnectionError::Io(e)),
        }
    }
}
