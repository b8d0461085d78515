//! `STARTTLS`, `LOGIN`, `AUTHENTICATE` — legal only in the
//! `NotAuthenticated` state (RFC 3501 §6.2).

use base64::Engine;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::ConnState;
use crate::dispatcher::{CommandContext, Outcome};
use crate::session::{Session, SessionError, SessionResult};

use super::{conn_err, render_code, require_state, StartTlsRequested};

pub(super) async fn starttls<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::NotAuthenticated])?;
    if ctx.connection.tls_active {
        return Err(SessionError::bad("TLS already active"));
    }
    if !ctx.connection.config.allow_starttls {
        return Err(SessionError::no("STARTTLS not available"));
    }
    // The actual transport upgrade has to happen after this handler
    // returns and the tagged OK is flushed — see `StartTlsRequested`.
    ctx.extras.insert(StartTlsRequested);
    Ok(Outcome::completed("STARTTLS"))
}

pub(super) async fn login<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::NotAuthenticated])?;
    if ctx.connection.config.login_disabled_on_plaintext && !ctx.connection.tls_active {
        return Err(SessionError::NoWithCode {
            code: "PRIVACYREQUIRED".into(),
            message: "login disabled on unencrypted connection".into(),
        });
    }
    let (user, pass) = match &ctx.command.body {
        crate::command::CommandBody::Login { user, pass } => (user.clone(), pass.clone()),
        _ => return Err(SessionError::bad("malformed LOGIN")),
    };
    let user = String::from_utf8_lossy(&user).into_owned();
    let pass = String::from_utf8_lossy(&pass).into_owned();
    ctx.session.login(&user, &pass).await?;
    ctx.connection.state = ConnState::Authenticated;
    let caps = ctx.connection.advertised_capabilities();
    let code = render_code(&imap_types::ResponseCode::Capability(caps));
    Ok(Outcome::with_code(code, "LOGIN"))
}

pub(super) async fn authenticate<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::NotAuthenticated])?;
    let (mechanism, initial_response) = match &ctx.command.body {
        crate::command::CommandBody::Authenticate { mechanism, initial_response } => {
            (mechanism.clone(), initial_response.clone())
        }
        _ => return Err(SessionError::bad("malformed AUTHENTICATE")),
    };
    if !mechanism.eq_ignore_ascii_case("PLAIN") {
        return Err(SessionError::no(format!("unsupported SASL mechanism {mechanism}")));
    }
    let raw = match initial_response {
        Some(bytes) => bytes,
        None => {
            ctx.connection.write_continuation("").await.map_err(SessionError::Io)?;
            ctx.connection.read_continuation_line().await.map_err(conn_err)?
        }
    };
    if raw == b"*" {
        return Err(SessionError::bad("AUTHENTICATE cancelled"));
    }
    let payload = base64::engine::general_purpose::STANDARD
        .decode(&raw)
        .map_err(|_| SessionError::bad("invalid base64 in SASL PLAIN response"))?;
    let mut parts = payload.splitn(3, |&b| b == 0);
    let _authzid = parts.next();
    let authcid = parts.next().ok_or_else(|| SessionError::bad("malformed SASL PLAIN payload"))?;
    let passwd = parts.next().ok_or_else(|| SessionError::bad("malformed SASL PLAIN payload"))?;
    ctx.session
        .login(&String::from_utf8_lossy(authcid), &String::from_utf8_lossy(passwd))
        .await?;
    ctx.connection.state = ConnState::Authenticated;
    Ok(Outcome::completed("AUTHENTICATE"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandBody};
    use crate::connection::Connection;
    use crate::dispatcher::{CommandContext, Extras};
    use crate::session::tests::NullSession;

    fn conn() -> Connection<tokio::io::DuplexStream> {
        let (_client, server) = tokio::io::duplex(4096);
        Connection::new(server, crate::config::ServerConfig::default(), imap_types::ServerCapability::default(), false)
    }

    fn cmd(body: CommandBody) -> Command {
        Command { tag: "A1".into(), kind: imap_types::NumKind::Seq, name: "X".into(), body }
    }

    #[tokio::test]
    async fn starttls_is_refused_once_tls_is_active() {
        let mut c = conn();
        c.tls_active = true;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::StartTls);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let err = starttls(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::Bad(_)));
    }

    #[tokio::test]
    async fn starttls_is_refused_when_disabled_by_config() {
        let mut c = conn();
        c.config.allow_starttls = false;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::StartTls);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let err = starttls(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::No(_)));
    }

    #[tokio::test]
    async fn starttls_success_marks_extras_for_the_serve_loop() {
        let mut c = conn();
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::StartTls);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        starttls(&mut ctx).await.unwrap();
        assert!(ctx.extras.get::<StartTlsRequested>().is_some());
    }

    #[tokio::test]
    async fn login_is_refused_on_plaintext_when_disabled() {
        let mut c = conn();
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::Login { user: b"alice".to_vec(), pass: b"hunter2".to_vec() });
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let err = login(&mut ctx).await.unwrap_err();
        match err {
            SessionError::NoWithCode { code, message } => {
                assert_eq!(code, "PRIVACYREQUIRED");
                assert_eq!(message, "login disabled on unencrypted connection");
            }
            other => panic!("expected NoWithCode, got {other:?}"),
        }
        assert_eq!(c.state, ConnState::NotAuthenticated);
    }

    #[tokio::test]
    async fn login_success_moves_to_authenticated_and_returns_capability_code() {
        let mut c = conn();
        c.tls_active = true;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::Login { user: b"alice".to_vec(), pass: b"hunter2".to_vec() });
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let outcome = login(&mut ctx).await.unwrap();
        assert_eq!(c.state, ConnState::Authenticated);
        assert!(outcome.code.unwrap().starts_with("CAPABILITY"));
    }

    #[tokio::test]
    async fn authenticate_rejects_unsupported_mechanisms() {
        let mut c = conn();
        c.tls_active = true;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::Authenticate { mechanism: "GSSAPI".into(), initial_response: None });
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let err = authenticate(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::No(_)));
        assert_eq!(c.state, ConnState::NotAuthenticated);
    }

    #[tokio::test]
    async fn authenticate_plain_with_initial_response_logs_in() {
        let mut c = conn();
        c.tls_active = true;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let payload = base64::engine::general_purpose::STANDARD.encode(b"\0alice\0hunter2");
        let command = cmd(CommandBody::Authenticate {
            mechanism: "PLAIN".into(),
            initial_response: Some(payload.into_bytes()),
        });
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        authenticate(&mut ctx).await.unwrap();
        assert_eq!(c.state, ConnState::Authenticated);
    }

    #[tokio::test]
    async fn authenticate_plain_cancelled_with_bare_star() {
        let mut c = conn();
        c.tls_active = true;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd(CommandBody::Authenticate {
            mechanism: "PLAIN".into(),
            initial_response: Some(b"*".to_vec()),
        });
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let err = authenticate(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::Bad(_)));
        assert_eq!(c.state, ConnState::NotAuthenticated);
    }
}
