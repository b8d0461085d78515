//! Commands legal once authenticated (RFC 3501 §6.3): `ENABLE`,
//! `SELECT`/`EXAMINE`, mailbox management, `LIST`/`LSUB`/`STATUS`,
//! `APPEND`, `IDLE`, `NAMESPACE`, `ID`.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use imap_types::capability::Capability;
use imap_types::StatusItem;
use imap_wire::encode::Encoder;

use crate::command::CommandBody;
use crate::connection::{ConnState, SelectedMailbox};
use crate::dispatcher::{CommandContext, Outcome};
use crate::response::BufferedWriter;
use crate::session::{ListOptions, Session, SessionError, SessionResult};

use super::{conn_err, render_code, require_state};

pub(super) async fn enable<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let capabilities = match &ctx.command.body {
        CommandBody::Enable { capabilities } => capabilities.clone(),
        _ => return Err(SessionError::bad("malformed ENABLE")),
    };
    let advertised = ctx.connection.advertised_capabilities();
    let mut enabled = Vec::new();
    for name in capabilities {
        let cap = Capability::from(name.as_str());
        if advertised.contains(&cap) && ctx.connection.enabled.enable(cap.clone()) {
            enabled.push(cap);
        }
    }
    if !enabled.is_empty() {
        let rendered = enabled.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
        ctx.connection
            .write_raw(format!("* ENABLED {rendered}\r\n").as_bytes())
            .await
            .map_err(SessionError::Io)?;
    }
    Ok(Outcome::completed("ENABLE"))
}

pub(super) async fn select<IO, S>(ctx: &mut CommandContext<'_, IO, S>, examine: bool) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let mailbox = match (&ctx.command.body, examine) {
        (CommandBody::Select { mailbox, .. }, false) => mailbox.clone(),
        (CommandBody::Examine { mailbox, .. }, true) => mailbox.clone(),
        _ => return Err(SessionError::bad("malformed SELECT/EXAMINE")),
    };
    if let Some(previous) = ctx.connection.selected.take() {
        previous.session_tracker.detach();
    }
    // RFC 5182 SEARCHRES §2.1: a saved `$` result set is invalidated
    // whenever the currently selected mailbox changes.
    ctx.connection.saved_search_result = None;
    let (data, tracker) = ctx.session.select(&mailbox, examine).await?;
    ctx.connection.session_tracker.select(&tracker);
    ctx.connection.selected = Some(SelectedMailbox {
        name: mailbox,
        read_only: data.read_only,
        tracker,
        session_tracker: ctx.connection.session_tracker.clone(),
    });
    ctx.connection.state = ConnState::Selected;

    ctx.connection
        .write_raw(format!("* {} EXISTS\r\n", data.messages).as_bytes())
        .await
        .map_err(SessionError::Io)?;
    ctx.connection
        .write_raw(format!("* {} RECENT\r\n", data.recent).as_bytes())
        .await
        .map_err(SessionError::Io)?;

    {
        // RFC 3501 §6.3.1: the untagged FLAGS response is mandatory,
        // even when the mailbox supports no flags at all.
        let mut enc = Encoder::default();
        enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.atom("FLAGS").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.begin_list().map_err(SessionError::Io)?;
        for (i, flag) in data.applied_flags.iter().enumerate() {
            if i > 0 {
                enc.sp().map_err(SessionError::Io)?;
            }
            enc.atom(&flag.to_string()).map_err(SessionError::Io)?;
        }
        enc.end_list().map_err(SessionError::Io)?.crlf().map_err(SessionError::Io)?;
        ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    }

    let permflags = render_code(&imap_types::ResponseCode::PermanentFlags(
        data.permanent_flags.iter().map(|f| f.to_string()).collect(),
    ));
    write_untagged_ok(ctx, &permflags, "permanent flags").await?;
    write_untagged_ok(ctx, &render_code(&imap_types::ResponseCode::UidValidity(data.uid_validity)), "UIDs valid").await?;
    write_untagged_ok(ctx, &render_code(&imap_types::ResponseCode::UidNext(data.uid_next)), "predicted next UID").await?;
    if let Some(unseen) = data.first_unseen {
        write_untagged_ok(ctx, &render_code(&imap_types::ResponseCode::Unseen(unseen)), "first unseen").await?;
    }
    if let Some(modseq) = data.highest_mod_seq {
        write_untagged_ok(ctx, &render_code(&imap_types::ResponseCode::HighestModSeq(modseq)), "highest modseq").await?;
    }
    if let Some(vanished) = &data.vanished_earlier {
        ctx.connection
            .write_raw(format!("* VANISHED (EARLIER) {vanished}\r\n").as_bytes())
            .await
            .map_err(SessionError::Io)?;
    }

    let code = if data.read_only { "READ-ONLY" } else { "READ-WRITE" };
    let name = if examine { "EXAMINE" } else { "SELECT" };
    Ok(Outcome::with_code(code, name))
}

async fn write_untagged_ok<IO, S>(ctx: &mut CommandContext<'_, IO, S>, code: &str, text: &str) -> SessionResult<()>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    let mut enc = Encoder::default();
    enc.status_response("*", "OK", Some(code), text).map_err(SessionError::Io)?;
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)
}

pub(super) async fn create<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let mailbox = match &ctx.command.body {
        CommandBody::Create { mailbox } => mailbox.clone(),
        _ => return Err(SessionError::bad("malformed CREATE")),
    };
    ctx.session.create(&mailbox).await?;
    Ok(Outcome::completed("CREATE"))
}

pub(super) async fn delete<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let mailbox = match &ctx.command.body {
        CommandBody::Delete { mailbox } => mailbox.clone(),
        _ => return Err(SessionError::bad("malformed DELETE")),
    };
    ctx.session.delete(&mailbox).await?;
    Ok(Outcome::completed("DELETE"))
}

pub(super) async fn rename<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let (from, to) = match &ctx.command.body {
        CommandBody::Rename { from, to } => (from.clone(), to.clone()),
        _ => return Err(SessionError::bad("malformed RENAME")),
    };
    ctx.session.rename(&from, &to).await?;
    Ok(Outcome::completed("RENAME"))
}

pub(super) async fn subscribe<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let mailbox = match &ctx.command.body {
        CommandBody::Subscribe { mailbox } => mailbox.clone(),
        _ => return Err(SessionError::bad("malformed SUBSCRIBE")),
    };
    ctx.session.subscribe(&mailbox).await?;
    Ok(Outcome::completed("SUBSCRIBE"))
}

pub(super) async fn unsubscribe<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let mailbox = match &ctx.command.body {
        CommandBody::Unsubscribe { mailbox } => mailbox.clone(),
        _ => return Err(SessionError::bad("malformed UNSUBSCRIBE")),
    };
    ctx.session.unsubscribe(&mailbox).await?;
    Ok(Outcome::completed("UNSUBSCRIBE"))
}

pub(super) async fn list<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let (reference, pattern, select_opts, return_opts) = match &ctx.command.body {
        CommandBody::List { reference, pattern, select_opts, return_opts } => {
            (reference.clone(), pattern.clone(), select_opts.clone(), return_opts.clone())
        }
        _ => return Err(SessionError::bad("malformed LIST")),
    };
    let options = ListOptions {
        subscribed_only: select_opts.subscribed,
        return_subscribed: return_opts.subscribed,
        return_children: return_opts.children,
        return_status: return_opts.status,
    };
    let mut writer = BufferedWriter::new();
    ctx.session.list(&mut writer, reference.as_str(), &[pattern], &options).await?;
    let bytes = writer.into_bytes();
    if !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(conn_err)?;
    }
    Ok(Outcome::completed("LIST"))
}

pub(super) async fn lsub<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let (reference, pattern) = match &ctx.command.body {
        CommandBody::Lsub { reference, pattern } => (reference.clone(), pattern.clone()),
        _ => return Err(SessionError::bad("malformed LSUB")),
    };
    let options = ListOptions { subscribed_only: true, ..Default::default() };
    let mut writer = BufferedWriter::new();
    ctx.session.list(&mut writer, reference.as_str(), &[pattern], &options).await?;
    let bytes = writer.into_bytes();
    if !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(conn_err)?;
    }
    Ok(Outcome::completed("LSUB"))
}

pub(super) async fn status<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let (mailbox, items) = match &ctx.command.body {
        CommandBody::Status { mailbox, items } => (mailbox.clone(), items.clone()),
        _ => return Err(SessionError::bad("malformed STATUS")),
    };
    let result = ctx.session.status(&mailbox, &items).await?;
    let mut enc = Encoder::default();
    enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.atom("STATUS").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.mailbox_name(mailbox.as_str(), false).map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.begin_list().map_err(SessionError::Io)?;
    let mut first = true;
    for item in &items {
        let rendered = match item {
            StatusItem::Messages => result.messages.map(|v| ("MESSAGES", v as u64)),
            StatusItem::Recent => result.recent.map(|v| ("RECENT", v as u64)),
            StatusItem::UidNext => result.uid_next.map(|v| ("UIDNEXT", v as u64)),
            StatusItem::UidValidity => result.uid_validity.map(|v| ("UIDVALIDITY", v as u64)),
            StatusItem::Unseen => result.unseen.map(|v| ("UNSEEN", v as u64)),
            StatusItem::Deleted => result.deleted.map(|v| ("DELETED", v as u64)),
            StatusItem::Size => result.size.map(|v| ("SIZE", v)),
            StatusItem::HighestModSeq => result.highest_mod_seq.map(|v| ("HIGHESTMODSEQ", v)),
            StatusItem::MailboxId => None,
        };
        if let Some((name, value)) = rendered {
            if !first {
                enc.sp().map_err(SessionError::Io)?;
            }
            first = false;
            enc.atom(name).map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(value).map_err(SessionError::Io)?;
        } else if matches!(item, StatusItem::MailboxId) {
            if let Some(id) = &result.mailbox_id {
                if !first {
                    enc.sp().map_err(SessionError::Io)?;
                }
                first = false;
                enc.atom("MAILBOXID").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
                enc.begin_list().map_err(SessionError::Io)?;
                enc.quoted_string(id.as_bytes()).map_err(SessionError::Io)?;
                enc.end_list().map_err(SessionError::Io)?;
            }
        }
    }
    enc.end_list().map_err(SessionError::Io)?.crlf().map_err(SessionError::Io)?;
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("STATUS"))
}

pub(super) async fn append<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let (mailbox, flags, date, message) = match &ctx.command.body {
        CommandBody::Append { mailbox, flags, date, message, .. } => {
            (mailbox.clone(), flags.clone(), date.clone(), message.clone())
        }
        _ => return Err(SessionError::bad("malformed APPEND")),
    };
    let size = message.len() as u64;
    let mut cursor = std::io::Cursor::new(message);
    let result = ctx.session.append(&mailbox, &mut cursor, size, &flags, date.as_deref()).await?;
    match result {
        Some((uid_validity, uid)) => {
            let code = render_code(&imap_types::ResponseCode::AppendUid(uid_validity, uid));
            Ok(Outcome::with_code(code, "APPEND"))
        }
        None => Ok(Outcome::completed("APPEND")),
    }
}

pub(super) async fn idle<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    ctx.connection.write_continuation("idling").await.map_err(SessionError::Io)?;

    let stop = tokio::sync::Notify::new();
    let mut backend_writer = BufferedWriter::new();
    let tracker = ctx.connection.session_tracker.clone();
    let mut poll_interval = tokio::time::interval(ctx.connection.config.idle_poll_interval);
    poll_interval.tick().await; // first tick resolves immediately; skip it

    let backend_idle = ctx.session.idle(&mut backend_writer, &stop);
    tokio::pin!(backend_idle);

    // `split` so the read half watching for `DONE` and the write half
    // flushing `session_tracker` can be held as two independent,
    // cancellation-safe futures across loop iterations (spec.md §4.6 C6
    // fan-out) instead of racing a single `&mut Connection` borrow —
    // recreating the `DONE`-line read every iteration would risk
    // dropping bytes `read_until` already consumed from a prior,
    // cancelled poll.
    let (io_reader, io_writer) = ctx.connection.split();
    let done_line = crate::connection::read_continuation_line_from(io_reader);
    tokio::pin!(done_line);

    loop {
        tokio::select! {
            res = &mut backend_idle => { res?; break; }
            line = &mut done_line => {
                let _ = line.map_err(conn_err)?;
                break;
            }
            _ = tracker.notified() => {
                let bytes = super::flush_session_tracker(&tracker, true)?;
                if !bytes.is_empty() {
                    io_writer.write_all(&bytes).await.map_err(SessionError::Io)?;
                    io_writer.flush().await.map_err(SessionError::Io)?;
                }
            }
            _ = poll_interval.tick() => {
                let bytes = super::flush_session_tracker(&tracker, true)?;
                if !bytes.is_empty() {
                    io_writer.write_all(&bytes).await.map_err(SessionError::Io)?;
                    io_writer.flush().await.map_err(SessionError::Io)?;
                }
            }
        }
    }

    let bytes = backend_writer.into_bytes();
    if !bytes.is_empty() {
        io_writer.write_all(&bytes).await.map_err(SessionError::Io)?;
        io_writer.flush().await.map_err(SessionError::Io)?;
    }
    Ok(Outcome::completed("IDLE"))
}

pub(super) async fn namespace<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Authenticated, ConnState::Selected])?;
    let Some(ns) = ctx.session.as_namespace() else {
        return Err(SessionError::no("NAMESPACE not supported"));
    };
    let data = ns.namespace().await?;
    let mut enc = Encoder::default();
    enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.atom("NAMESPACE").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    for group in [&data.personal, &data.other_users, &data.shared] {
        if group.is_empty() {
            enc.atom("NIL").map_err(SessionError::Io)?;
        } else {
            enc.begin_list().map_err(SessionError::Io)?;
            for (i, descriptor) in group.iter().enumerate() {
                if i > 0 {
                    enc.sp().map_err(SessionError::Io)?;
                }
                enc.begin_list().map_err(SessionError::Io)?;
                enc.quoted_string(descriptor.prefix.as_bytes()).map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
                match descriptor.delimiter {
                    Some(c) => {
                        enc.quoted_string(c.to_string().as_bytes()).map_err(SessionError::Io)?;
                    }
                    None => {
                        enc.atom("NIL").map_err(SessionError::Io)?;
                    }
                }
                enc.end_list().map_err(SessionError::Io)?;
            }
            enc.end_list().map_err(SessionError::Io)?;
        }
        enc.sp().map_err(SessionError::Io)?;
    }
    // Three groups were each followed by a separating space; replace the
    // trailing one with the line terminator.
    let mut bytes = enc.into_bytes();
    bytes.truncate(bytes.len() - 1);
    bytes.extend_from_slice(b"\r\n");
    ctx.connection.write_raw(&bytes).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("NAMESPACE"))
}

pub(super) async fn id<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    let client_params = match &ctx.command.body {
        CommandBody::Id { params } => params.clone(),
        _ => return Err(SessionError::bad("malformed ID")),
    };
    let server_params = match ctx.session.as_id() {
        Some(backend) => backend.id(&client_params).await?,
        None => vec![("name".to_string(), Some(ctx.connection.config.server_name.clone()))],
    };
    let mut enc = Encoder::default();
    enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.atom("ID").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    if server_params.is_empty() {
        enc.atom("NIL").map_err(SessionError::Io)?;
    } else {
        enc.begin_list().map_err(SessionError::Io)?;
        for (i, (key, value)) in server_params.iter().enumerate() {
            if i > 0 {
                enc.sp().map_err(SessionError::Io)?;
            }
            enc.quoted_string(key.as_bytes()).map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.nstring(value.as_deref().map(str::as_bytes)).map_err(SessionError::Io)?;
        }
        enc.end_list().map_err(SessionError::Io)?;
    }
    enc.crlf().map_err(SessionError::Io)?;
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("ID"))
}
