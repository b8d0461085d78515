//! `CAPABILITY`, `NOOP`, `LOGOUT` — legal in every connection state
//! (RFC 3501 §6.1).

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::ConnState;
use crate::dispatcher::{CommandContext, Outcome};
use crate::response::BufferedWriter;
use crate::session::{Session, SessionError, SessionResult};

use super::conn_err;

pub(super) async fn capability<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    let caps = ctx.connection.advertised_capabilities();
    let rendered = caps.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
    ctx.connection
        .write_raw(format!("* CAPABILITY {rendered}\r\n").as_bytes())
        .await
        .map_err(SessionError::Io)?;
    Ok(Outcome::completed("CAPABILITY"))
}

pub(super) async fn noop<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    if ctx.connection.state == ConnState::Selected {
        // Cross-session fan-out first (spec.md §8 scenario 4's
        // `* 3 EXPUNGE` / `* 4 EXISTS`), then whatever the backend's own
        // poll discovers — the two are independent update sources.
        let mut bytes = super::flush_session_tracker(&ctx.connection.session_tracker, true)?;
        let mut writer = BufferedWriter::new();
        ctx.session.poll(&mut writer, true).await?;
        bytes.extend_from_slice(&writer.into_bytes());
        if !bytes.is_empty() {
            ctx.connection.write_raw(&bytes).await.map_err(conn_err)?;
        }
    }
    Ok(Outcome::completed("NOOP"))
}

pub(super) async fn logout<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    ctx.connection.write_raw(b"* BYE logging out\r\n").await.map_err(SessionError::Io)?;
    if let Some(selected) = ctx.connection.selected.take() {
        selected.session_tracker.detach();
    }
    ctx.connection.state = ConnState::Logout;
    Ok(Outcome::completed("LOGOUT"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandBody};
    use crate::connection::Connection;
    use crate::dispatcher::{CommandContext, Extras};
    use crate::session::tests::NullSession;
    use async_trait::async_trait;

    fn conn() -> Connection<tokio::io::DuplexStream> {
        let (_client, server) = tokio::io::duplex(4096);
        Connection::new(server, crate::config::ServerConfig::default(), imap_types::ServerCapability::default(), false)
    }

    fn cmd(name: &str, body: CommandBody) -> Command {
        Command { tag: "A1".into(), kind: imap_types::NumKind::Seq, name: name.into(), body }
    }

    #[tokio::test]
    async fn capability_lists_the_advertised_set() {
        let mut c = conn();
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd("CAPABILITY", CommandBody::Capability);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let outcome = capability(&mut ctx).await.unwrap();
        assert_eq!(outcome.text, "CAPABILITY completed");
    }

    #[tokio::test]
    async fn noop_is_silent_outside_selected_state() {
        let mut c = conn();
        c.state = ConnState::Authenticated;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd("NOOP", CommandBody::Noop);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        let outcome = noop(&mut ctx).await.unwrap();
        assert_eq!(outcome.text, "NOOP completed");
    }

    struct PollingSession;

    #[async_trait]
    impl Session for PollingSession {
        async fn login(&mut self, _user: &str, _pass: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn select(
            &mut self,
            mailbox: &imap_types::MailboxName,
            read_only: bool,
        ) -> SessionResult<(imap_types::SelectData, std::sync::Arc<crate::tracker::MailboxTracker>)> {
            let data = imap_types::SelectData {
                messages: 1,
                recent: 0,
                uid_validity: 1,
                uid_next: 2,
                first_unseen: None,
                read_only,
                permanent_flags: Vec::new(),
                applied_flags: Vec::new(),
                highest_mod_seq: None,
                vanished_earlier: None,
            };
            Ok((data, crate::tracker::MailboxTracker::new(mailbox.as_str().to_string(), 1, 1, 2)))
        }
        async fn create(&mut self, _m: &imap_types::MailboxName) -> SessionResult<()> {
            Ok(())
        }
        async fn delete(&mut self, _m: &imap_types::MailboxName) -> SessionResult<()> {
            Ok(())
        }
        async fn rename(&mut self, _f: &imap_types::MailboxName, _t: &imap_types::MailboxName) -> SessionResult<()> {
            Ok(())
        }
        async fn subscribe(&mut self, _m: &imap_types::MailboxName) -> SessionResult<()> {
            Ok(())
        }
        async fn unsubscribe(&mut self, _m: &imap_types::MailboxName) -> SessionResult<()> {
            Ok(())
        }
        async fn list(
            &mut self,
            _w: &mut dyn crate::session::ListWriter,
            _r: &str,
            _p: &[String],
            _o: &crate::session::ListOptions,
        ) -> SessionResult<()> {
            Ok(())
        }
        async fn status(
            &mut self,
            _m: &imap_types::MailboxName,
            _items: &[imap_types::StatusItem],
        ) -> SessionResult<imap_types::StatusResult> {
            Ok(imap_types::StatusResult::default())
        }
        async fn append(
            &mut self,
            _m: &imap_types::MailboxName,
            _r: &mut (dyn tokio::io::AsyncRead + Unpin + Send),
            _size: u64,
            _flags: &[imap_types::Flag],
            _date: Option<&str>,
        ) -> SessionResult<Option<(u32, u32)>> {
            Ok(None)
        }
        async fn poll(&mut self, writer: &mut dyn crate::session::UpdateWriter, _allow_expunge: bool) -> SessionResult<()> {
            writer.exists(9)
        }
        async fn idle(&mut self, _w: &mut dyn crate::session::UpdateWriter, stop: &tokio::sync::Notify) -> SessionResult<()> {
            stop.notified().await;
            Ok(())
        }
        fn unselect(&mut self) {}
        async fn expunge(&mut self, _w: &mut dyn crate::session::ExpungeWriter, _uids: Option<&imap_types::UidSet>) -> SessionResult<()> {
            Ok(())
        }
        async fn search(
            &mut self,
            _kind: imap_types::NumKind,
            _criteria: &imap_types::SearchCriteria,
            _options: &imap_types::SearchOptions,
        ) -> SessionResult<imap_types::SearchData> {
            Ok(imap_types::SearchData::default())
        }
        async fn fetch(
            &mut self,
            _w: &mut dyn crate::session::FetchWriter,
            _kind: imap_types::NumKind,
            _set: &str,
            _options: &imap_types::FetchOptions,
        ) -> SessionResult<()> {
            Ok(())
        }
        async fn store(
            &mut self,
            _w: &mut dyn crate::session::FetchWriter,
            _kind: imap_types::NumKind,
            _set: &str,
            _flags: &imap_types::StoreFlags,
            _options: &imap_types::StoreOptions,
        ) -> SessionResult<()> {
            Ok(())
        }
        async fn copy(&mut self, _kind: imap_types::NumKind, _set: &str, _dest: &imap_types::MailboxName) -> SessionResult<imap_types::CopyUid> {
            Ok(imap_types::CopyUid { uid_validity: 1, source: imap_types::UidSet::parse("1").unwrap(), dest: imap_types::UidSet::parse("1").unwrap() })
        }
        async fn close(&mut self) -> SessionResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn noop_flushes_queued_updates_while_selected() {
        let mut c = conn();
        c.state = ConnState::Selected;
        let tracker = crate::tracker::MailboxTracker::new("INBOX", 9, 1, 10);
        c.session_tracker.select(&tracker);
        c.selected = Some(crate::connection::SelectedMailbox {
            name: imap_types::MailboxName::new("INBOX"),
            read_only: false,
            tracker,
            session_tracker: c.session_tracker.clone(),
        });
        let mut session = PollingSession;
        let mut extras = Extras::new();
        let command = cmd("NOOP", CommandBody::Noop);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        noop(&mut ctx).await.unwrap();
    }

    /// spec.md §8 scenario 4: another session expunges message 3 and
    /// delivers a new message on the shared mailbox; this session's
    /// next NOOP must deliver the fan-out (`* 3 EXPUNGE` then
    /// `* 4 EXISTS`, spec.md §3's invariant that EXPUNGE and a new
    /// message are independently-queued events) ahead of whatever the
    /// backend's own `poll` produces.
    #[tokio::test]
    async fn noop_delivers_cross_session_expunge_and_exists_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let mut c = Connection::new(server, crate::config::ServerConfig::default(), imap_types::ServerCapability::default(), false);
        c.state = ConnState::Selected;
        let tracker = crate::tracker::MailboxTracker::new("INBOX", 5, 1, 6);
        c.session_tracker.select(&tracker);
        c.selected = Some(crate::connection::SelectedMailbox {
            name: imap_types::MailboxName::new("INBOX"),
            read_only: false,
            tracker: tracker.clone(),
            session_tracker: c.session_tracker.clone(),
        });

        // A second session ("S2") selecting the same mailbox expunges
        // message 3 and a new message arrives, observed here only
        // through the shared `tracker`.
        tracker.queue_expunge(3);
        tracker.queue_new_message(6);

        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd("NOOP", CommandBody::Noop);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        noop(&mut ctx).await.unwrap();
        drop(ctx);
        drop(c);

        let mut client = tokio::io::BufReader::new(client);
        use tokio::io::AsyncBufReadExt as _;
        let mut expunge_line = String::new();
        client.read_line(&mut expunge_line).await.unwrap();
        let mut exists_line = String::new();
        client.read_line(&mut exists_line).await.unwrap();
        assert_eq!(expunge_line, "* 3 EXPUNGE\r\n");
        assert_eq!(exists_line, "* 4 EXISTS\r\n");
    }

    #[tokio::test]
    async fn logout_detaches_the_selected_mailbox_and_sets_logout_state() {
        let mut c = conn();
        c.state = ConnState::Selected;
        let tracker = crate::tracker::MailboxTracker::new("INBOX", 0, 1, 1);
        c.session_tracker.select(&tracker);
        c.selected = Some(crate::connection::SelectedMailbox {
            name: imap_types::MailboxName::new("INBOX"),
            read_only: false,
            tracker,
            session_tracker: c.session_tracker.clone(),
        });
        let mut session = NullSession;
        let mut extras = Extras::new();
        let command = cmd("LOGOUT", CommandBody::Logout);
        let mut ctx = CommandContext { command: &command, connection: &mut c, session: &mut session, extras: &mut extras };
        logout(&mut ctx).await.unwrap();
        assert_eq!(c.state, ConnState::Logout);
        assert!(c.selected.is_none());
    }
}
