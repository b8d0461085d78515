//! Commands legal only once a mailbox is selected (RFC 3501 §6.4):
//! `CLOSE`, `UNSELECT`, `EXPUNGE`, `SEARCH`, `FETCH`, `STORE`, `COPY`,
//! `MOVE`, `SORT`, `THREAD`.

use tokio::io::{AsyncRead, AsyncWrite};

use imap_types::fetch::FetchOptions;
use imap_types::NumKind;
use imap_wire::encode::Encoder;

use crate::command::CommandBody;
use crate::connection::ConnState;
use crate::dispatcher::{CommandContext, Outcome};
use crate::response::{BufferedFetchWriter, BufferedWriter};
use crate::session::{Session, SessionError, SessionResult};

use super::{render_code, require_state};

fn require_selected<IO, S>(ctx: &CommandContext<'_, IO, S>) -> SessionResult<()>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_state(ctx.connection.state, &[ConnState::Selected])?;
    if ctx.connection.selected.is_none() {
        return Err(SessionError::bad("no mailbox selected"));
    }
    Ok(())
}

pub(super) async fn close<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    ctx.session.close().await?;
    if let Some(selected) = ctx.connection.selected.take() {
        selected.session_tracker.detach();
    }
    ctx.connection.state = ConnState::Authenticated;
    ctx.connection.saved_search_result = None;
    Ok(Outcome::completed("CLOSE"))
}

pub(super) async fn unselect<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    // Unlike CLOSE, UNSELECT (RFC 3691) never expunges \Deleted messages.
    ctx.session.unselect();
    if let Some(selected) = ctx.connection.selected.take() {
        selected.session_tracker.detach();
    }
    ctx.connection.state = ConnState::Authenticated;
    ctx.connection.saved_search_result = None;
    Ok(Outcome::completed("UNSELECT"))
}

pub(super) async fn expunge<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    if ctx.connection.selected.as_ref().map(|s| s.read_only).unwrap_or(false) {
        return Err(SessionError::no("mailbox is read-only"));
    }
    let uids = match &ctx.command.body {
        CommandBody::Expunge { uids } => uids.clone(),
        _ => return Err(SessionError::bad("malformed EXPUNGE")),
    };
    let mut writer = BufferedWriter::new();
    ctx.session.expunge(&mut writer, uids.as_ref()).await?;
    let bytes = writer.into_bytes();
    if !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(super::conn_err)?;
    }
    Ok(Outcome::completed("EXPUNGE"))
}

/// Rewrites `$` (RFC 5182 SEARCHRES's `SavedResult` search key) into a
/// concrete `UID`/sequence-set criterion drawn from the connection's
/// saved result, or fails with `NO` if nothing is saved or the saved
/// set was bound under the other `NumKind` (spec.md §8 scenario 5: `$`
/// is resolved via `GetSearchResult()` before the backend ever sees it
/// — this is the wrapper-style pre-processing step spec.md §4.7 assigns
/// to SEARCHRES, centralized here rather than as a separate `Handler`
/// layer since it shares the saved-result state the post-processing
/// SAVE step below also needs).
fn resolve_saved_result(
    criteria: &imap_types::SearchCriteria,
    saved: Option<&(imap_types::NumKind, imap_types::SeqSet)>,
    kind: imap_types::NumKind,
) -> SessionResult<imap_types::SearchCriteria> {
    use imap_types::SearchCriteria as C;
    Ok(match criteria {
        C::SavedResult => {
            let (saved_kind, set) = saved.ok_or_else(|| SessionError::no("no saved search result"))?;
            if *saved_kind != kind {
                return Err(SessionError::no("saved search result kind mismatch"));
            }
            if kind.is_uid() {
                C::Uid(imap_types::UidSet::parse(&set.to_string()).map_err(|e| SessionError::bad(e.to_string()))?)
            } else {
                C::SequenceSet(set.clone())
            }
        }
        C::And(items) => C::And(
            items
                .iter()
                .map(|c| resolve_saved_result(c, saved, kind))
                .collect::<SessionResult<Vec<_>>>()?,
        ),
        C::Or(a, b) => C::Or(
            Box::new(resolve_saved_result(a, saved, kind)?),
            Box::new(resolve_saved_result(b, saved, kind)?),
        ),
        C::Not(inner) => C::Not(Box::new(resolve_saved_result(inner, saved, kind)?)),
        C::Fuzzy(inner) => C::Fuzzy(Box::new(resolve_saved_result(inner, saved, kind)?)),
        other => other.clone(),
    })
}

/// Applies `RETURN (PARTIAL lo:hi)` windowing to an already-computed
/// `ALL` set (RFC 5267 §3.1): negative offsets count from the end,
/// resolved against the set's own size since PARTIAL operates on the
/// result set, not on mailbox sequence numbers.
fn apply_partial(all: &imap_types::SeqSet, range: imap_types::PartialRange) -> imap_types::SeqSet {
    let members: Vec<u32> = all.iter_in_order(u32::MAX).collect();
    let len = members.len() as i64;
    let start0 = if range.offset < 0 { (len + range.offset as i64).max(0) } else { (range.offset as i64 - 1).max(0) };
    let end0 = (start0 + range.count as i64).min(len);
    let window: Vec<imap_types::numset::Item> = if start0 >= end0 {
        Vec::new()
    } else {
        members[start0 as usize..end0 as usize]
            .iter()
            .map(|n| imap_types::numset::Item { lo: imap_types::numset::Bound::Value(*n), hi: imap_types::numset::Bound::Value(*n) })
            .collect()
    };
    imap_types::SeqSet::from_items(window)
}

pub(super) async fn search<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (return_opts, criteria) = match &ctx.command.body {
        CommandBody::Search { return_opts, criteria, .. } => (return_opts.clone(), criteria.clone()),
        _ => return Err(SessionError::bad("malformed SEARCH")),
    };
    let kind = ctx.command.kind;
    let criteria = resolve_saved_result(&criteria, ctx.connection.saved_search_result.as_ref(), kind)?;
    let mut data = ctx.session.search(kind, &criteria, &return_opts).await?;

    if let (Some(range), Some(all)) = (return_opts.partial, &data.all) {
        data.all = Some(apply_partial(all, range));
    }
    if return_opts.save {
        // RFC 5182 §2.1: SAVE always binds `$`, even to an empty set —
        // an empty result is itself meaningful to a following reference.
        ctx.connection.saved_search_result = Some((kind, data.all.clone().unwrap_or_else(|| imap_types::SeqSet::from_items(Vec::new()))));
    }

    let mut enc = Encoder::default();
    if return_opts.is_default_return() {
        enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.atom("SEARCH").map_err(SessionError::Io)?;
        if let Some(all) = &data.all {
            for n in all.iter_in_order(u32::MAX) {
                enc.sp().map_err(SessionError::Io)?;
                enc.number(n as u64).map_err(SessionError::Io)?;
            }
        }
        if let Some(modseq) = data.modseq {
            enc.sp().map_err(SessionError::Io)?;
            enc.atom("(MODSEQ").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(modseq).map_err(SessionError::Io)?;
            enc.atom(")").map_err(SessionError::Io)?;
        }
        enc.crlf().map_err(SessionError::Io)?;
    } else {
        enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.atom("ESEARCH").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.begin_list().map_err(SessionError::Io)?;
        enc.atom("TAG").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
        enc.quoted_string(ctx.command.tag.as_bytes()).map_err(SessionError::Io)?;
        enc.end_list().map_err(SessionError::Io)?;
        if kind.is_uid() {
            enc.sp().map_err(SessionError::Io)?.atom("UID").map_err(SessionError::Io)?;
        }
        if let Some(min) = data.min {
            enc.sp().map_err(SessionError::Io)?.atom("MIN").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(min as u64).map_err(SessionError::Io)?;
        }
        if let Some(max) = data.max {
            enc.sp().map_err(SessionError::Io)?.atom("MAX").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(max as u64).map_err(SessionError::Io)?;
        }
        if let Some(count) = data.count {
            enc.sp().map_err(SessionError::Io)?.atom("COUNT").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(count as u64).map_err(SessionError::Io)?;
        }
        if let Some(all) = &data.all {
            enc.sp().map_err(SessionError::Io)?.atom("ALL").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.atom(&all.to_string()).map_err(SessionError::Io)?;
        }
        if let Some(modseq) = data.modseq {
            enc.sp().map_err(SessionError::Io)?.atom("MODSEQ").map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
            enc.number(modseq).map_err(SessionError::Io)?;
        }
        enc.crlf().map_err(SessionError::Io)?;
    }
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("SEARCH"))
}

pub(super) async fn fetch<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (set, items, changed_since, vanished) = match &ctx.command.body {
        CommandBody::Fetch { set, items, changed_since, vanished } => {
            (set.clone(), items.clone(), *changed_since, *vanished)
        }
        _ => return Err(SessionError::bad("malformed FETCH")),
    };
    let options = FetchOptions::new(items, changed_since, vanished);
    let mut writer = BufferedFetchWriter::new();
    ctx.session.fetch(&mut writer, ctx.command.kind, &set, &options).await?;
    let bytes = writer.into_bytes();
    if !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(super::conn_err)?;
    }
    Ok(Outcome::completed("FETCH"))
}

pub(super) async fn store<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    if ctx.connection.selected.as_ref().map(|s| s.read_only).unwrap_or(false) {
        return Err(SessionError::no("mailbox is read-only"));
    }
    let (set, flags, options) = match &ctx.command.body {
        CommandBody::Store { set, flags, options } => (set.clone(), flags.clone(), options.clone()),
        _ => return Err(SessionError::bad("malformed STORE")),
    };
    let mut writer = BufferedFetchWriter::new();
    ctx.session.store(&mut writer, ctx.command.kind, &set, &flags, &options).await?;
    let bytes = writer.into_bytes();
    if !options.silent && !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(super::conn_err)?;
    }
    Ok(Outcome::completed("STORE"))
}

pub(super) async fn copy<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (set, dest) = match &ctx.command.body {
        CommandBody::Copy { set, dest } => (set.clone(), dest.clone()),
        _ => return Err(SessionError::bad("malformed COPY")),
    };
    let result = ctx.session.copy(ctx.command.kind, &set, &dest).await?;
    let code = render_code(&imap_types::ResponseCode::CopyUid(
        result.uid_validity,
        result.source.to_string(),
        result.dest.to_string(),
    ));
    Ok(Outcome::with_code(code, "COPY"))
}

pub(super) async fn move_cmd<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (set, dest) = match &ctx.command.body {
        CommandBody::Move { set, dest } => (set.clone(), dest.clone()),
        _ => return Err(SessionError::bad("malformed MOVE")),
    };
    let Some(mover) = ctx.session.as_move() else {
        return Err(SessionError::no("MOVE not supported"));
    };
    let mut writer = BufferedWriter::new();
    mover.move_messages(&mut writer, ctx.command.kind, &set, &dest).await?;
    let bytes = writer.into_bytes();
    if !bytes.is_empty() {
        ctx.connection.write_raw(&bytes).await.map_err(super::conn_err)?;
    }
    Ok(Outcome::completed("MOVE"))
}

pub(super) async fn sort<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (keys, criteria) = match &ctx.command.body {
        CommandBody::Sort { keys, criteria, .. } => (keys.clone(), criteria.clone()),
        _ => return Err(SessionError::bad("malformed SORT")),
    };
    let kind = ctx.command.kind;
    let Some(sorter) = ctx.session.as_sort() else {
        return Err(SessionError::no("SORT not supported"));
    };
    let results = sorter.sort(kind, &keys, &criteria).await?;
    let mut enc = Encoder::default();
    enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.atom("SORT").map_err(SessionError::Io)?;
    for n in &results {
        enc.sp().map_err(SessionError::Io)?;
        enc.number(*n as u64).map_err(SessionError::Io)?;
    }
    enc.crlf().map_err(SessionError::Io)?;
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("SORT"))
}

pub(super) async fn thread<IO, S>(ctx: &mut CommandContext<'_, IO, S>) -> SessionResult<Outcome>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    S: Session,
{
    require_selected(ctx)?;
    let (algorithm, criteria) = match &ctx.command.body {
        CommandBody::Thread { algorithm, criteria, .. } => (algorithm.clone(), criteria.clone()),
        _ => return Err(SessionError::bad("malformed THREAD")),
    };
    let kind = ctx.command.kind;
    let Some(threader) = ctx.session.as_thread() else {
        return Err(SessionError::no("THREAD not supported"));
    };
    let nodes = threader.thread(&algorithm, kind, &criteria).await?;
    let mut enc = Encoder::default();
    enc.star().map_err(SessionError::Io)?.sp().map_err(SessionError::Io)?;
    enc.atom("THREAD").map_err(SessionError::Io)?;
    if !nodes.is_empty() {
        enc.sp().map_err(SessionError::Io)?;
        write_thread_nodes(&mut enc, &nodes).map_err(SessionError::Io)?;
    }
    enc.crlf().map_err(SessionError::Io)?;
    ctx.connection.write_raw(&enc.into_bytes()).await.map_err(SessionError::Io)?;
    Ok(Outcome::completed("THREAD"))
}

fn write_thread_nodes(enc: &mut Encoder<Vec<u8>>, nodes: &[crate::session::ThreadNode]) -> std::io::Result<()> {
    enc.begin_list()?;
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            enc.sp()?;
        }
        write_thread_node(enc, node)?;
    }
    enc.end_list()?;
    Ok(())
}

fn write_thread_node(enc: &mut Encoder<Vec<u8>>, node: &crate::session::ThreadNode) -> std::io::Result<()> {
    match node {
        crate::session::ThreadNode::Message(uid, children) => {
            enc.number(*uid as u64)?;
            if !children.is_empty() {
                enc.sp()?;
                write_thread_nodes(enc, children)?;
            }
        }
        crate::session::ThreadNode::Siblings(children) => {
            write_thread_nodes(enc, children)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::connection::{Connection, SelectedMailbox};
    use crate::dispatcher::Extras;
    use crate::session::tests::NullSession;
    use async_trait::async_trait;
    use imap_types::{SearchCriteria, SearchData, SearchOptions};
    use std::sync::Mutex;

    #[test]
    fn resolve_saved_result_rewrites_dollar_to_uid_set() {
        let saved = (imap_types::NumKind::Uid, imap_types::SeqSet::parse("1:7,9").unwrap());
        let resolved = resolve_saved_result(&SearchCriteria::SavedResult, Some(&saved), imap_types::NumKind::Uid).unwrap();
        match resolved {
            SearchCriteria::Uid(set) => assert_eq!(set.to_string(), "1:7,9"),
            other => panic!("expected Uid(..), got {other:?}"),
        }
    }

    #[test]
    fn resolve_saved_result_rejects_kind_mismatch() {
        let saved = (imap_types::NumKind::Seq, imap_types::SeqSet::parse("1:3").unwrap());
        let err = resolve_saved_result(&SearchCriteria::SavedResult, Some(&saved), imap_types::NumKind::Uid).unwrap_err();
        assert!(matches!(err, SessionError::No(_)));
    }

    #[test]
    fn resolve_saved_result_rejects_missing_save() {
        let err = resolve_saved_result(&SearchCriteria::SavedResult, None, imap_types::NumKind::Uid).unwrap_err();
        assert!(matches!(err, SessionError::No(_)));
    }

    #[test]
    fn resolve_saved_result_recurses_through_not() {
        let saved = (imap_types::NumKind::Seq, imap_types::SeqSet::parse("2:4").unwrap());
        let resolved = resolve_saved_result(
            &SearchCriteria::Not(Box::new(SearchCriteria::SavedResult)),
            Some(&saved),
            imap_types::NumKind::Seq,
        )
        .unwrap();
        match resolved {
            SearchCriteria::Not(inner) => match *inner {
                SearchCriteria::SequenceSet(set) => assert_eq!(set.to_string(), "2:4"),
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn apply_partial_windows_from_start() {
        let all = imap_types::SeqSet::parse("1:10").unwrap();
        let windowed = apply_partial(&all, imap_types::PartialRange { offset: 1, count: 3 });
        assert_eq!(windowed.iter_in_order(u32::MAX).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn apply_partial_windows_from_end() {
        let all = imap_types::SeqSet::parse("1:10").unwrap();
        let windowed = apply_partial(&all, imap_types::PartialRange { offset: -3, count: 2 });
        assert_eq!(windowed.iter_in_order(u32::MAX).collect::<Vec<_>>(), vec![8, 9]);
    }

    /// A fixture that returns a fixed `SearchData` and records the
    /// criteria it was actually called with, so tests can assert `$`
    /// was resolved before the backend ever saw it.
    struct RecordingSearchSession {
        last_criteria: Mutex<Option<String>>,
        all: imap_types::SeqSet,
    }

    #[async_trait]
    impl Session for RecordingSearchSession {
        async fn login(&mut self, _user: &str, _pass: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn select(
            &mut self,
            mailbox: &imap_types::MailboxName,
            read_only: bool,
        ) -> SessionResult<(imap_types::SelectData, std::sync::Arc<crate::tracker::MailboxTracker>)> {
            let data = imap_types::SelectData {
                messages: 9,
                recent: 0,
                uid_validity: 1,
                uid_next: 10,
                first_unseen: None,
                read_only,
                permanent_flags: Vec::new(),
                applied_flags: Vec::new(),
                highest_mod_seq: None,
                vanished_earlier: None,
            };
            Ok((data, crate::tracker::MailboxTracker::new(mailbox.as_str().to_string(), 9, 1, 10)))
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
        async fn poll(&mut self, _w: &mut dyn crate::session::UpdateWriter, _allow_expunge: bool) -> SessionResult<()> {
            Ok(())
        }
        async fn idle(&mut self, _w: &mut dyn crate::session::UpdateWriter, stop: &tokio::sync::Notify) -> SessionResult<()> {
            stop.notified().await;
            Ok(())
        }
        fn unselect(&mut self) {}
        async fn expunge(&mut self, _w: &mut dyn crate::session::ExpungeWriter, _uids: Option<&imap_types::UidSet>) -> SessionResult<()> {
            Ok(())
        }
        async fn search(&mut self, _kind: imap_types::NumKind, criteria: &SearchCriteria, _options: &SearchOptions) -> SessionResult<SearchData> {
            *self.last_criteria.lock().unwrap() = Some(format!("{criteria:?}"));
            Ok(SearchData { all: Some(self.all.clone()), ..Default::default() })
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

    async fn selected_connection() -> Connection<tokio::io::DuplexStream> {
        let (_client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server, crate::config::ServerConfig::default(), imap_types::ServerCapability::default(), false);
        conn.state = ConnState::Selected;
        let tracker = crate::tracker::MailboxTracker::new("INBOX", 9, 1, 10);
        conn.session_tracker.select(&tracker);
        conn.selected = Some(SelectedMailbox {
            name: imap_types::MailboxName::new("INBOX"),
            read_only: false,
            tracker,
            session_tracker: conn.session_tracker.clone(),
        });
        conn
    }

    fn search_command(tag: &str, kind: imap_types::NumKind, return_opts: SearchOptions, criteria: SearchCriteria) -> Command {
        Command { tag: tag.to_string(), kind, name: "SEARCH".to_string(), body: CommandBody::Search { return_opts, charset: None, criteria } }
    }

    #[tokio::test]
    async fn save_then_dollar_round_trips_through_saved_result() {
        let mut conn = selected_connection().await;
        let mut session = RecordingSearchSession { last_criteria: Mutex::new(None), all: imap_types::SeqSet::parse("1:7,9").unwrap() };
        let mut extras = Extras::new();

        let save_opts = SearchOptions { save: true, all: true, ..Default::default() };
        let cmd = search_command("A1", imap_types::NumKind::Uid, save_opts, SearchCriteria::NotFlag(imap_types::Flag::Seen));
        {
            let mut ctx = CommandContext { command: &cmd, connection: &mut conn, session: &mut session, extras: &mut extras };
            search(&mut ctx).await.unwrap();
        }
        assert_eq!(
            conn.saved_search_result.as_ref().map(|(k, s)| (*k, s.to_string())),
            Some((imap_types::NumKind::Uid, "1:7,9".to_string()))
        );

        let cmd2 = search_command("A2", imap_types::NumKind::Uid, SearchOptions::default(), SearchCriteria::SavedResult);
        {
            let mut ctx = CommandContext { command: &cmd2, connection: &mut conn, session: &mut session, extras: &mut extras };
            search(&mut ctx).await.unwrap();
        }
        let seen = session.last_criteria.lock().unwrap().clone().unwrap();
        assert!(seen.contains("Uid"), "expected $ resolved to a Uid(..) criterion, got {seen}");
        assert!(!seen.contains("SavedResult"));
    }

    #[tokio::test]
    async fn dollar_without_prior_save_is_rejected() {
        let mut conn = selected_connection().await;
        let mut session = RecordingSearchSession { last_criteria: Mutex::new(None), all: imap_types::SeqSet::parse("1").unwrap() };
        let mut extras = Extras::new();
        let cmd = search_command("A1", imap_types::NumKind::Uid, SearchOptions::default(), SearchCriteria::SavedResult);
        let mut ctx = CommandContext { command: &cmd, connection: &mut conn, session: &mut session, extras: &mut extras };
        let err = search(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::No(_)));
    }

    #[tokio::test]
    async fn selecting_a_new_mailbox_invalidates_the_saved_result() {
        let mut conn = selected_connection().await;
        conn.saved_search_result = Some((imap_types::NumKind::Uid, imap_types::SeqSet::parse("1:3").unwrap()));
        conn.state = ConnState::Authenticated;
        conn.selected = None;
        let mut session = NullSession;
        let mut extras = Extras::new();
        let cmd = Command {
            tag: "A1".into(),
            kind: imap_types::NumKind::Seq,
            name: "SELECT".into(),
            body: CommandBody::Select { mailbox: imap_types::MailboxName::new("INBOX"), modifiers: Default::default() },
        };
        let mut ctx = CommandContext { command: &cmd, connection: &mut conn, session: &mut session, extras: &mut extras };
        super::super::authenticated::select(&mut ctx, false).await.unwrap();
        assert!(conn.saved_search_result.is_none());
    }
}
