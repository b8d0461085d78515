//! Parses one command's argument tail into a [`CommandBody`] (spec.md
//! §4.5's per-command argument grammars). Runs entirely over an
//! already-assembled [`Decoder`] — see [`crate::connection`] for how
//! embedded literals get spliced into that buffer before parsing
//! starts.

use imap_wire::decode::Decoder;
use imap_wire::error::DecodeError;
use imap_types::fetch::{FetchItem, FetchMacro, FetchOptions, Partial, PartPath, Section, SectionSpec};
use imap_types::flag::{Flag, StoreAction, StoreFlags, StoreOptions};
use imap_types::mailbox::MailboxName;
use imap_types::numset::{SeqSet, UidSet};
use imap_types::search::{chrono_like, SearchCriteria, SearchOptions};
use imap_types::{NumKind, StatusItem};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{0}")]
    Grammar(String),
}

pub type ParseResult<T> = Result<T, CommandParseError>;

fn grammar(msg: impl Into<String>) -> CommandParseError {
    CommandParseError::Grammar(msg.into())
}

/// Modifiers accepted in parentheses after `SELECT`/`EXAMINE`'s mailbox
/// name (RFC 7162 CONDSTORE, RFC 7162 QRESYNC).
#[derive(Debug, Clone, Default)]
pub struct SelectModifiers {
    pub condstore: bool,
    pub qresync: Option<QResyncParams>,
}

#[derive(Debug, Clone)]
pub struct QResyncParams {
    pub uid_validity: u32,
    pub known_mod_seq: u64,
    pub known_uids: Option<SeqSet>,
    pub seq_match: Option<(SeqSet, UidSet)>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSelectOptions {
    pub subscribed: bool,
    pub remote: bool,
    pub recursive_match: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListReturnOptions {
    pub subscribed: bool,
    pub children: bool,
    pub status: Vec<StatusItem>,
}

/// Every command body the core dispatcher needs to know about
/// (spec.md §4.5). Parsed with the `UID` prefix already stripped into
/// [`NumKind`] on the owning [`Command`].
#[derive(Debug, Clone)]
pub enum CommandBody {
    Capability,
    Noop,
    Logout,
    StartTls,
    Login { user: Vec<u8>, pass: Vec<u8> },
    Authenticate { mechanism: String, initial_response: Option<Vec<u8>> },
    Enable { capabilities: Vec<String> },
    Select { mailbox: MailboxName, modifiers: SelectModifiers },
    Examine { mailbox: MailboxName, modifiers: SelectModifiers },
    Create { mailbox: MailboxName },
    Delete { mailbox: MailboxName },
    Rename { from: MailboxName, to: MailboxName },
    Subscribe { mailbox: MailboxName },
    Unsubscribe { mailbox: MailboxName },
    List {
        reference: MailboxName,
        pattern: String,
        select_opts: ListSelectOptions,
        return_opts: ListReturnOptions,
    },
    Lsub { reference: MailboxName, pattern: String },
    Status { mailbox: MailboxName, items: Vec<StatusItem> },
    Append {
        mailbox: MailboxName,
        flags: Vec<Flag>,
        date: Option<String>,
        message: Vec<u8>,
        binary: bool,
    },
    Idle,
    Close,
    Unselect,
    Expunge { uids: Option<UidSet> },
    Search { return_opts: SearchOptions, charset: Option<String>, criteria: SearchCriteria },
    Fetch { set: String, items: Vec<FetchItem>, changed_since: Option<u64>, vanished: bool },
    Store { set: String, flags: StoreFlags, options: StoreOptions },
    Copy { set: String, dest: MailboxName },
    Move { set: String, dest: MailboxName },
    Namespace,
    Id { params: Vec<(String, Option<String>)> },
    Sort { keys: Vec<(crate::session::SortKey, bool)>, charset: Option<String>, criteria: SearchCriteria },
    Thread { algorithm: String, charset: Option<String>, criteria: SearchCriteria },
}

/// The fully parsed command: tag, `NumKind` (set by a `UID` prefix),
/// the uppercased command name (for dispatcher lookup/logging) and its
/// body.
#[derive(Debug, Clone)]
pub struct Command {
    pub tag: String,
    pub kind: NumKind,
    pub name: String,
    pub body: CommandBody,
}

/// Parses `<tag> [UID] <command-name> <args...>` out of an assembled
/// buffer (the tag and name have already been split out by the
/// connection's framing loop per spec.md §4.3 step 2; this entry point
/// takes them directly so callers that already have `tag`/`name` don't
/// re-scan for them).
pub fn parse(tag: &str, kind: NumKind, name: &str, rest: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "CAPABILITY" => Ok(CommandBody::Capability),
        "NOOP" => Ok(CommandBody::Noop),
        "LOGOUT" => Ok(CommandBody::Logout),
        "STARTTLS" => Ok(CommandBody::StartTls),
        "LOGIN" => parse_login(rest),
        "AUTHENTICATE" => parse_authenticate(rest),
        "ENABLE" => parse_enable(rest),
        "SELECT" => parse_select(rest, false),
        "EXAMINE" => parse_select(rest, true),
        "CREATE" => parse_single_mailbox(rest).map(|mailbox| CommandBody::Create { mailbox }),
        "DELETE" => parse_single_mailbox(rest).map(|mailbox| CommandBody::Delete { mailbox }),
        "RENAME" => parse_rename(rest),
        "SUBSCRIBE" => parse_single_mailbox(rest).map(|mailbox| CommandBody::Subscribe { mailbox }),
        "UNSUBSCRIBE" => parse_single_mailbox(rest).map(|mailbox| CommandBody::Unsubscribe { mailbox }),
        "LIST" => parse_list(rest),
        "LSUB" => parse_lsub(rest),
        "STATUS" => parse_status(rest),
        "APPEND" => parse_append(rest),
        "IDLE" => Ok(CommandBody::Idle),
        "CLOSE" => Ok(CommandBody::Close),
        "UNSELECT" => Ok(CommandBody::Unselect),
        "EXPUNGE" => parse_expunge(rest, kind),
        "SEARCH" => parse_search(rest),
        "FETCH" => parse_fetch(rest),
        "STORE" => parse_store(rest),
        "COPY" => parse_copy(rest),
        "MOVE" => parse_move(rest),
        "NAMESPACE" => Ok(CommandBody::Namespace),
        "ID" => parse_id(rest),
        "SORT" => parse_sort(rest),
        "THREAD" => parse_thread(rest),
        _ => Err(CommandParseError::UnknownCommand(format!("{tag} {name}"))),
    }
}

fn parse_mailbox_name(d: &mut Decoder<'_>) -> ParseResult<MailboxName> {
    let raw = d.read_astring()?;
    let s = String::from_utf8_lossy(&raw);
    // IMAP4rev1 peers send modified UTF-7; tolerate already-UTF-8 input
    // from an IMAP4rev2/UTF8=ACCEPT peer by falling back to the raw
    // string when mutf7 decoding fails (spec.md §9 Open Questions: the
    // core must actually perform this decode, unlike the source).
    let decoded = imap_wire::mutf7::decode(&s).unwrap_or_else(|_| s.to_string());
    Ok(MailboxName::new(decoded))
}

fn parse_single_mailbox(d: &mut Decoder<'_>) -> ParseResult<MailboxName> {
    d.read_sp()?;
    parse_mailbox_name(d)
}

fn parse_login(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let user = d.read_astring()?;
    d.read_sp()?;
    let pass = d.read_astring()?;
    Ok(CommandBody::Login { user, pass })
}

fn parse_authenticate(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mechanism = d.read_atom()?.to_string();
    let initial_response = if d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        Some(d.read_string()?)
    } else {
        None
    };
    Ok(CommandBody::Authenticate { mechanism, initial_response })
}

fn parse_enable(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    let mut capabilities = Vec::new();
    loop {
        d.read_sp()?;
        capabilities.push(d.read_atom()?.to_string());
        if d.peek_byte() != Some(b' ') {
            break;
        }
    }
    Ok(CommandBody::Enable { capabilities })
}

fn parse_select(d: &mut Decoder<'_>, examine: bool) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mailbox = parse_mailbox_name(d)?;
    let mut modifiers = SelectModifiers::default();
    if d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        let items = d.read_list(|d| parse_select_modifier(d))?;
        for item in items {
            match item {
                SelectModifierItem::CondStore => modifiers.condstore = true,
                SelectModifierItem::QResync(p) => modifiers.qresync = Some(p),
            }
        }
    }
    if examine {
        Ok(CommandBody::Examine { mailbox, modifiers })
    } else {
        Ok(CommandBody::Select { mailbox, modifiers })
    }
}

enum SelectModifierItem {
    CondStore,
    QResync(QResyncParams),
}

fn parse_select_modifier(d: &mut Decoder<'_>) -> ParseResult<SelectModifierItem> {
    let name = d.read_atom()?;
    if name.eq_ignore_ascii_case("CONDSTORE") {
        return Ok(SelectModifierItem::CondStore);
    }
    if name.eq_ignore_ascii_case("QRESYNC") {
        d.read_sp()?;
        let params = d.read_list(|d| {
            let uid_validity = d.read_number()?;
            d.read_sp()?;
            let known_mod_seq = d.read_number64()?;
            let known_uids = if d.peek_byte() == Some(b' ') {
                d.read_sp()?;
                let atom = d.read_atom()?;
                Some(SeqSet::parse(atom).map_err(|e| grammar(e.to_string()))?)
            } else {
                None
            };
            let seq_match = if d.peek_byte() == Some(b' ') {
                d.read_sp()?;
                let pair = d.read_list(|d| {
                    let a = d.read_atom()?.to_string();
                    d.read_sp()?;
                    let b = d.read_atom()?.to_string();
                    Ok((a, b))
                })?;
                if pair.len() != 2 {
                    return Err(grammar("QRESYNC seq-match must have two components"));
                }
                let seqs = SeqSet::parse(&pair[0].0).map_err(|e| grammar(e.to_string()))?;
                let uids = UidSet::parse(&pair[0].1).map_err(|e| grammar(e.to_string()))?;
                Some((seqs, uids))
            } else {
                None
            };
            Ok((uid_validity, known_mod_seq, known_uids, seq_match))
        })?;
        let (uid_validity, known_mod_seq, known_uids, seq_match) = params
            .into_iter()
            .next()
            .ok_or_else(|| grammar("QRESYNC requires parameters"))?;
        return Ok(SelectModifierItem::QResync(QResyncParams {
            uid_validity,
            known_mod_seq,
            known_uids,
            seq_match,
        }));
    }
    Err(grammar(format!("unknown SELECT modifier {name:?}")))
}

fn parse_rename(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let from = parse_mailbox_name(d)?;
    d.read_sp()?;
    let to = parse_mailbox_name(d)?;
    Ok(CommandBody::Rename { from, to })
}

fn parse_list(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mut select_opts = ListSelectOptions::default();
    if d.peek_byte() == Some(b'(') {
        let opts = d.read_list(|d| d.read_atom().map(str::to_string))?;
        for opt in opts {
            match opt.to_ascii_uppercase().as_str() {
                "SUBSCRIBED" => select_opts.subscribed = true,
                "REMOTE" => select_opts.remote = true,
                "RECURSIVEMATCH" => select_opts.recursive_match = true,
                other => return Err(grammar(format!("unknown LIST selection option {other:?}"))),
            }
        }
        d.read_sp()?;
    }
    let reference = parse_mailbox_name(d)?;
    d.read_sp()?;
    let pattern = String::from_utf8_lossy(&d.read_astring()?).to_string();
    let mut return_opts = ListReturnOptions::default();
    if d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        let ret_atom = d.read_atom()?;
        if !ret_atom.eq_ignore_ascii_case("RETURN") {
            return Err(grammar(format!("expected RETURN, found {ret_atom:?}")));
        }
        d.read_sp()?;
        let items = d.read_list(|d| d.read_atom().map(str::to_string))?;
        for item in items {
            match item.to_ascii_uppercase().as_str() {
                "SUBSCRIBED" => return_opts.subscribed = true,
                "CHILDREN" => return_opts.children = true,
                "STATUS" => {} // STATUS return item carries its own parenthesized list; see RFC 5819
                other => return Err(grammar(format!("unknown LIST return option {other:?}"))),
            }
        }
    }
    Ok(CommandBody::List { reference, pattern, select_opts, return_opts })
}

fn parse_lsub(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let reference = parse_mailbox_name(d)?;
    d.read_sp()?;
    let pattern = String::from_utf8_lossy(&d.read_astring()?).to_string();
    Ok(CommandBody::Lsub { reference, pattern })
}

fn parse_status(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mailbox = parse_mailbox_name(d)?;
    d.read_sp()?;
    let items = d.read_list(|d| {
        let atom = d.read_atom()?;
        status_item(atom)
    })?;
    Ok(CommandBody::Status { mailbox, items })
}

fn status_item(atom: &str) -> ParseResult<StatusItem> {
    match atom.to_ascii_uppercase().as_str() {
        "MESSAGES" => Ok(StatusItem::Messages),
        "RECENT" => Ok(StatusItem::Recent),
        "UIDNEXT" => Ok(StatusItem::UidNext),
        "UIDVALIDITY" => Ok(StatusItem::UidValidity),
        "UNSEEN" => Ok(StatusItem::Unseen),
        "DELETED" => Ok(StatusItem::Deleted),
        "SIZE" => Ok(StatusItem::Size),
        "HIGHESTMODSEQ" => Ok(StatusItem::HighestModSeq),
        "MAILBOXID" => Ok(StatusItem::MailboxId),
        other => Err(grammar(format!("unknown STATUS item {other:?}"))),
    }
}

fn parse_append(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mailbox = parse_mailbox_name(d)?;
    d.read_sp()?;
    let mut flags = Vec::new();
    if d.peek_byte() == Some(b'(') {
        flags = d.read_flags()?.into_iter().map(|f| Flag::from(f.as_str())).collect();
        d.read_sp()?;
    }
    let mut date = None;
    if d.peek_byte() == Some(b'"') {
        date = Some(String::from_utf8_lossy(&d.read_quoted_string()?).to_string());
        d.read_sp()?;
    }
    // `UTF8 (~{N})` per RFC 6855, otherwise a bare literal (sync,
    // non-sync, or binary).
    let (message, binary) = if d.remaining().len() >= 5 && d.remaining()[..4].eq_ignore_ascii_case(b"UTF8") {
        let _ = d.read_atom()?;
        d.read_sp()?;
        let inner = d.read_list(|d| d.read_string())?;
        let bytes = inner.into_iter().next().ok_or_else(|| grammar("UTF8 append requires one literal"))?;
        (bytes, true)
    } else {
        let binary = matches!(d.peek_byte(), Some(b'~'));
        (d.read_string()?, binary)
    };
    Ok(CommandBody::Append { mailbox, flags, date, message, binary })
}

fn parse_expunge(d: &mut Decoder<'_>, kind: NumKind) -> ParseResult<CommandBody> {
    if kind.is_uid() && d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        let atom = d.read_atom()?;
        return Ok(CommandBody::Expunge {
            uids: Some(UidSet::parse(atom).map_err(|e| grammar(e.to_string()))?),
        });
    }
    Ok(CommandBody::Expunge { uids: None })
}

fn parse_search(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let mut return_opts = SearchOptions::default();
    // A wrapper extension (ESEARCH) usually owns RETURN parsing itself
    // before delegating here (spec.md §4.7's peek-before-consuming
    // composition rule), but the core still understands a bare
    // `RETURN (...)` so SEARCH behaves per RFC 4731 even with no
    // extensions installed.
    if d.remaining().len() >= 6 && d.remaining()[..6].eq_ignore_ascii_case(b"RETURN") {
        let _ = d.read_atom()?;
        d.read_sp()?;
        let opts = d.read_list(|d| d.read_atom().map(str::to_string))?;
        for opt in &opts {
            match opt.to_ascii_uppercase().as_str() {
                "MIN" => return_opts.min = true,
                "MAX" => return_opts.max = true,
                "ALL" => return_opts.all = true,
                "COUNT" => return_opts.count = true,
                "SAVE" => return_opts.save = true,
                other => return Err(grammar(format!("unknown SEARCH RETURN option {other:?}"))),
            }
        }
        d.read_sp()?;
    }
    let mut charset = None;
    if d.remaining().len() >= 7 && d.remaining()[..7].eq_ignore_ascii_case(b"CHARSET") {
        let _ = d.read_atom()?;
        d.read_sp()?;
        charset = Some(d.read_atom()?.to_string());
        d.read_sp()?;
    }
    let criteria = parse_search_key_sequence(d)?;
    Ok(CommandBody::Search { return_opts, charset, criteria })
}

fn parse_search_key_sequence(d: &mut Decoder<'_>) -> ParseResult<SearchCriteria> {
    let mut keys = vec![parse_search_key(d)?];
    while d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        keys.push(parse_search_key(d)?);
    }
    if keys.len() == 1 {
        Ok(keys.pop().unwrap())
    } else {
        Ok(SearchCriteria::And(keys))
    }
}

fn parse_search_key(d: &mut Decoder<'_>) -> ParseResult<SearchCriteria> {
    if d.peek_byte() == Some(b'(') {
        let inner = d.read_list(|d| parse_search_key_sequence_single(d))?;
        return Ok(SearchCriteria::And(inner));
    }
    if d.peek_byte() == Some(b'$') {
        let _ = d.read_astring()?;
        return Ok(SearchCriteria::SavedResult);
    }
    let atom = d.read_atom()?;
    let upper = atom.to_ascii_uppercase();
    match upper.as_str() {
        "ALL" => Ok(SearchCriteria::All),
        "ANSWERED" => Ok(SearchCriteria::HasFlag(Flag::Answered)),
        "UNANSWERED" => Ok(SearchCriteria::NotFlag(Flag::Answered)),
        "DELETED" => Ok(SearchCriteria::HasFlag(Flag::Deleted)),
        "UNDELETED" => Ok(SearchCriteria::NotFlag(Flag::Deleted)),
        "FLAGGED" => Ok(SearchCriteria::HasFlag(Flag::Flagged)),
        "UNFLAGGED" => Ok(SearchCriteria::NotFlag(Flag::Flagged)),
        "SEEN" => Ok(SearchCriteria::HasFlag(Flag::Seen)),
        "UNSEEN" => Ok(SearchCriteria::NotFlag(Flag::Seen)),
        "DRAFT" => Ok(SearchCriteria::HasFlag(Flag::Draft)),
        "UNDRAFT" => Ok(SearchCriteria::NotFlag(Flag::Draft)),
        "KEYWORD" => {
            d.read_sp()?;
            let kw = d.read_atom()?;
            Ok(SearchCriteria::HasFlag(Flag::from(kw)))
        }
        "UNKEYWORD" => {
            d.read_sp()?;
            let kw = d.read_atom()?;
            Ok(SearchCriteria::NotFlag(Flag::from(kw)))
        }
        "BODY" => {
            d.read_sp()?;
            Ok(SearchCriteria::Body(read_search_string(d)?))
        }
        "TEXT" => {
            d.read_sp()?;
            Ok(SearchCriteria::Text(read_search_string(d)?))
        }
        "LARGER" => {
            d.read_sp()?;
            Ok(SearchCriteria::SizeLarger(d.read_number()?))
        }
        "SMALLER" => {
            d.read_sp()?;
            Ok(SearchCriteria::SizeSmaller(d.read_number()?))
        }
        "UID" => {
            d.read_sp()?;
            let atom = d.read_atom()?;
            Ok(SearchCriteria::Uid(UidSet::parse(atom).map_err(|e| grammar(e.to_string()))?))
        }
        "MODSEQ" => {
            d.read_sp()?;
            Ok(SearchCriteria::ModSeqAtLeast(d.read_number64()?))
        }
        "NOT" => {
            d.read_sp()?;
            Ok(SearchCriteria::Not(Box::new(parse_search_key(d)?)))
        }
        "OR" => {
            d.read_sp()?;
            let a = parse_search_key(d)?;
            d.read_sp()?;
            let b = parse_search_key(d)?;
            Ok(SearchCriteria::Or(Box::new(a), Box::new(b)))
        }
        "FUZZY" => {
            d.read_sp()?;
            Ok(SearchCriteria::Fuzzy(Box::new(parse_search_key(d)?)))
        }
        "HEADER" => {
            d.read_sp()?;
            let field = read_search_string(d)?;
            d.read_sp()?;
            let value = read_search_string(d)?;
            Ok(SearchCriteria::Header { field, value })
        }
        "SUBJECT" => header_key(d, "Subject"),
        "FROM" => header_key(d, "From"),
        "TO" => header_key(d, "To"),
        "CC" => header_key(d, "Cc"),
        "BCC" => header_key(d, "Bcc"),
        "NEW" => Ok(SearchCriteria::And(vec![
            SearchCriteria::HasFlag(Flag::Recent),
            SearchCriteria::NotFlag(Flag::Seen),
        ])),
        "OLD" => Ok(SearchCriteria::NotFlag(Flag::Recent)),
        "RECENT" => Ok(SearchCriteria::HasFlag(Flag::Recent)),
        "SAVEDBEFORE" => {
            d.read_sp()?;
            Ok(SearchCriteria::SavedBefore(parse_search_date(d)?))
        }
        "SAVEDSINCE" => {
            d.read_sp()?;
            Ok(SearchCriteria::SavedSince(parse_search_date(d)?))
        }
        "SAVEDON" => {
            d.read_sp()?;
            Ok(SearchCriteria::SavedOn(parse_search_date(d)?))
        }
        other => Err(grammar(format!("unknown SEARCH key {other:?}"))),
    }
}

fn header_key(d: &mut Decoder<'_>, field: &str) -> ParseResult<SearchCriteria> {
    d.read_sp()?;
    Ok(SearchCriteria::Header { field: field.to_string(), value: read_search_string(d)? })
}

fn parse_search_date(d: &mut Decoder<'_>) -> ParseResult<chrono_like::Date> {
    let raw = read_search_string(d)?;
    let mut parts = raw.splitn(3, '-');
    let (day, month, year) = match (parts.next(), parts.next(), parts.next()) {
        (Some(d), Some(m), Some(y)) => (d, m, y),
        _ => return Err(grammar(format!("malformed search date {raw:?}"))),
    };
    let day: u8 = day.parse().map_err(|_| grammar(format!("malformed search date {raw:?}")))?;
    let month = match month.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return Err(grammar(format!("malformed search date {raw:?}"))),
    };
    let year: u16 = year.parse().map_err(|_| grammar(format!("malformed search date {raw:?}")))?;
    Ok(chrono_like::Date { year, month, day })
}

fn parse_search_key_sequence_single(d: &mut Decoder<'_>) -> ParseResult<SearchCriteria> {
    parse_search_key(d)
}

fn read_search_string(d: &mut Decoder<'_>) -> ParseResult<String> {
    Ok(String::from_utf8_lossy(&d.read_string()?).to_string())
}

fn parse_fetch(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let set = String::from_utf8_lossy(&d.read_astring()?).to_string();
    d.read_sp()?;
    let items = if d.peek_byte() == Some(b'(') {
        d.read_list(|d| parse_fetch_item(d))?
    } else {
        let atom = d.read_atom()?;
        match atom.to_ascii_uppercase().as_str() {
            "ALL" => FetchMacro::All.expand(),
            "FAST" => FetchMacro::Fast.expand(),
            "FULL" => FetchMacro::Full.expand(),
            _ => vec![fetch_item_from_atom(atom, d)?],
        }
    };
    let mut changed_since = None;
    let mut vanished = false;
    if d.peek_byte() == Some(b' ') {
        d.read_sp()?;
        let modifiers = d.read_list(|d| {
            let name = d.read_atom()?;
            if !name.eq_ignore_ascii_case("CHANGEDSINCE") {
                return Err(grammar(format!("unknown FETCH modifier {name:?}")));
            }
            d.read_sp()?;
            let modseq = d.read_number64()?;
            let vanished = if d.peek_byte() == Some(b' ') {
                d.read_sp()?;
                let v = d.read_atom()?;
                if !v.eq_ignore_ascii_case("VANISHED") {
                    return Err(grammar(format!("unknown FETCH modifier {v:?}")));
                }
                true
            } else {
                false
            };
            Ok((modseq, vanished))
        })?;
        if let Some((modseq, v)) = modifiers.into_iter().next() {
            changed_since = Some(modseq);
            vanished = v;
        }
    }
    let options = FetchOptions::new(items, changed_since, vanished);
    Ok(CommandBody::Fetch { set, items: options.items, changed_since: options.changed_since, vanished: options.vanished })
}

fn parse_fetch_item(d: &mut Decoder<'_>) -> ParseResult<FetchItem> {
    let atom = d.read_atom()?;
    fetch_item_from_atom(atom, d)
}

fn fetch_item_from_atom(atom: &str, d: &mut Decoder<'_>) -> ParseResult<FetchItem> {
    match atom.to_ascii_uppercase().as_str() {
        "FLAGS" => Ok(FetchItem::Flags),
        "UID" => Ok(FetchItem::Uid),
        "RFC822.SIZE" => Ok(FetchItem::Rfc822Size),
        "INTERNALDATE" => Ok(FetchItem::InternalDate),
        "ENVELOPE" => Ok(FetchItem::Envelope),
        "BODYSTRUCTURE" => Ok(FetchItem::BodyStructure),
        "MODSEQ" => Ok(FetchItem::ModSeq),
        "EMAILID" => Ok(FetchItem::EmailId),
        "THREADID" => Ok(FetchItem::ThreadId),
        "SAVEDATE" => Ok(FetchItem::SaveDate),
        "PREVIEW" => {
            let lazy = if d.peek_byte() == Some(b'(') {
                let opts = d.read_list(|d| d.read_atom().map(str::to_string))?;
                opts.iter().any(|o| o.eq_ignore_ascii_case("LAZY"))
            } else {
                false
            };
            Ok(FetchItem::Preview { lazy })
        }
        "BODY" => {
            if d.peek_byte() == Some(b'[') {
                parse_body_section(d, false)
            } else {
                Ok(FetchItem::Body { section: None, partial: None, peek: false })
            }
        }
        "BODY.PEEK" => parse_body_section(d, true),
        "BINARY" => parse_binary(d, false),
        "BINARY.PEEK" => parse_binary(d, true),
        "BINARY.SIZE" => {
            d.expect_byte(b'[')?;
            let part = parse_part_path(d)?;
            d.expect_byte(b']')?;
            Ok(FetchItem::BinarySize { part })
        }
        other => Err(grammar(format!("unknown FETCH item {other:?}"))),
    }
}

fn parse_part_path(d: &mut Decoder<'_>) -> ParseResult<PartPath> {
    let mut parts = Vec::new();
    if d.peek_byte() == Some(b']') {
        return Ok(PartPath(parts));
    }
    loop {
        parts.push(d.read_number()?);
        if d.peek_byte() == Some(b'.') {
            d.expect_byte(b'.')?;
        } else {
            break;
        }
    }
    Ok(PartPath(parts))
}

fn parse_body_section(d: &mut Decoder<'_>, peek: bool) -> ParseResult<FetchItem> {
    d.expect_byte(b'[')?;
    let part = parse_part_path(d)?;
    let spec = parse_section_spec(d)?;
    d.expect_byte(b']')?;
    let partial = parse_partial(d)?;
    Ok(FetchItem::Body {
        section: Some(Section { part, spec }),
        partial,
        peek,
    })
}

fn parse_section_spec(d: &mut Decoder<'_>) -> ParseResult<SectionSpec> {
    if d.peek_byte() == Some(b']') {
        return Ok(SectionSpec::Full);
    }
    let atom = d.read_atom()?;
    match atom.to_ascii_uppercase().as_str() {
        "HEADER" => Ok(SectionSpec::Header),
        "TEXT" => Ok(SectionSpec::Text),
        "MIME" => Ok(SectionSpec::Mime),
        "HEADER.FIELDS" => {
            d.read_sp()?;
            let fields = d.read_list(|d| Ok(String::from_utf8_lossy(&d.read_astring()?).to_string()))?;
            Ok(SectionSpec::HeaderFields(fields))
        }
        "HEADER.FIELDS.NOT" => {
            d.read_sp()?;
            let fields = d.read_list(|d| Ok(String::from_utf8_lossy(&d.read_astring()?).to_string()))?;
            Ok(SectionSpec::HeaderFieldsNot(fields))
        }
        other => Err(grammar(format!("unknown section spec {other:?}"))),
    }
}

fn parse_partial(d: &mut Decoder<'_>) -> ParseResult<Option<Partial>> {
    if d.peek_byte() != Some(b'<') {
        return Ok(None);
    }
    d.expect_byte(b'<')?;
    let start = d.read_number()?;
    d.expect_byte(b'.')?;
    let octets = d.read_number()?;
    d.expect_byte(b'>')?;
    Ok(Some(Partial { start, octets }))
}

fn parse_binary(d: &mut Decoder<'_>, peek: bool) -> ParseResult<FetchItem> {
    d.expect_byte(b'[')?;
    let part = parse_part_path(d)?;
    d.expect_byte(b']')?;
    let partial = parse_partial(d)?;
    Ok(FetchItem::Binary { part, partial, peek })
}

fn parse_store(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let set = String::from_utf8_lossy(&d.read_astring()?).to_string();
    d.read_sp()?;
    let mut options = StoreOptions::default();
    if d.peek_byte() == Some(b'(') {
        let items = d.read_list(|d| {
            let name = d.read_atom()?;
            if !name.eq_ignore_ascii_case("UNCHANGEDSINCE") {
                return Err(grammar(format!("unknown STORE modifier {name:?}")));
            }
            d.read_sp()?;
            d.read_number64()
        })?;
        options.unchanged_since = items.into_iter().next();
        d.read_sp()?;
    }
    let action_atom = d.read_atom()?;
    let (action, rest) = if let Some(rest) = action_atom.strip_prefix('+') {
        (StoreAction::Add, rest)
    } else if let Some(rest) = action_atom.strip_prefix('-') {
        (StoreAction::Del, rest)
    } else {
        (StoreAction::Set, action_atom)
    };
    if !rest.eq_ignore_ascii_case("FLAGS") && !rest.eq_ignore_ascii_case("FLAGS.SILENT") {
        return Err(grammar(format!("unknown STORE action {action_atom:?}")));
    }
    options.silent = rest.eq_ignore_ascii_case("FLAGS.SILENT");
    d.read_sp()?;
    let flags = if d.peek_byte() == Some(b'(') {
        d.read_flags()?
    } else {
        vec![d.read_flag_atom()?.to_string()]
    };
    let flags = flags.into_iter().map(|f| Flag::from(f.as_str())).collect();
    Ok(CommandBody::Store { set, flags: StoreFlags { action, flags }, options })
}

fn parse_copy(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let set = String::from_utf8_lossy(&d.read_astring()?).to_string();
    d.read_sp()?;
    let dest = parse_mailbox_name(d)?;
    Ok(CommandBody::Copy { set, dest })
}

fn parse_move(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let set = String::from_utf8_lossy(&d.read_astring()?).to_string();
    d.read_sp()?;
    let dest = parse_mailbox_name(d)?;
    Ok(CommandBody::Move { set, dest })
}

fn parse_id(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let params = if d.peek_byte() == Some(b'(') {
        d.read_list(|d| {
            let key = String::from_utf8_lossy(&d.read_string()?).to_string();
            d.read_sp()?;
            let value = d.read_nstring()?.map(|v| String::from_utf8_lossy(&v).to_string());
            Ok((key, value))
        })?
    } else {
        // Must be the bare `NIL` form (RFC 2971 §3.3).
        if d.read_nstring()?.is_some() {
            return Err(grammar("ID parameter list must be NIL or a parenthesized list"));
        }
        Vec::new()
    };
    Ok(CommandBody::Id { params })
}

/// `SORT (keys) CHARSET criteria` (RFC 5256 §3). Unlike SEARCH there is
/// no optional `RETURN` keyword to disambiguate: the key list always
/// starts with `(`, so a single peek settles the grammar.
fn parse_sort(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let raw_keys = d.read_list(|d| {
        let reverse = if d.peek_byte() == Some(b'R') || d.peek_byte() == Some(b'r') {
            let atom = d.read_atom()?;
            if !atom.eq_ignore_ascii_case("REVERSE") {
                return Err(grammar(format!("unknown SORT key modifier {atom:?}")));
            }
            d.read_sp()?;
            true
        } else {
            false
        };
        let atom = d.read_atom()?;
        Ok((sort_key(atom)?, reverse))
    })?;
    d.read_sp()?;
    let charset = Some(d.read_atom()?.to_string());
    d.read_sp()?;
    let criteria = parse_search_key_sequence(d)?;
    Ok(CommandBody::Sort { keys: raw_keys, charset, criteria })
}

fn sort_key(atom: &str) -> ParseResult<crate::session::SortKey> {
    use crate::session::SortKey;
    match atom.to_ascii_uppercase().as_str() {
        "ARRIVAL" => Ok(SortKey::Arrival),
        "CC" => Ok(SortKey::Cc),
        "DATE" => Ok(SortKey::Date),
        "FROM" => Ok(SortKey::From),
        "SIZE" => Ok(SortKey::Size),
        "SUBJECT" => Ok(SortKey::Subject),
        "TO" => Ok(SortKey::To),
        other => Err(grammar(format!("unknown SORT key {other:?}"))),
    }
}

/// `THREAD algorithm CHARSET criteria` (RFC 5256 §3).
fn parse_thread(d: &mut Decoder<'_>) -> ParseResult<CommandBody> {
    d.read_sp()?;
    let algorithm = d.read_atom()?.to_string();
    d.read_sp()?;
    let charset = Some(d.read_atom()?.to_string());
    d.read_sp()?;
    let criteria = parse_search_key_sequence(d)?;
    Ok(CommandBody::Thread { algorithm, charset, criteria })
}
