//! The backend contract (spec.md §4.9 / C9): the interface handlers
//! invoke and the writers they hand the backend so it can emit
//! correctly framed untagged responses without touching the encoder
//! directly.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use imap_types::{
    CopyUid, Flag, MailboxName, NumKind, SearchCriteria, SearchData, SearchOptions, SelectData,
    StatusItem, StatusResult, StoreFlags, StoreOptions, UidSet,
};

/// An operation-level failure the dispatcher turns into a tagged `NO`
/// (spec.md §7 "Operation error"). Distinct from a `SessionError`
/// originating in I/O, which the dispatcher escalates to a connection
/// close.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    No(String),
    #[error("[{code}] {message}")]
    NoWithCode { code: String, message: String },
    /// A command ran outside its allowed connection state, or some
    /// other protocol violation (spec.md §7 "State error"/"Protocol
    /// violation"): the dispatcher replies tagged `BAD` rather than
    /// `NO`, and leaves state unchanged.
    #[error("{0}")]
    Bad(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    pub fn no(msg: impl Into<String>) -> Self {
        SessionError::No(msg.into())
    }

    pub fn bad(msg: impl Into<String>) -> Self {
        SessionError::Bad(msg.into())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One `LIST`/`LSUB` reply (RFC 3501 §7.2.2, RFC 9051 §7.3.1).
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: MailboxName,
    pub attributes: Vec<String>,
    pub delimiter: Option<char>,
}

/// Emits `* LIST (...) "delim" name` lines as the backend walks the
/// mailbox hierarchy; kept separate from the encoder so the backend
/// never needs to know the wire grammar.
pub trait ListWriter: Send {
    fn emit(&mut self, entry: ListEntry) -> SessionResult<()>;
}

/// Emits `* n FETCH (...)` / `* n EXPUNGE` / `* n EXISTS` lines for a
/// command that produces multiple untagged responses (FETCH, STORE,
/// COPY's implicit fetch-back, NOOP/IDLE flush).
pub trait UpdateWriter: Send {
    fn exists(&mut self, count: u32) -> SessionResult<()>;
    fn expunge(&mut self, seq: u32) -> SessionResult<()>;
    fn fetch_flags(&mut self, seq: u32, uid: u32, flags: &[Flag]) -> SessionResult<()>;
}

/// A single FETCH reply's data items, written incrementally as the
/// backend produces them for one message.
pub trait FetchWriter: Send {
    fn begin(&mut self, seq: u32) -> SessionResult<()>;
    fn flags(&mut self, flags: &[Flag]) -> SessionResult<()>;
    fn uid(&mut self, uid: u32) -> SessionResult<()>;
    fn rfc822_size(&mut self, size: u32) -> SessionResult<()>;
    fn internal_date(&mut self, date: &str) -> SessionResult<()>;
    fn mod_seq(&mut self, modseq: u64) -> SessionResult<()>;
    fn envelope(&mut self, envelope: &imap_types::Envelope) -> SessionResult<()>;
    fn body_structure(&mut self, structure: &imap_types::BodyStructure) -> SessionResult<()>;
    fn body(&mut self, section: &str, data: &[u8]) -> SessionResult<()>;
    fn binary(&mut self, part: &str, data: &[u8]) -> SessionResult<()>;
    fn binary_size(&mut self, part: &str, size: u32) -> SessionResult<()>;
    fn end(&mut self) -> SessionResult<()>;
}

pub trait ExpungeWriter: Send {
    fn expunged(&mut self, seq: u32) -> SessionResult<()>;
}

/// Emits the destination-side sequence/UID for each moved message
/// (RFC 6851 MOVE emits `* n EXPUNGE` on the source plus `COPYUID`-style
/// data; kept distinct from `ExpungeWriter` since MOVE couples the two).
pub trait MoveWriter: Send {
    fn moved(&mut self, from_seq: u32, to_uid: u32) -> SessionResult<()>;
}

/// Options accompanying `LIST`/`LSUB` (RFC 5258 LIST-EXTENDED subset
/// the core cares about).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub subscribed_only: bool,
    pub return_subscribed: bool,
    pub return_children: bool,
    pub return_status: Vec<StatusItem>,
}

/// The mandatory backend interface (spec.md §4.9).
#[async_trait]
pub trait Session: Send {
    async fn login(&mut self, user: &str, pass: &str) -> SessionResult<()>;

    /// Selects `mailbox` and hands back both its numeric state and the
    /// shared [`crate::tracker::MailboxTracker`] other sessions
    /// selecting the same mailbox observe updates through (spec.md §3
    /// "a tracker for a mailbox exists while >=1 session is selected on
    /// it" — the backend is the natural owner of that per-mailbox
    /// registry since only it knows which concurrent sessions share a
    /// mailbox).
    async fn select(
        &mut self,
        mailbox: &MailboxName,
        read_only: bool,
    ) -> SessionResult<(SelectData, std::sync::Arc<crate::tracker::MailboxTracker>)>;

    async fn create(&mut self, mailbox: &MailboxName) -> SessionResult<()>;
    async fn delete(&mut self, mailbox: &MailboxName) -> SessionResult<()>;
    async fn rename(&mut self, from: &MailboxName, to: &MailboxName) -> SessionResult<()>;
    async fn subscribe(&mut self, mailbox: &MailboxName) -> SessionResult<()>;
    async fn unsubscribe(&mut self, mailbox: &MailboxName) -> SessionResult<()>;

    async fn list(
        &mut self,
        writer: &mut dyn ListWriter,
        reference: &str,
        patterns: &[String],
        options: &ListOptions,
    ) -> SessionResult<()>;

    async fn status(&mut self, mailbox: &MailboxName, items: &[StatusItem]) -> SessionResult<StatusResult>;

    /// `reader` yields exactly `size` bytes: the message being appended.
    async fn append(
        &mut self,
        mailbox: &MailboxName,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        flags: &[Flag],
        internal_date: Option<&str>,
    ) -> SessionResult<Option<(u32, u32)>>; // (uidvalidity, uid) for APPENDUID

    /// Flushes queued mailbox-change notifications (NOOP and the IDLE
    /// poll loop both call through here; see [`super::tracker`]).
    async fn poll(&mut self, writer: &mut dyn UpdateWriter, allow_expunge: bool) -> SessionResult<()>;

    /// Blocks until a mailbox event is available or `stop` fires,
    /// flushing through `writer` exactly as `poll` would for one batch.
    async fn idle(&mut self, writer: &mut dyn UpdateWriter, stop: &tokio::sync::Notify) -> SessionResult<()>;

    fn unselect(&mut self);

    async fn expunge(&mut self, writer: &mut dyn ExpungeWriter, uids: Option<&UidSet>) -> SessionResult<()>;

    /// When `options.save` is set the backend must populate
    /// `SearchData::all` with the full result set regardless of whether
    /// `options.all` was also requested — the handler binds `$` to
    /// whatever `all` comes back (RFC 5182 §2.1), so a backend that
    /// only honors `options.all` would silently bind `$` to nothing.
    async fn search(
        &mut self,
        kind: NumKind,
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> SessionResult<SearchData>;

    async fn fetch(
        &mut self,
        writer: &mut dyn FetchWriter,
        kind: NumKind,
        set: &str,
        options: &imap_types::FetchOptions,
    ) -> SessionResult<()>;

    async fn store(
        &mut self,
        writer: &mut dyn FetchWriter,
        kind: NumKind,
        set: &str,
        flags: &StoreFlags,
        options: &StoreOptions,
    ) -> SessionResult<()>;

    async fn copy(&mut self, kind: NumKind, set: &str, dest: &MailboxName) -> SessionResult<CopyUid>;

    async fn close(&mut self) -> SessionResult<()>;

    // --- optional sub-interfaces (spec.md §4.9, §4.7 "session probe"; design
    // note §9 "explicit capability enums and per-capability trait objects") ---

    fn as_move(&mut self) -> Option<&mut dyn SessionMove> {
        None
    }
    fn as_namespace(&mut self) -> Option<&mut dyn SessionNamespace> {
        None
    }
    fn as_id(&mut self) -> Option<&mut dyn SessionId> {
        None
    }
    fn as_sort(&mut self) -> Option<&mut dyn SessionSort> {
        None
    }
    fn as_thread(&mut self) -> Option<&mut dyn SessionThread> {
        None
    }
    fn as_convert(&mut self) -> Option<&mut dyn SessionConvert> {
        None
    }
    fn as_multisearch(&mut self) -> Option<&mut dyn SessionMultiSearch> {
        None
    }
}

/// RFC 6851 MOVE: atomically COPY + EXPUNGE a set without a window
/// where a crash loses the source copy.
#[async_trait]
pub trait SessionMove: Send {
    async fn move_messages(
        &mut self,
        writer: &mut dyn MoveWriter,
        kind: NumKind,
        set: &str,
        dest: &MailboxName,
    ) -> SessionResult<()>;
}

/// RFC 2342 NAMESPACE: advertises the personal/other-users/shared
/// mailbox roots and their hierarchy delimiters.
#[derive(Debug, Clone)]
pub struct NamespaceDescriptor {
    pub prefix: String,
    pub delimiter: Option<char>,
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceData {
    pub personal: Vec<NamespaceDescriptor>,
    pub other_users: Vec<NamespaceDescriptor>,
    pub shared: Vec<NamespaceDescriptor>,
}

#[async_trait]
pub trait SessionNamespace: Send {
    async fn namespace(&mut self) -> SessionResult<NamespaceData>;
}

/// RFC 2971 ID: client/server identification key-value exchange.
#[async_trait]
pub trait SessionId: Send {
    async fn id(&mut self, client: &[(String, Option<String>)]) -> SessionResult<Vec<(String, Option<String>)>>;
}

/// RFC 5256 SORT: like SEARCH but the result is ordered by the given
/// sort keys rather than returned in mailbox order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Arrival,
    Cc,
    Date,
    From,
    Size,
    Subject,
    To,
}

#[async_trait]
pub trait SessionSort: Send {
    async fn sort(
        &mut self,
        kind: NumKind,
        keys: &[(SortKey, bool)],
        criteria: &SearchCriteria,
    ) -> SessionResult<Vec<u32>>;
}

/// RFC 5256 THREAD: group messages into reply trees.
#[derive(Debug, Clone)]
pub enum ThreadNode {
    Message(u32, Vec<ThreadNode>),
    Siblings(Vec<ThreadNode>),
}

#[async_trait]
pub trait SessionThread: Send {
    async fn thread(
        &mut self,
        algorithm: &str,
        kind: NumKind,
        criteria: &SearchCriteria,
    ) -> SessionResult<Vec<ThreadNode>>;
}

/// RFC 5259-adjacent CONVERT extension: transcode a fetched section to
/// another media type/charset server-side. The core only specifies the
/// call shape (spec.md §1 excludes the transcoding itself).
#[async_trait]
pub trait SessionConvert: Send {
    async fn convert(&mut self, seq: u32, section: &str, target_media_type: &str) -> SessionResult<Vec<u8>>;
}

/// RFC 7377 MULTISEARCH: search across several mailboxes in one
/// command.
#[async_trait]
pub trait SessionMultiSearch: Send {
    async fn multisearch(
        &mut self,
        mailboxes: &[MailboxName],
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> SessionResult<Vec<(MailboxName, SearchData)>>;
}
