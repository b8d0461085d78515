use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::oneshot;

use imap_types::Flag;
use imap_wire::Decoder;

use crate::error::DemuxError;

/// The status line a tagged command completes with: `<tag> OK/NO/BAD
/// [code] text` (spec.md §4.8 "Pending commands").
#[derive(Debug, Clone)]
pub struct TaggedResponse {
    pub status: Status,
    pub code: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// A unilateral, unsolicited server notification the reader loop
/// classified on the fly (spec.md §4.8 "Untagged processing"). `Fetch`
/// carries the raw remainder of the line (after the sequence number
/// and the `FETCH` atom) since fully decoding a `msg-att` list is the
/// caller's job, not the demultiplexer's.
#[derive(Debug, Clone)]
pub enum Update {
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Fetch(u32, Vec<u8>),
}

/// The subset of mailbox state the source carries in untagged/status
/// responses outside of any particular command's reply (spec.md §4.8
/// "named responses... those carrying mailbox state... update the
/// cache").
#[derive(Debug, Clone, Default)]
pub struct MailboxState {
    pub exists: u32,
    pub recent: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub unseen: Option<u32>,
    pub permanent_flags: Vec<Flag>,
    pub flags: Vec<Flag>,
    pub read_only: bool,
}

/// A continuation-request rendezvous value: `text` is the bytes after
/// `+ `. [`Demultiplexer::expect_continuation`]'s receiver yields an
/// `Err` instead when the connection died while a continuation was
/// expected.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub text: String,
}

type PendingResult = Result<TaggedResponse, Arc<DemuxError>>;

struct Pending {
    tx: oneshot::Sender<PendingResult>,
}

struct Shared {
    pending: Mutex<HashMap<String, Pending>>,
    untagged: Mutex<Vec<Vec<u8>>>,
    continuation: Mutex<Option<oneshot::Sender<Result<Continuation, Arc<DemuxError>>>>>,
    mailbox: Mutex<MailboxState>,
    cause: Mutex<Option<Arc<DemuxError>>>,
    unilateral: Mutex<Option<Box<dyn Fn(Update) + Send + Sync>>>,
}

/// Owns the three pieces of read-side state a pipelining IMAP client
/// needs (spec.md §4.8): the tag→completion map, the untagged-line
/// buffer, and the continuation rendezvous. Cheap to clone (an `Arc`
/// handle); [`Demultiplexer::run`] consumes one clone to drive the
/// background reader loop while the rest of the client keeps another
/// to call [`Demultiplexer::add`]/[`Demultiplexer::expect_continuation`].
#[derive(Clone)]
pub struct Demultiplexer {
    shared: Arc<Shared>,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                untagged: Mutex::new(Vec::new()),
                continuation: Mutex::new(None),
                mailbox: Mutex::new(MailboxState::default()),
                cause: Mutex::new(None),
                unilateral: Mutex::new(None),
            }),
        }
    }

    /// Installs a handler invoked (from the reader loop's task) for
    /// every [`Update`] classified out of an untagged numeric response.
    /// There is at most one handler; installing a new one replaces it.
    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        *self.shared.unilateral.lock().unwrap() = Some(Box::new(handler));
    }

    /// Registers a tag as awaiting a tagged response. Call this before
    /// the command line is written, so a reply racing the write can't
    /// be missed.
    pub fn add(&self, tag: impl Into<String>) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(tag.into(), Pending { tx });
        rx
    }

    /// Clears the untagged buffer. Call immediately before sending a
    /// command whose untagged responses (LIST, SEARCH, STATUS, FETCH,
    /// …) you intend to read with [`Demultiplexer::take_untagged`]
    /// once its tagged reply arrives.
    pub fn collect_untagged(&self) {
        self.shared.untagged.lock().unwrap().clear();
    }

    /// Drains and returns every untagged line buffered since the last
    /// [`Demultiplexer::collect_untagged`] call.
    pub fn take_untagged(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.shared.untagged.lock().unwrap())
    }

    /// Registers interest in the next continuation request (`+ ...`).
    /// Only one command at a time may have an outstanding continuation
    /// (APPEND, AUTHENTICATE, IDLE) — registering a new one replaces
    /// whatever was previously waiting, which would only happen if the
    /// caller violates that one-at-a-time rule itself.
    pub fn expect_continuation(&self) -> oneshot::Receiver<Result<Continuation, Arc<DemuxError>>> {
        let (tx, rx) = oneshot::channel();
        *self.shared.continuation.lock().unwrap() = Some(tx);
        rx
    }

    pub fn mailbox_state(&self) -> MailboxState {
        self.shared.mailbox.lock().unwrap().clone()
    }

    /// The reason the connection died, if it has.
    pub fn disconnect_cause(&self) -> Option<Arc<DemuxError>> {
        self.shared.cause.lock().unwrap().clone()
    }

    /// Drives the background reader loop until EOF or a decode error,
    /// then fans the failure out to every pending command and the
    /// continuation slot exactly once (spec.md §4.8's "on EOF / error"
    /// clause). Intended to be `tokio::spawn`ed.
    pub async fn run<R>(&self, mut reader: R)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = match reader.read_until(b'\n', &mut line).await {
                Ok(n) => n,
                Err(e) => {
                    self.fail_all(DemuxError::Io(e));
                    return;
                }
            };
            if read == 0 {
                self.fail_all(DemuxError::Closed);
                return;
            }
            let trimmed = line.strip_suffix(b"\n").unwrap_or(&line);
            let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
            if trimmed.is_empty() {
                continue;
            }
            if let Err(e) = self.process_line(trimmed) {
                self.fail_all(e);
                return;
            }
        }
    }

    fn process_line(&self, line: &[u8]) -> Result<(), DemuxError> {
        if line.starts_with(b"+") {
            self.process_continuation(line);
            return Ok(());
        }
        if line.starts_with(b"* ") {
            self.process_untagged(&line[2..])?;
            return Ok(());
        }
        self.process_tagged(line)
    }

    fn process_continuation(&self, line: &[u8]) {
        let text = line.strip_prefix(b"+").unwrap_or(line);
        let text = text.strip_prefix(b" ").unwrap_or(text);
        let text = String::from_utf8_lossy(text).into_owned();
        if let Some(tx) = self.shared.continuation.lock().unwrap().take() {
            let _ = tx.send(Ok(Continuation { text }));
        }
    }

    fn process_untagged(&self, rest: &[u8]) -> Result<(), DemuxError> {
        self.shared.untagged.lock().unwrap().push(rest.to_vec());

        let mut dec = Decoder::new(rest);
        if let Ok(n) = dec.read_number() {
            if dec.read_sp().is_ok() {
                if let Ok(keyword) = dec.read_atom() {
                    match keyword.to_ascii_uppercase().as_str() {
                        "EXISTS" => {
                            self.shared.mailbox.lock().unwrap().exists = n;
                            self.notify(Update::Exists(n));
                        }
                        "RECENT" => {
                            self.shared.mailbox.lock().unwrap().recent = n;
                            self.notify(Update::Recent(n));
                        }
                        "EXPUNGE" => self.notify(Update::Expunge(n)),
                        "FETCH" => self.notify(Update::Fetch(n, dec.remaining().to_vec())),
                        _ => {}
                    }
                    return Ok(());
                }
            }
        }

        let mut dec = Decoder::new(rest);
        if let Ok(keyword) = dec.read_atom() {
            match keyword.to_ascii_uppercase().as_str() {
                "OK" | "NO" => {
                    if dec.read_sp().is_ok() {
                        if let Some((code, _rest)) = parse_code(dec.remaining()) {
                            self.apply_code(&code);
                        }
                    }
                }
                "FLAGS" => {
                    if dec.read_sp().is_ok() {
                        if let Ok(flags) = dec.read_flags() {
                            self.shared.mailbox.lock().unwrap().flags = flags.iter().map(|f| Flag::from(f.as_str())).collect();
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_code(&self, code: &str) {
        let mut parts = code.splitn(2, ' ');
        let Some(name) = parts.next() else { return };
        let arg = parts.next();
        let mut mailbox = self.shared.mailbox.lock().unwrap();
        match name.to_ascii_uppercase().as_str() {
            "UIDVALIDITY" => mailbox.uid_validity = arg.and_then(|a| a.parse().ok()),
            "UIDNEXT" => mailbox.uid_next = arg.and_then(|a| a.parse().ok()),
            "UNSEEN" => mailbox.unseen = arg.and_then(|a| a.parse().ok()),
            "PERMANENTFLAGS" => {
                if let Some(arg) = arg {
                    mailbox.permanent_flags = arg
                        .trim_start_matches('(')
                        .trim_end_matches(')')
                        .split_whitespace()
                        .map(Flag::from)
                        .collect();
                }
            }
            "READ-ONLY" => mailbox.read_only = true,
            "READ-WRITE" => mailbox.read_only = false,
            _ => {}
        }
    }

    fn process_tagged(&self, line: &[u8]) -> Result<(), DemuxError> {
        let mut dec = Decoder::new(line);
        let tag = dec.read_atom()?.to_string();
        dec.read_sp()?;
        let status_word = dec.read_atom()?.to_ascii_uppercase();
        let status = match status_word.as_str() {
            "OK" => Status::Ok,
            "NO" => Status::No,
            "BAD" => Status::Bad,
            _ => return Err(DemuxError::Decode(imap_wire::DecodeError::EmptyAtom)),
        };
        dec.read_sp()?;
        let (code, text) = match parse_code(dec.remaining()) {
            Some((code, rest)) => (Some(code), rest.to_string()),
            None => (None, String::from_utf8_lossy(dec.remaining()).into_owned()),
        };
        if let Some(code) = &code {
            self.apply_code(code);
        }
        match self.shared.pending.lock().unwrap().remove(&tag) {
            Some(pending) => {
                let _ = pending.tx.send(Ok(TaggedResponse { status, code, text }));
            }
            None => tracing::warn!(tag = %tag, "tagged response for unknown or already-completed command"),
        }
        Ok(())
    }

    fn notify(&self, update: Update) {
        if let Some(handler) = self.shared.unilateral.lock().unwrap().as_ref() {
            handler(update);
        }
    }

    fn fail_all(&self, err: DemuxError) {
        tracing::debug!(%err, "demultiplexer reader loop ending");
        let err = Arc::new(err);
        *self.shared.cause.lock().unwrap() = Some(err.clone());
        for (_, pending) in self.shared.pending.lock().unwrap().drain() {
            let _ = pending.tx.send(Err(err.clone()));
        }
        if let Some(tx) = self.shared.continuation.lock().unwrap().take() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    async fn feed(demux: &Demultiplexer, lines: &str) {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(lines.as_bytes()).await.unwrap();
        drop(client);
        demux.run(BufReader::new(server)).await;
    }

    #[tokio::test]
    async fn tagged_response_completes_pending_command() {
        let demux = Demultiplexer::new();
        let rx = demux.add("A1");
        feed(&demux, "A1 OK done\r\n").await;
        let resp = rx.await.unwrap().unwrap();
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.code, None);
        assert_eq!(resp.text, "done");
    }

    #[tokio::test]
    async fn tagged_response_with_code_updates_mailbox_state() {
        let demux = Demultiplexer::new();
        let rx = demux.add("A1");
        feed(&demux, "A1 OK [READ-WRITE] done\r\n").await;
        let resp = rx.await.unwrap().unwrap();
        assert_eq!(resp.code.as_deref(), Some("READ-WRITE"));
        assert!(!demux.mailbox_state().read_only);
    }

    #[tokio::test]
    async fn untagged_ok_code_updates_mailbox_state_without_a_pending_tag() {
        let demux = Demultiplexer::new();
        feed(&demux, "* OK [UIDVALIDITY 42] still here\r\n* OK [UIDNEXT 7] still here\r\n").await;
        let state = demux.mailbox_state();
        assert_eq!(state.uid_validity, Some(42));
        assert_eq!(state.uid_next, Some(7));
    }

    #[tokio::test]
    async fn untagged_exists_buffers_the_line_updates_state_and_notifies() {
        let demux = Demultiplexer::new();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        demux.on_update(move |update| {
            if let Update::Exists(n) = update {
                seen2.lock().unwrap().push(n);
            }
        });
        demux.collect_untagged();
        feed(&demux, "* 5 EXISTS\r\n* 2 RECENT\r\n").await;
        assert_eq!(demux.mailbox_state().exists, 5);
        assert_eq!(demux.mailbox_state().recent, 2);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        let untagged = demux.take_untagged();
        assert_eq!(untagged.len(), 2);
        assert_eq!(untagged[0], b"5 EXISTS");
        assert!(demux.take_untagged().is_empty());
    }

    #[tokio::test]
    async fn untagged_flags_updates_mailbox_flags() {
        let demux = Demultiplexer::new();
        feed(&demux, "* FLAGS (\\Seen \\Answered)\r\n").await;
        let flags = demux.mailbox_state().flags;
        assert_eq!(flags.len(), 2);
    }

    #[tokio::test]
    async fn continuation_request_resolves_the_waiting_receiver() {
        let demux = Demultiplexer::new();
        let rx = demux.expect_continuation();
        feed(&demux, "+ idling\r\n").await;
        let continuation = rx.await.unwrap().unwrap();
        assert_eq!(continuation.text, "idling");
    }

    #[tokio::test]
    async fn continuation_without_leading_space_still_parses() {
        let demux = Demultiplexer::new();
        let rx = demux.expect_continuation();
        feed(&demux, "+\r\n").await;
        let continuation = rx.await.unwrap().unwrap();
        assert_eq!(continuation.text, "");
    }

    #[tokio::test]
    async fn eof_fans_failure_out_to_every_pending_slot() {
        let demux = Demultiplexer::new();
        let tagged_rx = demux.add("A1");
        let continuation_rx = demux.expect_continuation();
        feed(&demux, "").await;

        assert!(tagged_rx.await.unwrap().is_err());
        assert!(continuation_rx.await.unwrap().is_err());
        assert!(matches!(demux.disconnect_cause().as_deref(), Some(DemuxError::Closed)));
    }

    #[tokio::test]
    async fn tagged_response_for_unknown_tag_does_not_panic() {
        let demux = Demultiplexer::new();
        feed(&demux, "Z9 OK unsolicited\r\n").await;
        assert!(demux.disconnect_cause().is_none());
    }

    #[tokio::test]
    async fn malformed_tagged_line_fails_pending_commands() {
        let demux = Demultiplexer::new();
        let rx = demux.add("A1");
        feed(&demux, "A1 WEIRD status\r\n").await;
        assert!(rx.await.unwrap().is_err());
        assert!(matches!(demux.disconnect_cause().as_deref(), Some(DemuxError::Decode(_))));
    }
}

/// Splits a leading `[CODE ...]` off the front of a tagged/untagged
/// status text, mirroring `imap_wire::encode::Encoder::status_response`'s
/// `[{code}] ` output in reverse.
fn parse_code(rest: &[u8]) -> Option<(String, &str)> {
    if rest.first() != Some(&b'[') {
        return None;
    }
    let end = rest.iter().position(|&b| b == b']')?;
    let code = String::from_utf8_lossy(&rest[1..end]).into_owned();
    let after = &rest[end + 1..];
    let after = after.strip_prefix(b" ").unwrap_or(after);
    Some((code, std::str::from_utf8(after).ok()?))
}
