//! Per-connection framing (spec.md §4.3 / C3): greeting, tag/name
//! splitting, literal assembly, capability advertisement and the
//! STARTTLS upgrade point.

use std::future::Future;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use imap_types::capability::{Capability, EnabledCapabilities, ServerCapability};
use imap_types::mailbox::MailboxName;
use imap_wire::decode::{Decoder, LiteralInfo};
use imap_wire::encode::Encoder;

use crate::command::{self, Command, CommandParseError};
use crate::config::ServerConfig;
use crate::tracker::{MailboxTracker, SessionTracker};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("connection closed")]
    Eof,
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("literal of {0} bytes exceeds the configured limit")]
    LiteralTooLarge(u64),
    #[error("non-synchronizing literal used without LITERAL+/LITERAL- advertised")]
    NonSyncLiteralNotAdvertised,
}

/// Connection state machine (spec.md §3): the four states plus the
/// transient PREAUTH shortcut folded into `Authenticated` at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

/// Everything about the currently selected mailbox that lives outside
/// `ConnState` proper (spec.md §3 "Maintains: ... selected mailbox
/// name + read-only flag + MailboxTracker + SessionTracker").
pub struct SelectedMailbox {
    pub name: MailboxName,
    pub read_only: bool,
    pub tracker: Arc<MailboxTracker>,
    pub session_tracker: Arc<SessionTracker>,
}

/// A connection over any duplex byte stream. Generic so the caller can
/// plug in a `TcpStream`, a TLS wrapper, or an in-memory
/// `tokio::io::DuplexStream` for tests.
pub struct Connection<IO> {
    reader: BufReader<ReadHalf<IO>>,
    writer: WriteHalf<IO>,
    pub config: ServerConfig,
    pub server_caps: ServerCapability,
    pub enabled: EnabledCapabilities,
    pub tls_active: bool,
    pub state: ConnState,
    pub selected: Option<SelectedMailbox>,
    pub session_tracker: Arc<SessionTracker>,
    /// The `$` result set bound by a SEARCH/UID SEARCH `RETURN (SAVE)`
    /// (RFC 5182 SEARCHRES), along with the `NumKind` it was saved
    /// under — a later reference to `$` only resolves under the same
    /// kind (spec.md §8 scenario 5). Invalidated whenever the selected
    /// mailbox changes (RFC 5182 §2.1).
    pub saved_search_result: Option<(imap_types::NumKind, imap_types::numset::SeqSet)>,
}

impl<IO: tokio::io::AsyncRead + AsyncWrite + Unpin + Send> Connection<IO> {
    pub fn new(io: IO, config: ServerConfig, server_caps: ServerCapability, tls_active: bool) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            config,
            server_caps,
            enabled: EnabledCapabilities::default(),
            tls_active,
            state: ConnState::NotAuthenticated,
            selected: None,
            session_tracker: SessionTracker::new(),
            saved_search_result: None,
        }
    }

    /// `* OK [CAPABILITY ...] <text>` or, when `preauth` is set (the
    /// connection arrived already authenticated by a trusted
    /// transport), `* PREAUTH [CAPABILITY ...] <text>`.
    pub async fn write_greeting(&mut self, preauth: bool) -> io::Result<()> {
        if preauth {
            self.state = ConnState::Authenticated;
        }
        let caps = self.advertised_capabilities();
        let mut enc = Encoder::default();
        enc.star()?.sp()?;
        enc.atom(if preauth { "PREAUTH" } else { "OK" })?.sp()?;
        write_capability_code(&mut enc, &caps)?;
        enc.atom(&self.config.server_name)?.crlf()?;
        self.write_raw(&enc.into_bytes()).await
    }

    pub fn advertised_capabilities(&self) -> Vec<Capability> {
        self.server_caps.advertised(
            self.tls_active,
            self.config.allow_starttls,
            self.config.login_disabled_on_plaintext,
        )
    }

    fn non_sync_literals_allowed(&self) -> bool {
        self.server_caps.support(&Capability::LiteralPlus) || self.server_caps.support(&Capability::LiteralMinus)
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Splits the connection into its read/write halves so a caller can
    /// hold a persistent, cancellation-safe read future (watching for
    /// `IDLE`'s `DONE` line) while writing unsolicited updates to the
    /// other half in parallel (spec.md §4.6) — every other handler only
    /// ever needs one direction of the stream at a time, so `IDLE` is
    /// the sole caller of this.
    pub(crate) fn split(&mut self) -> (&mut BufReader<ReadHalf<IO>>, &mut WriteHalf<IO>) {
        (&mut self.reader, &mut self.writer)
    }

    pub async fn write_continuation(&mut self, text: &str) -> io::Result<()> {
        let mut enc = Encoder::default();
        enc.plus()?.sp()?.atom(text)?.crlf()?;
        self.write_raw(&enc.into_bytes()).await
    }

    pub async fn write_status(&mut self, tag: &str, status: &str, code: Option<&str>, text: &str) -> io::Result<()> {
        let mut enc = Encoder::default();
        enc.status_response(tag, status, code, text)?;
        self.write_raw(&enc.into_bytes()).await
    }

    /// Reads one raw continuation-data line (used by `AUTHENTICATE`'s
    /// base64 response lines and `IDLE`'s `DONE`), stripped of CRLF.
    pub async fn read_continuation_line(&mut self) -> Result<Vec<u8>, ConnectionError> {
        read_continuation_line_from(&mut self.reader).await
    }

    /// Assembles one full command buffer, streaming any embedded
    /// literals (issuing a continuation request for synchronizing
    /// ones) before handing the result to [`command::parse`] (spec.md
    /// §4.3 step 2, §9 "buffer the command line up to a literal
    /// prefix... then stream the literal").
    pub async fn read_command(&mut self) -> Result<Option<Command>, ConnectionError> {
        let mut buffer = Vec::new();
        loop {
            let mut raw = Vec::new();
            let n = self.reader.read_until(b'\n', &mut raw).await?;
            if n == 0 {
                return if buffer.is_empty() { Ok(None) } else { Err(ConnectionError::Eof) };
            }
            let line = raw.strip_suffix(b"\n").unwrap_or(&raw);
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            match trailing_literal(line) {
                Some((prefix_end, info)) => {
                    if info.non_sync && !self.non_sync_literals_allowed() {
                        return Err(ConnectionError::NonSyncLiteralNotAdvertised);
                    }
                    if info.size > self.config.max_literal_size {
                        return Err(ConnectionError::LiteralTooLarge(info.size));
                    }
                    buffer.extend_from_slice(&line[..prefix_end]);
                    buffer.extend_from_slice(b"\r\n");
                    if !info.non_sync {
                        self.write_continuation("Ready for literal").await?;
                    }
                    let body = imap_wire::literal::read_literal_body(&mut self.reader, info.size)
                        .await
                        .map_err(CommandParseError::from)?;
                    buffer.extend_from_slice(&body);
                    // The literal's trailing separator / CRLF is whatever
                    // comes next on the wire — loop to read it (and any
                    // further literal-bearing args on the same line).
                    continue;
                }
                None => {
                    buffer.extend_from_slice(line);
                    buffer.extend_from_slice(b"\r\n");
                    break;
                }
            }
        }

        parse_command_buffer(&buffer).map(Some)
    }

    /// Replaces the underlying stream with `new_io` (the result of a
    /// TLS handshake); any bytes the `BufReader` had buffered beyond
    /// what it already yielded are dropped along with the old `IO`,
    /// satisfying "discards any buffered unread input as pipelining is
    /// forbidden across the handshake" (spec.md §4.3). The advertised
    /// capability set must be recomputed by the caller via
    /// [`Self::advertised_capabilities`] after this call.
    pub async fn upgrade_tls<NewIO, F, Fut>(self, upgrade: F) -> io::Result<Connection<NewIO>>
    where
        NewIO: tokio::io::AsyncRead + AsyncWrite + Unpin + Send,
        F: FnOnce(IO) -> Fut,
        Fut: Future<Output = io::Result<NewIO>>,
    {
        let old_io = self.writer.unsplit(self.reader.into_inner());
        let new_io = upgrade(old_io).await?;
        let (read_half, write_half) = tokio::io::split(new_io);
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
            config: self.config,
            server_caps: self.server_caps,
            enabled: EnabledCapabilities::default(),
            tls_active: true,
            state: self.state,
            selected: self.selected,
            session_tracker: self.session_tracker,
            saved_search_result: self.saved_search_result,
        })
    }
}

/// Shared by [`Connection::read_continuation_line`] and `IDLE`'s split
/// read half ([`Connection::split`]).
pub(crate) async fn read_continuation_line_from<IO: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<ReadHalf<IO>>,
) -> Result<Vec<u8>, ConnectionError> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Err(ConnectionError::Eof);
    }
    let line = raw.strip_suffix(b"\n").unwrap_or(&raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok(line.to_vec())
}

fn write_capability_code(enc: &mut Encoder<Vec<u8>>, caps: &[Capability]) -> io::Result<()> {
    enc.atom("[CAPABILITY")?;
    for c in caps {
        enc.sp()?.atom(&c.to_string())?;
    }
    enc.atom("]")?.sp()?;
    Ok(())
}

/// Detects a literal header (`{N}`, `{N+}`, `~{N}`, `~{N+}`) anchored
/// at the end of `line`, as IMAP requires. Returns the byte offset
/// where the literal prefix starts (so the caller can keep everything
/// before it) plus the parsed header.
fn trailing_literal(line: &[u8]) -> Option<(usize, LiteralInfo)> {
    if !line.ends_with(b"}") {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let literal_start = if open > 0 && line[open - 1] == b'~' { open - 1 } else { open };
    let mut probe = line[literal_start..].to_vec();
    probe.extend_from_slice(b"\r\n");
    let mut d = Decoder::new(&probe);
    let info = d.read_literal_info().ok()?;
    if !d.is_empty() {
        return None;
    }
    Some((literal_start, info))
}

fn parse_command_buffer(buffer: &[u8]) -> Result<Command, ConnectionError> {
    let mut d = Decoder::new(buffer);
    let tag = d.read_atom()?.to_string();
    d.read_sp()?;
    let mut kind = imap_types::NumKind::Seq;
    let mut name = d.read_atom()?.to_string();
    if name.eq_ignore_ascii_case("UID") {
        kind = imap_types::NumKind::Uid;
        d.read_sp()?;
        name = d.read_atom()?.to_string();
    }
    if d.peek_byte() == Some(b' ') {
        d.read_sp()?;
    }
    let body = command::parse(&tag, kind, &name, &mut d)?;
    d.read_crlf()?;
    d.finish()?;
    Ok(Command { tag, kind, name: name.to_ascii_uppercase(), body })
}
