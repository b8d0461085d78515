//! Concrete [`ListWriter`]/[`UpdateWriter`]/[`FetchWriter`]/
//! [`ExpungeWriter`]/[`MoveWriter`] implementations: the backend writes
//! through these synchronously (spec.md §4.9 "backends call writers
//! provided by the handler"), and each one buffers into an
//! [`imap_wire::encode::Encoder`] so the handler can flush the whole
//! response with a single asynchronous write afterwards — mirroring
//! how `aero-proto`'s `Response::build()` assembles a reply before the
//! connection ever touches the socket.

use imap_types::envelope::{BodyStructure, Envelope};
use imap_types::flag::Flag;
use imap_wire::encode::Encoder;

use crate::session::{ExpungeWriter, FetchWriter, ListEntry, ListWriter, MoveWriter, SessionError, SessionResult, UpdateWriter};

fn io_err(e: std::io::Error) -> SessionError {
    SessionError::Io(e)
}

/// Shared by every writer below: an `Encoder<Vec<u8>>` the caller
/// drains with [`BufferedWriter::into_bytes`] once the backend call
/// returns.
#[derive(Default)]
pub struct BufferedWriter {
    enc: Encoder<Vec<u8>>,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.enc.into_bytes()
    }
}

impl ListWriter for BufferedWriter {
    fn emit(&mut self, entry: ListEntry) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?.atom("LIST").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.begin_list().map_err(io_err)?;
        for (i, attr) in entry.attributes.iter().enumerate() {
            if i > 0 {
                self.enc.sp().map_err(io_err)?;
            }
            self.enc.atom(attr).map_err(io_err)?;
        }
        self.enc.end_list().map_err(io_err)?.sp().map_err(io_err)?;
        match entry.delimiter {
            Some(c) => {
                self.enc.quoted_string(c.to_string().as_bytes()).map_err(io_err)?;
            }
            None => {
                self.enc.atom("NIL").map_err(io_err)?;
            }
        }
        self.enc.sp().map_err(io_err)?;
        self.enc.mailbox_name(entry.name.as_str(), false).map_err(io_err)?;
        self.enc.crlf().map_err(io_err)?;
        Ok(())
    }
}

impl UpdateWriter for BufferedWriter {
    fn exists(&mut self, count: u32) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(count as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("EXISTS").map_err(io_err)?.crlf().map_err(io_err)?;
        Ok(())
    }

    fn expunge(&mut self, seq: u32) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(seq as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("EXPUNGE").map_err(io_err)?.crlf().map_err(io_err)?;
        Ok(())
    }

    fn fetch_flags(&mut self, seq: u32, uid: u32, flags: &[Flag]) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(seq as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("FETCH").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.begin_list().map_err(io_err)?;
        self.enc.atom("FLAGS").map_err(io_err)?.sp().map_err(io_err)?;
        write_flag_list(&mut self.enc, flags).map_err(io_err)?;
        self.enc.sp().map_err(io_err)?.atom("UID").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(uid as u64).map_err(io_err)?;
        self.enc.end_list().map_err(io_err)?.crlf().map_err(io_err)?;
        Ok(())
    }
}

impl ExpungeWriter for BufferedWriter {
    fn expunged(&mut self, seq: u32) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(seq as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("EXPUNGE").map_err(io_err)?.crlf().map_err(io_err)?;
        Ok(())
    }
}

impl MoveWriter for BufferedWriter {
    fn moved(&mut self, from_seq: u32, to_uid: u32) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(from_seq as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("EXPUNGE").map_err(io_err)?.crlf().map_err(io_err)?;
        let _ = to_uid; // destination UID surfaces in the tagged COPYUID code, not here.
        Ok(())
    }
}

fn write_flag_list(enc: &mut Encoder<Vec<u8>>, flags: &[Flag]) -> std::io::Result<()> {
    enc.begin_list()?;
    for (i, flag) in flags.iter().enumerate() {
        if i > 0 {
            enc.sp()?;
        }
        enc.atom(&flag.to_string())?;
    }
    enc.end_list()?;
    Ok(())
}

/// One `FETCH` reply's worth of buffering; `begin`/`end` bracket a
/// single message's parenthesized item list, tracking whether a space
/// is needed before the next item.
#[derive(Default)]
pub struct BufferedFetchWriter {
    enc: Encoder<Vec<u8>>,
    items_written: usize,
}

impl BufferedFetchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.enc.into_bytes()
    }

    fn item_sep(&mut self) -> std::io::Result<()> {
        if self.items_written > 0 {
            self.enc.sp()?;
        }
        self.items_written += 1;
        Ok(())
    }
}

impl FetchWriter for BufferedFetchWriter {
    fn begin(&mut self, seq: u32) -> SessionResult<()> {
        self.enc.star().map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(seq as u64).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.atom("FETCH").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.begin_list().map_err(io_err)?;
        self.items_written = 0;
        Ok(())
    }

    fn flags(&mut self, flags: &[Flag]) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("FLAGS").map_err(io_err)?.sp().map_err(io_err)?;
        write_flag_list(&mut self.enc, flags).map_err(io_err)?;
        Ok(())
    }

    fn uid(&mut self, uid: u32) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("UID").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(uid as u64).map_err(io_err)?;
        Ok(())
    }

    fn rfc822_size(&mut self, size: u32) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("RFC822.SIZE").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(size as u64).map_err(io_err)?;
        Ok(())
    }

    fn internal_date(&mut self, date: &str) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("INTERNALDATE").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.quoted_string(date.as_bytes()).map_err(io_err)?;
        Ok(())
    }

    fn mod_seq(&mut self, modseq: u64) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("MODSEQ").map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.begin_list().map_err(io_err)?;
        self.enc.number(modseq).map_err(io_err)?;
        self.enc.end_list().map_err(io_err)?;
        Ok(())
    }

    fn envelope(&mut self, envelope: &Envelope) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("ENVELOPE").map_err(io_err)?.sp().map_err(io_err)?;
        write_envelope(&mut self.enc, envelope).map_err(io_err)?;
        Ok(())
    }

    fn body_structure(&mut self, structure: &BodyStructure) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom("BODYSTRUCTURE").map_err(io_err)?.sp().map_err(io_err)?;
        write_body_structure(&mut self.enc, structure).map_err(io_err)?;
        Ok(())
    }

    fn body(&mut self, section: &str, data: &[u8]) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom(&format!("BODY[{section}]")).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.string(data).map_err(io_err)?;
        Ok(())
    }

    fn binary(&mut self, part: &str, data: &[u8]) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom(&format!("BINARY[{part}]")).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.binary_literal(data).map_err(io_err)?;
        Ok(())
    }

    fn binary_size(&mut self, part: &str, size: u32) -> SessionResult<()> {
        self.item_sep().map_err(io_err)?;
        self.enc.atom(&format!("BINARY.SIZE[{part}]")).map_err(io_err)?.sp().map_err(io_err)?;
        self.enc.number(size as u64).map_err(io_err)?;
        Ok(())
    }

    fn end(&mut self) -> SessionResult<()> {
        self.enc.end_list().map_err(io_err)?.crlf().map_err(io_err)?;
        Ok(())
    }
}

fn write_address(enc: &mut Encoder<Vec<u8>>, addr: &imap_types::envelope::Address) -> std::io::Result<()> {
    enc.begin_list()?;
    enc.nstring(addr.name.as_deref().map(str::as_bytes))?.sp()?;
    enc.nstring(addr.adl.as_deref().map(str::as_bytes))?.sp()?;
    enc.nstring(addr.mailbox.as_deref().map(str::as_bytes))?.sp()?;
    enc.nstring(addr.host.as_deref().map(str::as_bytes))?;
    enc.end_list()?;
    Ok(())
}

fn write_address_list(enc: &mut Encoder<Vec<u8>>, addrs: &[imap_types::envelope::Address]) -> std::io::Result<()> {
    if addrs.is_empty() {
        enc.nstring(None)?;
        return Ok(());
    }
    enc.begin_list()?;
    for (i, a) in addrs.iter().enumerate() {
        if i > 0 {
            enc.sp()?;
        }
        write_address(enc, a)?;
    }
    enc.end_list()?;
    Ok(())
}

fn write_envelope(enc: &mut Encoder<Vec<u8>>, e: &Envelope) -> std::io::Result<()> {
    enc.begin_list()?;
    enc.nstring(e.date.as_deref().map(str::as_bytes))?.sp()?;
    enc.nstring(e.subject.as_deref().map(str::as_bytes))?.sp()?;
    write_address_list(enc, &e.from)?;
    enc.sp()?;
    write_address_list(enc, &e.sender)?;
    enc.sp()?;
    write_address_list(enc, &e.reply_to)?;
    enc.sp()?;
    write_address_list(enc, &e.to)?;
    enc.sp()?;
    write_address_list(enc, &e.cc)?;
    enc.sp()?;
    write_address_list(enc, &e.bcc)?;
    enc.sp()?;
    enc.nstring(e.in_reply_to.as_deref().map(str::as_bytes))?.sp()?;
    enc.nstring(e.message_id.as_deref().map(str::as_bytes))?;
    enc.end_list()?;
    Ok(())
}

fn write_body_structure(enc: &mut Encoder<Vec<u8>>, b: &BodyStructure) -> std::io::Result<()> {
    match b {
        BodyStructure::Multipart { parts, subtype } => {
            enc.begin_list()?;
            for part in parts {
                write_body_structure(enc, part)?;
            }
            enc.sp()?;
            enc.quoted_string(subtype.as_bytes())?;
            enc.end_list()?;
        }
        BodyStructure::Single {
            media_type,
            media_subtype,
            params,
            id,
            description,
            encoding,
            size_octets,
            size_lines,
        } => {
            enc.begin_list()?;
            enc.quoted_string(media_type.as_bytes())?.sp()?;
            enc.quoted_string(media_subtype.as_bytes())?.sp()?;
            if params.is_empty() {
                enc.nstring(None)?;
            } else {
                enc.begin_list()?;
                for (i, (k, v)) in params.iter().enumerate() {
                    if i > 0 {
                        enc.sp()?;
                    }
                    enc.quoted_string(k.as_bytes())?.sp()?;
                    enc.quoted_string(v.as_bytes())?;
                }
                enc.end_list()?;
            }
            enc.sp()?;
            enc.nstring(id.as_deref().map(str::as_bytes))?.sp()?;
            enc.nstring(description.as_deref().map(str::as_bytes))?.sp()?;
            enc.quoted_string(encoding.as_bytes())?.sp()?;
            enc.number(*size_octets as u64)?;
            if let Some(lines) = size_lines {
                enc.sp()?;
                enc.number(*lines as u64)?;
            }
            enc.end_list()?;
        }
    }
    Ok(())
}
