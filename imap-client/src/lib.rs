//! IMAP4rev1/IMAP4rev2 client-side response demultiplexer (C8): a
//! background reader loop that classifies each line a server sends —
//! continuation, untagged, tagged — and routes it to whichever part of
//! the client is waiting for it.
//!
//! This crate doesn't drive a socket or know how to *build* commands;
//! it owns exactly the three pieces of state a pipelining-capable IMAP
//! client needs on the read side (see [`demux::Demultiplexer`]):
//! pending tagged commands, the untagged response buffer, and the
//! single-slot continuation rendezvous.

mod demux;
mod error;

pub use demux::{Demultiplexer, MailboxState, TaggedResponse, Update};
pub use error::DemuxError;
