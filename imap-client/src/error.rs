use std::io;

use thiserror::Error;

/// Why the demultiplexer's reader loop stopped, or why a given pending
/// command/continuation could never be completed. Cloned (behind
/// `Arc`) into every pending command and continuation slot still open
/// at the moment of disconnect — spec.md §4.8's "fan out... with
/// `connection closed: <cause>`".
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed response line: {0}")]
    Decode(#[from] imap_wire::error::DecodeError),
    #[error("connection closed")]
    Closed,
}
