//! Byte-exact IMAP4rev1/IMAP4rev2 lexical grammar: atoms, quoted strings,
//! literals (synchronizing, non-synchronizing and binary), parenthesized
//! lists, NIL, numbers and modified-UTF-7 mailbox names (RFC 3501 §4,
//! RFC 9051 §4, RFC 3501 §5.1.3).
//!
//! The crate is split the way spec.md §9's design notes ask: a
//! `Decoder` that parses the already-buffered "argument tail" of a
//! command line, and a separate [`literal::read_literal_body`] that
//! streams a literal's bytes straight off the connection once its
//! `{N}` header has been read and (for synchronizing literals)
//! acknowledged with a continuation request.

pub mod decode;
pub mod encode;
pub mod error;
pub mod literal;
pub mod mutf7;

pub use decode::Decoder;
pub use encode::Encoder;
pub use error::{DecodeError, DecodeResult};

/// Bytes that terminate an atom wherever they appear (RFC 3501 §9
/// `atom-specials`, plus `CTL` per `ATOM-CHAR`). `[` is additionally
/// treated as a terminator even though RFC 3501's formal `atom-specials`
/// doesn't list it: `FETCH`'s `section` production (`BODY[...]`,
/// `BINARY[...]`) relies on the bracket starting a distinct token right
/// after a keyword atom with no intervening space, which a pure
/// `ATOM-CHAR` reading wouldn't stop for.
pub(crate) fn is_atom_special(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'{' | b' ' | b'%' | b'*' | b'"' | b'\\' | b']' | b'[')
        || b < 0x20
        || b == 0x7f
}

pub(crate) fn is_atom_char(b: u8) -> bool {
    !is_atom_special(b)
}
