use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    Eof,
    #[error("expected byte {expected:?}, found {found:?}")]
    UnexpectedByte { expected: u8, found: u8 },
    #[error("empty atom")]
    EmptyAtom,
    #[error("invalid escape in quoted string")]
    InvalidEscape,
    #[error("unterminated quoted string")]
    UnterminatedQuotedString,
    #[error("invalid literal header")]
    InvalidLiteral,
    #[error("number out of range")]
    NumberOutOfRange,
    #[error("expected NIL or a string, found {0:?}")]
    ExpectedNString(String),
    #[error("malformed list")]
    MalformedList,
    #[error("trailing bytes after token")]
    TrailingBytes,
}

pub type DecodeResult<T> = Result<T, DecodeError>;
