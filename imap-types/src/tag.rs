use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tag: {0:?}")]
pub struct TagError(String);

/// A short opaque ASCII token associating a command with its tagged
/// completion response. Unique within a connection's outstanding
/// commands (RFC 3501 §2.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn new(s: impl Into<String>) -> Result<Self, TagError> {
        let s = s.into();
        if s.is_empty() || s.bytes().any(|b| b == b' ' || b == b'+' || b == b'{' || b.is_ascii_control()) {
            return Err(TagError(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
