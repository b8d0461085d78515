use std::fmt;

/// A message flag: one of the six system flags (prefixed with `\`) or an
/// arbitrary user keyword. System flags compare case-insensitively;
/// keywords compare byte-exact (RFC 3501 §2.3.2).
#[derive(Debug, Clone, Eq)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Keyword(String),
    /// A system-style flag (leading `\`) the core doesn't special-case,
    /// e.g. `\*` (Permanent) appearing in a PERMANENTFLAGS list.
    Extension(String),
}

impl Flag {
    pub fn is_system(&self) -> bool {
        !matches!(self, Flag::Keyword(_))
    }

    fn canonical(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".into(),
            Flag::Answered => "\\Answered".into(),
            Flag::Flagged => "\\Flagged".into(),
            Flag::Deleted => "\\Deleted".into(),
            Flag::Draft => "\\Draft".into(),
            Flag::Recent => "\\Recent".into(),
            Flag::Keyword(k) => k.clone(),
            Flag::Extension(e) => format!("\\{e}"),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Flag::Keyword(a), Flag::Keyword(b)) => a == b,
            (Flag::Keyword(_), _) | (_, Flag::Keyword(_)) => false,
            _ => self.canonical().eq_ignore_ascii_case(&other.canonical()),
        }
    }
}

impl std::hash::Hash for Flag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Flag::Keyword(k) => k.hash(state),
            _ => self.canonical().to_ascii_uppercase().hash(state),
        }
    }
}

impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix('\\') {
            match rest.to_ascii_lowercase().as_str() {
                "seen" => Flag::Seen,
                "answered" => Flag::Answered,
                "flagged" => Flag::Flagged,
                "deleted" => Flag::Deleted,
                "draft" => Flag::Draft,
                "recent" => Flag::Recent,
                _ => Flag::Extension(rest.to_string()),
            }
        } else {
            Flag::Keyword(s.to_string())
        }
    }
}

/// The action half of STORE (RFC 3501 §6.4.6): replace, add (`+FLAGS`) or
/// remove (`-FLAGS`) the given flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Set,
    Add,
    Del,
}

#[derive(Debug, Clone)]
pub struct StoreFlags {
    pub action: StoreAction,
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub silent: bool,
    pub unchanged_since: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flags_compare_case_insensitively() {
        assert_eq!(Flag::from("\\Seen"), Flag::from("\\SEEN"));
        assert_eq!(Flag::Seen, Flag::from("\\seen"));
    }

    #[test]
    fn keywords_compare_case_sensitively() {
        assert_ne!(Flag::from("Junk"), Flag::from("junk"));
        assert_eq!(Flag::from("Junk"), Flag::from("Junk"));
    }
}
