use std::fmt;

/// A mailbox name, decoded from the wire (modified UTF-7 or raw UTF-8,
/// see spec.md §4.1/§6). `INBOX` is special-cased case-insensitively per
/// RFC 3501 §5.1.
#[derive(Debug, Clone, Eq)]
pub enum MailboxName {
    Inbox,
    Other(String),
}

impl MailboxName {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("INBOX") {
            MailboxName::Inbox
        } else {
            MailboxName::Other(name)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MailboxName::Inbox => "INBOX",
            MailboxName::Other(s) => s,
        }
    }
}

impl PartialEq for MailboxName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MailboxName::Inbox, MailboxName::Inbox) => true,
            (MailboxName::Inbox, MailboxName::Other(s))
            | (MailboxName::Other(s), MailboxName::Inbox) => s.eq_ignore_ascii_case("INBOX"),
            (MailboxName::Other(a), MailboxName::Other(b)) => a == b,
        }
    }
}

impl fmt::Display for MailboxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_is_case_insensitive() {
        assert_eq!(MailboxName::new("inbox"), MailboxName::new("INBOX"));
        assert_eq!(MailboxName::new("Inbox"), MailboxName::Inbox);
    }

    #[test]
    fn other_names_are_exact() {
        assert_ne!(MailboxName::new("Archive"), MailboxName::new("archive"));
    }
}
