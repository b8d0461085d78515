use std::collections::HashSet;
use std::fmt;

/// An IMAP capability atom, compared case-insensitively everywhere it is
/// used (RFC 3501 §2.2.2, RFC 9051 §2.2.2).
#[derive(Debug, Clone, Eq)]
pub enum Capability {
    Imap4Rev1,
    Imap4Rev2,
    StartTls,
    LoginDisabled,
    Idle,
    Enable,
    Move,
    Unselect,
    CondStore,
    QResync,
    Namespace,
    Id,
    LiteralPlus,
    LiteralMinus,
    Binary,
    Sort,
    Thread(String),
    Esearch,
    ContextSearch,
    SearchRes,
    Partial,
    SearchFuzzy,
    Utf8Accept,
    SaslIr,
    Auth(String),
    /// Any capability atom the core enum doesn't know about, preserved
    /// verbatim so extensions can mint their own tokens.
    Other(String),
}

impl Capability {
    fn canonical(&self) -> String {
        match self {
            Capability::Imap4Rev1 => "IMAP4rev1".into(),
            Capability::Imap4Rev2 => "IMAP4rev2".into(),
            Capability::StartTls => "STARTTLS".into(),
            Capability::LoginDisabled => "LOGINDISABLED".into(),
            Capability::Idle => "IDLE".into(),
            Capability::Enable => "ENABLE".into(),
            Capability::Move => "MOVE".into(),
            Capability::Unselect => "UNSELECT".into(),
            Capability::CondStore => "CONDSTORE".into(),
            Capability::QResync => "QRESYNC".into(),
            Capability::Namespace => "NAMESPACE".into(),
            Capability::Id => "ID".into(),
            Capability::LiteralPlus => "LITERAL+".into(),
            Capability::LiteralMinus => "LITERAL-".into(),
            Capability::Binary => "BINARY".into(),
            Capability::Sort => "SORT".into(),
            Capability::Thread(alg) => format!("THREAD={alg}"),
            Capability::Esearch => "ESEARCH".into(),
            Capability::ContextSearch => "CONTEXT=SEARCH".into(),
            Capability::SearchRes => "SEARCHRES".into(),
            Capability::Partial => "PARTIAL".into(),
            Capability::SearchFuzzy => "SEARCH=FUZZY".into(),
            Capability::Utf8Accept => "UTF8=ACCEPT".into(),
            Capability::SaslIr => "SASL-IR".into(),
            Capability::Auth(mech) => format!("AUTH={mech}"),
            Capability::Other(atom) => atom.clone(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.canonical().eq_ignore_ascii_case(&other.canonical())
    }
}

impl std::hash::Hash for Capability {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().to_ascii_uppercase().hash(state)
    }
}

impl From<&str> for Capability {
    fn from(atom: &str) -> Self {
        match atom.to_ascii_uppercase().as_str() {
            "IMAP4REV1" => Capability::Imap4Rev1,
            "IMAP4REV2" => Capability::Imap4Rev2,
            "STARTTLS" => Capability::StartTls,
            "LOGINDISABLED" => Capability::LoginDisabled,
            "IDLE" => Capability::Idle,
            "ENABLE" => Capability::Enable,
            "MOVE" => Capability::Move,
            "UNSELECT" => Capability::Unselect,
            "CONDSTORE" => Capability::CondStore,
            "QRESYNC" => Capability::QResync,
            "NAMESPACE" => Capability::Namespace,
            "ID" => Capability::Id,
            "LITERAL+" => Capability::LiteralPlus,
            "LITERAL-" => Capability::LiteralMinus,
            "BINARY" => Capability::Binary,
            "SORT" => Capability::Sort,
            "ESEARCH" => Capability::Esearch,
            "CONTEXT=SEARCH" => Capability::ContextSearch,
            "SEARCHRES" => Capability::SearchRes,
            "PARTIAL" => Capability::Partial,
            "SEARCH=FUZZY" => Capability::SearchFuzzy,
            "UTF8=ACCEPT" => Capability::Utf8Accept,
            "SASL-IR" => Capability::SaslIr,
            other if other.starts_with("THREAD=") => {
                Capability::Thread(atom["THREAD=".len()..].to_string())
            }
            other if other.starts_with("AUTH=") => {
                Capability::Auth(atom["AUTH=".len()..].to_string())
            }
            _ => Capability::Other(atom.to_string()),
        }
    }
}

/// The server's base capability set plus dynamically computed ones
/// (STARTTLS, LOGINDISABLED). See spec.md §4.3.
#[derive(Debug, Clone)]
pub struct ServerCapability(HashSet<Capability>);

impl Default for ServerCapability {
    fn default() -> Self {
        Self(HashSet::from([
            Capability::Imap4Rev2,
            Capability::Imap4Rev1,
            Capability::Enable,
            Capability::Idle,
            Capability::Move,
            Capability::Unselect,
            Capability::LiteralPlus,
            Capability::CondStore,
            Capability::Namespace,
            Capability::Id,
        ]))
    }
}

impl ServerCapability {
    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    pub fn support(&self, cap: &Capability) -> bool {
        self.0.contains(cap)
    }

    /// Computed set for the current connection: base caps plus STARTTLS
    /// (when TLS isn't active and the server allows it) and LOGINDISABLED
    /// (when plaintext LOGIN is forbidden). See spec.md §4.3.
    pub fn advertised(&self, tls_active: bool, allow_starttls: bool, login_disabled: bool) -> Vec<Capability> {
        let mut out: Vec<Capability> = self.0.iter().cloned().collect();
        if !tls_active && allow_starttls {
            out.push(Capability::StartTls);
        }
        if login_disabled && !tls_active {
            out.push(Capability::LoginDisabled);
        }
        out.sort_by_key(|c| c.canonical());
        out
    }
}

/// Per-connection set of capabilities enabled via `ENABLE` (RFC 5161).
/// Only a fixed, extension-declared subset of capabilities requires
/// opt-in; everything else is always-on once advertised.
#[derive(Debug, Clone, Default)]
pub struct EnabledCapabilities(HashSet<Capability>);

impl EnabledCapabilities {
    pub fn enable(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn is_enabled(&self, cap: &Capability) -> bool {
        self.0.contains(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_equality_is_case_insensitive() {
        assert_eq!(Capability::from("idle"), Capability::from("IDLE"));
        assert_eq!(Capability::Idle, Capability::from("Idle"));
    }

    #[test]
    fn advertised_adds_starttls_and_logindisabled() {
        let caps = ServerCapability::default();
        let adv = caps.advertised(false, true, true);
        assert!(adv.contains(&Capability::StartTls));
        assert!(adv.contains(&Capability::LoginDisabled));

        let adv_tls = caps.advertised(true, true, true);
        assert!(!adv_tls.contains(&Capability::StartTls));
        assert!(!adv_tls.contains(&Capability::LoginDisabled));
    }
}
