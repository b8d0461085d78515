/// One address in an `ENVELOPE` From/Sender/ReplyTo/To/Cc/Bcc list
/// (RFC 3501 §2.3.5).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub adl: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

/// `ENVELOPE` fetch item payload (RFC 3501 §7.4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// `BODYSTRUCTURE` fetch item payload (RFC 3501 §7.4.2). Recursive for
/// `multipart/*`; a backend supplies a flat `single` leaf for everything
/// else, including `message/rfc822` (whose nested envelope/body is out
/// of scope per spec.md's Non-goals on message parsing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    Multipart {
        parts: Vec<BodyStructure>,
        subtype: String,
    },
    Single {
        media_type: String,
        media_subtype: String,
        params: Vec<(String, String)>,
        id: Option<String>,
        description: Option<String>,
        encoding: String,
        size_octets: u32,
        size_lines: Option<u32>,
    },
}
