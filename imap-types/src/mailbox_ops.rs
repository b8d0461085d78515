use crate::numset::UidSet;

/// A `STATUS` data item name (RFC 3501 §6.3.10, RFC 9051 §6.3.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
    Deleted,
    Size,
    HighestModSeq,
    MailboxId,
}

/// The numeric answers a backend supplies for the items a `STATUS`
/// command requested; fields the client didn't ask about are left
/// `None` and the handler omits them from the emitted `* STATUS` line.
#[derive(Debug, Clone, Default)]
pub struct StatusResult {
    pub messages: Option<u32>,
    pub recent: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
    pub deleted: Option<u32>,
    pub size: Option<u64>,
    pub highest_mod_seq: Option<u64>,
    pub mailbox_id: Option<String>,
}

/// `COPYUID uidvalidity source-set dest-set` (RFC 4315). `source` and
/// `dest` are rendered in original-order alignment — see
/// [`crate::numset::NumSet::iter_in_order`].
#[derive(Debug, Clone)]
pub struct CopyUid {
    pub uid_validity: u32,
    pub source: UidSet,
    pub dest: UidSet,
}
