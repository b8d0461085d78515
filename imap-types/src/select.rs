use crate::flag::Flag;
use crate::numset::UidSet;

/// Numeric mailbox state returned by SELECT/EXAMINE (spec.md §3
/// "SelectData").
#[derive(Debug, Clone)]
pub struct SelectData {
    pub messages: u32,
    pub recent: u32,
    pub uid_validity: u32,
    pub uid_next: u32,
    pub first_unseen: Option<u32>,
    pub read_only: bool,
    pub permanent_flags: Vec<Flag>,
    pub applied_flags: Vec<Flag>,
    pub highest_mod_seq: Option<u64>,
    /// `VANISHED (EARLIER)` when the client supplied QRESYNC parameters
    /// and some of the UIDs it knew about are gone.
    pub vanished_earlier: Option<UidSet>,
}
