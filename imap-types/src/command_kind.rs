/// Distinguishes a plain command variant from its `UID`-prefixed sibling
/// (`UID FETCH`, `UID STORE`, `UID COPY`, `UID SEARCH`, `UID EXPUNGE`,
/// `UID MOVE`). Handlers branch on this to decide whether a `NumSet`
/// argument is matched against sequence numbers or UIDs, and whether
/// responses must echo UIDs (spec.md §3 "NumKind").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Seq,
    Uid,
}

impl NumKind {
    pub fn is_uid(self) -> bool {
        matches!(self, NumKind::Uid)
    }
}
