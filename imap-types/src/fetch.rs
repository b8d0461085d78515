/// A MIME body part path, e.g. `1.2.3`, used by `BODY[part]`,
/// `BINARY[part]`, `BINARY.SIZE[part]` (RFC 3501 §6.4.5, RFC 3516).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartPath(pub Vec<u32>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionSpec {
    /// The entire part, or the entire message when `part` is empty.
    Full,
    Header,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
    Text,
    Mime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub part: PartPath,
    pub spec: SectionSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partial {
    pub start: u32,
    pub octets: u32,
}

/// One requested FETCH data item (spec.md §4.5 "FETCH argument grammar").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Flags,
    Uid,
    Rfc822Size,
    InternalDate,
    Envelope,
    BodyStructure,
    ModSeq,
    EmailId,
    ThreadId,
    SaveDate,
    Preview { lazy: bool },
    Body { section: Option<Section>, partial: Option<Partial>, peek: bool },
    Binary { part: PartPath, partial: Option<Partial>, peek: bool },
    BinarySize { part: PartPath },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMacro {
    All,
    Fast,
    Full,
}

impl FetchMacro {
    pub fn expand(self) -> Vec<FetchItem> {
        match self {
            FetchMacro::All => vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
            ],
            FetchMacro::Fast => vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size],
            FetchMacro::Full => vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
                FetchItem::BodyStructure,
            ],
        }
    }
}

/// The fully resolved FETCH request: items plus the `CHANGEDSINCE`/
/// `VANISHED` modifiers (spec.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub items: Vec<FetchItem>,
    pub changed_since: Option<u64>,
    pub vanished: bool,
}

impl FetchOptions {
    pub fn new(mut items: Vec<FetchItem>, changed_since: Option<u64>, vanished: bool) -> Self {
        // CHANGEDSINCE implies MODSEQ is reported even if not explicitly
        // requested (spec.md §4.5).
        if changed_since.is_some() && !items.contains(&FetchItem::ModSeq) {
            items.push(FetchItem::ModSeq);
        }
        Self {
            items,
            changed_since,
            vanished,
        }
    }

    pub fn wants_modseq(&self) -> bool {
        self.changed_since.is_some() || self.items.contains(&FetchItem::ModSeq)
    }
}
