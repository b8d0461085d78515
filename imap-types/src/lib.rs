//! Shared data model for the IMAP4rev1/IMAP4rev2 protocol engine:
//! capabilities, flags, sequence/UID sets, search and fetch options,
//! envelopes and the numeric SELECT state. Independent of the wire
//! encoding (`imap-wire`) and of any particular transport.

pub mod capability;
pub mod command_kind;
pub mod envelope;
pub mod fetch;
pub mod flag;
pub mod mailbox;
pub mod mailbox_ops;
pub mod numset;
pub mod search;
pub mod select;
pub mod status;
pub mod tag;

pub use capability::{Capability, EnabledCapabilities, ServerCapability};
pub use command_kind::NumKind;
pub use envelope::{Address, BodyStructure, Envelope};
pub use fetch::{FetchItem, FetchMacro, FetchOptions, Partial, PartPath, Section, SectionSpec};
pub use flag::{Flag, StoreAction, StoreFlags, StoreOptions};
pub use mailbox::MailboxName;
pub use mailbox_ops::{CopyUid, StatusItem, StatusResult};
pub use numset::{NumSetError, SeqSet, UidSet};
pub use search::{PartialRange, SearchCriteria, SearchData, SearchOptions};
pub use select::SelectData;
pub use status::{ResponseCode, StatusKind, StatusResponse};
pub use tag::{Tag, TagError};
