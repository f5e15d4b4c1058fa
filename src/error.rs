use crate::id::{PageNum, Rid};
use crate::schema::AttrType;
use std::path::PathBuf;

/// Coarse classification of a failure, stable across the concrete variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    NotFound,
    AlreadyExists,
    InvalidState,
    Protected,
    InvalidArgument,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file {0:?} already exists")]
    FileExists(PathBuf),
    #[error("file {0:?} does not exist")]
    FileNotFound(PathBuf),
    #[error("handle is already bound to {0:?}")]
    HandleInUse(PathBuf),
    #[error("handle is not bound to a file")]
    HandleNotOpen,
    #[error("page {page} is out of range, file has {count} pages")]
    PageOutOfRange { page: PageNum, count: PageNum },
    #[error("page {0} is not a valid index page")]
    CorruptPage(PageNum),

    #[error("slot {slot} is out of range on page {page}, page has {count} slots")]
    SlotOutOfRange { page: PageNum, slot: u32, count: u32 },
    #[error("record {0} does not exist")]
    RecordNotFound(Rid),
    #[error("record {0} forwards to a slot that is not live data")]
    BrokenForward(Rid),
    #[error("record of {0} bytes can never fit in a page")]
    RecordTooLarge(usize),
    #[error("malformed data: {0}")]
    Malformed(&'static str),

    #[error("attribute {0:?} does not exist")]
    AttributeNotFound(String),
    #[error("attribute {0:?} is null")]
    NullAttribute(String),
    #[error("attribute {attr:?} expects a value of type {expected:?}")]
    TypeMismatch { attr: String, expected: AttrType },

    #[error("key of {0} bytes is too large for an index page")]
    KeyTooLarge(usize),
    #[error("index entry {key} {rid} does not exist")]
    EntryNotFound { key: String, rid: Rid },

    #[error("table {0:?} does not exist")]
    TableNotFound(String),
    #[error("table {0:?} already exists")]
    TableExists(String),
    #[error("index on {table}.{attr} does not exist")]
    IndexNotFound { table: String, attr: String },
    #[error("index on {table}.{attr} already exists")]
    IndexExists { table: String, attr: String },
    #[error("table {0:?} is a system table")]
    SystemTable(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HandleNotOpen | Self::PageOutOfRange { .. } => ErrorKind::Io,
            Self::FileNotFound(_)
            | Self::SlotOutOfRange { .. }
            | Self::RecordNotFound(_)
            | Self::AttributeNotFound(_)
            | Self::NullAttribute(_)
            | Self::EntryNotFound { .. }
            | Self::TableNotFound(_)
            | Self::IndexNotFound { .. } => ErrorKind::NotFound,
            Self::FileExists(_) | Self::TableExists(_) | Self::IndexExists { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::HandleInUse(_) | Self::CorruptPage(_) | Self::BrokenForward(_) => {
                ErrorKind::InvalidState
            }
            Self::SystemTable(_) => ErrorKind::Protected,
            Self::RecordTooLarge(_)
            | Self::Malformed(_)
            | Self::TypeMismatch { .. }
            | Self::KeyTooLarge(_)
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Classifies an error produced by this crate. Raw I/O errors count as [`ErrorKind::Io`].
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    if let Some(err) = err.downcast_ref::<StorageError>() {
        return Some(err.kind());
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return Some(ErrorKind::Io);
    }
    None
}
