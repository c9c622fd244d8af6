use miette::Diagnostic;
use thiserror::Error;

/// Fatal variants (`StorageOpen`, `ArchiveFormat`, `KeyList`) abort a whole
/// run; the rest are recorded against a single item and the run continues.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum TarKvError {
    #[error("failed to open store: {0}")]
    StorageOpen(String),

    #[error("store write failed: {0}")]
    StorageWrite(String),

    #[error("store read failed: {0}")]
    StorageRead(String),

    #[error("unrecognized archive format: {0}")]
    ArchiveFormat(String),

    #[error("archive member missing: {0}")]
    MemberMissing(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("failed to read key list: {0}")]
    KeyList(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
