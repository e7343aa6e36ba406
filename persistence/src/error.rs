//! Error types for persistence operations

use crate::ejson::CodecError;
use crate::migration::MigrationError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON text could not be parsed or produced
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tagged value graph could not be mapped onto a Rust type
    #[error("value codec error: {0}")]
    Codec(#[from] CodecError),

    /// Fragment token is not valid base64url
    #[error("invalid share token: {0}")]
    InvalidToken(String),

    /// Decoded payload matches none of the known session shapes
    #[error("unrecognized session payload: {0}")]
    UnrecognizedPayload(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Legacy snapshot could not be rebuilt in the current schema
    #[error("snapshot migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// Invalid magic bytes in a collection file header
    #[error("Invalid file format: expected ICVS magic bytes")]
    InvalidMagic,

    /// Unsupported format version
    #[error("Unsupported format version: {0} (expected {1})")]
    UnsupportedVersion(u16, u16),

    /// Corrupt store data
    #[error("Corrupt store data: {0}")]
    CorruptData(String),

    /// A store generation step could not be committed
    #[error("store upgrade to generation {generation} failed: {reason}")]
    UpgradeFailed { generation: u32, reason: String },

    /// The local store could not be opened for this session
    #[error("local saves are unavailable: {0}")]
    StoreUnavailable(String),

    /// The operation needs a loaded session
    #[error("no session is loaded")]
    NoSession,

    /// No saved session under that name
    #[error("no local save named {0:?}")]
    SaveNotFound(String),

    /// The VM collaborator rejected an operation
    #[error("VM error: {0}")]
    Vm(String),

    /// A background task was cancelled or panicked
    #[error("background task failed: {0}")]
    Task(String),
}

/// Coarse classification used when reporting failures to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Compression,
    Migration,
    Store,
    Vm,
}

impl PersistenceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Json(_)
            | Self::Codec(_)
            | Self::InvalidToken(_)
            | Self::UnrecognizedPayload(_) => ErrorKind::Decode,
            Self::Compression(_) => ErrorKind::Compression,
            Self::Migration(_) => ErrorKind::Migration,
            Self::Vm(_) => ErrorKind::Vm,
            Self::Io(_)
            | Self::InvalidMagic
            | Self::UnsupportedVersion(..)
            | Self::CorruptData(_)
            | Self::UpgradeFailed { .. }
            | Self::StoreUnavailable(_)
            | Self::NoSession
            | Self::SaveNotFound(_)
            | Self::Task(_) => ErrorKind::Store,
        }
    }
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
