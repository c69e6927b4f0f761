//! Error types for the reading list sync engine.

use crate::{EntryId, ListId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a local store adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("list not found: {0}")]
    ListNotFound(ListId),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures talking to the remote reading list service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Network is down, the request timed out or the service is unreachable.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// Reading list sync has not been provisioned for this account.
    #[error("reading list sync is not set up for this account")]
    NotSetUp,

    /// The service answered with an error payload.
    #[error("remote rejected request ({status}): {code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The response body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether the failure means the remote could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::Unavailable(_))
    }

    /// Machine readable code of a rejection, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Errors returned by the public reading list APIs.
#[derive(Debug, Error)]
pub enum ReadingListError {
    #[error("a reading list already exists with the name {0}")]
    ListNameConflict(String),

    #[error("a reading list with the name {0} was not found")]
    ListNotFound(String),

    #[error("unable to create reading list")]
    CreateFailed,

    #[error("unable to delete reading list")]
    DeleteFailed,

    #[error("unable to update reading list")]
    UpdateFailed,

    #[error("unable to add entry to reading list")]
    AddEntryFailed,

    #[error("unable to remove entry from reading list")]
    RemoveEntryFailed,

    #[error("an unexpected error occurred while updating reading lists")]
    GenericSyncError,

    #[error("reading list service unavailable")]
    RemoteUnavailable,

    #[error("malformed remote record: {0}")]
    MalformedRemoteRecord(String),

    #[error("reading list sync is not set up on the server")]
    ServerSetupRequired,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ReadingListError {
    /// The payload-free category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadingListError::ListNameConflict(name) => ErrorKind::ListNameConflict(name.clone()),
            ReadingListError::ListNotFound(name) => ErrorKind::ListNotFound(name.clone()),
            ReadingListError::CreateFailed => ErrorKind::CreateFailed,
            ReadingListError::DeleteFailed => ErrorKind::DeleteFailed,
            ReadingListError::UpdateFailed => ErrorKind::UpdateFailed,
            ReadingListError::AddEntryFailed => ErrorKind::AddEntryFailed,
            ReadingListError::RemoveEntryFailed => ErrorKind::RemoveEntryFailed,
            ReadingListError::GenericSyncError | ReadingListError::Storage(_) => {
                ErrorKind::GenericSyncError
            }
            ReadingListError::RemoteUnavailable => ErrorKind::RemoteUnavailable,
            ReadingListError::MalformedRemoteRecord(_) => ErrorKind::MalformedRemoteRecord,
            ReadingListError::ServerSetupRequired => ErrorKind::ServerSetupRequired,
        }
    }
}

impl From<ApiError> for ReadingListError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unavailable(_) => ReadingListError::RemoteUnavailable,
            ApiError::NotSetUp => ReadingListError::ServerSetupRequired,
            ApiError::InvalidResponse(message) => ReadingListError::MalformedRemoteRecord(message),
            ApiError::Rejected { .. } => ReadingListError::GenericSyncError,
        }
    }
}

/// Closed taxonomy of sync outcomes shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum ErrorKind {
    ListNameConflict(String),
    ListNotFound(String),
    CreateFailed,
    DeleteFailed,
    UpdateFailed,
    AddEntryFailed,
    RemoveEntryFailed,
    GenericSyncError,
    RemoteUnavailable,
    MalformedRemoteRecord,
    ServerSetupRequired,
}

/// Result type for store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for public reading list operations.
pub type Result<T> = std::result::Result<T, ReadingListError>;
