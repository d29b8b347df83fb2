use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::models::EntryKind;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Why a relative path was rejected
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Error)]
pub enum PathError {
    #[error("the path is empty")]
    Empty,

    #[error("the path does not contain a file name")]
    DoesNotContainFileName,

    #[error("the path contains consecutive separators")]
    ConsecutiveSeparator,

    #[error("the path contains a '.' or '..' segment")]
    DotSegment,
}

/// Flat classification of a [`StorageError`], as reported to hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    UnsupportedIdentity,
    Unsupported,
    InvalidPath,
    CreateFailed,
    DeleteFailed,
    TypeMismatch,
    DirectoryNotEmpty,
    MissingTreeContext,
    Provider,
    Io,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no entry found for {uri}")]
    NotFound { uri: String },

    #[error("no storage controller handles {uri}")]
    UnsupportedIdentity { uri: String },

    #[error("{operation} is not supported for {uri}")]
    Unsupported { operation: &'static str, uri: String },

    #[error("invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: PathError },

    #[error("failed to create {name:?} in {dir}")]
    CreateFailed {
        dir: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete {uri}")]
    DeleteFailed {
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{uri} is a {actual}, expected a {expected}")]
    TypeMismatch {
        uri: String,
        expected: EntryKind,
        actual: EntryKind,
    },

    #[error("directory {uri} is not empty")]
    DirectoryNotEmpty { uri: String },

    #[error("{uri} has no owning tree")]
    MissingTreeContext { uri: String },

    #[error("{operation} failed for {uri}")]
    Provider {
        operation: &'static str,
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("i/o error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::UnsupportedIdentity { .. } => ErrorKind::UnsupportedIdentity,
            StorageError::Unsupported { .. } => ErrorKind::Unsupported,
            StorageError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StorageError::CreateFailed { .. } => ErrorKind::CreateFailed,
            StorageError::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            StorageError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            StorageError::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            StorageError::MissingTreeContext { .. } => ErrorKind::MissingTreeContext,
            StorageError::Provider { .. } => ErrorKind::Provider,
            StorageError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Message including the chain of causes, e.g. `failed to delete x: no rows matched`
    pub fn message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }

    pub(crate) fn provider(
        operation: &'static str,
        uri: &str,
    ) -> impl FnOnce(anyhow::Error) -> StorageError {
        let uri = uri.to_string();
        move |source| StorageError::Provider {
            operation,
            uri,
            source,
        }
    }

    pub(crate) fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> StorageError {
        let path = path.display().to_string();
        move |source| StorageError::Io { path, source }
    }
}

impl Serialize for StorageError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("StorageError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.message())?;
        state.end()
    }
}
