// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

/// Errors raised by the storage layer.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Failure reported by the object store client.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Local filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded object is not a readable zip archive.
    #[error("Zip error in {key}: {source}")]
    Zip {
        key: String,
        #[source]
        source: zip::result::ZipError,
    },

    /// An archive entry would be written outside the target directory.
    #[error("Archive {key} contains unsafe entry {entry}")]
    UnsafeEntry { key: String, entry: String },

    /// Bad storage configuration (endpoint, signature version, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking worker panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The retry budget ran out on a retryable error.
    #[error("S3 - Max attempts ({attempts}) reached for {operation}: {source}")]
    AttemptsExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Only connection-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::ObjectStore(err) => !matches!(
                err,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::Precondition { .. }
                    | object_store::Error::NotModified { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::UnknownConfigurationKey { .. }
            ),
            _ => false,
        }
    }

    /// True when the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            StorageError::AttemptsExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let generic = StorageError::ObjectStore(object_store::Error::Generic {
            store: "S3",
            source: "connection reset by peer".into(),
        });
        assert!(generic.is_retryable());

        let missing = StorageError::ObjectStore(object_store::Error::NotFound {
            path: "models/mnist.mpk".to_string(),
            source: "no such key".into(),
        });
        assert!(!missing.is_retryable());
        assert!(missing.is_not_found());

        let local = StorageError::io("/tmp/x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(!local.is_retryable());
        assert!(!local.is_not_found());
    }
}
