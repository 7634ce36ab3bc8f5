//! Error handling
//!
//! Typed errors for storage, crypto, remote and migration operations, with
//! descriptive messages and recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::DocumentId;

/// Errors that can occur in memento operations
#[derive(Error, Debug)]
pub enum MementoError {
    /// Document does not exist in the local store
    #[error("Memento {id} not found")]
    NotFound { id: DocumentId },

    /// Snapshot slot is missing on disk
    #[error("Snapshot slot {index} of memento {id} not found")]
    SlotNotFound { id: DocumentId, index: usize },

    /// Wrong passphrase or tampered ciphertext (AEAD tag mismatch)
    #[error("Authentication failed: wrong passphrase or tampered data")]
    AuthenticationFailure,

    /// Content too large before or after compression
    #[error("{stage} size {size} bytes exceeds the limit of {limit} bytes")]
    SizeLimitExceeded {
        stage: &'static str,
        size: usize,
        limit: usize,
    },

    /// Remote backend unreachable or timed out
    #[error("Remote backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Remote record exists but its fields cannot be decoded
    #[error("Malformed remote record: {0}")]
    RemoteRecord(String),

    /// Uploaded content could not be read back and verified
    #[error("Migration of memento {id} could not be verified: {details}")]
    MigrationVerificationFailure { id: DocumentId, details: String },

    /// Control file unreadable or invalid
    #[error("Control file '{path}' is corrupt: {details}")]
    CorruptMetadata { path: PathBuf, details: String },

    /// Encrypted document has not been unlocked in this session
    #[error("Memento {id} is encrypted. Unlock it with its passphrase first.")]
    Locked { id: DocumentId },

    /// Encryption was requested for a document that already has it
    #[error("Encryption is already enabled for memento {id}")]
    EncryptionAlreadyEnabled { id: DocumentId },

    /// Key material requested for a plaintext document
    #[error("Encryption is not enabled for memento {id}")]
    EncryptionNotEnabled { id: DocumentId },

    /// Import requested with an encoding we cannot decode
    #[error("Unsupported text encoding '{0}'")]
    UnsupportedEncoding(String),

    /// Imported bytes are not valid in the detected encoding
    #[error("Invalid {encoding} text: {details}")]
    InvalidText { encoding: String, details: String },

    /// Cipher or key handling failed for a reason other than authentication
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Atomic write failed during rename
    #[error("Atomic write failed: could not rename '{from}' to '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Key file or other JSON payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MementoError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => MementoError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => MementoError::DiskFull {
                path,
                source: error,
            },
            _ => MementoError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Classify an I/O error that happened while reading
    pub fn from_read(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => MementoError::PermissionDenied {
                path,
                source: error,
            },
            _ => MementoError::ReadError {
                path,
                source: error,
            },
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MementoError::DiskFull { .. }
                | MementoError::PermissionDenied { .. }
                | MementoError::AuthenticationFailure
                | MementoError::BackendUnavailable(_)
                | MementoError::MigrationVerificationFailure { .. }
                | MementoError::Locked { .. }
        )
    }

    /// Check if this error means the passphrase was wrong (or data tampered)
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, MementoError::AuthenticationFailure)
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            MementoError::DiskFull { .. } => Some("Free up disk space and try again."),
            MementoError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            MementoError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            MementoError::AuthenticationFailure => {
                Some("Check the passphrase and try again. Lost passphrases cannot be recovered.")
            }
            MementoError::BackendUnavailable(_) => {
                Some("Working in local-only mode. Remote storage will be retried later.")
            }
            MementoError::MigrationVerificationFailure { .. } => {
                Some("The local copy was left untouched. Run the migration again later.")
            }
            MementoError::CorruptMetadata { .. } => {
                Some("Inspect or restore control.json from a backup. Snapshot files were not modified.")
            }
            MementoError::Locked { .. } => Some("Unlock the memento with its passphrase."),
            MementoError::SizeLimitExceeded { .. } => {
                Some("Split the content into smaller mementos.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for memento operations
pub type MementoResult<T> = Result<T, MementoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = MementoError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, MementoError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_read_error_classification() {
        let io_err = io::Error::new(io::ErrorKind::InvalidData, "bad bytes");
        let err = MementoError::from_read(io_err, PathBuf::from("/data/0/3.txt"));

        assert!(matches!(err, MementoError::ReadError { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = MementoError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, MementoError::DiskFull { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_authentication_failure_is_distinct_from_io() {
        let err = MementoError::AuthenticationFailure;
        assert!(err.is_authentication_failure());
        assert!(err.to_string().contains("wrong passphrase"));

        let io_err = MementoError::from_io(
            io::Error::new(io::ErrorKind::Other, "boom"),
            PathBuf::from("/x"),
        );
        assert!(!io_err.is_authentication_failure());
    }

    #[test]
    fn test_corrupt_metadata_display() {
        let err = MementoError::CorruptMetadata {
            path: PathBuf::from("/data/4/control.json"),
            details: "expected value at line 1".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("corrupt"));
        assert!(msg.contains("control.json"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_size_limit_display() {
        let err = MementoError::SizeLimitExceeded {
            stage: "Plaintext",
            size: 42,
            limit: 40,
        };
        assert_eq!(
            err.to_string(),
            "Plaintext size 42 bytes exceeds the limit of 40 bytes"
        );
    }
}
