//! Error types for Passbox core.

use crate::types::RecordId;
use passbox_container::ContainerError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Passbox core operations.
///
/// Every variant is a distinct kind so the calling layer can branch on it:
/// lifecycle errors are recoverable at the interactive layer (re-prompt,
/// pick another path), data conflicts fail the affected merge, and
/// access-discipline errors are programming or clock errors that are never
/// retried internally.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two field tuples disagree at the same mtime. Never auto-resolved.
    #[error("conflicting versions of {domain}/{field_name} in record {record_id} at mtime {mtime}")]
    ConflictingVersion {
        /// Record containing the conflict.
        record_id: RecordId,
        /// Domain tag of the conflicting tuples.
        domain: &'static str,
        /// Field with two different values.
        field_name: String,
        /// The shared modification time.
        mtime: u64,
    },

    /// The exact same field tuple is already present.
    #[error("duplicate version of {field_name} in record {record_id} at mtime {mtime}")]
    DuplicateVersion {
        /// Record containing the duplicate.
        record_id: RecordId,
        /// Field that was written twice.
        field_name: String,
        /// The shared modification time.
        mtime: u64,
    },

    /// A record was expected to be absent but already exists.
    #[error("record {record_id} already exists")]
    RecordExists {
        /// The offending record id.
        record_id: RecordId,
    },

    /// An operation addressed a record that is not bound in the session.
    #[error("unbound record access: {context}")]
    UnboundAccess {
        /// What was being accessed.
        context: String,
    },

    /// The session clock is not ahead of the last write to this field.
    #[error("mtime in the past for {field_name}: now {now} <= last write {last}")]
    MtimeInThePast {
        /// Field or path being written.
        field_name: String,
        /// Current session time.
        now: u64,
        /// mtime of the latest stored version.
        last: u64,
    },

    /// Two live records claim the same path.
    #[error("path collision: {path}")]
    PathCollision {
        /// The contested path.
        path: String,
    },

    /// Init requested but the primary container already exists.
    #[error("database already exists: {path}")]
    DbAlreadyExists {
        /// Path of the existing container.
        path: PathBuf,
    },

    /// Open requested but the primary container is absent.
    #[error("database does not exist: {path}")]
    DbDoesNotExist {
        /// Path that was probed.
        path: PathBuf,
    },

    /// Container decryption failed authentication.
    #[error("passphrase incorrect")]
    WrongPassphrase,

    /// Another process holds the exclusive session lock.
    #[error("database locked: {path}")]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// Malformed document or invalid operation on a tagged database.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },

    /// Container codec error other than a wrong passphrase.
    #[error("container error: {0}")]
    Container(ContainerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON syntax or type error while parsing a document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an unbound-access error.
    pub fn unbound(context: impl Into<String>) -> Self {
        Self::UnboundAccess {
            context: context.into(),
        }
    }

    /// Creates an invalid-format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a path-collision error.
    pub fn path_collision(path: impl Into<String>) -> Self {
        Self::PathCollision { path: path.into() }
    }
}

impl From<ContainerError> for CoreError {
    fn from(err: ContainerError) -> Self {
        // Preserve the wrong-passphrase kind so the interactive layer can
        // re-prompt instead of reporting data loss.
        match err {
            ContainerError::WrongPassphrase => Self::WrongPassphrase,
            other => Self::Container(other),
        }
    }
}
