//! Error types for the container codec.

use std::io;
use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur while reading or writing a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is structurally damaged: bad magic, truncated header,
    /// unsupported format version, or invalid plaintext encoding.
    #[error("corrupt container: {message}")]
    Corrupt {
        /// Description of the damage.
        message: String,
    },

    /// Authentication failed during decryption.
    ///
    /// With an authenticated cipher this is indistinguishable from tampered
    /// ciphertext, but in practice it means the passphrase was wrong; callers
    /// should re-prompt.
    #[error("passphrase incorrect")]
    WrongPassphrase,

    /// Key derivation failed (invalid parameters).
    #[error("key derivation failed: {message}")]
    KdfFailed {
        /// Description of the failure.
        message: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },
}

impl ContainerError {
    /// Creates a corrupt-container error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a KDF failure error.
    pub fn kdf_failed(message: impl Into<String>) -> Self {
        Self::KdfFailed {
            message: message.into(),
        }
    }

    /// Creates an encryption failure error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }
}
