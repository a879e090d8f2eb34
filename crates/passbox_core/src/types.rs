//! Core type definitions for Passbox.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque stable identifier for a record.
///
/// Record ids are random tokens, never derived from the user-facing path, so
/// two hosts creating records at the same path produce distinct records that
/// later surface as a path collision rather than silently merging.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random record id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Creates a record id from an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Tag distinguishing the writable primary database from a host's sync copy.
///
/// A sync copy is a merge source only; it can never be re-serialized as a
/// primary database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// The writable, canonical database for one host.
    #[default]
    Primary,
    /// A host's read-only-on-import export.
    SyncCopy,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Primary => f.write_str("primary"),
            Purpose::SyncCopy => f.write_str("sync_copy"),
        }
    }
}

/// Namespace of a field within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Record bookkeeping; `meta/path` places the record in the hierarchy.
    Meta,
    /// User-visible credential fields.
    User,
}

impl Domain {
    /// Returns the wire tag for this domain.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Meta => "meta",
            Domain::User => "user",
        }
    }
}
