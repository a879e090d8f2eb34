//! # Passbox Core
//!
//! Engine of the Passbox credential store.
//!
//! This crate provides:
//! - Append-only versioned record storage with field-granular
//!   last-writer-wins merging
//! - Live record projections addressed by hierarchical paths
//! - Session management: pending updates, lazy index rebuilds, atomic saves
//! - Shared-folder synchronization between hosts
//! - Lifecycle handling: init/open, locking, passphrase verification
//!
//! Persistence goes through [`passbox_container`], which encrypts the JSON
//! document this crate produces.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod lifecycle;
mod pathtree;
mod raw_db;
mod record;
mod session;
mod types;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use lifecycle::SessionStarter;
pub use pathtree::{PathTree, TreeStyle, UnicodeStyle};
pub use raw_db::{
    FieldTuple, InsertMode, RawDatabase, RawDatabaseUpdate, VersionedRecord, FORMAT_VERSION,
    PATH_FIELD,
};
pub use record::Record;
pub use session::{Session, SyncSummary};
pub use types::{Domain, Purpose, RecordId};

// Work factor knobs are re-exported so callers can configure sessions without
// depending on the container crate directly.
pub use passbox_container::KdfParams;
