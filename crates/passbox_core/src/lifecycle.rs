//! Opening and initializing sessions.
//!
//! At most one session may be open per primary container. The guard is an
//! advisory `fs2` lock on a sibling `<primary>.lock` file, taken without
//! blocking and released when the session drops.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::raw_db::RawDatabase;
use crate::session::Session;
use crate::types::Purpose;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use tracing::info;

/// Held advisory lock on a primary container.
///
/// The lock file itself is left in place after release; only the lock state
/// matters.
#[derive(Debug)]
pub(crate) struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    fn acquire(path: PathBuf) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(CoreError::Locked { path });
            }
            return Err(err.into());
        }
        Ok(Self { file, path })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), error = %err, "lock release failed");
        }
    }
}

/// Builder that opens an existing primary container or initializes a new one.
///
/// Initialization writes nothing: the container appears on the first
/// [`Session::save`].
#[derive(Debug)]
pub struct SessionStarter {
    config: Config,
    passphrase: String,
    init: bool,
}

impl SessionStarter {
    /// Prepares to open an existing primary container.
    pub fn open(config: Config, passphrase: impl Into<String>) -> Self {
        Self {
            config,
            passphrase: passphrase.into(),
            init: false,
        }
    }

    /// Prepares to initialize a new, empty primary container.
    pub fn init(config: Config, passphrase: impl Into<String>) -> Self {
        Self {
            config,
            passphrase: passphrase.into(),
            init: true,
        }
    }

    /// Acquires the session lock and produces the session.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Locked`] when another session holds the container.
    /// - [`CoreError::DbAlreadyExists`] when initializing over an existing
    ///   container.
    /// - [`CoreError::DbDoesNotExist`] when opening a container that is not
    ///   there.
    /// - [`CoreError::WrongPassphrase`] when the container does not
    ///   authenticate.
    /// - [`CoreError::InvalidFormat`] when the decrypted document is not a
    ///   primary database.
    pub fn start(self) -> CoreResult<Session> {
        if let Some(parent) = self.config.primary_db.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = SessionLock::acquire(self.config.lock_path())?;

        let db = if self.init {
            if self.config.primary_db.exists() {
                return Err(CoreError::DbAlreadyExists {
                    path: self.config.primary_db.clone(),
                });
            }
            info!(primary = %self.config.primary_db.display(), "initializing new database");
            RawDatabase::new()
        } else {
            if !self.config.primary_db.exists() {
                return Err(CoreError::DbDoesNotExist {
                    path: self.config.primary_db.clone(),
                });
            }
            let text =
                passbox_container::load_encrypted(&self.config.primary_db, &self.passphrase)?;
            let db = RawDatabase::from_json(&text)?;
            if db.purpose() != Purpose::Primary {
                return Err(CoreError::invalid_format(
                    "container does not hold a primary database",
                ));
            }
            info!(
                primary = %self.config.primary_db.display(),
                records = db.len(),
                "database opened"
            );
            db
        };

        Ok(Session::new(self.config, self.passphrase, lock, db))
    }
}
