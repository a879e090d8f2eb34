//! Session configuration.

use passbox_container::KdfParams;
use std::path::PathBuf;

/// Locations and identity for one host's session.
///
/// The primary container is private to this host; the shared folder is the
/// rendezvous point (typically a synchronized directory) where every host
/// drops its `<host_id>.pmdb` sync copy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the encrypted primary container.
    pub primary_db: PathBuf,
    /// Folder scanned for peer sync copies; also receives this host's copy.
    pub shared_folder: PathBuf,
    /// Name of this host, used as the sync-copy file stem. Must be unique
    /// across the hosts sharing the folder.
    pub host_id: String,
    /// Key-derivation work factor for containers this session writes.
    pub kdf: KdfParams,
}

impl Config {
    /// Creates a configuration with the default key-derivation work factor.
    pub fn new(
        primary_db: impl Into<PathBuf>,
        shared_folder: impl Into<PathBuf>,
        host_id: impl Into<String>,
    ) -> Self {
        Self {
            primary_db: primary_db.into(),
            shared_folder: shared_folder.into(),
            host_id: host_id.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Overrides the key-derivation work factor.
    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Path of the advisory lock file guarding the primary container.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .primary_db
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.primary_db.with_file_name(name)
    }

    /// Path where this host's sync copy is written.
    #[must_use]
    pub fn sync_copy_path(&self) -> PathBuf {
        self.shared_folder.join(format!("{}.pmdb", self.host_id))
    }
}
