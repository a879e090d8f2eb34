//! The session: owner of the raw database and all live projections.
//!
//! A session is the single entry point for reading and mutating a primary
//! database. It owns the [`RawDatabase`], the live [`Record`] projections and
//! their path index, a pending-update queue, and the logical clock. One
//! session exists per primary container, enforced by the lifecycle lock.
//!
//! Mutations are applied optimistically to the in-memory projections and
//! queued as [`RawDatabaseUpdate`]s; [`Session::save`] drains the queue into
//! the raw database and persists both the primary container and this host's
//! sync copy. Merging a remote database invalidates the projections, which
//! are lazily rebuilt on the next path-addressed access.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::SessionLock;
use crate::pathtree::{PathTree, TreeStyle, UnicodeStyle};
use crate::raw_db::{InsertMode, RawDatabase, RawDatabaseUpdate};
use crate::record::Record;
use crate::types::RecordId;
use passbox_container::save_encrypted;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Per-file outcome of one sync pass over the shared folder.
///
/// Failures are soft: a peer file that cannot be decrypted, parsed, or merged
/// is recorded here and never aborts the rest of the pass.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Peer file to the updates its merge applied.
    pub success: BTreeMap<PathBuf, Vec<RawDatabaseUpdate>>,
    /// Peer file to the reason it was skipped.
    pub failure: BTreeMap<PathBuf, String>,
}

impl SyncSummary {
    /// Total number of updates applied across all peer files.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.success.values().map(Vec::len).sum()
    }

    /// Human-readable per-file outcome lines: warnings for failures, then one
    /// line per peer file that contributed updates. Peers that contributed
    /// nothing are skipped.
    pub fn messages(&self) -> impl Iterator<Item = String> + '_ {
        let failures = self.failure.iter().map(|(path, msg)| {
            format!(
                "Warning: Could not sync from {}: {}",
                file_name(path),
                msg
            )
        });
        let successes = self
            .success
            .iter()
            .filter(|(_, updates)| !updates.is_empty())
            .map(|(path, updates)| format!("{}: {} updates applied.", file_name(path), updates.len()));
        failures.chain(successes)
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// An open session on a primary database.
pub struct Session {
    config: Config,
    passphrase: String,
    // Held for the session's lifetime; dropping releases the advisory lock.
    _lock: SessionLock,
    db: RawDatabase,
    records: BTreeMap<RecordId, Record>,
    path_index: BTreeMap<String, RecordId>,
    tree: PathTree,
    pending: Vec<RawDatabaseUpdate>,
    dirty: bool,
    index_valid: bool,
    reload_counter: u64,
    time_override: Option<u64>,
}

impl Session {
    pub(crate) fn new(config: Config, passphrase: String, lock: SessionLock, db: RawDatabase) -> Self {
        Self {
            config,
            passphrase,
            _lock: lock,
            db,
            records: BTreeMap::new(),
            path_index: BTreeMap::new(),
            tree: PathTree::new(),
            pending: Vec::new(),
            dirty: false,
            index_valid: false,
            reload_counter: 0,
            time_override: None,
        }
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read access to the raw database (reflects saved state only; queued
    /// updates are applied on [`save`](Self::save)).
    #[must_use]
    pub fn raw_db(&self) -> &RawDatabase {
        &self.db
    }

    /// Current logical time in seconds.
    ///
    /// Defaults to the system clock. Update producers only need to agree on a
    /// monotonic clock, not on submission order; history order is always
    /// mtime-driven.
    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.time_override.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs())
        })
    }

    /// Pins the logical clock to a fixed value.
    ///
    /// Useful for deterministic sequencing in tests and imports; writes at or
    /// before a field's last mtime are rejected, so the pinned value must
    /// advance between writes to one field.
    pub fn set_current_time(&mut self, time: u64) {
        self.time_override = Some(time);
    }

    /// Number of times the record index has been rebuilt.
    #[must_use]
    pub fn reload_counter(&self) -> u64 {
        self.reload_counter
    }

    /// Returns true if unsaved changes exist.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || !self.pending.is_empty()
    }

    /// Rebuild counter of the derived path tree.
    #[must_use]
    pub fn tree_rebuild_counter(&self) -> u64 {
        self.tree.rebuild_counter()
    }

    /// Rebuilds the live projections and path index if they were invalidated.
    ///
    /// Every record whose current path is non-null is included. Records are
    /// visited in ascending record-id order; when two live records claim the
    /// same path, the first keeps it. With `fix_path_collisions` the later
    /// record is renamed by appending "_" until its path is unique, each
    /// disambiguation emitted as a durable rename update at session time;
    /// without it the collision is an error.
    ///
    /// Returns the renamed paths (empty when the index was already valid).
    pub fn reload_records_if_invalid(
        &mut self,
        fix_path_collisions: bool,
    ) -> CoreResult<Vec<String>> {
        if self.index_valid {
            return Ok(Vec::new());
        }

        let mut records: BTreeMap<RecordId, Record> = BTreeMap::new();
        for (id, history) in self.db.records() {
            records.insert(id.clone(), Record::from_history(id.clone(), history));
        }

        // Queued updates are not in the raw database yet; overlay them so a
        // rebuild right after a merge still sees unsaved local changes.
        for update in &self.pending {
            records
                .entry(update.record_id.clone())
                .or_insert_with(|| Record::empty_bound(update.record_id.clone()))
                .overlay(&update.field_tuple);
        }

        let now = self.current_time();
        let mut path_index: BTreeMap<String, RecordId> = BTreeMap::new();
        let mut renamed = Vec::new();
        let mut rename_updates = Vec::new();
        for (id, record) in &mut records {
            let Some(mut path) = record.path().map(String::from) else {
                continue;
            };

            if path_index.contains_key(&path) {
                if !fix_path_collisions {
                    return Err(CoreError::path_collision(path));
                }
                while path_index.contains_key(&path) {
                    path.push('_');
                }
                if let Some(tuple) = record.stage_path(Some(path.clone()), now)? {
                    rename_updates.push(RawDatabaseUpdate::new(id.clone(), tuple));
                }
                debug!(path = %path, record_id = %id, "path collision resolved");
                renamed.push(path.clone());
            }
            path_index.insert(path, id.clone());
        }

        self.pending.extend(rename_updates);
        self.records = records;
        self.path_index = path_index;
        self.index_valid = true;
        self.reload_counter += 1;
        self.tree.invalidate();
        Ok(renamed)
    }

    fn ensure_index(&mut self) -> CoreResult<()> {
        self.reload_records_if_invalid(false)?;
        Ok(())
    }

    /// Returns all live record paths.
    pub fn paths(&mut self) -> CoreResult<Vec<String>> {
        self.ensure_index()?;
        Ok(self.path_index.keys().cloned().collect())
    }

    /// Returns true if a live record exists at `path`.
    pub fn contains(&mut self, path: &str) -> CoreResult<bool> {
        self.ensure_index()?;
        Ok(self.path_index.contains_key(path))
    }

    /// Looks up the live record at `path`.
    pub fn get(&mut self, path: &str) -> CoreResult<Option<&Record>> {
        self.ensure_index()?;
        Ok(self
            .path_index
            .get(path)
            .and_then(|id| self.records.get(id)))
    }

    /// Returns the current value of one field of the record at `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnboundAccess`] when no live record exists at `path`.
    pub fn get_field(&mut self, path: &str, field_name: &str) -> CoreResult<Option<&str>> {
        self.ensure_index()?;
        let id = self.bound_record(path)?;
        let record = self
            .records
            .get(&id)
            .ok_or_else(|| CoreError::unbound(format!("no record at path {path}")))?;
        Ok(record.get(field_name))
    }

    fn bound_record(&self, path: &str) -> CoreResult<RecordId> {
        self.path_index
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::unbound(format!("no record at path {path}")))
    }

    /// Binds a newly created record at `path`.
    ///
    /// Emits the record's first `meta/path` tuple into the pending queue.
    ///
    /// # Errors
    ///
    /// [`CoreError::PathCollision`] if `path` is occupied;
    /// [`CoreError::RecordExists`] if `record` is already bound elsewhere
    /// (rebinding an existing record is a [`rename`](Self::rename)).
    pub fn insert(&mut self, path: &str, mut record: Record) -> CoreResult<()> {
        self.ensure_index()?;
        if record.is_bound() {
            return Err(CoreError::RecordExists {
                record_id: record.id().clone(),
            });
        }
        if self.path_index.contains_key(path) {
            return Err(CoreError::path_collision(path));
        }

        record.bind();
        let now = self.current_time();
        let id = record.id().clone();
        if let Some(tuple) = record.stage_path(Some(path.to_string()), now)? {
            self.pending.push(RawDatabaseUpdate::new(id.clone(), tuple));
        }
        self.records.insert(id.clone(), record);
        self.path_index.insert(path.to_string(), id);
        self.tree.invalidate();
        Ok(())
    }

    /// Sets a user field on the record at `path`.
    ///
    /// Returns whether a new version was emitted; writing the current value
    /// again is a no-op.
    pub fn set_field(&mut self, path: &str, field_name: &str, value: &str) -> CoreResult<bool> {
        self.stage_field(path, field_name, Some(value.to_string()))
    }

    /// Deletes a user field: emits a tombstone tuple.
    ///
    /// Deleting an absent field is a no-op, like any redundant write.
    pub fn delete_field(&mut self, path: &str, field_name: &str) -> CoreResult<bool> {
        self.stage_field(path, field_name, None)
    }

    fn stage_field(
        &mut self,
        path: &str,
        field_name: &str,
        value: Option<String>,
    ) -> CoreResult<bool> {
        self.ensure_index()?;
        let id = self.bound_record(path)?;
        let now = self.current_time();

        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| CoreError::unbound(format!("no record at path {path}")))?;
        match record.stage_field(field_name, value, now)? {
            Some(tuple) => {
                self.pending.push(RawDatabaseUpdate::new(id, tuple));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves the record at `path` to `new_path`.
    ///
    /// Renaming to the current path is a no-op.
    pub fn rename(&mut self, path: &str, new_path: &str) -> CoreResult<()> {
        self.ensure_index()?;
        if path == new_path {
            return Ok(());
        }
        let id = self.bound_record(path)?;
        if self.path_index.contains_key(new_path) {
            return Err(CoreError::path_collision(new_path));
        }

        let now = self.current_time();
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| CoreError::unbound(format!("no record at path {path}")))?;
        if let Some(tuple) = record.stage_path(Some(new_path.to_string()), now)? {
            self.pending.push(RawDatabaseUpdate::new(id.clone(), tuple));
        }
        self.path_index.remove(path);
        self.path_index.insert(new_path.to_string(), id);
        self.tree.invalidate();
        Ok(())
    }

    /// Deletes the record at `path` by tombstoning its path.
    ///
    /// History is append-only; the record's tuples remain and keep merging.
    pub fn delete(&mut self, path: &str) -> CoreResult<()> {
        self.ensure_index()?;
        let id = self.bound_record(path)?;
        let now = self.current_time();

        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| CoreError::unbound(format!("no record at path {path}")))?;
        if let Some(tuple) = record.stage_path(None, now)? {
            self.pending.push(RawDatabaseUpdate::new(id, tuple));
        }
        self.path_index.remove(path);
        self.tree.invalidate();
        Ok(())
    }

    /// Merges a remote database into this session's raw database.
    ///
    /// Returns the applied updates. Applying anything invalidates the live
    /// projections and marks the session dirty. A conflict aborts the merge
    /// with the typed error; tuples applied before the conflict stay, so the
    /// projections are invalidated on failure too.
    pub fn merge(&mut self, remote: &RawDatabase) -> CoreResult<Vec<RawDatabaseUpdate>> {
        match self.db.merge(remote) {
            Ok(applied) => {
                if !applied.is_empty() {
                    debug!(updates = applied.len(), "merge applied updates");
                    self.dirty = true;
                    self.invalidate_index();
                }
                Ok(applied)
            }
            Err(err) => {
                self.invalidate_index();
                Err(err)
            }
        }
    }

    fn invalidate_index(&mut self) {
        self.index_valid = false;
        self.tree.invalidate();
    }

    /// Merges every peer sync copy found in the shared folder, then persists
    /// the primary and a fresh sync copy of this host.
    ///
    /// Peer files are `*.pmdb` entries whose stem differs from this host's
    /// id. Every per-file failure (wrong passphrase, corrupt container,
    /// malformed document, merge conflict) is recorded as a soft failure in
    /// the summary; it never aborts the remaining files.
    pub fn sync(&mut self) -> CoreResult<SyncSummary> {
        let mut summary = SyncSummary::default();

        let mut peers = Vec::new();
        if self.config.shared_folder.is_dir() {
            for entry in fs::read_dir(&self.config.shared_folder)? {
                let path = entry?.path();
                let is_container = path.extension().is_some_and(|ext| ext == "pmdb");
                let is_own = path
                    .file_stem()
                    .is_some_and(|stem| stem == self.config.host_id.as_str());
                if is_container && !is_own {
                    peers.push(path);
                }
            }
        }
        peers.sort();

        for path in peers {
            match self.sync_one(&path) {
                Ok(applied) => {
                    summary.success.insert(path, applied);
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping peer sync copy");
                    summary.failure.insert(path, err.to_string());
                }
            }
        }

        // Always re-export, so peers see this host's current state even when
        // nothing new arrived.
        self.save_internal(true)?;
        info!(
            applied = summary.applied_count(),
            failures = summary.failure.len(),
            "sync pass finished"
        );
        Ok(summary)
    }

    fn sync_one(&mut self, path: &std::path::Path) -> CoreResult<Vec<RawDatabaseUpdate>> {
        let text = passbox_container::load_encrypted(path, &self.passphrase)?;
        let remote = RawDatabase::from_json(&text)?;
        if remote.purpose() != crate::types::Purpose::SyncCopy {
            return Err(CoreError::invalid_format(
                "peer file is not tagged as a sync copy",
            ));
        }
        self.merge(&remote)
    }

    /// Persists the session if anything changed.
    ///
    /// Queued updates are drained into the raw database in reverse arrival
    /// order; the stored order is mtime-driven either way, so application
    /// order never affects the result. When changes exist, the encrypted
    /// primary container and this host's sync copy are both written
    /// atomically; the save is incomplete unless both succeed.
    ///
    /// Returns whether a write happened.
    pub fn save(&mut self) -> CoreResult<bool> {
        self.save_internal(false)
    }

    /// Persists unconditionally, even with no changes.
    pub fn save_force(&mut self) -> CoreResult<bool> {
        self.save_internal(true)
    }

    fn save_internal(&mut self, force: bool) -> CoreResult<bool> {
        let changed = self.is_dirty();

        while let Some(update) = self.pending.pop() {
            self.db.insert(update, InsertMode::IgnoreDuplicate)?;
        }

        if !changed && !force {
            return Ok(false);
        }

        if let Some(parent) = self.config.primary_db.parent() {
            fs::create_dir_all(parent)?;
        }
        save_encrypted(
            &self.config.primary_db,
            &self.passphrase,
            &self.db.to_json()?,
            &self.config.kdf,
        )?;

        fs::create_dir_all(&self.config.shared_folder)?;
        let sync_copy_path = self.config.sync_copy_path();
        save_encrypted(
            &sync_copy_path,
            &self.passphrase,
            &self.db.to_sync_copy_json()?,
            &self.config.kdf,
        )?;

        self.dirty = false;
        info!(
            primary = %self.config.primary_db.display(),
            sync_copy = %sync_copy_path.display(),
            "session saved"
        );
        Ok(true)
    }

    /// Renders the filtered directory tree with the default glyphs.
    pub fn render_tree(&mut self, search_term: &str) -> CoreResult<String> {
        self.render_tree_with_style(search_term, &UnicodeStyle)
    }

    /// Renders the filtered directory tree with a custom glyph style.
    pub fn render_tree_with_style(
        &mut self,
        search_term: &str,
        style: &dyn TreeStyle,
    ) -> CoreResult<String> {
        self.ensure_index()?;
        self.tree
            .rebuild_if_invalid(self.path_index.keys().map(String::as_str));
        Ok(self.tree.render(search_term, style))
    }
}
