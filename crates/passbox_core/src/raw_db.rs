//! The append-only versioned record store and its merge engine.
//!
//! A [`RawDatabase`] maps record ids to [`VersionedRecord`]s, each an ordered
//! history of immutable [`FieldTuple`]s. History is append-only: deletions are
//! tombstone tuples with a null value, never physical removal. Conflict
//! resolution is field-granular last-writer-wins; two tuples that disagree at
//! the same mtime are never silently arbitrated.

use crate::error::{CoreError, CoreResult};
use crate::types::{Domain, Purpose, RecordId};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On-disk document format version.
pub const FORMAT_VERSION: u64 = 2;

/// Field name of the distinguished path field in the meta domain.
pub const PATH_FIELD: &str = "path";

/// One immutable versioned fact about a record.
///
/// A null `field_value` is a tombstone: the field (or, for `meta/path`, the
/// whole record) is absent as of `mtime`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldTuple {
    /// Field namespace.
    pub domain: Domain,
    /// Field name; `path` in the meta domain places the record.
    pub field_name: String,
    /// Value, or `None` for a tombstone.
    pub field_value: Option<String>,
    /// Logical modification time. Ordering truth, not wall-clock truth.
    pub mtime: u64,
}

impl FieldTuple {
    /// Creates a field tuple.
    pub fn new(
        domain: Domain,
        field_name: impl Into<String>,
        field_value: Option<String>,
        mtime: u64,
    ) -> Self {
        Self {
            domain,
            field_name: field_name.into(),
            field_value,
            mtime,
        }
    }

    /// Creates a `meta/path` tuple.
    pub fn path(path: Option<String>, mtime: u64) -> Self {
        Self::new(Domain::Meta, PATH_FIELD, path, mtime)
    }

    /// Returns true if `other` addresses the same field slot.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        self.domain == other.domain && self.field_name == other.field_name
    }

    /// Returns true if this is the record's `meta/path` field.
    #[must_use]
    pub fn is_path(&self) -> bool {
        self.domain == Domain::Meta && self.field_name == PATH_FIELD
    }
}

// Wire form is the 4-element array [domain, field, value|null, mtime].
impl Serialize for FieldTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.domain, &self.field_name, &self.field_value, self.mtime).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldTuple {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (domain, field_name, field_value, mtime) =
            <(Domain, String, Option<String>, u64)>::deserialize(deserializer)?;
        Ok(Self {
            domain,
            field_name,
            field_value,
            mtime,
        })
    }
}

/// One update: a field tuple addressed to a record.
///
/// This is the unit queued by sessions, applied by merges, and produced by
/// external importers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawDatabaseUpdate {
    /// Target record.
    pub record_id: RecordId,
    /// The versioned fact to insert.
    pub field_tuple: FieldTuple,
}

impl RawDatabaseUpdate {
    /// Creates an update.
    pub fn new(record_id: RecordId, field_tuple: FieldTuple) -> Self {
        Self {
            record_id,
            field_tuple,
        }
    }
}

/// How [`RawDatabase::insert`] treats existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// The record id must not exist yet; the insert establishes it.
    MustNotExist,
    /// The record may or may not exist; an exact duplicate tuple is an error.
    MayExist,
    /// Like `MayExist`, but an exact duplicate tuple is a silent no-op.
    /// Used when re-applying update streams (imports, replays).
    IgnoreDuplicate,
}

/// Where a new tuple lands relative to existing history.
enum Placement {
    /// Exact same (domain, field, value, mtime) already present.
    Duplicate,
    /// Same (domain, field, mtime) with a different value.
    Conflict,
    /// Insert at this index, keeping descending mtime order.
    At(usize),
}

/// Ordered history of field tuples for one record.
///
/// Invariant: tuples are sorted by non-increasing mtime, and no two tuples
/// share (domain, field name, mtime) unless they are identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedRecord {
    tuples: Vec<FieldTuple>,
}

impl VersionedRecord {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates tuples newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &FieldTuple> {
        self.tuples.iter()
    }

    /// Number of stored tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns true if no tuples are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    fn classify(&self, tuple: &FieldTuple) -> Placement {
        // Tuples are sorted newest-first; equal mtimes may hold several
        // distinct field slots, so the whole equal-mtime run is checked.
        let at = self
            .tuples
            .iter()
            .position(|t| t.mtime < tuple.mtime)
            .unwrap_or(self.tuples.len());

        for existing in self.tuples.iter().filter(|t| t.mtime == tuple.mtime) {
            if existing.same_slot(tuple) {
                if existing.field_value == tuple.field_value {
                    return Placement::Duplicate;
                }
                return Placement::Conflict;
            }
        }

        Placement::At(at)
    }

    fn insert_at(&mut self, at: usize, tuple: FieldTuple) {
        self.tuples.insert(at, tuple);
    }
}

/// Map of record id to versioned history, tagged with a purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDatabase {
    purpose: Purpose,
    records: BTreeMap<RecordId, VersionedRecord>,
}

/// Canonical `{version, purpose, records}` document.
#[derive(Serialize, Deserialize)]
struct Document {
    version: u64,
    purpose: Purpose,
    records: BTreeMap<RecordId, Vec<FieldTuple>>,
}

impl RawDatabase {
    /// Creates an empty primary database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the purpose tag.
    #[must_use]
    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Iterates records in ascending record-id order.
    ///
    /// This order is what makes path-collision resolution deterministic.
    pub fn records(&self) -> impl Iterator<Item = (&RecordId, &VersionedRecord)> {
        self.records.iter()
    }

    /// Looks up one record's history.
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<&VersionedRecord> {
        self.records.get(id)
    }

    /// Number of records, including tombstoned ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts one update, maintaining descending-mtime order.
    ///
    /// Returns whether a tuple was actually stored (`false` only for an
    /// ignored duplicate under [`InsertMode::IgnoreDuplicate`]).
    ///
    /// # Errors
    ///
    /// - [`CoreError::RecordExists`] under `MustNotExist` when the record is
    ///   already present.
    /// - [`CoreError::DuplicateVersion`] when the identical tuple exists and
    ///   duplicates are not ignored.
    /// - [`CoreError::ConflictingVersion`] when a tuple for the same field
    ///   slot exists at the same mtime with a different value.
    pub fn insert(&mut self, update: RawDatabaseUpdate, mode: InsertMode) -> CoreResult<bool> {
        let RawDatabaseUpdate {
            record_id,
            field_tuple,
        } = update;

        if mode == InsertMode::MustNotExist && self.records.contains_key(&record_id) {
            return Err(CoreError::RecordExists { record_id });
        }

        let record = self.records.entry(record_id.clone()).or_default();
        match record.classify(&field_tuple) {
            Placement::Duplicate => {
                if mode == InsertMode::IgnoreDuplicate {
                    Ok(false)
                } else {
                    Err(CoreError::DuplicateVersion {
                        record_id,
                        field_name: field_tuple.field_name,
                        mtime: field_tuple.mtime,
                    })
                }
            }
            Placement::Conflict => Err(CoreError::ConflictingVersion {
                record_id,
                domain: field_tuple.domain.as_str(),
                field_name: field_tuple.field_name,
                mtime: field_tuple.mtime,
            }),
            Placement::At(at) => {
                record.insert_at(at, field_tuple);
                Ok(true)
            }
        }
    }

    /// Side-effect-free preview of whether [`insert`](Self::insert) would
    /// store the tuple.
    ///
    /// With `ignore_existing` an exact duplicate previews as `false`; without
    /// it, as [`CoreError::DuplicateVersion`]. A conflicting tuple is an error
    /// either way.
    pub fn would_insert(
        &self,
        update: &RawDatabaseUpdate,
        ignore_existing: bool,
    ) -> CoreResult<bool> {
        let Some(record) = self.records.get(&update.record_id) else {
            return Ok(true);
        };

        match record.classify(&update.field_tuple) {
            Placement::Duplicate => {
                if ignore_existing {
                    Ok(false)
                } else {
                    Err(CoreError::DuplicateVersion {
                        record_id: update.record_id.clone(),
                        field_name: update.field_tuple.field_name.clone(),
                        mtime: update.field_tuple.mtime,
                    })
                }
            }
            Placement::Conflict => Err(CoreError::ConflictingVersion {
                record_id: update.record_id.clone(),
                domain: update.field_tuple.domain.as_str(),
                field_name: update.field_tuple.field_name.clone(),
                mtime: update.field_tuple.mtime,
            }),
            Placement::At(_) => Ok(true),
        }
    }

    /// Absorbs `other`'s tuples that are not already present.
    ///
    /// Returns the applied update set. A conflicting tuple anywhere aborts
    /// the merge with the typed error; tuples applied before the conflict
    /// remain applied (history is append-only, there is no rollback).
    pub fn merge(&mut self, other: &RawDatabase) -> CoreResult<Vec<RawDatabaseUpdate>> {
        if self.purpose == Purpose::SyncCopy {
            return Err(CoreError::invalid_format("cannot merge into a sync copy"));
        }

        let mut applied = Vec::new();
        for (record_id, record) in other.records() {
            for tuple in record.iter() {
                let update = RawDatabaseUpdate::new(record_id.clone(), tuple.clone());
                if self.would_insert(&update, true)? {
                    self.insert(update.clone(), InsertMode::MayExist)?;
                    applied.push(update);
                }
            }
        }
        Ok(applied)
    }

    fn document(&self, purpose: Purpose) -> Document {
        Document {
            version: FORMAT_VERSION,
            purpose,
            records: self
                .records
                .iter()
                .map(|(id, rec)| (id.clone(), rec.tuples.clone()))
                .collect(),
        }
    }

    /// Serializes the canonical document, tuples newest-first.
    ///
    /// # Errors
    ///
    /// Fails on a sync-copy-tagged database: a foreign copy must never be
    /// persisted as a primary.
    pub fn to_json(&self) -> CoreResult<String> {
        if self.purpose == Purpose::SyncCopy {
            return Err(CoreError::invalid_format(
                "refusing to serialize a sync copy as primary",
            ));
        }
        Ok(serde_json::to_string(&self.document(Purpose::Primary))?)
    }

    /// Serializes this host's own data as a sync-copy export.
    ///
    /// # Errors
    ///
    /// Fails unless the database is a primary; only the owning host exports
    /// sync copies.
    pub fn to_sync_copy_json(&self) -> CoreResult<String> {
        if self.purpose != Purpose::Primary {
            return Err(CoreError::invalid_format(
                "only a primary database exports sync copies",
            ));
        }
        Ok(serde_json::to_string(&self.document(Purpose::SyncCopy))?)
    }

    /// Parses and validates a document.
    ///
    /// The document version must match, tags must be valid, and every tuple
    /// must insert cleanly (the first tuple of a record establishes it, later
    /// ones extend it). Malformed input fails before any database escapes.
    pub fn from_json(text: &str) -> CoreResult<Self> {
        let doc: Document = serde_json::from_str(text)?;

        if doc.version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported document version: {}",
                doc.version
            )));
        }

        let mut db = Self {
            purpose: doc.purpose,
            records: BTreeMap::new(),
        };
        for (record_id, tuples) in doc.records {
            let mut mode = InsertMode::MustNotExist;
            for tuple in tuples {
                db.insert(RawDatabaseUpdate::new(record_id.clone(), tuple), mode)?;
                mode = InsertMode::MayExist;
            }
        }
        Ok(db)
    }
}
