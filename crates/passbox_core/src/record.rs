//! Live per-path reduction of a versioned record.

use crate::error::{CoreError, CoreResult};
use crate::raw_db::{FieldTuple, VersionedRecord};
use crate::types::{Domain, RecordId};
use std::collections::BTreeMap;

/// Latest known state of one field slot.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSlot {
    /// Current value; `None` means the field was deleted.
    value: Option<String>,
    /// mtime of the winning tuple.
    mtime: u64,
}

/// A live projection of one record: current path plus current field map.
///
/// A `Record` starts unbound at construction and is bound either by being
/// inserted into a session (which assigns its path) or by being rebuilt from
/// stored history. All mutation flows through the owning session; whenever the
/// session invalidates its index, projections are discarded and rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: RecordId,
    bound: bool,
    path: Option<String>,
    path_mtime: Option<u64>,
    fields: BTreeMap<String, FieldSlot>,
}

impl Record {
    /// Creates a new unbound record with a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: RecordId::generate(),
            bound: false,
            path: None,
            path_mtime: None,
            fields: BTreeMap::new(),
        }
    }

    /// Rebuilds a bound projection from stored history.
    ///
    /// Reduction rule: per field slot, the highest-mtime tuple wins. The
    /// history is sorted newest-first, so the first tuple seen for a slot is
    /// the winner. A winning null value tombstones the field (or, for the
    /// path, the whole record).
    pub(crate) fn from_history(id: RecordId, history: &VersionedRecord) -> Self {
        let mut record = Self {
            id,
            bound: true,
            path: None,
            path_mtime: None,
            fields: BTreeMap::new(),
        };

        for tuple in history.iter() {
            if tuple.is_path() {
                if record.path_mtime.is_none() {
                    record.path = tuple.field_value.clone();
                    record.path_mtime = Some(tuple.mtime);
                }
            } else if tuple.domain == Domain::User
                && !record.fields.contains_key(&tuple.field_name)
            {
                record.fields.insert(
                    tuple.field_name.clone(),
                    FieldSlot {
                        value: tuple.field_value.clone(),
                        mtime: tuple.mtime,
                    },
                );
            }
        }

        record
    }

    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Returns true once the record is bound to a session.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Returns the current path, or `None` for a deleted or unbound record.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns the current value of a field.
    #[must_use]
    pub fn get(&self, field_name: &str) -> Option<&str> {
        self.fields
            .get(field_name)
            .and_then(|slot| slot.value.as_deref())
    }

    /// Iterates the current field names (set semantics, no ordering promise).
    ///
    /// Tombstoned fields are absent.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(name, _)| name.as_str())
    }

    pub(crate) fn bind(&mut self) {
        self.bound = true;
    }

    /// Bound projection with no history yet; used when replaying queued
    /// updates for a record the stored history does not know about.
    pub(crate) fn empty_bound(id: RecordId) -> Self {
        Self {
            id,
            bound: true,
            path: None,
            path_mtime: None,
            fields: BTreeMap::new(),
        }
    }

    /// Replays one tuple onto the projection; the tuple wins only if it is
    /// newer than the slot's current state.
    pub(crate) fn overlay(&mut self, tuple: &FieldTuple) {
        if tuple.is_path() {
            if self.path_mtime.is_none_or(|last| tuple.mtime > last) {
                self.path = tuple.field_value.clone();
                self.path_mtime = Some(tuple.mtime);
            }
        } else if tuple.domain == Domain::User {
            let newer = self
                .fields
                .get(&tuple.field_name)
                .is_none_or(|slot| tuple.mtime > slot.mtime);
            if newer {
                self.fields.insert(
                    tuple.field_name.clone(),
                    FieldSlot {
                        value: tuple.field_value.clone(),
                        mtime: tuple.mtime,
                    },
                );
            }
        }
    }

    /// Stages a user-field write: tombstone when `value` is `None`.
    ///
    /// Returns the tuple to queue, or `None` when the write is redundant.
    /// Updates the projection optimistically.
    pub(crate) fn stage_field(
        &mut self,
        field_name: &str,
        value: Option<String>,
        now: u64,
    ) -> CoreResult<Option<FieldTuple>> {
        if !self.bound {
            return Err(CoreError::unbound(format!("field {field_name}")));
        }

        let current = self.fields.get(field_name);
        if let Some(slot) = current {
            if now <= slot.mtime {
                return Err(CoreError::MtimeInThePast {
                    field_name: field_name.to_string(),
                    now,
                    last: slot.mtime,
                });
            }
        }
        if current.and_then(|slot| slot.value.as_ref()) == value.as_ref() {
            return Ok(None);
        }

        self.fields.insert(
            field_name.to_string(),
            FieldSlot {
                value: value.clone(),
                mtime: now,
            },
        );
        Ok(Some(FieldTuple::new(Domain::User, field_name, value, now)))
    }

    /// Stages a path write: rename, or record tombstone when `None`.
    ///
    /// Renaming to the current path is a no-op.
    pub(crate) fn stage_path(
        &mut self,
        new_path: Option<String>,
        now: u64,
    ) -> CoreResult<Option<FieldTuple>> {
        if !self.bound {
            return Err(CoreError::unbound("path"));
        }

        if let Some(last) = self.path_mtime {
            if now <= last {
                return Err(CoreError::MtimeInThePast {
                    field_name: "path".to_string(),
                    now,
                    last,
                });
            }
        }
        if self.path == new_path {
            return Ok(None);
        }

        self.path = new_path.clone();
        self.path_mtime = Some(now);
        Ok(Some(FieldTuple::path(new_path, now)))
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_db::{InsertMode, RawDatabase, RawDatabaseUpdate};

    fn history(tuples: Vec<FieldTuple>) -> VersionedRecord {
        let id = RecordId::from("rec");
        let mut db = RawDatabase::new();
        for tuple in tuples {
            db.insert(
                RawDatabaseUpdate::new(id.clone(), tuple),
                InsertMode::MayExist,
            )
            .unwrap();
        }
        db.record(&id).unwrap().clone()
    }

    #[test]
    fn highest_mtime_wins_per_field() {
        let rec = Record::from_history(
            RecordId::from("rec"),
            &history(vec![
                FieldTuple::path(Some("a/b".into()), 100),
                FieldTuple::new(Domain::User, "password", Some("old".into()), 300),
                FieldTuple::new(Domain::User, "password", Some("new".into()), 400),
                FieldTuple::new(Domain::User, "username", Some("alice".into()), 200),
            ]),
        );

        assert_eq!(rec.path(), Some("a/b"));
        assert_eq!(rec.get("password"), Some("new"));
        assert_eq!(rec.get("username"), Some("alice"));
        assert!(rec.is_bound());
    }

    #[test]
    fn null_tombstone_means_absent() {
        let rec = Record::from_history(
            RecordId::from("rec"),
            &history(vec![
                FieldTuple::path(Some("p".into()), 100),
                FieldTuple::new(Domain::User, "token", Some("secret".into()), 200),
                FieldTuple::new(Domain::User, "token", None, 300),
            ]),
        );

        assert_eq!(rec.get("token"), None);
        assert_eq!(rec.fields().count(), 0);
    }

    #[test]
    fn deleted_record_has_no_path() {
        let rec = Record::from_history(
            RecordId::from("rec"),
            &history(vec![
                FieldTuple::path(Some("p".into()), 100),
                FieldTuple::path(None, 200),
            ]),
        );
        assert_eq!(rec.path(), None);
    }

    #[test]
    fn unbound_mutators_fail() {
        let mut rec = Record::new();
        assert!(matches!(
            rec.stage_field("user", Some("x".into()), 100),
            Err(CoreError::UnboundAccess { .. })
        ));
        assert!(matches!(
            rec.stage_path(Some("p".into()), 100),
            Err(CoreError::UnboundAccess { .. })
        ));
    }

    #[test]
    fn redundant_write_is_noop() {
        let mut rec = Record::new();
        rec.bind();
        assert!(rec.stage_field("f", Some("v".into()), 100).unwrap().is_some());
        assert!(rec.stage_field("f", Some("v".into()), 200).unwrap().is_none());
        // Deleting an absent field is setting null over null.
        assert!(rec.stage_field("missing", None, 300).unwrap().is_none());
    }

    #[test]
    fn stale_clock_rejected_and_state_unchanged() {
        let mut rec = Record::new();
        rec.bind();
        rec.stage_field("f", Some("v".into()), 200).unwrap();

        let before = rec.clone();
        assert!(matches!(
            rec.stage_field("f", Some("w".into()), 200),
            Err(CoreError::MtimeInThePast { .. })
        ));
        assert!(matches!(
            rec.stage_field("f", Some("w".into()), 150),
            Err(CoreError::MtimeInThePast { .. })
        ));
        assert_eq!(rec, before);
    }

    #[test]
    fn rename_to_same_path_is_noop() {
        let mut rec = Record::new();
        rec.bind();
        assert!(rec.stage_path(Some("a".into()), 100).unwrap().is_some());
        assert!(rec.stage_path(Some("a".into()), 200).unwrap().is_none());
        assert!(rec.stage_path(Some("b".into()), 300).unwrap().is_some());
        assert_eq!(rec.path(), Some("b"));
    }
}
