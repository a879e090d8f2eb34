//! Integration tests for sessions, lifecycle, and shared-folder sync.

use passbox_core::{
    Config, CoreError, KdfParams, RawDatabase, Record, Session, SessionStarter, SyncSummary,
};
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::TempDir;

const PASSPHRASE: &str = "test-passphrase";

/// Config for one host under `base`, all hosts sharing `base/shared`.
fn host_config(base: &Path, host_id: &str) -> Config {
    Config::new(
        base.join(host_id).join("local.pmdb"),
        base.join("shared"),
        host_id,
    )
    .with_kdf(KdfParams::insecure_fast())
}

fn init_session(base: &Path, host_id: &str) -> Session {
    SessionStarter::init(host_config(base, host_id), PASSPHRASE)
        .start()
        .unwrap()
}

fn open_session(base: &Path, host_id: &str) -> Session {
    SessionStarter::open(host_config(base, host_id), PASSPHRASE)
        .start()
        .unwrap()
}

fn path_set(session: &mut Session) -> BTreeSet<String> {
    session.paths().unwrap().into_iter().collect()
}

#[test]
fn create_rename_delete_records() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);

    session.insert("test1", Record::new()).unwrap();
    session.insert("dir/test2", Record::new()).unwrap();
    session.insert("delete_me", Record::new()).unwrap();
    assert_eq!(
        path_set(&mut session),
        BTreeSet::from([
            "test1".to_string(),
            "dir/test2".to_string(),
            "delete_me".to_string()
        ])
    );

    session.set_current_time(1001);
    session.rename("test1", "renamed").unwrap();
    session.delete("delete_me").unwrap();
    assert_eq!(
        path_set(&mut session),
        BTreeSet::from(["renamed".to_string(), "dir/test2".to_string()])
    );

    // The index is rebuilt exactly once, on the first path access; the
    // mutations above maintain it in place.
    assert_eq!(session.reload_counter(), 1);

    assert!(session.save().unwrap());
    drop(session);

    let mut session = open_session(dir.path(), "host");
    assert_eq!(
        path_set(&mut session),
        BTreeSet::from(["renamed".to_string(), "dir/test2".to_string()])
    );
}

#[test]
fn set_and_unset_fields() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);
    session.insert("web/mail", Record::new()).unwrap();

    assert!(session.set_field("web/mail", "username", "alice").unwrap());
    assert!(session.set_field("web/mail", "password", "hunter2").unwrap());
    assert_eq!(
        session.get_field("web/mail", "username").unwrap(),
        Some("alice")
    );

    // Rewriting the current value emits nothing.
    session.set_current_time(1001);
    assert!(!session.set_field("web/mail", "username", "alice").unwrap());

    assert!(session.delete_field("web/mail", "password").unwrap());
    assert_eq!(session.get_field("web/mail", "password").unwrap(), None);

    assert!(session.save().unwrap());
    drop(session);

    let mut session = open_session(dir.path(), "host");
    assert_eq!(
        session.get_field("web/mail", "username").unwrap(),
        Some("alice")
    );
    assert_eq!(session.get_field("web/mail", "password").unwrap(), None);
    let record = session.get("web/mail").unwrap().unwrap();
    assert_eq!(record.fields().collect::<Vec<_>>(), vec!["username"]);
}

#[test]
fn stale_clock_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);
    session.insert("rec", Record::new()).unwrap();
    session.set_field("rec", "password", "a").unwrap();

    // Same logical second, same field slot.
    assert!(matches!(
        session.set_field("rec", "password", "b"),
        Err(CoreError::MtimeInThePast { .. })
    ));

    session.set_current_time(999);
    assert!(matches!(
        session.rename("rec", "other"),
        Err(CoreError::MtimeInThePast { .. })
    ));
}

#[test]
fn addressing_unknown_paths_fails() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);

    assert!(matches!(
        session.set_field("nope", "user", "x"),
        Err(CoreError::UnboundAccess { .. })
    ));
    assert!(matches!(
        session.delete("nope"),
        Err(CoreError::UnboundAccess { .. })
    ));
    assert!(session.get("nope").unwrap().is_none());

    session.insert("taken", Record::new()).unwrap();
    assert!(matches!(
        session.insert("taken", Record::new()),
        Err(CoreError::PathCollision { .. })
    ));
    session.insert("other", Record::new()).unwrap();
    assert!(matches!(
        session.rename("other", "taken"),
        Err(CoreError::PathCollision { .. })
    ));
}

#[test]
fn save_skips_clean_sessions() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);
    session.insert("rec", Record::new()).unwrap();

    assert!(session.is_dirty());
    assert!(session.save().unwrap());
    assert!(!session.is_dirty());
    assert!(!session.save().unwrap());
    assert!(session.save_force().unwrap());
}

#[test]
fn init_writes_nothing_until_save() {
    let dir = TempDir::new().unwrap();
    let config = host_config(dir.path(), "host");

    let session = SessionStarter::init(config.clone(), PASSPHRASE)
        .start()
        .unwrap();
    assert!(!config.primary_db.exists());
    drop(session);

    assert!(matches!(
        SessionStarter::open(config, PASSPHRASE).start(),
        Err(CoreError::DbDoesNotExist { .. })
    ));
}

#[test]
fn init_refuses_existing_database() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.save_force().unwrap();
    drop(session);

    assert!(matches!(
        SessionStarter::init(host_config(dir.path(), "host"), PASSPHRASE).start(),
        Err(CoreError::DbAlreadyExists { .. })
    ));
}

#[test]
fn wrong_passphrase_is_distinguished() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.save_force().unwrap();
    drop(session);

    assert!(matches!(
        SessionStarter::open(host_config(dir.path(), "host"), "not-the-passphrase").start(),
        Err(CoreError::WrongPassphrase)
    ));
}

#[test]
fn second_session_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.save_force().unwrap();

    assert!(matches!(
        SessionStarter::open(host_config(dir.path(), "host"), PASSPHRASE).start(),
        Err(CoreError::Locked { .. })
    ));

    // Dropping the session releases the lock.
    drop(session);
    let _session = open_session(dir.path(), "host");
}

#[test]
fn sync_round_trip_between_hosts() {
    let dir = TempDir::new().unwrap();

    let mut alpha = init_session(dir.path(), "alpha");
    alpha.set_current_time(1000);
    alpha.insert("web/mail", Record::new()).unwrap();
    alpha.set_field("web/mail", "username", "alice").unwrap();
    alpha.save().unwrap();

    // Beta picks up alpha's sync copy on its first pass.
    let mut beta = init_session(dir.path(), "beta");
    let summary = beta.sync().unwrap();
    assert!(summary.failure.is_empty());
    assert_eq!(summary.applied_count(), 2);
    assert_eq!(
        beta.get_field("web/mail", "username").unwrap(),
        Some("alice")
    );

    // Beta adds a field; alpha sees it on its next pass.
    beta.set_current_time(2000);
    beta.set_field("web/mail", "password", "hunter2").unwrap();
    beta.save().unwrap();

    let summary = alpha.sync().unwrap();
    assert!(summary.failure.is_empty());
    assert_eq!(summary.applied_count(), 1);
    assert_eq!(
        alpha.get_field("web/mail", "password").unwrap(),
        Some("hunter2")
    );

    let messages: Vec<String> = summary.messages().collect();
    assert_eq!(messages, vec!["beta.pmdb: 1 updates applied.".to_string()]);
}

#[test]
fn sync_with_nothing_new_applies_nothing() {
    let dir = TempDir::new().unwrap();

    let mut alpha = init_session(dir.path(), "alpha");
    alpha.set_current_time(1000);
    alpha.insert("rec", Record::new()).unwrap();
    alpha.save().unwrap();

    let mut beta = init_session(dir.path(), "beta");
    beta.sync().unwrap();

    // Beta's copy now matches alpha exactly; nothing flows back.
    let summary = alpha.sync().unwrap();
    assert_eq!(summary.applied_count(), 0);
    assert!(summary.failure.is_empty());
    assert_eq!(summary.messages().count(), 0);
}

#[test]
fn unreadable_peer_is_a_soft_failure() {
    let dir = TempDir::new().unwrap();

    // A peer whose copy is encrypted under a different passphrase.
    let mut stranger = SessionStarter::init(host_config(dir.path(), "stranger"), "other-pass")
        .start()
        .unwrap();
    stranger.save_force().unwrap();
    drop(stranger);

    let mut beta = init_session(dir.path(), "beta");
    beta.set_current_time(1000);
    beta.insert("rec", Record::new()).unwrap();
    beta.save().unwrap();

    let mut alpha = init_session(dir.path(), "alpha");
    let summary = alpha.sync().unwrap();

    // The stranger's file is reported, the good peer still lands.
    assert_eq!(summary.failure.len(), 1);
    assert_eq!(summary.applied_count(), 1);
    assert!(alpha.contains("rec").unwrap());

    let messages: Vec<String> = summary.messages().collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("Warning: Could not sync from stranger.pmdb:"));
    assert_eq!(messages[1], "beta.pmdb: 1 updates applied.");
}

#[test]
fn colliding_paths_from_peers_are_fixed_on_reload() {
    let dir = TempDir::new().unwrap();

    // Two hosts independently create records at the same paths.
    let mut alpha = init_session(dir.path(), "alpha");
    alpha.set_current_time(1000);
    alpha.insert("MyTestPath", Record::new()).unwrap();
    alpha.insert("NewPath", Record::new()).unwrap();
    alpha.save().unwrap();

    let mut beta = init_session(dir.path(), "beta");
    beta.set_current_time(1001);
    beta.insert("MyTestPath", Record::new()).unwrap();
    beta.insert("NewPath", Record::new()).unwrap();

    beta.set_current_time(2000);
    let summary = beta.sync().unwrap();
    assert!(summary.failure.is_empty());

    // Without fixing, the collision is an error and keeps the index invalid.
    assert!(matches!(
        beta.paths(),
        Err(CoreError::PathCollision { .. })
    ));

    let renamed = beta.reload_records_if_invalid(true).unwrap();
    let renamed: BTreeSet<String> = renamed.into_iter().collect();
    assert_eq!(
        renamed,
        BTreeSet::from(["MyTestPath_".to_string(), "NewPath_".to_string()])
    );
    assert_eq!(
        path_set(&mut beta),
        BTreeSet::from([
            "MyTestPath".to_string(),
            "MyTestPath_".to_string(),
            "NewPath".to_string(),
            "NewPath_".to_string(),
        ])
    );

    // The disambiguation is durable.
    beta.save().unwrap();
    drop(beta);
    let mut beta = open_session(dir.path(), "beta");
    assert_eq!(path_set(&mut beta).len(), 4);
}

#[test]
fn triple_collision_appends_two_underscores() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(2000);

    // Three distinct records all claiming the same path; ascending record-id
    // order decides who keeps it.
    let remote = RawDatabase::from_json(
        r#"{"version": 2, "purpose": "sync_copy",
            "records": {
                "Rec1": [["meta", "path", "P", 100]],
                "Rec2": [["meta", "path", "P", 101]],
                "Rec3": [["meta", "path", "P", 102]]
            }}"#,
    )
    .unwrap();
    session.merge(&remote).unwrap();

    let renamed = session.reload_records_if_invalid(true).unwrap();
    assert_eq!(renamed, vec!["P_".to_string(), "P__".to_string()]);
    assert_eq!(
        path_set(&mut session),
        BTreeSet::from(["P".to_string(), "P_".to_string(), "P__".to_string()])
    );
}

#[test]
fn merge_reloads_projections_lazily() {
    let dir = TempDir::new().unwrap();

    let mut alpha = init_session(dir.path(), "alpha");
    alpha.set_current_time(1000);
    alpha.insert("first", Record::new()).unwrap();
    alpha.save().unwrap();

    let mut beta = init_session(dir.path(), "beta");
    beta.sync().unwrap();
    assert!(beta.contains("first").unwrap());
    assert_eq!(beta.reload_counter(), 1);

    alpha.set_current_time(1500);
    alpha.insert("second", Record::new()).unwrap();
    alpha.save().unwrap();

    // The second merge invalidates; the next access rebuilds.
    beta.sync().unwrap();
    assert!(beta.contains("second").unwrap());
    assert_eq!(beta.reload_counter(), 2);
}

#[test]
fn unsaved_records_survive_a_merge() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1001);
    session.insert("local_rec", Record::new()).unwrap();
    session.set_field("local_rec", "username", "bob").unwrap();

    // Merge before the session ever saved; the queued local updates must
    // survive the rebuild triggered by the merge.
    let remote = RawDatabase::from_json(
        r#"{"version": 2, "purpose": "sync_copy",
            "records": {"RemoteRec": [["meta", "path", "remote_rec", 500]]}}"#,
    )
    .unwrap();
    let applied = session.merge(&remote).unwrap();
    assert_eq!(applied.len(), 1);

    assert_eq!(
        path_set(&mut session),
        BTreeSet::from(["local_rec".to_string(), "remote_rec".to_string()])
    );
    assert_eq!(
        session.get_field("local_rec", "username").unwrap(),
        Some("bob")
    );

    session.save().unwrap();
    drop(session);
    let mut session = open_session(dir.path(), "host");
    assert_eq!(path_set(&mut session).len(), 2);
}

#[test]
fn tree_rendering_follows_live_paths() {
    let dir = TempDir::new().unwrap();
    let mut session = init_session(dir.path(), "host");
    session.set_current_time(1000);
    session.insert("path1/record2", Record::new()).unwrap();
    session.insert("path1/record3", Record::new()).unwrap();
    session.insert("record1", Record::new()).unwrap();

    let expected = "\
╮
├─┬ path1/
│ ├── record2
│ ╰── record3
╰── record1
";
    assert_eq!(session.render_tree("").unwrap(), expected);
    assert_eq!(session.tree_rebuild_counter(), 1);

    // Renders are memoized until a path changes.
    session.render_tree("record2").unwrap();
    assert_eq!(session.tree_rebuild_counter(), 1);

    session.set_current_time(1001);
    session.delete("record1").unwrap();
    let expected = "\
╮
╰─┬ path1/
  ├── record2
  ╰── record3
";
    assert_eq!(session.render_tree("").unwrap(), expected);
    assert_eq!(session.tree_rebuild_counter(), 2);
}

#[test]
fn sync_summary_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<SyncSummary>();
}
