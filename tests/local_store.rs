use notepad_sync_lib::db::Database;
use notepad_sync_lib::errors::AppError;
use notepad_sync_lib::models::{NotePatch, Snapshot};
use notepad_sync_lib::notepad::{NotepadCore, DATABASE_FILE};
use notepad_sync_lib::storage::{
    BackupPolicy, SnapshotStore, StorageMedium, MAX_BACKUPS, SNAPSHOT_KEY,
};
use std::sync::Arc;

fn sqlite_store(dir: &tempfile::TempDir, policy: BackupPolicy) -> (Arc<Database>, SnapshotStore) {
    let database = Arc::new(Database::new(&dir.path().join("store.sqlite")).expect("database"));
    let store = SnapshotStore::with_policy(database.clone(), policy);
    (database, store)
}

fn populated_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::default();
    let work = snapshot.create_project("Work", Some("day job"));
    let home = snapshot.create_project("Home", None);
    let standup = snapshot.create_note(&work.id, "Standup", "<p>done</p>\n<p>next</p>").expect("note");
    snapshot.create_note(&home.id, "", "groceries").expect("note");
    snapshot
        .update_note(
            &standup.id,
            NotePatch {
                title: Some("Daily standup".to_string()),
                content: None,
            },
        )
        .expect("update");
    snapshot.current_project_id = Some(work.id);
    snapshot.settings.github.owner = "octo".to_string();
    snapshot
}

#[test]
fn forced_backups_keep_the_five_newest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, store) = sqlite_store(&dir, BackupPolicy::always());

    let mut created = Vec::new();
    for save in 1..=7usize {
        let mut snapshot = populated_snapshot();
        snapshot.current_note_id = Some(format!("save-{}", save));
        let outcome = store.persist(&snapshot);
        assert!(outcome.saved);
        assert_eq!(outcome.backed_up, Some(true));
        created.push(store.list_backups()[0].clone());
        assert_eq!(store.list_backups().len(), save.min(MAX_BACKUPS));
    }

    let mut newest: Vec<String> = created.iter().rev().take(MAX_BACKUPS).cloned().collect();
    newest.sort_by(|a, b| b.cmp(a));
    assert_eq!(store.list_backups(), newest);

    let oldest_kept = store.restore_backup(&newest[MAX_BACKUPS - 1]).expect("restore");
    assert_eq!(oldest_kept.current_note_id.as_deref(), Some("save-3"));
    assert_eq!(store.load().expect("live snapshot"), oldest_kept);
}

#[test]
fn rejected_import_leaves_stored_snapshot_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (database, store) = sqlite_store(&dir, BackupPolicy::never());
    assert!(store.save(&populated_snapshot()));
    let before = database.get(SNAPSHOT_KEY).expect("get");

    let error = store
        .import_snapshot(r#"{"projects": "not-a-list"}"#)
        .expect_err("must reject");
    assert!(matches!(error, AppError::Format(_)));
    assert_eq!(database.get(SNAPSHOT_KEY).expect("get"), before);
}

#[test]
fn export_import_round_trip_is_deep_equal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, store) = sqlite_store(&dir, BackupPolicy::always());
    let snapshot = populated_snapshot();
    store.persist(&snapshot);

    let exported = store.export_snapshot(&snapshot).expect("export");
    assert_eq!(exported.file_name, "notepad-web-backup.json");
    assert_eq!(store.import_snapshot(&exported.contents).expect("import"), snapshot);
}

#[test]
fn import_rejects_inconsistent_references() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, store) = sqlite_store(&dir, BackupPolicy::never());
    let mut snapshot = populated_snapshot();
    snapshot.projects[1].notes[0].project_id = snapshot.projects[0].id.clone();
    let document = serde_json::to_string(&snapshot).expect("json");

    assert!(matches!(store.import_snapshot(&document), Err(AppError::Format(_))));
}

#[tokio::test]
async fn core_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let note_id = {
        let core = NotepadCore::open(dir.path()).expect("open");
        let project = core.create_project("Demo", None).await.expect("project");
        let note = core.create_note(&project.id, "Hello", "<p>Hi</p>").await.expect("note");
        core.update_note(
            &note.id,
            NotePatch {
                title: None,
                content: Some("<p>Hi</p>\n<p>there</p>".to_string()),
            },
        )
        .await
        .expect("update");
        note.id
    };
    assert!(dir.path().join(DATABASE_FILE).exists());

    let reopened = NotepadCore::open(dir.path()).expect("reopen");
    let snapshot = reopened.snapshot().await;
    let note = snapshot.find_note(&note_id).expect("note persisted");
    assert_eq!(note.content, "<p>Hi</p>\n<p>there</p>");
    assert_eq!(note.line_count(), 2);
}

#[tokio::test]
async fn clearing_data_keeps_backups_restorable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database = Arc::new(Database::new(&dir.path().join(DATABASE_FILE)).expect("database"));
    let core = NotepadCore::with_medium(database, BackupPolicy::always());
    let project = core.create_project("Demo", None).await.expect("project");

    assert!(core.clear_all_data().await);
    assert!(core.snapshot().await.projects.is_empty());
    assert!(!core.store().has_data());

    let backups = core.list_backups();
    assert_eq!(backups.len(), 1);
    let restored = core.restore_backup(&backups[0]).await.expect("restore");
    assert_eq!(restored.projects[0].id, project.id);
    assert_eq!(core.snapshot().await, restored);
    assert!(core.store().has_data());

    assert!(matches!(
        core.restore_backup("notepad-web-data-backup-missing").await,
        Err(AppError::NotFound(_))
    ));
}
