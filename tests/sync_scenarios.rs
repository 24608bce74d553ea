use async_trait::async_trait;
use notepad_sync_lib::errors::{AppError, AppResult};
use notepad_sync_lib::models::{NotePatch, Project, Snapshot};
use notepad_sync_lib::remote::memory::MemoryRepository;
use notepad_sync_lib::remote::{RemoteEntry, RemoteObject, RemoteRepository};
use notepad_sync_lib::sync::{PullOutcome, SyncEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lets another writer overwrite `target` right after the engine has read its token.
struct RacingRepository {
    inner: Arc<MemoryRepository>,
    target: String,
    raced: AtomicBool,
}

#[async_trait]
impl RemoteRepository for RacingRepository {
    async fn get(&self, path: &str) -> AppResult<Option<RemoteObject>> {
        let object = self.inner.get(path).await?;
        if path == self.target && !self.raced.swap(true, Ordering::SeqCst) {
            if let Some(current) = &object {
                self.inner
                    .put(path, "edited elsewhere", "concurrent edit", Some(&current.version))
                    .await?;
            }
        }
        Ok(object)
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_version: Option<&str>,
    ) -> AppResult<String> {
        self.inner.put(path, content, message, expected_version).await
    }

    async fn delete(&self, path: &str, message: &str, version: &str) -> AppResult<()> {
        self.inner.delete(path, message, version).await
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        self.inner.list(prefix).await
    }

    async fn check_access(&self) -> AppResult<()> {
        self.inner.check_access().await
    }
}

fn project_with_notes(name: &str, notes: &[(&str, &str)]) -> Project {
    let mut snapshot = Snapshot::default();
    let project = snapshot.create_project(name, None);
    for (title, content) in notes {
        snapshot.create_note(&project.id, title, content).expect("note");
    }
    snapshot.project(&project.id).cloned().expect("project")
}

#[tokio::test]
async fn push_then_pull_returns_the_note() {
    let repo = Arc::new(MemoryRepository::new());
    let engine = SyncEngine::new(repo.clone());
    let project = project_with_notes("Demo", &[("Hello", "<p>Hi</p>")]);

    let report = engine.push_project(&project).await.expect("push");
    assert_eq!(report.succeeded.len(), 1);

    let stored = repo
        .get("projects/demo/notes/hello.md")
        .await
        .expect("get")
        .expect("note object");
    assert!(stored.content.starts_with("---\nid: "));
    assert!(stored.content.contains("\ntitle: \"Hello\"\n"));
    assert!(stored.content.ends_with("---\n\n# Hello\n\n<p>Hi</p>"));

    let PullOutcome::Pulled(pulled) = engine.pull_project("demo").await.expect("pull") else {
        panic!("project should be present");
    };
    assert_eq!(pulled.project.notes.len(), 1);
    assert_eq!(pulled.project.notes[0].content, "<p>Hi</p>");
    assert_eq!(pulled.project.notes[0].title, "Hello");
    assert_eq!(pulled.project.notes[0].character_count(), 2);
}

#[tokio::test]
async fn stale_token_fails_one_note_and_the_push_continues() {
    let inner = Arc::new(MemoryRepository::new());
    let plain = SyncEngine::new(inner.clone());
    let mut project = project_with_notes("Demo", &[("First", "one"), ("Second", "two"), ("Third", "three")]);
    plain.push_project(&project).await.expect("initial push");

    let racing = Arc::new(RacingRepository {
        inner: inner.clone(),
        target: "projects/demo/notes/second.md".to_string(),
        raced: AtomicBool::new(false),
    });
    for note in &mut project.notes {
        note.set_content(&format!("{} edited", note.content), note.updated_at);
    }

    let report = SyncEngine::new(racing).push_project(&project).await.expect("push");
    assert_eq!(report.succeeded, vec![project.notes[0].id.clone(), project.notes[2].id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].note_id, project.notes[1].id);
    assert_eq!(report.failed[0].path, "projects/demo/notes/second.md");
    assert!(matches!(report.failed[0].error, AppError::Conflict(_)));

    let second = inner.get("projects/demo/notes/second.md").await.expect("get").expect("present");
    assert_eq!(second.content, "edited elsewhere");
    let third = inner.get("projects/demo/notes/third.md").await.expect("get").expect("present");
    assert!(third.content.ends_with("three edited"));
}

#[tokio::test]
async fn pulling_a_missing_project_is_skipped() {
    let engine = SyncEngine::new(Arc::new(MemoryRepository::new()));
    assert_eq!(engine.pull_project("missing").await.expect("pull"), PullOutcome::Skipped);
}

#[tokio::test]
async fn pull_all_without_projects_directory_is_empty() {
    let engine = SyncEngine::new(Arc::new(MemoryRepository::new()));
    let report = engine.pull_all().await.expect("pull all");
    assert!(report.projects.is_empty());
}

#[tokio::test]
async fn pull_all_returns_every_pushed_project() {
    let repo = Arc::new(MemoryRepository::new());
    let engine = SyncEngine::new(repo);
    let mut snapshot = Snapshot::default();
    for name in ["Alpha", "Beta Project", "Ωmega"] {
        let project = snapshot.create_project(name, None);
        let note = snapshot.create_note(&project.id, "Note", "body").expect("note");
        snapshot
            .update_note(
                &note.id,
                NotePatch {
                    title: Some(format!("{} note", name)),
                    content: None,
                },
            )
            .expect("rename");
    }
    for project in &snapshot.projects {
        assert!(engine.push_project(project).await.expect("push").is_complete());
    }

    let report = engine.pull_all().await.expect("pull all");
    let mut names: Vec<_> = report.projects.iter().map(|pulled| pulled.project.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["Alpha", "Beta Project", "Ωmega"]);
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn revoked_credentials_surface_as_auth_errors() {
    let repo = Arc::new(MemoryRepository::new());
    let engine = SyncEngine::new(repo.clone());
    let project = project_with_notes("Demo", &[("Hello", "x")]);
    engine.push_project(&project).await.expect("push");

    repo.revoke_access();
    assert!(matches!(engine.push_project(&project).await, Err(AppError::Auth(_))));
    assert!(matches!(engine.pull_project("demo").await, Err(AppError::Auth(_))));
}
