use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{now_millis, Note, NotePatch, Project, Settings, Snapshot};
use crate::remote::github::{GitHubConfig, GitHubRepository};
use crate::remote::RemoteRepository;
use crate::storage::{BackupPolicy, ExportDocument, PersistOutcome, SnapshotStore, StorageMedium};
use crate::sync::{project_paths, PushReport, SyncEngine};
use crate::template::render_template;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub const DATABASE_FILE: &str = "notepad.sqlite";
const KEYRING_SERVICE: &str = "notepad-sync";
const KEYRING_TOKEN_USER: &str = "github-token";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Projects whose metadata reached the remote.
    pub uploaded: usize,
    /// Projects read back from the remote and merged into local state.
    pub downloaded: usize,
    pub errors: Vec<String>,
}

/// Owns the live application state and everything that reads or writes it.
pub struct NotepadCore {
    state: RwLock<Snapshot>,
    store: SnapshotStore,
    keyring_lock: Arc<Mutex<()>>,
}

impl NotepadCore {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let database = Database::new(&data_dir.join(DATABASE_FILE))?;
        tracing::info!(path = %database.path().display(), "notepad storage opened");
        Ok(Self::with_medium(Arc::new(database), BackupPolicy::default()))
    }

    pub fn with_medium(medium: Arc<dyn StorageMedium>, backup_policy: BackupPolicy) -> Self {
        let store = SnapshotStore::with_policy(medium, backup_policy);
        let snapshot = store.load().unwrap_or_default();
        Self {
            state: RwLock::new(snapshot),
            store,
            keyring_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    pub async fn create_project(&self, name: &str, description: Option<&str>) -> AppResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Format("Project name is required".to_string()));
        }
        let description = description.map(str::trim).filter(|value| !value.is_empty());

        let mut state = self.state.write().await;
        let project = state.create_project(name, description);
        state.current_project_id = Some(project.id.clone());
        self.persist(&state);
        tracing::info!(project_id = %project.id, "project created");
        Ok(project)
    }

    pub async fn create_note(&self, project_id: &str, title: &str, content: &str) -> AppResult<Note> {
        let mut state = self.state.write().await;
        let note = state.create_note(project_id, title, content)?;
        self.persist(&state);
        tracing::info!(project_id = %project_id, note_id = %note.id, "note created");
        Ok(note)
    }

    pub async fn update_note(&self, note_id: &str, patch: NotePatch) -> AppResult<Note> {
        let mut state = self.state.write().await;
        let note = state.update_note(note_id, patch)?;
        self.persist(&state);
        Ok(note)
    }

    pub async fn delete_project(&self, project_id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.delete_project(project_id) {
            return false;
        }
        self.persist(&state);
        tracing::info!(project_id = %project_id, "project deleted");
        true
    }

    pub async fn delete_note(&self, note_id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.delete_note(note_id) {
            return false;
        }
        self.persist(&state);
        tracing::info!(note_id = %note_id, "note deleted");
        true
    }

    /// Deep-merges `patch` into the current settings.
    pub async fn update_settings(&self, patch: Value) -> AppResult<Settings> {
        let mut state = self.state.write().await;
        let mut merged = serde_json::to_value(&state.settings)?;
        merge_json(&mut merged, patch);
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|error| AppError::Format(format!("Invalid settings: {}", error)))?;
        state.settings = settings.clone();
        self.persist(&state);
        Ok(settings)
    }

    pub async fn export_data(&self) -> AppResult<ExportDocument> {
        let state = self.state.read().await;
        self.store.export_snapshot(&state)
    }

    /// Replaces the whole state with an exported document. Invalid documents leave
    /// the current state untouched.
    pub async fn import_data(&self, document: &str) -> AppResult<Snapshot> {
        let imported = self.store.import_snapshot(document)?;
        let mut state = self.state.write().await;
        *state = imported.clone();
        self.persist(&state);
        tracing::info!(projects = imported.projects.len(), "data imported");
        Ok(imported)
    }

    /// Drops the live snapshot. Backups stay restorable.
    pub async fn clear_all_data(&self) -> bool {
        let mut state = self.state.write().await;
        let cleared = self.store.clear();
        if cleared {
            *state = Snapshot::default();
        }
        cleared
    }

    pub async fn restore_backup(&self, key: &str) -> AppResult<Snapshot> {
        let mut state = self.state.write().await;
        let restored = self
            .store
            .restore_backup(key)
            .ok_or_else(|| AppError::NotFound(format!("Backup '{}' could not be restored", key)))?;
        *state = restored.clone();
        Ok(restored)
    }

    pub fn list_backups(&self) -> Vec<String> {
        self.store.list_backups()
    }

    /// Renders the note through the configured work-package template.
    pub async fn render_work_package(&self, note_id: &str) -> AppResult<String> {
        let state = self.state.read().await;
        let note = state
            .find_note(note_id)
            .ok_or_else(|| AppError::NotFound(format!("Note '{}' not found", note_id)))?;
        render_template(&state.settings.openproject.template, note)
    }

    pub async fn push_project(
        &self,
        project_id: &str,
        remote: Arc<dyn RemoteRepository>,
    ) -> AppResult<PushReport> {
        let (project, path) = {
            let state = self.state.read().await;
            let index = state
                .projects
                .iter()
                .position(|project| project.id == project_id)
                .ok_or_else(|| AppError::NotFound(format!("Project '{}' not found", project_id)))?;
            let path = project_paths(&state.projects).swap_remove(index);
            (state.projects[index].clone(), path)
        };

        let report = SyncEngine::new(remote).push_project_to(&project, &path).await?;
        self.mark_saved(&report.succeeded).await;
        Ok(report)
    }

    /// Pushes every local project, then pulls the whole remote tree and merges it back
    /// into local state.
    pub async fn sync_all(&self, remote: Arc<dyn RemoteRepository>) -> AppResult<SyncSummary> {
        let engine = SyncEngine::new(remote);
        let projects = self.state.read().await.projects.clone();
        let mut summary = SyncSummary::default();
        let mut saved_notes = Vec::new();

        for (project, path) in projects.iter().zip(project_paths(&projects)) {
            match engine.push_project_to(project, &path).await {
                Ok(report) => {
                    summary.uploaded += 1;
                    for failure in &report.failed {
                        summary
                            .errors
                            .push(format!("Failed to upload note {}: {}", failure.path, failure.error));
                    }
                    saved_notes.extend(report.succeeded);
                }
                Err(error) => summary
                    .errors
                    .push(format!("Failed to upload project {}: {}", project.name, error)),
            }
        }
        self.mark_saved(&saved_notes).await;

        let pulled = match engine.pull_all().await {
            Ok(report) => report,
            Err(error) => {
                summary.errors.push(format!("Failed to download projects: {}", error));
                tracing::warn!(error = %error, "sync stopped before download");
                return Ok(summary);
            }
        };
        for failure in &pulled.failed {
            summary
                .errors
                .push(format!("Failed to download project {}: {}", failure.name, failure.error));
        }

        let mut state = self.state.write().await;
        let mut next = state.clone();
        for entry in pulled.projects {
            for skipped in &entry.skipped_notes {
                summary
                    .errors
                    .push(format!("Skipped note {}: {}", skipped.path, skipped.reason));
            }
            let mut project = entry.project;
            let foreign = notes_owned_elsewhere(&next, &project.id);
            project.notes.retain(|note| {
                let owned_elsewhere = foreign.contains(note.id.as_str());
                if owned_elsewhere {
                    summary
                        .errors
                        .push(format!("Skipped note {}: it belongs to another project", note.id));
                }
                !owned_elsewhere
            });
            let merged = merge_pulled(next.project(&project.id), project);
            next.upsert_project(merged);
            summary.downloaded += 1;
        }

        // Pulled data is adopted all at once, and only if it leaves the state consistent.
        if let Err(error) = next.validate() {
            tracing::error!(error = %error, "pulled data rejected");
            summary.errors.push(format!("Downloaded data was not applied: {}", error));
            summary.downloaded = 0;
            return Ok(summary);
        }
        *state = next;
        self.persist(&state);

        tracing::info!(
            uploaded = summary.uploaded,
            downloaded = summary.downloaded,
            errors = summary.errors.len(),
            "sync finished"
        );
        Ok(summary)
    }

    pub async fn github_remote(&self) -> AppResult<Arc<dyn RemoteRepository>> {
        let settings = self.state.read().await.settings.github.clone();
        let token = self
            .read_github_token()
            .await?
            .ok_or_else(|| AppError::Auth("GitHub token is not configured".to_string()))?;
        let repository = GitHubRepository::new(GitHubConfig::from_settings(&settings, &token))?;
        Ok(Arc::new(repository))
    }

    pub async fn test_github_connection(&self) -> AppResult<()> {
        self.github_remote().await?.check_access().await
    }

    pub async fn save_github_token(&self, token: &str) -> AppResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Auth("GitHub token must not be empty".to_string()));
        }
        let _guard = self.keyring_lock.lock().await;
        token_entry()?
            .set_password(token)
            .map_err(|error| AppError::Io(error.to_string()))?;
        tracing::info!("GitHub token stored");
        Ok(())
    }

    pub async fn clear_github_token(&self) -> AppResult<()> {
        let _guard = self.keyring_lock.lock().await;
        match token_entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    pub async fn has_github_token(&self) -> AppResult<bool> {
        Ok(self.read_github_token().await?.is_some())
    }

    async fn read_github_token(&self) -> AppResult<Option<String>> {
        let _guard = self.keyring_lock.lock().await;
        match token_entry()?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    async fn mark_saved(&self, note_ids: &[String]) {
        if note_ids.is_empty() {
            return;
        }
        let saved: HashSet<&str> = note_ids.iter().map(String::as_str).collect();
        let now = now_millis();
        let mut state = self.state.write().await;
        for note in state.projects.iter_mut().flat_map(|project| project.notes.iter_mut()) {
            if saved.contains(note.id.as_str()) {
                note.last_saved = Some(now);
            }
        }
        self.persist(&state);
    }

    fn persist(&self, snapshot: &Snapshot) -> PersistOutcome {
        let outcome = self.store.persist(snapshot);
        if !outcome.saved {
            tracing::warn!("state change kept in memory only; snapshot save failed");
        }
        outcome
    }
}

fn token_entry() -> AppResult<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER).map_err(|error| AppError::Io(error.to_string()))
}

fn notes_owned_elsewhere(snapshot: &Snapshot, project_id: &str) -> HashSet<String> {
    snapshot
        .projects
        .iter()
        .filter(|project| project.id != project_id)
        .flat_map(|project| project.notes.iter().map(|note| note.id.clone()))
        .collect()
}

/// Keeps local notes the remote does not know about and their save stamps.
fn merge_pulled(local: Option<&Project>, mut pulled: Project) -> Project {
    let Some(local) = local else {
        return pulled;
    };
    for note in &mut pulled.notes {
        if let Some(existing) = local.note(&note.id) {
            note.last_saved = existing.last_saved;
        }
    }
    let remote_ids: HashSet<String> = pulled.notes.iter().map(|note| note.id.clone()).collect();
    pulled.notes.extend(
        local
            .notes
            .iter()
            .filter(|note| !remote_ids.contains(&note.id))
            .cloned(),
    );
    pulled
}

fn merge_json(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
