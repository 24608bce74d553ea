use crate::codec;
use crate::errors::{AppError, AppResult};
use crate::models::{Note, Project, ProjectManifest};
use crate::remote::{EntryKind, RemoteRepository};
use crate::slug;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const PROJECTS_DIR: &str = "projects";
pub const MANIFEST_FILE: &str = "project.json";
pub const NOTES_DIR: &str = "notes";
const NOTE_EXTENSION: &str = ".md";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFailure {
    pub note_id: String,
    pub path: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: AppError,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub project_id: String,
    pub project_path: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<NoteFailure>,
    /// Files left behind by renamed notes and deleted during this push.
    pub removed: Vec<String>,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedNote {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledProject {
    pub project: Project,
    pub skipped_notes: Vec<SkippedNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PullOutcome {
    Pulled(PulledProject),
    /// No `project.json` under the project's path.
    Skipped,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFailure {
    pub name: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: AppError,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullAllReport {
    pub projects: Vec<PulledProject>,
    pub skipped: Vec<String>,
    pub failed: Vec<ProjectFailure>,
}

fn serialize_error<S: serde::Serializer>(error: &AppError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

pub fn project_path(project: &Project) -> String {
    format!(
        "{}/{}",
        PROJECTS_DIR,
        slug::sanitize_or(&[&project.name, &project.id], "project")
    )
}

/// Remote directory for every project, in order. A slug already taken by an earlier
/// project gets the project id appended.
pub fn project_paths(projects: &[Project]) -> Vec<String> {
    let mut taken = HashSet::new();
    projects
        .iter()
        .map(|project| {
            let base = project_path(project);
            unique_name(&mut taken, base, &project.id)
        })
        .collect()
}

fn unique_name(taken: &mut HashSet<String>, base: String, id: &str) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let id_slug = slug::sanitize_or(&[id], "item");
    let mut candidate = format!("{}-{}", base, id_slug);
    let mut counter = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{}-{}-{}", base, id_slug, counter);
        counter += 1;
    }
    candidate
}

/// File name for every note of the project, in note order. A slug already taken by
/// an earlier note gets the note id appended.
pub fn note_file_names(project: &Project) -> Vec<String> {
    let mut taken = HashSet::new();
    project
        .notes
        .iter()
        .map(|note| {
            let base = slug::sanitize_or(&[&note.title, &note.id], "note");
            format!("{}{}", unique_name(&mut taken, base, &note.id), NOTE_EXTENSION)
        })
        .collect()
}

/// Moves projects between local state and a [`RemoteRepository`].
///
/// Remote calls are issued one at a time, each awaited before the next, and the
/// version token for a write is always fetched right before it.
#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteRepository>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteRepository>) -> Self {
        Self { remote }
    }

    pub async fn push_project(&self, project: &Project) -> AppResult<PushReport> {
        self.push_project_to(project, &project_path(project)).await
    }

    /// Pushes into an explicit directory, as chosen by [`project_paths`].
    pub async fn push_project_to(&self, project: &Project, project_path: &str) -> AppResult<PushReport> {
        let project_path = project_path.to_string();
        let manifest_path = format!("{}/{}", project_path, MANIFEST_FILE);
        let manifest = serde_json::to_string_pretty(&project.manifest())?;

        // Metadata is last-write-wins: whatever token is current gets replaced.
        let current = self.remote.get(&manifest_path).await?;
        self.remote
            .put(
                &manifest_path,
                &manifest,
                &format!("Update project: {}", project.name),
                current.as_ref().map(|object| object.version.as_str()),
            )
            .await?;
        tracing::info!(project_id = %project.id, path = %manifest_path, "project metadata pushed");

        let mut report = PushReport {
            project_id: project.id.clone(),
            project_path: project_path.clone(),
            ..PushReport::default()
        };
        let note_paths: Vec<String> = note_file_names(project)
            .into_iter()
            .map(|file_name| format!("{}/{}/{}", project_path, NOTES_DIR, file_name))
            .collect();
        for (note, path) in project.notes.iter().zip(note_paths.iter().cloned()) {
            match self.push_note(note, &path).await {
                Ok(version) => {
                    tracing::debug!(note_id = %note.id, path = %path, version = %version, "note pushed");
                    report.succeeded.push(note.id.clone());
                }
                Err(error) => {
                    tracing::warn!(note_id = %note.id, path = %path, error = %error, "note push failed");
                    report.failed.push(NoteFailure {
                        note_id: note.id.clone(),
                        path,
                        error,
                    });
                }
            }
        }

        report.removed = self
            .remove_stale_notes(&project_path, &note_paths, &report.succeeded)
            .await;

        tracing::info!(
            project_id = %project.id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            "project push finished"
        );
        Ok(report)
    }

    /// Deletes note files that hold a just-pushed note under a name the note no longer
    /// has. Files of any other note are left alone. Failures here are logged; the
    /// notes themselves are already pushed.
    async fn remove_stale_notes(&self, project_path: &str, current: &[String], pushed: &[String]) -> Vec<String> {
        let notes_path = format!("{}/{}", project_path, NOTES_DIR);
        let entries = match self.remote.list(&notes_path).await {
            Ok(entries) => entries,
            Err(AppError::NotFound(_)) => return Vec::new(),
            Err(error) => {
                tracing::warn!(path = %notes_path, error = %error, "could not list notes for cleanup");
                return Vec::new();
            }
        };

        let pushed: HashSet<&str> = pushed.iter().map(String::as_str).collect();
        let mut removed = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::File || current.contains(&entry.path) {
                continue;
            }
            let Some(stem) = entry.name.strip_suffix(NOTE_EXTENSION) else {
                continue;
            };
            let object = match self.remote.get(&entry.path).await {
                Ok(Some(object)) => object,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(path = %entry.path, error = %error, "could not read note for cleanup");
                    continue;
                }
            };
            let stale = codec::decode(&object.content, stem);
            if !pushed.contains(stale.id.as_str()) {
                continue;
            }
            match self
                .remote
                .delete(&entry.path, &format!("Remove renamed note: {}", stale.title), &object.version)
                .await
            {
                Ok(()) => {
                    tracing::info!(note_id = %stale.id, path = %entry.path, "stale note file removed");
                    removed.push(entry.path);
                }
                Err(error) => {
                    tracing::warn!(note_id = %stale.id, path = %entry.path, error = %error, "stale note file not removed");
                }
            }
        }
        removed
    }

    async fn push_note(&self, note: &Note, path: &str) -> AppResult<String> {
        let current = self.remote.get(path).await?;
        let document = codec::encode(note);
        self.remote
            .put(
                path,
                &document,
                &format!("Update note: {}", note.title),
                current.as_ref().map(|object| object.version.as_str()),
            )
            .await
    }

    pub async fn pull_project(&self, name: &str) -> AppResult<PullOutcome> {
        let project_slug = slug::sanitize(name);
        if project_slug.is_empty() {
            tracing::warn!(name = %name, "project name has no usable path segment");
            return Ok(PullOutcome::Skipped);
        }
        let project_path = format!("{}/{}", PROJECTS_DIR, project_slug);
        let manifest_path = format!("{}/{}", project_path, MANIFEST_FILE);

        let Some(manifest_object) = self.remote.get(&manifest_path).await? else {
            tracing::info!(path = %manifest_path, "no project metadata; skipping");
            return Ok(PullOutcome::Skipped);
        };
        let manifest: ProjectManifest = serde_json::from_str(&manifest_object.content).map_err(|error| {
            AppError::Format(format!("{} is not valid project metadata: {}", manifest_path, error))
        })?;

        let notes_path = format!("{}/{}", project_path, NOTES_DIR);
        let entries = match self.remote.list(&notes_path).await {
            Ok(entries) => entries,
            Err(AppError::NotFound(_)) => Vec::new(),
            Err(error) => return Err(error),
        };

        let mut notes: Vec<(String, Note)> = Vec::new();
        let mut skipped_notes = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::File {
                continue;
            }
            let Some(stem) = entry.name.strip_suffix(NOTE_EXTENSION) else {
                continue;
            };
            match self.remote.get(&entry.path).await {
                Ok(Some(object)) => notes.push((entry.path, codec::decode(&object.content, stem))),
                Ok(None) => {
                    tracing::warn!(path = %entry.path, "note disappeared between list and get");
                    skipped_notes.push(SkippedNote {
                        path: entry.path,
                        reason: "note no longer exists".to_string(),
                    });
                }
                Err(AppError::Format(detail)) => {
                    tracing::warn!(path = %entry.path, error = %detail, "note could not be decoded");
                    skipped_notes.push(SkippedNote {
                        path: entry.path,
                        reason: detail,
                    });
                }
                Err(error) => return Err(error),
            }
        }

        let notes = keep_newest_per_id(notes, &mut skipped_notes);
        let project = manifest.into_project(notes);
        tracing::info!(
            project_id = %project.id,
            notes = project.notes.len(),
            skipped = skipped_notes.len(),
            "project pulled"
        );
        Ok(PullOutcome::Pulled(PulledProject {
            project,
            skipped_notes,
        }))
    }

    pub async fn pull_all(&self) -> AppResult<PullAllReport> {
        let entries = match self.remote.list(PROJECTS_DIR).await {
            Ok(entries) => entries,
            Err(AppError::NotFound(_)) => {
                tracing::info!("remote has no projects directory");
                return Ok(PullAllReport::default());
            }
            Err(error) => return Err(error),
        };

        let mut report = PullAllReport::default();
        let mut directories: Vec<String> = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.kind == EntryKind::Dir) {
            match self.pull_project(&entry.name).await {
                Ok(PullOutcome::Pulled(pulled)) => {
                    let existing = report
                        .projects
                        .iter()
                        .position(|kept| kept.project.id == pulled.project.id);
                    let Some(index) = existing else {
                        directories.push(entry.name);
                        report.projects.push(pulled);
                        continue;
                    };
                    // Same project under two directories: the newer metadata wins.
                    tracing::warn!(project_id = %pulled.project.id, name = %entry.name, "project found in more than one directory");
                    let ignored = if pulled.project.updated_at > report.projects[index].project.updated_at {
                        report.projects[index] = pulled;
                        std::mem::replace(&mut directories[index], entry.name)
                    } else {
                        entry.name
                    };
                    report.skipped.push(ignored);
                }
                Ok(PullOutcome::Skipped) => report.skipped.push(entry.name),
                Err(error @ (AppError::Auth(_) | AppError::Network(_))) => return Err(error),
                Err(error) => {
                    tracing::warn!(name = %entry.name, error = %error, "project pull failed");
                    report.failed.push(ProjectFailure {
                        name: entry.name,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Collapses notes that share an id, keeping the most recently updated copy in the
/// position of the first one seen.
fn keep_newest_per_id(notes: Vec<(String, Note)>, skipped: &mut Vec<SkippedNote>) -> Vec<Note> {
    let mut kept: Vec<(String, Note)> = Vec::with_capacity(notes.len());
    for (path, note) in notes {
        let Some(index) = kept.iter().position(|(_, existing)| existing.id == note.id) else {
            kept.push((path, note));
            continue;
        };
        let (dropped_path, dropped) = if note.updated_at > kept[index].1.updated_at {
            std::mem::replace(&mut kept[index], (path, note))
        } else {
            (path, note)
        };
        tracing::warn!(note_id = %dropped.id, path = %dropped_path, "older copy of note ignored");
        skipped.push(SkippedNote {
            path: dropped_path,
            reason: format!("older copy of note {}", dropped.id),
        });
    }
    kept.into_iter().map(|(_, note)| note).collect()
}
