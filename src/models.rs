use crate::errors::{AppError, AppResult};
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

pub const DEFAULT_TEMPLATE: &str = "# {{title}}\n\n{{content}}";

/// Current time at the millisecond precision the note documents carry.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn strip_tags(content: &str) -> String {
    TAG_PATTERN.replace_all(content, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStats {
    pub characters: usize,
    pub lines: usize,
    pub bytes: usize,
}

impl NoteStats {
    pub fn measure(content: &str) -> Self {
        let plain = strip_tags(content);
        Self {
            characters: plain.chars().count(),
            lines: plain.matches('\n').count() + 1,
            bytes: content.len(),
        }
    }
}

/// A note. The counters are always derived from `content`; stored values are
/// ignored when a note is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredNote")]
pub struct Note {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_saved: Option<DateTime<Utc>>,
    character_count: usize,
    line_count: usize,
    file_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNote {
    id: String,
    project_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    last_saved: Option<DateTime<Utc>>,
}

impl From<StoredNote> for Note {
    fn from(stored: StoredNote) -> Self {
        let mut note = Self {
            id: stored.id,
            project_id: stored.project_id,
            title: stored.title,
            content: String::new(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            last_saved: stored.last_saved,
            character_count: 0,
            line_count: 0,
            file_size: 0,
        };
        note.apply_content(stored.content);
        note
    }
}

impl Note {
    pub fn new(project_id: &str, title: &str, content: &str, now: DateTime<Utc>) -> Self {
        let mut note = Self {
            id: new_id(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            last_saved: None,
            character_count: 0,
            line_count: 0,
            file_size: 0,
        };
        note.apply_content(content.to_string());
        note
    }

    pub fn character_count(&self) -> usize {
        self.character_count
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn set_content(&mut self, content: &str, now: DateTime<Utc>) {
        self.apply_content(content.to_string());
        self.updated_at = now;
    }

    pub fn set_title(&mut self, title: &str, now: DateTime<Utc>) {
        self.title = title.to_string();
        self.updated_at = now;
    }

    /// A note read back from a document. Counters are recomputed from `content`.
    pub(crate) fn restored(
        id: String,
        title: String,
        content: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut note = Self {
            id,
            project_id: String::new(),
            title,
            content: String::new(),
            created_at,
            updated_at,
            last_saved: None,
            character_count: 0,
            line_count: 0,
            file_size: 0,
        };
        note.apply_content(content);
        note
    }

    fn apply_content(&mut self, content: String) {
        let stats = NoteStats::measure(&content);
        self.character_count = stats.characters;
        self.line_count = stats.lines;
        self.file_size = stats.bytes;
        self.content = content;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Project {
    pub fn new(name: &str, description: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            description: description.map(ToString::to_string),
            created_at: now,
            updated_at: now,
            notes: Vec::new(),
        }
    }

    pub fn note(&self, note_id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == note_id)
    }

    pub fn manifest(&self) -> ProjectManifest {
        ProjectManifest {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            notes_count: self.notes.len(),
        }
    }
}

/// Contents of `project.json` in the remote tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes_count: usize,
}

impl ProjectManifest {
    pub fn into_project(self, notes: Vec<Note>) -> Project {
        let mut project = Project {
            id: self.id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            notes,
        };
        for note in &mut project.notes {
            note.project_id = project.id.clone();
        }
        project
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitHubSettings {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    /// Minutes between automatic saves.
    pub auto_save_interval: u32,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repository: String::new(),
            branch: "main".to_string(),
            auto_save_interval: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenProjectSettings {
    pub project_id: String,
    pub work_package_id: String,
    pub template: String,
    pub base_url: String,
}

impl Default for OpenProjectSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            work_package_id: String::new(),
            template: DEFAULT_TEMPLATE.to_string(),
            base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThemeSettings {
    pub mode: ThemeMode,
    pub primary_color: String,
    pub secondary_color: String,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        Self {
            mode: ThemeMode::Light,
            primary_color: "#000000".to_string(),
            secondary_color: "#666666".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub github: GitHubSettings,
    pub openproject: OpenProjectSettings,
    pub theme: ThemeSettings,
}

/// The whole local application state, persisted as one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub projects: Vec<Project>,
    #[serde(default)]
    pub current_project_id: Option<String>,
    #[serde(default)]
    pub current_note_id: Option<String>,
    #[serde(default)]
    pub settings: Settings,
}

impl Snapshot {
    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == project_id)
    }

    pub fn find_note(&self, note_id: &str) -> Option<&Note> {
        self.projects.iter().find_map(|project| project.note(note_id))
    }

    pub fn create_project(&mut self, name: &str, description: Option<&str>) -> Project {
        let project = Project::new(name, description, now_millis());
        self.projects.push(project.clone());
        project
    }

    /// Removes the project and every note it owns.
    pub fn delete_project(&mut self, project_id: &str) -> bool {
        let Some(index) = self.projects.iter().position(|project| project.id == project_id) else {
            return false;
        };
        let removed = self.projects.remove(index);
        if self.current_project_id.as_deref() == Some(project_id) {
            self.current_project_id = None;
        }
        let selected_removed = self
            .current_note_id
            .as_deref()
            .map(|current| removed.note(current).is_some())
            .unwrap_or(false);
        if selected_removed {
            self.current_note_id = None;
        }
        true
    }

    pub fn create_note(&mut self, project_id: &str, title: &str, content: &str) -> AppResult<Note> {
        let project = self
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
            .ok_or_else(|| AppError::NotFound(format!("Project '{}' not found", project_id)))?;

        let now = now_millis();
        let title = if title.trim().is_empty() {
            now.format("%d/%m/%Y %H:%M").to_string()
        } else {
            title.to_string()
        };
        let note = Note::new(project_id, &title, content, now);
        project.notes.push(note.clone());
        project.updated_at = now;
        self.current_note_id = Some(note.id.clone());
        Ok(note)
    }

    pub fn update_note(&mut self, note_id: &str, patch: NotePatch) -> AppResult<Note> {
        let now = now_millis();
        for project in &mut self.projects {
            if let Some(note) = project.notes.iter_mut().find(|note| note.id == note_id) {
                if let Some(title) = patch.title.as_deref() {
                    note.set_title(title, now);
                }
                if let Some(content) = patch.content.as_deref() {
                    note.set_content(content, now);
                }
                note.updated_at = now;
                project.updated_at = now;
                return Ok(note.clone());
            }
        }
        Err(AppError::NotFound(format!("Note '{}' not found", note_id)))
    }

    pub fn delete_note(&mut self, note_id: &str) -> bool {
        let mut removed = false;
        for project in &mut self.projects {
            let before = project.notes.len();
            project.notes.retain(|note| note.id != note_id);
            removed |= project.notes.len() != before;
        }
        if removed && self.current_note_id.as_deref() == Some(note_id) {
            self.current_note_id = None;
        }
        removed
    }

    /// Replaces the project with the same id, or appends it.
    pub fn upsert_project(&mut self, mut project: Project) {
        for note in &mut project.notes {
            note.project_id = project.id.clone();
        }
        match self.projects.iter_mut().find(|existing| existing.id == project.id) {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut project_ids = HashSet::new();
        let mut note_ids = HashSet::new();
        for project in &self.projects {
            if !project_ids.insert(project.id.as_str()) {
                return Err(AppError::Format(format!("Duplicate project id '{}'", project.id)));
            }
            for note in &project.notes {
                if note.project_id != project.id {
                    return Err(AppError::Format(format!(
                        "Note '{}' references project '{}' but is stored under '{}'",
                        note.id, note.project_id, project.id
                    )));
                }
                if !note_ids.insert(note.id.as_str()) {
                    return Err(AppError::Format(format!("Duplicate note id '{}'", note.id)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_ignore_markup() {
        let stats = NoteStats::measure("<p>Hi</p>\n<p>there</p>");
        assert_eq!(stats.characters, "Hi\nthere".chars().count());
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.bytes, "<p>Hi</p>\n<p>there</p>".len());

        let empty = NoteStats::measure("");
        assert_eq!(empty.characters, 0);
        assert_eq!(empty.lines, 1);
    }

    #[test]
    fn stats_count_characters_not_bytes() {
        let stats = NoteStats::measure("<b>ação</b>");
        assert_eq!(stats.characters, 4);
        assert_eq!(stats.bytes, "<b>ação</b>".len());
    }

    #[test]
    fn content_updates_recompute_counters() {
        let mut snapshot = Snapshot::default();
        let project = snapshot.create_project("Demo", None);
        let note = snapshot.create_note(&project.id, "Hello", "<p>Hi</p>").expect("note created");
        assert_eq!(note.character_count(), 2);
        assert_eq!(note.line_count(), 1);

        let updated = snapshot
            .update_note(
                &note.id,
                NotePatch {
                    title: None,
                    content: Some("one\ntwo\nthree".to_string()),
                },
            )
            .expect("note updated");
        assert_eq!(updated.character_count(), 13);
        assert_eq!(updated.line_count(), 3);
        assert_eq!(updated.file_size(), 13);
        assert!(updated.updated_at >= note.updated_at);
    }

    #[test]
    fn create_note_requires_existing_project() {
        let mut snapshot = Snapshot::default();
        let error = snapshot.create_note("missing", "t", "c").expect_err("must fail");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn empty_title_defaults_to_timestamp() {
        let mut snapshot = Snapshot::default();
        let project = snapshot.create_project("Demo", None);
        let note = snapshot.create_note(&project.id, "  ", "").expect("note created");
        assert_eq!(note.title.len(), "17/10/2026 12:00".len());
        assert!(note.title.contains('/'));
    }

    #[test]
    fn deleting_project_cascades_to_notes_and_selection() {
        let mut snapshot = Snapshot::default();
        let keep = snapshot.create_project("Keep", None);
        let drop = snapshot.create_project("Drop", Some("goes away"));
        let kept_note = snapshot.create_note(&keep.id, "a", "").expect("note");
        let dropped_note = snapshot.create_note(&drop.id, "b", "").expect("note");
        snapshot.current_project_id = Some(drop.id.clone());

        assert!(snapshot.delete_project(&drop.id));
        assert!(snapshot.find_note(&dropped_note.id).is_none());
        assert!(snapshot.find_note(&kept_note.id).is_some());
        assert!(snapshot.current_project_id.is_none());
        assert!(snapshot.current_note_id.is_none());
        assert!(!snapshot.delete_project(&drop.id));
    }

    #[test]
    fn ids_are_unique_and_validate_passes() {
        let mut snapshot = Snapshot::default();
        let project = snapshot.create_project("Demo", None);
        for index in 0..20 {
            snapshot
                .create_note(&project.id, &format!("n{}", index), "x")
                .expect("note");
        }
        snapshot.validate().expect("consistent snapshot");
    }

    #[test]
    fn validate_rejects_foreign_key_mismatch() {
        let mut snapshot = Snapshot::default();
        let project = snapshot.create_project("Demo", None);
        snapshot.create_note(&project.id, "n", "x").expect("note");
        snapshot.projects[0].notes[0].project_id = "elsewhere".to_string();
        assert!(matches!(snapshot.validate(), Err(AppError::Format(_))));
    }

    #[test]
    fn upsert_replaces_by_id_and_repoints_notes() {
        let mut snapshot = Snapshot::default();
        let mut project = snapshot.create_project("Demo", None);
        project.name = "Renamed".to_string();
        project.notes.push(Note::new("stale", "t", "c", now_millis()));

        snapshot.upsert_project(project.clone());
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.projects[0].name, "Renamed");
        assert_eq!(snapshot.projects[0].notes[0].project_id, project.id);
    }

    #[test]
    fn stored_counters_are_recomputed_on_load() {
        let raw = r#"{"id":"n1","projectId":"p1","title":"t","content":"<p>two</p>\n<p>lines</p>",
            "createdAt":"2026-10-17T09:30:00.000Z","updatedAt":"2026-10-17T09:30:00.000Z",
            "characterCount":999,"lineCount":42,"fileSize":1}"#;
        let note: Note = serde_json::from_str(raw).expect("note");
        assert_eq!(note.character_count(), "two\nlines".chars().count());
        assert_eq!(note.line_count(), 2);
        assert_eq!(note.file_size(), "<p>two</p>\n<p>lines</p>".len());

        let reserialized = serde_json::to_value(&note).expect("json");
        assert_eq!(reserialized["characterCount"], 9);
        assert_eq!(reserialized["lineCount"], 2);
    }

    #[test]
    fn snapshot_deserializes_with_missing_settings() {
        let raw = r#"{"projects":[]}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).expect("snapshot");
        assert_eq!(snapshot.settings.github.branch, "main");
        assert_eq!(snapshot.settings.openproject.template, DEFAULT_TEMPLATE);
    }
}
