use super::{normalize_path, EntryKind, RemoteEntry, RemoteObject, RemoteRepository};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredObject {
    content: String,
    version: String,
}

/// In-process remote tree with the same token rules as the hosted one.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    revision: AtomicU64,
    revoked: AtomicBool,
    writes: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails with `AppError::Auth`.
    pub fn revoke_access(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Number of successful `put` and `delete` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn objects(&self) -> AppResult<std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>>> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(AppError::Auth("Bad credentials".to_string()));
        }
        self.objects
            .lock()
            .map_err(|_| AppError::Internal("memory repository mutex poisoned".to_string()))
    }

    fn next_version(&self) -> String {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        format!("rev-{:08}", revision)
    }
}

#[async_trait]
impl RemoteRepository for MemoryRepository {
    async fn get(&self, path: &str) -> AppResult<Option<RemoteObject>> {
        let path = normalize_path(path);
        let objects = self.objects()?;
        Ok(objects.get(&path).map(|stored| RemoteObject {
            path: path.clone(),
            content: stored.content.clone(),
            version: stored.version.clone(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        expected_version: Option<&str>,
    ) -> AppResult<String> {
        let path = normalize_path(path);
        let mut objects = self.objects()?;
        match (objects.get(&path), expected_version) {
            (Some(current), Some(expected)) if current.version != expected => {
                return Err(AppError::Conflict(format!(
                    "{} is at {} but the write expected {}",
                    path, current.version, expected
                )));
            }
            (Some(current), None) => {
                return Err(AppError::Conflict(format!(
                    "{} already exists at {}; a version token is required to replace it",
                    path, current.version
                )));
            }
            (None, Some(expected)) => {
                return Err(AppError::Conflict(format!(
                    "{} no longer exists but the write expected {}",
                    path, expected
                )));
            }
            _ => {}
        }
        let version = self.next_version();
        objects.insert(
            path,
            StoredObject {
                content: content.to_string(),
                version: version.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }

    async fn delete(&self, path: &str, _message: &str, version: &str) -> AppResult<()> {
        let path = normalize_path(path);
        let mut objects = self.objects()?;
        let Some(current) = objects.get(&path) else {
            return Err(AppError::NotFound(format!("{} does not exist", path)));
        };
        if current.version != version {
            return Err(AppError::Conflict(format!(
                "{} is at {} but the delete expected {}",
                path, current.version, version
            )));
        }
        objects.remove(&path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        let prefix = normalize_path(prefix);
        let objects = self.objects()?;
        let scope = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        for (path, stored) in objects.iter() {
            let Some(rest) = path.strip_prefix(scope.as_str()) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => RemoteEntry {
                    name: dir.to_string(),
                    path: format!("{}{}", scope, dir),
                    kind: EntryKind::Dir,
                    version: None,
                },
                None => RemoteEntry {
                    name: rest.to_string(),
                    path: path.clone(),
                    kind: EntryKind::File,
                    version: Some(stored.version.clone()),
                },
            };
            entries.entry(entry.name.clone()).or_insert(entry);
        }

        if entries.is_empty() && !prefix.is_empty() {
            return Err(AppError::NotFound(format!("{} does not exist", prefix)));
        }
        Ok(entries.into_values().collect())
    }

    async fn check_access(&self) -> AppResult<()> {
        self.objects().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_object_is_absent() {
        let repo = MemoryRepository::new();
        assert!(repo.get("projects/demo/project.json").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn put_requires_current_token_to_update() {
        let repo = MemoryRepository::new();
        let first = repo.put("a.md", "one", "create", None).await.expect("create");

        let error = repo.put("a.md", "two", "blind", None).await.expect_err("must conflict");
        assert!(matches!(error, AppError::Conflict(_)));

        let second = repo.put("a.md", "two", "update", Some(&first)).await.expect("update");
        assert_ne!(first, second);

        let stale = repo.put("a.md", "three", "stale", Some(&first)).await.expect_err("stale");
        assert!(matches!(stale, AppError::Conflict(_)));

        let current = repo.get("a.md").await.expect("get").expect("exists");
        assert_eq!(current.content, "two");
        assert_eq!(current.version, second);
    }

    #[tokio::test]
    async fn delete_checks_presence_and_token() {
        let repo = MemoryRepository::new();
        let missing = repo.delete("x.md", "rm", "rev-1").await.expect_err("absent");
        assert!(matches!(missing, AppError::NotFound(_)));

        let version = repo.put("x.md", "x", "create", None).await.expect("create");
        let stale = repo.delete("x.md", "rm", "rev-999").await.expect_err("stale");
        assert!(matches!(stale, AppError::Conflict(_)));

        repo.delete("x.md", "rm", &version).await.expect("delete");
        assert!(repo.get("x.md").await.expect("get").is_none());
        assert_eq!(repo.write_count(), 2);
    }

    #[tokio::test]
    async fn list_returns_immediate_children() {
        let repo = MemoryRepository::new();
        repo.put("projects/a/project.json", "{}", "m", None).await.expect("put");
        repo.put("projects/a/notes/n1.md", "n", "m", None).await.expect("put");
        repo.put("projects/b/project.json", "{}", "m", None).await.expect("put");
        repo.put("readme.md", "r", "m", None).await.expect("put");

        let projects = repo.list("projects").await.expect("list");
        let names: Vec<_> = projects.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(projects.iter().all(|entry| entry.kind == EntryKind::Dir));
        assert_eq!(projects[0].path, "projects/a");

        let inner = repo.list("/projects/a/").await.expect("list");
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].name, "notes");
        assert_eq!(inner[1].kind, EntryKind::File);
        assert_eq!(inner[1].path, "projects/a/project.json");

        let missing = repo.list("projects/zzz").await.expect_err("missing dir");
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn revoked_access_fails_every_operation() {
        let repo = MemoryRepository::new();
        let version = repo.put("a.md", "a", "m", None).await.expect("put");
        repo.revoke_access();

        assert!(matches!(repo.get("a.md").await, Err(AppError::Auth(_))));
        assert!(matches!(repo.put("a.md", "b", "m", Some(&version)).await, Err(AppError::Auth(_))));
        assert!(matches!(repo.delete("a.md", "m", &version).await, Err(AppError::Auth(_))));
        assert!(matches!(repo.list("").await, Err(AppError::Auth(_))));
        assert!(matches!(repo.check_access().await, Err(AppError::Auth(_))));
    }
}
