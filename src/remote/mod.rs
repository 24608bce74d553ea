pub mod github;
pub mod memory;

use crate::errors::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub path: String,
    pub content: String,
    /// Token identifying exactly this revision of the object.
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub version: Option<String>,
}

/// Path-addressed file tree with optimistic, token-checked writes.
///
/// Every call is a single attempt. `get` reports a missing object as `Ok(None)`;
/// everything else that goes wrong comes back as a typed `AppError`.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn get(&self, path: &str) -> AppResult<Option<RemoteObject>>;

    /// Creates the object when `expected_version` is `None`, otherwise replaces the
    /// revision named by it. Returns the new version token.
    async fn put(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_version: Option<&str>,
    ) -> AppResult<String>;

    async fn delete(&self, path: &str, message: &str, version: &str) -> AppResult<()>;

    /// Immediate children of the directory at `prefix`. A directory that does not
    /// exist is `AppError::NotFound`.
    async fn list(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>>;

    async fn check_access(&self) -> AppResult<()>;
}

pub(crate) fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}
