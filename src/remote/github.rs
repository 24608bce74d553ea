//! GitHub contents API client.

use super::{normalize_path, EntryKind, RemoteEntry, RemoteObject, RemoteRepository};
use crate::errors::{AppError, AppResult};
use crate::models::GitHubSettings;
use crate::redaction::Redactor;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("notepad-sync/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub token: String,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("token", &if self.token.is_empty() { "<missing>" } else { "<set>" })
            .finish()
    }
}

impl GitHubConfig {
    pub fn from_settings(settings: &GitHubSettings, token: &str) -> Self {
        let branch = if settings.branch.trim().is_empty() {
            "main".to_string()
        } else {
            settings.branch.trim().to_string()
        };
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: settings.owner.trim().to_string(),
            repository: settings.repository.trim().to_string(),
            branch,
            token: token.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: Option<WrittenContent>,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

pub struct GitHubRepository {
    config: GitHubConfig,
    client: reqwest::Client,
    redactor: Redactor,
}

impl GitHubRepository {
    pub fn new(config: GitHubConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| AppError::Internal(format!("Failed to build HTTP client: {}", error)))?;
        let redactor = Redactor::new().with_secret(&config.token);
        Ok(Self {
            config,
            client,
            redactor,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn ensure_configured(&self) -> AppResult<()> {
        if self.config.token.is_empty() {
            return Err(AppError::Auth("GitHub token is not configured".to_string()));
        }
        if self.config.owner.is_empty() || self.config.repository.is_empty() {
            return Err(AppError::Auth(
                "GitHub owner and repository must be configured".to_string(),
            ));
        }
        Ok(())
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repository,
            normalize_path(path)
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
    }

    /// Contents listing or file body at `path`; `None` on 404.
    async fn fetch_contents(&self, path: &str) -> AppResult<Option<Value>> {
        self.ensure_configured()?;
        let url = format!("{}?ref={}", self.contents_url(path), self.config.branch);
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.classify(status, response).await);
        }
        read_json(response).await.map(Some)
    }

    async fn classify(&self, status: StatusCode, response: Response) -> AppError {
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &self.redactor.redact(&body))
    }
}

#[async_trait]
impl RemoteRepository for GitHubRepository {
    async fn get(&self, path: &str) -> AppResult<Option<RemoteObject>> {
        let Some(value) = self.fetch_contents(path).await? else {
            return Ok(None);
        };
        if value.is_array() {
            return Err(AppError::Format(format!("{} is a directory, not a file", path)));
        }
        let file: ContentFile = serde_json::from_value(value)?;
        let content = match (file.encoding.as_deref(), file.content.as_deref()) {
            (Some("base64"), Some(raw)) => decode_content(raw)?,
            (None, Some(raw)) => decode_content(raw)?,
            _ => {
                return Err(AppError::Format(format!(
                    "{} has no inline content (encoding {:?})",
                    file.path, file.encoding
                )))
            }
        };
        Ok(Some(RemoteObject {
            path: file.path,
            content,
            version: file.sha,
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_version: Option<&str>,
    ) -> AppResult<String> {
        self.ensure_configured()?;
        let body = PutBody {
            message,
            content: base64::engine::general_purpose::STANDARD.encode(content),
            branch: &self.config.branch,
            sha: expected_version,
        };
        let response = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(match self.classify(status, response).await {
                AppError::NotFound(detail) if expected_version.is_some() => AppError::Conflict(format!(
                    "{} vanished before the update: {}",
                    path, detail
                )),
                error => error,
            });
        }
        let written: WriteResponse = read_json(response).await?;
        written
            .content
            .map(|content| content.sha)
            .ok_or_else(|| AppError::Format(format!("Write response for {} carried no sha", path)))
    }

    async fn delete(&self, path: &str, message: &str, version: &str) -> AppResult<()> {
        self.ensure_configured()?;
        let body = DeleteBody {
            message,
            sha: version,
            branch: &self.config.branch,
        };
        let response = self
            .authorized(self.client.delete(self.contents_url(path)))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.classify(status, response).await);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        let value = self
            .fetch_contents(prefix)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} does not exist", prefix)))?;
        if !value.is_array() {
            return Err(AppError::Format(format!("{} is a file, not a directory", prefix)));
        }
        let entries: Vec<ContentEntry> = serde_json::from_value(value)?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let kind = match entry.kind.as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    _ => return None,
                };
                Some(RemoteEntry {
                    name: entry.name,
                    path: entry.path,
                    kind,
                    version: Some(entry.sha),
                })
            })
            .collect())
    }

    async fn check_access(&self) -> AppResult<()> {
        self.ensure_configured()?;
        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repository
        );
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.classify(status, response).await);
        }
        Ok(())
    }
}

/// Transport failures stay `Network`; a body that is not the expected JSON is `Format`.
async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> AppResult<T> {
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|error| AppError::Format(format!("Unexpected GitHub response body: {}", error)))
}

fn decode_content(raw: &str) -> AppResult<String> {
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    String::from_utf8(bytes).map_err(|error| AppError::Format(format!("Remote content is not UTF-8: {}", error)))
}

fn classify_status(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());
    let detail = format!("HTTP {}: {}", status.as_u16(), message);
    match status.as_u16() {
        401 | 403 => AppError::Auth(detail),
        404 => AppError::NotFound(detail),
        409 | 412 => AppError::Conflict(detail),
        422 if message.to_ascii_lowercase().contains("sha") => AppError::Conflict(detail),
        422 => AppError::Format(detail),
        _ => AppError::Network(detail),
    }
}
