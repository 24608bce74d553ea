use crate::errors::{AppError, AppResult};
use crate::models::Snapshot;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const SNAPSHOT_KEY: &str = "notepad-web-data";
pub const BACKUP_PREFIX: &str = "notepad-web-data-backup-";
pub const MAX_BACKUPS: usize = 5;
pub const EXPORT_FILE_NAME: &str = "notepad-web-backup.json";

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Flat key/value namespace the snapshot store persists into.
pub trait StorageMedium: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryMedium {
    entries: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `set` and `remove` fail, as a full or read-only medium would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn entries(&self) -> AppResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("memory medium mutex poisoned".to_string()))
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Io("storage medium rejected the write".to_string()));
        }
        Ok(())
    }
}

impl StorageMedium for MemoryMedium {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.check_writable()?;
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.check_writable()?;
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Chance that a persisted write also produces a backup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackupPolicy {
    probability: f64,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self { probability: 0.1 }
    }
}

impl BackupPolicy {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn always() -> Self {
        Self::new(1.0)
    }

    pub fn never() -> Self {
        Self::new(0.0)
    }

    pub fn should_backup(&self) -> bool {
        if self.probability >= 1.0 {
            return true;
        }
        if self.probability <= 0.0 {
            return false;
        }
        rand::random::<f64>() < self.probability
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub saved: bool,
    /// `None` when no backup was attempted.
    pub backed_up: Option<bool>,
}

/// Live snapshot plus rotating backups over a [`StorageMedium`].
///
/// Write failures never escape as errors: they are logged and reported as `false`
/// so that a broken medium cannot take the editing session down with it.
#[derive(Clone)]
pub struct SnapshotStore {
    medium: Arc<dyn StorageMedium>,
    backup_policy: BackupPolicy,
}

impl SnapshotStore {
    pub fn new(medium: Arc<dyn StorageMedium>) -> Self {
        Self::with_policy(medium, BackupPolicy::default())
    }

    pub fn with_policy(medium: Arc<dyn StorageMedium>, backup_policy: BackupPolicy) -> Self {
        Self {
            medium,
            backup_policy,
        }
    }

    pub fn save(&self, snapshot: &Snapshot) -> bool {
        let result = serde_json::to_string(snapshot)
            .map_err(AppError::from)
            .and_then(|raw| self.medium.set(SNAPSHOT_KEY, &raw));
        match result {
            Ok(()) => {
                tracing::debug!(projects = snapshot.projects.len(), "snapshot saved");
                true
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to save snapshot");
                false
            }
        }
    }

    pub fn load(&self) -> Option<Snapshot> {
        let raw = match self.medium.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::error!(error = %error, "failed to read snapshot");
                return None;
            }
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::error!(error = %error, "stored snapshot is unreadable");
                None
            }
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self.medium.get(SNAPSHOT_KEY), Ok(Some(_)))
    }

    /// Saves the snapshot and, when the backup policy fires, backs it up afterwards.
    pub fn persist(&self, snapshot: &Snapshot) -> PersistOutcome {
        let saved = self.save(snapshot);
        let backed_up = if saved && self.backup_policy.should_backup() {
            Some(self.create_backup(snapshot))
        } else {
            None
        };
        PersistOutcome { saved, backed_up }
    }

    pub fn clear(&self) -> bool {
        match self.medium.remove(SNAPSHOT_KEY) {
            Ok(()) => {
                tracing::info!("snapshot cleared; backups kept");
                true
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to clear snapshot");
                false
            }
        }
    }

    pub fn export_snapshot(&self, snapshot: &Snapshot) -> AppResult<ExportDocument> {
        Ok(ExportDocument {
            file_name: EXPORT_FILE_NAME.to_string(),
            contents: serde_json::to_string_pretty(snapshot)?,
        })
    }

    /// Parses an exported document. Nothing is written; the caller decides whether to
    /// adopt the result.
    pub fn import_snapshot(&self, document: &str) -> AppResult<Snapshot> {
        let value: Value = serde_json::from_str(document)
            .map_err(|error| AppError::Format(format!("Import is not valid JSON: {}", error)))?;
        match value.get("projects") {
            Some(Value::Array(_)) => {}
            _ => {
                return Err(AppError::Format(
                    "Import must contain a 'projects' list".to_string(),
                ))
            }
        }
        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|error| AppError::Format(format!("Import has an invalid shape: {}", error)))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn create_backup(&self, snapshot: &Snapshot) -> bool {
        match self.write_backup(snapshot) {
            Ok(key) => {
                tracing::info!(key = %key, "backup created");
                self.prune_backups();
                true
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to create backup");
                false
            }
        }
    }

    /// Backup keys, newest first.
    pub fn list_backups(&self) -> Vec<String> {
        match self.medium.keys_with_prefix(BACKUP_PREFIX) {
            Ok(mut keys) => {
                keys.sort_by(|a, b| b.cmp(a));
                keys
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to list backups");
                Vec::new()
            }
        }
    }

    /// Loads a backup and makes it the live snapshot.
    pub fn restore_backup(&self, key: &str) -> Option<Snapshot> {
        if !key.starts_with(BACKUP_PREFIX) {
            tracing::warn!(key = %key, "refusing to restore a non-backup key");
            return None;
        }
        let raw = match self.medium.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::error!(key = %key, error = %error, "failed to read backup");
                return None;
            }
        };
        let snapshot = match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::error!(key = %key, error = %error, "backup is unreadable");
                return None;
            }
        };
        if !self.save(&snapshot) {
            return None;
        }
        tracing::info!(key = %key, "backup restored");
        Some(snapshot)
    }

    fn write_backup(&self, snapshot: &Snapshot) -> AppResult<String> {
        let raw = serde_json::to_string(snapshot)?;
        let key = self.next_backup_key(Utc::now())?;
        self.medium.set(&key, &raw)?;
        Ok(key)
    }

    /// Keys sort by timestamp, so a new key must land strictly after the newest one
    /// even when two backups are taken within the same millisecond.
    fn next_backup_key(&self, now: DateTime<Utc>) -> AppResult<String> {
        let newest = self
            .medium
            .keys_with_prefix(BACKUP_PREFIX)?
            .into_iter()
            .max()
            .and_then(|key| parse_backup_timestamp(&key));
        let stamp = match newest {
            Some(newest) if newest >= now => newest + Duration::milliseconds(1),
            _ => now,
        };
        Ok(backup_key(stamp))
    }

    fn prune_backups(&self) {
        for key in self.list_backups().into_iter().skip(MAX_BACKUPS) {
            match self.medium.remove(&key) {
                Ok(()) => tracing::info!(key = %key, "old backup removed"),
                Err(error) => tracing::warn!(key = %key, error = %error, "failed to remove old backup"),
            }
        }
    }
}

pub fn backup_key(stamp: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, stamp.format(BACKUP_TIMESTAMP_FORMAT))
}

fn parse_backup_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let suffix = key.strip_prefix(BACKUP_PREFIX)?;
    NaiveDateTime::parse_from_str(suffix, BACKUP_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
