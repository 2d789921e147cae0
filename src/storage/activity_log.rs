use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub created_at: DateTime<Utc>,
    pub client_address: String,
    pub style_key: String,
    pub session_directory_name: String,
    pub session_id: String,
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<()>;

    /// Oldest first.
    async fn read_all(&self) -> Result<Vec<LogEntry>>;

    /// Removes the entry for `session_id`, returning it when present.
    async fn delete(&self, session_id: &str) -> Result<Option<LogEntry>>;
}

/// Activity log kept as a single JSON array, rewritten on every change.
///
/// All read-modify-write cycles go through `write_lock`, so concurrent
/// requests in this process never lose each other's entries.
#[derive(Debug)]
pub struct JsonFileActivityLog {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl JsonFileActivityLog {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        JsonFileActivityLog {
            path: path.into(),
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_entries(&self) -> Result<Vec<LogEntry>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow!(
                    "Failed to read activity log '{}': {}",
                    self.path.display(),
                    err
                ))
            }
        };
        if raw.iter().all(|byte| byte.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Vec<LogEntry>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                let corrupt_path = self.corrupt_path();
                fs::rename(&self.path, &corrupt_path)
                    .await
                    .with_context(|| {
                        format!(
                            "Activity log '{}' is not valid JSON and could not be moved aside",
                            self.path.display()
                        )
                    })?;
                warn!(
                    "Activity log '{}' is not valid JSON ({}); moved it to '{}' and starting over",
                    self.path.display(),
                    err,
                    corrupt_path.display()
                );
                Ok(Vec::new())
            }
        }
    }

    /// `activity_log.json` → `activity_log.json.corrupt`, keeping the newest unreadable copy.
    fn corrupt_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    async fn write_entries(&self, entries: &[LogEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .await
            .with_context(|| format!("Failed to write '{}'", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace '{}'", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ActivityLog for JsonFileActivityLog {
    async fn append(&self, entry: LogEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.push(entry);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        self.write_entries(&entries).await
    }

    async fn read_all(&self) -> Result<Vec<LogEntry>> {
        let _guard = self.write_lock.lock().await;
        self.read_entries().await
    }

    async fn delete(&self, session_id: &str) -> Result<Option<LogEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let Some(index) = entries
            .iter()
            .position(|entry| entry.session_id == session_id)
        else {
            return Ok(None);
        };
        let removed = entries.remove(index);
        self.write_entries(&entries).await?;
        Ok(Some(removed))
    }
}
