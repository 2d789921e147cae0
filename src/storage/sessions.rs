use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::media::{
    decode_data_uri, detect_mime_type, download_media, extension_for_mime, is_data_uri,
};
use crate::pipeline::backends::ImageReference;

const METADATA_FILE_NAME: &str = "metadata.json";
const MAX_DIRECTORY_ATTEMPTS: usize = 20;

static UNSAFE_ADDRESS_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid address regex"));
static SESSION_DIRECTORY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid directory regex"));

/// Everything the pipeline knows about a finished merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub style_key: String,
    pub style_name: String,
    pub model_key: String,
    pub model_name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_model_id: Option<String>,
    pub description1: String,
    pub description2: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative_concept: Option<String>,
    pub generation_prompt: String,
    pub style_prompt_suffix: String,
    pub client_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Contents of a session's `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub session_id: String,
    pub session_directory_name: String,
    pub source_image1_path: Option<String>,
    pub source_image2_path: Option<String>,
    pub result_image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_image_url: Option<String>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionUpload<'a> {
    pub image1: &'a str,
    pub image2: &'a str,
    pub result: &'a ImageReference,
    pub metadata: &'a SessionMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub session_id: String,
    pub session_directory_name: String,
    /// Public path of the stored result image, when a local copy exists.
    pub result_image_path: Option<String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, upload: SessionUpload<'_>) -> Result<SavedSession>;

    async fn load_session(&self, directory_name: &str) -> Result<Option<PersistedSession>>;

    /// Returns `false` when the directory did not exist.
    async fn delete_session(&self, directory_name: &str) -> Result<bool>;
}

pub fn sanitize_client_address(address: &str) -> String {
    let cleaned = UNSAFE_ADDRESS_CHARS.replace_all(address.trim(), "-");
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn session_directory_base(created_at: &DateTime<Utc>, client_address: &str) -> String {
    format!(
        "{}_{}",
        created_at.format("%Y-%m-%d_%H-%M-%S"),
        sanitize_client_address(client_address)
    )
}

pub fn is_valid_directory_name(name: &str) -> bool {
    name != "." && name != ".." && !name.contains("..") && SESSION_DIRECTORY_NAME.is_match(name)
}

#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
    public_prefix: String,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSessionStore {
            root: root.into(),
            public_prefix: "/uploads".to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, directory_name: &str) -> Result<PathBuf> {
        if !is_valid_directory_name(directory_name) {
            return Err(anyhow!("Invalid session directory name: {directory_name}"));
        }
        Ok(self.root.join(directory_name))
    }

    fn public_path(&self, directory_name: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.public_prefix, directory_name, file_name)
    }

    async fn create_session_dir(&self, base_name: &str) -> Result<(String, PathBuf)> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create uploads root '{}'", self.root.display()))?;

        for attempt in 0..MAX_DIRECTORY_ATTEMPTS {
            let name = if attempt == 0 {
                base_name.to_string()
            } else {
                format!("{}_{}", base_name, attempt + 1)
            };
            let path = self.root.join(&name);
            match fs::create_dir(&path).await {
                Ok(()) => return Ok((name, path)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(anyhow!(
                        "Failed to create session directory '{}': {}",
                        path.display(),
                        err
                    ))
                }
            }
        }

        Err(anyhow!(
            "Could not allocate a session directory for '{}'",
            base_name
        ))
    }

    async fn write_file(&self, dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
        let path = dir.join(file_name);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))
    }

    async fn write_source_image(
        &self,
        dir: &Path,
        directory_name: &str,
        stem: &str,
        image: &str,
    ) -> Result<Option<String>> {
        let Some((bytes, mime_type)) = resolve_source_image(image).await else {
            warn!("Could not store {} for session {}", stem, directory_name);
            return Ok(None);
        };
        let file_name = format!("{}.{}", stem, extension_for_mime(&mime_type));
        self.write_file(dir, &file_name, &bytes).await?;
        Ok(Some(self.public_path(directory_name, &file_name)))
    }

    async fn write_session_files(
        &self,
        dir: &Path,
        directory_name: &str,
        upload: SessionUpload<'_>,
    ) -> Result<PersistedSession> {
        let source_image1_path = self
            .write_source_image(dir, directory_name, "image1", upload.image1)
            .await?;
        let source_image2_path = self
            .write_source_image(dir, directory_name, "image2", upload.image2)
            .await?;

        let (result_bytes, result_image_url) = match upload.result {
            ImageReference::Inline { bytes, mime_type } => {
                (Some((bytes.clone(), mime_type.clone())), None)
            }
            ImageReference::Url(url) => {
                let downloaded = download_media(url).await.map(|bytes| {
                    let mime_type =
                        detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
                    (bytes, mime_type)
                });
                if downloaded.is_none() {
                    warn!(
                        "Result image for session {} could not be downloaded; keeping the remote URL only",
                        directory_name
                    );
                }
                (downloaded, Some(url.clone()))
            }
        };

        let result_image_path = match result_bytes {
            Some((bytes, mime_type)) => {
                let file_name = format!("result.{}", extension_for_mime(&mime_type));
                self.write_file(dir, &file_name, &bytes).await?;
                Some(self.public_path(directory_name, &file_name))
            }
            None => None,
        };

        let persisted = PersistedSession {
            session_id: Uuid::new_v4().to_string(),
            session_directory_name: directory_name.to_string(),
            source_image1_path,
            source_image2_path,
            result_image_path,
            result_image_url,
            metadata: upload.metadata.clone(),
        };
        let json = serde_json::to_vec_pretty(&persisted)?;
        self.write_file(dir, METADATA_FILE_NAME, &json).await?;
        Ok(persisted)
    }
}

async fn resolve_source_image(image: &str) -> Option<(Vec<u8>, String)> {
    if is_data_uri(image) {
        return match decode_data_uri(image) {
            Ok(inline) => Some((inline.bytes, inline.mime_type)),
            Err(err) => {
                warn!("Failed to decode source image: {:#}", err);
                None
            }
        };
    }

    let parsed = url::Url::parse(image.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let bytes = download_media(parsed.as_str()).await?;
    let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
    Some((bytes, mime_type))
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn save_session(&self, upload: SessionUpload<'_>) -> Result<SavedSession> {
        let base_name = session_directory_base(
            &upload.metadata.created_at,
            &upload.metadata.client_address,
        );
        let (directory_name, dir) = self.create_session_dir(&base_name).await?;

        match self.write_session_files(&dir, &directory_name, upload).await {
            Ok(persisted) => {
                info!(
                    "Saved session {} to {}",
                    persisted.session_id,
                    dir.display()
                );
                Ok(SavedSession {
                    session_id: persisted.session_id,
                    session_directory_name: directory_name,
                    result_image_path: persisted.result_image_path,
                })
            }
            Err(err) => {
                if let Err(cleanup_err) = fs::remove_dir_all(&dir).await {
                    warn!(
                        "Failed to remove incomplete session directory {}: {}",
                        dir.display(),
                        cleanup_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn load_session(&self, directory_name: &str) -> Result<Option<PersistedSession>> {
        let path = self.session_dir(directory_name)?.join(METADATA_FILE_NAME);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow!("Failed to read '{}': {}", path.display(), err));
            }
        };
        let session = serde_json::from_slice::<PersistedSession>(&raw)
            .with_context(|| format!("Failed to parse '{}'", path.display()))?;
        Ok(Some(session))
    }

    async fn delete_session(&self, directory_name: &str) -> Result<bool> {
        let dir = self.session_dir(directory_name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Deleted session directory {}", dir.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(anyhow!(
                "Failed to delete session directory '{}': {}",
                dir.display(),
                err
            )),
        }
    }
}
