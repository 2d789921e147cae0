//! Interfaces for the external AI services the merge pipeline calls.
//!
//! Each backend returns `anyhow::Result`; the orchestrator turns any error
//! into a `MergeError::Backend` carrying the upstream message.

use anyhow::Result;
use async_trait::async_trait;

/// Where a generated image lives once the backend returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    Inline { bytes: Vec<u8>, mime_type: String },
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Provider-specific model id; required by the secondary backend.
    pub provider_model_id: Option<String>,
}

#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// `image` is a data URI or an http(s) URL.
    async fn describe_image(&self, image: &str, instruction: &str, max_tokens: u32)
        -> Result<String>;
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ImageReference>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}
