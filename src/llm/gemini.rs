use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::media::truncate_for_log;
use crate::pipeline::backends::{GenerationOptions, ImageBackend, ImageReference};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const GEMINI_IMAGE_TIMEOUT_SECS: u64 = 120;
const IMAGE_SYSTEM_INSTRUCTION: &str =
    "Generate an image based on the prompt. CRITICAL: respond with an image, NOT TEXT.";

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    #[allow(dead_code)]
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    api_key: String,
    base_url: String,
}

fn redact_gemini_api_key(text: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        return text.to_string();
    }
    text.replace(api_key, "[redacted]")
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<(Vec<u8>, String)> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::InlineData { inline_data } = part {
                        if inline_data.mime_type.starts_with("image/") {
                            if let Ok(bytes) = general_purpose::STANDARD.decode(inline_data.data) {
                                images.push((bytes, inline_data.mime_type));
                            }
                        }
                    }
                }
            }
        }
    }
    images
}

impl GeminiImageClient {
    pub fn from_config(config: &Config) -> Self {
        GeminiImageClient {
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call_gemini_api(&self, model: &str, payload: &Value) -> Result<GeminiResponse> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("GEMINI_API_KEY is not configured"));
        }

        let client = get_http_client();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        debug!(target: "llm.gemini", model = model, "Gemini image request");

        let response = client
            .post(&url)
            .timeout(Duration::from_secs(GEMINI_IMAGE_TIMEOUT_SECS))
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_gemini_api_key(&err.to_string(), &self.api_key);
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect()
                );
                anyhow!("Gemini request failed: {}", err_text)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        Ok(response.json::<GeminiResponse>().await?)
    }
}

#[async_trait]
impl ImageBackend for GeminiImageClient {
    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ImageReference> {
        let model = options
            .provider_model_id
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| anyhow!("Gemini image generation requires a model id"))?;

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": IMAGE_SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        log_llm_timing("gemini", model, "generate_image", None, || async {
            let response = self.call_gemini_api(model, &payload).await?;
            let (bytes, mime_type) = extract_images_from_response(response)
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("No images returned by Gemini (model: {})", model))?;
            Ok(ImageReference::Inline { bytes, mime_type })
        })
        .await
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
