use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::media::{detect_mime_type, truncate_for_log};
use crate::pipeline::backends::{
    GenerationOptions, ImageBackend, ImageReference, TextBackend, VisionBackend,
};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const CHAT_TIMEOUT_SECS: u64 = 60;
const IMAGE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    vision_model: String,
    text_model: String,
    image_model: String,
    image_size: String,
    image_quality: String,
}

fn summarize_payload(payload: &Value) -> String {
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let message_count = payload
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|messages| messages.len())
        .unwrap_or(0);
    let prompt_chars = payload
        .get("prompt")
        .and_then(|v| v.as_str())
        .map(|prompt| prompt.chars().count())
        .unwrap_or(0);

    format!(
        "model={}, messages={}, prompt_chars={}",
        model, message_count, prompt_chars
    )
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
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_message_content(response: &Value) -> Option<String> {
    let content = response
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .and_then(|v| v.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

fn extract_image_reference(response: &Value) -> Option<ImageReference> {
    let first = response.get("data").and_then(|v| v.get(0))?;

    if let Some(url) = first.get("url").and_then(|v| v.as_str()) {
        if !url.trim().is_empty() {
            return Some(ImageReference::Url(url.to_string()));
        }
    }

    let encoded = first.get("b64_json").and_then(|v| v.as_str())?;
    let bytes = general_purpose::STANDARD.decode(encoded).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
    Some(ImageReference::Inline { bytes, mime_type })
}

fn build_vision_messages(image: &str, instruction: &str) -> Vec<Value> {
    vec![json!({
        "role": "user",
        "content": [
            { "type": "text", "text": instruction },
            { "type": "image_url", "image_url": { "url": image } }
        ]
    })]
}

impl OpenAiClient {
    pub fn from_config(config: &Config) -> Self {
        OpenAiClient {
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            vision_model: config.openai_vision_model.clone(),
            text_model: config.openai_text_model.clone(),
            image_model: config.openai_image_model.clone(),
            image_size: config.openai_image_size.clone(),
            image_quality: config.openai_image_quality.clone(),
        }
    }

    async fn call_openai_api(
        &self,
        endpoint: &str,
        payload: &Value,
        timeout_secs: u64,
    ) -> Result<Value> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("OPENAI_API_KEY is not configured"));
        }

        debug!("OpenAI request to {}: {}", endpoint, summarize_payload(payload));

        let client = get_http_client();
        let response = client
            .post(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(timeout_secs))
            .json(payload)
            .send()
            .await
            .map_err(|err| anyhow!("OpenAI request failed: {err}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("OpenAI API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "OpenAI request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response.json::<Value>().await?;
        Ok(value)
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: Vec<Value>,
        max_tokens: u32,
        temperature: Option<f32>,
    ) -> Result<String> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if let (Some(temperature), Some(object)) = (temperature, payload.as_object_mut()) {
            object.insert("temperature".to_string(), json!(temperature));
        }

        let response = self
            .call_openai_api("chat/completions", &payload, CHAT_TIMEOUT_SECS)
            .await?;
        extract_message_content(&response).ok_or_else(|| {
            warn!(
                "OpenAI response had empty content: {}",
                truncate_for_log(&response.to_string(), 2000)
            );
            anyhow!("OpenAI returned no content (model: {})", model)
        })
    }
}

#[async_trait]
impl VisionBackend for OpenAiClient {
    async fn describe_image(
        &self,
        image: &str,
        instruction: &str,
        max_tokens: u32,
    ) -> Result<String> {
        let messages = build_vision_messages(image, instruction);
        log_llm_timing("openai", &self.vision_model, "describe_image", None, || async {
            self.chat_completion(&self.vision_model, messages, max_tokens, None)
                .await
        })
        .await
    }
}

#[async_trait]
impl TextBackend for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let messages = vec![
            json!({ "role": "system", "content": system_prompt }),
            json!({ "role": "user", "content": user_prompt }),
        ];
        log_llm_timing(
            "openai",
            &self.text_model,
            "synthesize_concept",
            Some(json!({ "temperature": temperature })),
            || async {
                self.chat_completion(&self.text_model, messages, max_tokens, Some(temperature))
                    .await
            },
        )
        .await
    }
}

#[async_trait]
impl ImageBackend for OpenAiClient {
    async fn generate_image(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<ImageReference> {
        let payload = json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.image_size,
            "quality": self.image_quality,
        });
        let metadata = json!({ "size": self.image_size, "quality": self.image_quality });

        log_llm_timing(
            "openai",
            &self.image_model,
            "generate_image",
            Some(metadata),
            || async {
                let response = self
                    .call_openai_api("images/generations", &payload, IMAGE_TIMEOUT_SECS)
                    .await?;
                extract_image_reference(&response).ok_or_else(|| {
                    anyhow!("No images returned by OpenAI (model: {})", self.image_model)
                })
            },
        )
        .await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trimmed_chat_content() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  A red fox.  " } }]
        });
        assert_eq!(extract_message_content(&response).as_deref(), Some("A red fox."));

        let empty = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(extract_message_content(&empty).is_none());
        assert!(extract_message_content(&json!({})).is_none());
    }

    #[test]
    fn extracts_url_or_inline_image() {
        let with_url = json!({ "data": [{ "url": "https://cdn.example/img.png" }] });
        assert_eq!(
            extract_image_reference(&with_url),
            Some(ImageReference::Url("https://cdn.example/img.png".to_string()))
        );

        let encoded = general_purpose::STANDARD.encode([1u8, 2, 3]);
        let with_b64 = json!({ "data": [{ "b64_json": encoded }] });
        match extract_image_reference(&with_b64) {
            Some(ImageReference::Inline { bytes, mime_type }) => {
                assert_eq!(bytes, vec![1, 2, 3]);
                assert_eq!(mime_type, "image/png");
            }
            other => panic!("unexpected reference: {other:?}"),
        }

        assert!(extract_image_reference(&json!({ "data": [] })).is_none());
    }

    #[test]
    fn summarizes_structured_error_bodies() {
        let (message, _) = summarize_error_body(
            r#"{"error":{"message":"Billing hard limit has been reached","type":"insufficient_quota"}}"#,
        );
        assert_eq!(message.as_deref(), Some("Billing hard limit has been reached"));

        let (message, summary) = summarize_error_body("");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }
}
