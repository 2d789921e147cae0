use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub body_limit_mb: usize,
    pub http_connect_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_vision_model: String,
    pub openai_text_model: String,
    pub openai_image_model: String,
    pub openai_image_size: String,
    pub openai_image_quality: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub description_max_tokens: u32,
    pub concept_max_tokens: u32,
    pub concept_temperature: f32,
    pub default_style: String,
    pub default_model: String,
    pub catalog_config_path: Option<PathBuf>,
    pub uploads_dir: PathBuf,
    pub static_dir: PathBuf,
    pub activity_log_path: PathBuf,
    pub activity_log_max_entries: usize,
    pub admin_username: String,
    pub admin_password: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    let value = env_string(name, default);
    if value.trim().is_empty() {
        PathBuf::from(default)
    } else {
        PathBuf::from(value.trim())
    }
}

fn env_optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| anyhow!("Invalid PORT value: {value}"))
}

impl Config {
    pub fn load() -> Result<Self> {
        let port = parse_port(&env_string("PORT", "3100"))?;

        Ok(Config {
            host: env_string("HOST", "0.0.0.0"),
            port,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            log_dir: env_path("LOG_DIR", "logs"),
            body_limit_mb: env_usize("BODY_LIMIT_MB", 50).max(1),
            http_connect_timeout_secs: env_u64("HTTP_CONNECT_TIMEOUT_SECS", 10).max(1),
            http_timeout_secs: env_u64("HTTP_TIMEOUT_SECS", 180).max(1),
            openai_api_key: env_string("OPENAI_API_KEY", ""),
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_vision_model: env_string("OPENAI_VISION_MODEL", "gpt-4o"),
            openai_text_model: env_string("OPENAI_TEXT_MODEL", "gpt-4o"),
            openai_image_model: env_string("OPENAI_IMAGE_MODEL", "dall-e-3"),
            openai_image_size: env_string("OPENAI_IMAGE_SIZE", "1024x1024"),
            openai_image_quality: env_string("OPENAI_IMAGE_QUALITY", "standard"),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_base_url: env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            description_max_tokens: env_u32("DESCRIPTION_MAX_TOKENS", 150),
            concept_max_tokens: env_u32("CONCEPT_MAX_TOKENS", 60),
            concept_temperature: env_f32("CONCEPT_TEMPERATURE", 1.1),
            default_style: env_string("DEFAULT_STYLE", "fusion").to_lowercase(),
            default_model: env_string("DEFAULT_MODEL", "dalle3").to_lowercase(),
            catalog_config_path: env_optional_path("CATALOG_CONFIG_PATH"),
            uploads_dir: env_path("UPLOADS_DIR", "uploads"),
            static_dir: env_path("STATIC_DIR", "public"),
            activity_log_path: env_path("ACTIVITY_LOG_PATH", "data/activity_log.json"),
            activity_log_max_entries: env_usize("ACTIVITY_LOG_MAX_ENTRIES", 1000).max(1),
            admin_username: env_string("ADMIN_USERNAME", "admin"),
            admin_password: env_string("ADMIN_PASSWORD", ""),
        })
    }

    pub fn admin_enabled(&self) -> bool {
        !self.admin_password.is_empty()
    }

    /// Called once logging is up, since `load` runs before the subscriber exists.
    pub fn warn_missing_settings(&self) {
        if self.openai_api_key.trim().is_empty() {
            warn!("OPENAI_API_KEY is not set; description and primary generation calls will fail");
        }
        if self.gemini_api_key.trim().is_empty() {
            warn!("GEMINI_API_KEY is not set; secondary image models are unavailable");
        }
        if !self.admin_enabled() {
            warn!("ADMIN_PASSWORD is not set; admin routes are disabled");
        }
    }
}

pub const DESCRIBE_IMAGE_PROMPT: &str = "Describe this image in 2-3 concise sentences. Focus on the main features, colors, style and objects.";

pub const CONCEPT_SYSTEM_PROMPT: &str = r#"You are a creature designer inventing brand-new beings.

You receive short descriptions of two images. Invent ONE new creature or entity that is inspired by both, as if the two ideas had a child together.

Rules:
1. Do NOT describe a literal mashup such as "a cat with the body of a teapot" or "A with the head of B".
2. Do NOT list or name the original subjects.
3. Answer with exactly one short sentence of at most 15 words.
4. Return only the sentence, without quotes, labels or explanations."#;
