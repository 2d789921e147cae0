use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageProvider {
    #[serde(rename = "openai")]
    Primary,
    #[serde(rename = "gemini")]
    Secondary,
}

impl ImageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageProvider::Primary => "openai",
            ImageProvider::Secondary => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDefinition {
    pub key: String,
    pub display_name: String,
    pub directive: String,
    pub is_fusion: bool,
    pub prefers_secondary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    pub key: String,
    pub display_name: String,
    pub provider: ImageProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    styles: Vec<StyleEntry>,
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StyleEntry {
    key: String,
    name: String,
    directive: String,
    #[serde(default)]
    fusion: Option<bool>,
    #[serde(default)]
    prefer_secondary: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    key: String,
    name: String,
    provider: ImageProvider,
    #[serde(default)]
    model_id: Option<String>,
}

fn style(
    key: &str,
    display_name: &str,
    directive: &str,
    is_fusion: bool,
    prefers_secondary: bool,
) -> StyleDefinition {
    StyleDefinition {
        key: key.to_string(),
        display_name: display_name.to_string(),
        directive: directive.to_string(),
        is_fusion,
        prefers_secondary,
    }
}

fn builtin_styles() -> Vec<StyleDefinition> {
    vec![
        style(
            "fusion",
            "Creature Fusion",
            "Whimsical creature design, vibrant colors, soft studio lighting, highly detailed digital art.",
            true,
            false,
        ),
        style(
            "realistic",
            "Photorealistic",
            "Photorealistic, natural lighting, sharp focus, rich detail, shot on a full-frame camera.",
            false,
            false,
        ),
        style(
            "toy",
            "Toy Figure",
            "Styled as a collectible vinyl toy figure, glossy plastic, studio product photo on a clean background.",
            false,
            false,
        ),
        style(
            "anime",
            "Anime",
            "Anime illustration, clean line art, cel shading, vivid colors.",
            false,
            false,
        ),
        style(
            "watercolor",
            "Watercolor",
            "Soft watercolor painting on textured paper, gentle color bleeds, light pastel palette.",
            false,
            false,
        ),
        style(
            "pixel",
            "Pixel Art",
            "16-bit pixel art, limited color palette, crisp pixels, retro video game look.",
            false,
            false,
        ),
        style(
            "clay",
            "Claymation",
            "Handmade claymation look, visible fingerprints in plasticine, stop-motion set lighting.",
            false,
            true,
        ),
    ]
}

fn builtin_models() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition {
            key: "dalle3".to_string(),
            display_name: "DALL-E 3".to_string(),
            provider: ImageProvider::Primary,
            provider_model_id: None,
        },
        ModelDefinition {
            key: "gemini-flash".to_string(),
            display_name: "Gemini 2.5 Flash Image".to_string(),
            provider: ImageProvider::Secondary,
            provider_model_id: Some("gemini-2.5-flash-image".to_string()),
        },
        ModelDefinition {
            key: "gemini-pro".to_string(),
            display_name: "Gemini 3 Pro Image".to_string(),
            provider: ImageProvider::Secondary,
            provider_model_id: Some("gemini-3-pro-image-preview".to_string()),
        },
    ]
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn convert_styles(entries: Vec<StyleEntry>) -> Vec<StyleDefinition> {
    let mut styles: Vec<StyleDefinition> = Vec::new();
    for entry in entries {
        let key = normalize_key(&entry.key);
        if key.is_empty() || entry.directive.trim().is_empty() {
            warn!("Skipping style entry with empty key or directive");
            continue;
        }
        if styles.iter().any(|existing| existing.key == key) {
            warn!("Skipping duplicate style key '{}'", key);
            continue;
        }
        styles.push(StyleDefinition {
            key,
            display_name: entry.name.trim().to_string(),
            directive: entry.directive.trim().to_string(),
            is_fusion: entry.fusion.unwrap_or(false),
            prefers_secondary: entry.prefer_secondary.unwrap_or(false),
        });
    }
    styles
}

fn convert_models(entries: Vec<ModelEntry>) -> Vec<ModelDefinition> {
    let mut models: Vec<ModelDefinition> = Vec::new();
    for entry in entries {
        let key = normalize_key(&entry.key);
        if key.is_empty() {
            continue;
        }
        let provider_model_id = entry
            .model_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let provider_model_id = match entry.provider {
            ImageProvider::Primary => None,
            ImageProvider::Secondary => {
                if provider_model_id.is_none() {
                    warn!("Skipping model '{}': gemini models require a modelId", key);
                    continue;
                }
                provider_model_id
            }
        };
        if models.iter().any(|existing| existing.key == key) {
            warn!("Skipping duplicate model key '{}'", key);
            continue;
        }
        models.push(ModelDefinition {
            key,
            display_name: entry.name.trim().to_string(),
            provider: entry.provider,
            provider_model_id,
        });
    }
    models
}

fn load_catalog_file(path: &Path) -> Option<CatalogFile> {
    if !path.exists() {
        info!("Catalog config not found at {}", path.display());
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read catalog config at {}: {}", path.display(), err);
            return None;
        }
    };

    match serde_json::from_str::<CatalogFile>(&raw) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!("Failed to parse catalog config at {}: {}", path.display(), err);
            None
        }
    }
}

/// Read-only style and model tables, built once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    styles: Vec<StyleDefinition>,
    models: Vec<ModelDefinition>,
    default_style: usize,
    default_model: usize,
}

impl Catalog {
    pub fn builtin(default_style: &str, default_model: &str) -> Self {
        Self::from_parts(builtin_styles(), builtin_models(), default_style, default_model)
    }

    /// Built-in tables, with either table replaced when the file supplies valid entries for it.
    pub fn load(path: Option<&Path>, default_style: &str, default_model: &str) -> Self {
        let file = path.and_then(load_catalog_file);
        let (styles, models) = match file {
            Some(file) => (convert_styles(file.styles), convert_models(file.models)),
            None => (Vec::new(), Vec::new()),
        };

        let styles = if styles.is_empty() {
            builtin_styles()
        } else {
            info!("Loaded {} style(s) from catalog config", styles.len());
            styles
        };
        let models = if models.is_empty() {
            builtin_models()
        } else {
            info!("Loaded {} model(s) from catalog config", models.len());
            models
        };

        Self::from_parts(styles, models, default_style, default_model)
    }

    fn from_parts(
        styles: Vec<StyleDefinition>,
        models: Vec<ModelDefinition>,
        default_style: &str,
        default_model: &str,
    ) -> Self {
        let default_style_key = normalize_key(default_style);
        let default_style = styles
            .iter()
            .position(|style| style.key == default_style_key)
            .unwrap_or_else(|| {
                warn!(
                    "Default style '{}' is not in the catalog; using '{}'",
                    default_style_key, styles[0].key
                );
                0
            });

        let default_model_key = normalize_key(default_model);
        let default_model = models
            .iter()
            .position(|model| model.key == default_model_key)
            .unwrap_or_else(|| {
                warn!(
                    "Default model '{}' is not in the catalog; using '{}'",
                    default_model_key, models[0].key
                );
                0
            });

        Catalog {
            styles,
            models,
            default_style,
            default_model,
        }
    }

    pub fn styles(&self) -> &[StyleDefinition] {
        &self.styles
    }

    pub fn models(&self) -> &[ModelDefinition] {
        &self.models
    }

    pub fn default_style(&self) -> &StyleDefinition {
        &self.styles[self.default_style]
    }

    pub fn default_model(&self) -> &ModelDefinition {
        &self.models[self.default_model]
    }

    pub fn find_style(&self, key: &str) -> Option<&StyleDefinition> {
        let key = normalize_key(key);
        self.styles.iter().find(|style| style.key == key)
    }

    pub fn find_model(&self, key: &str) -> Option<&ModelDefinition> {
        let key = normalize_key(key);
        self.models.iter().find(|model| model.key == key)
    }

    pub fn resolve_style(&self, key: Option<&str>) -> &StyleDefinition {
        key.and_then(|key| self.find_style(key))
            .unwrap_or_else(|| self.default_style())
    }

    pub fn resolve_model(&self, key: Option<&str>) -> &ModelDefinition {
        key.and_then(|key| self.find_model(key))
            .unwrap_or_else(|| self.default_model())
    }

    /// A recognized model key always wins. Otherwise a style that prefers the
    /// secondary backend gets the first secondary model, if the catalog has one.
    pub fn select_model(&self, style: &StyleDefinition, key: Option<&str>) -> &ModelDefinition {
        let requested = key.and_then(|key| self.find_model(key));
        if requested.is_none() && style.prefers_secondary {
            if let Some(model) = self
                .models
                .iter()
                .find(|model| model.provider == ImageProvider::Secondary)
            {
                return model;
            }
        }
        self.resolve_model(key)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn unknown_style_falls_back_to_default() {
        let catalog = Catalog::builtin("realistic", "dalle3");
        for key in ["", "does-not-exist", "FUSION2", " "] {
            assert_eq!(catalog.resolve_style(Some(key)).key, "realistic");
        }
        assert_eq!(catalog.resolve_style(None).key, "realistic");
        assert_eq!(catalog.resolve_style(Some(" Toy ")).key, "toy");
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let catalog = Catalog::builtin("fusion", "dalle3");
        assert_eq!(catalog.resolve_model(Some("midjourney")).key, "dalle3");
        assert_eq!(catalog.resolve_model(None).key, "dalle3");
        assert_eq!(catalog.resolve_model(Some("gemini-pro")).key, "gemini-pro");
    }

    #[test]
    fn invalid_default_keys_use_first_entries() {
        let catalog = Catalog::builtin("nope", "nope");
        assert_eq!(catalog.default_style().key, "fusion");
        assert_eq!(catalog.default_model().key, "dalle3");
    }

    #[test]
    fn builtin_secondary_models_carry_provider_ids() {
        let catalog = Catalog::builtin("fusion", "dalle3");
        for model in catalog.models() {
            match model.provider {
                ImageProvider::Primary => assert!(model.provider_model_id.is_none()),
                ImageProvider::Secondary => assert!(model.provider_model_id.is_some()),
            }
        }
    }

    #[test]
    fn style_preferring_secondary_routes_to_gemini_unless_model_requested() {
        let catalog = Catalog::builtin("fusion", "dalle3");
        let clay = catalog.resolve_style(Some("clay")).clone();
        assert_eq!(
            catalog.select_model(&clay, None).provider,
            ImageProvider::Secondary
        );
        assert_eq!(catalog.select_model(&clay, Some("dalle3")).key, "dalle3");

        let toy = catalog.resolve_style(Some("toy")).clone();
        assert_eq!(catalog.select_model(&toy, None).key, "dalle3");
    }

    #[test]
    fn catalog_file_replaces_tables_and_drops_invalid_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "styles": [
                    {{ "key": "Neon", "name": "Neon", "directive": "Glowing neon signs.", "fusion": false }},
                    {{ "key": "", "name": "Empty", "directive": "x" }}
                ],
                "models": [
                    {{ "key": "broken", "name": "Broken", "provider": "gemini" }},
                    {{ "key": "nano", "name": "Nano", "provider": "gemini", "modelId": "gemini-2.5-flash-image" }}
                ]
            }}"#
        )
        .unwrap();

        let catalog = Catalog::load(Some(file.path()), "neon", "nano");
        assert_eq!(catalog.styles().len(), 1);
        assert_eq!(catalog.default_style().key, "neon");
        assert_eq!(catalog.models().len(), 1);
        assert_eq!(
            catalog.default_model().provider_model_id.as_deref(),
            Some("gemini-2.5-flash-image")
        );
    }

    #[test]
    fn missing_catalog_file_keeps_builtins() {
        let catalog = Catalog::load(
            Some(Path::new("/definitely/not/here/catalog.json")),
            "fusion",
            "dalle3",
        );
        assert_eq!(catalog.styles().len(), builtin_styles().len());
        assert_eq!(catalog.models().len(), builtin_models().len());
    }
}
