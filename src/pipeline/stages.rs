//! The individual merge stages. Prompt assembly and concept parsing are pure;
//! the rest call exactly one backend each and never retry.

use tracing::info;

use crate::catalog::{ImageProvider, ModelDefinition, StyleDefinition};
use crate::config::{CONCEPT_SYSTEM_PROMPT, DESCRIBE_IMAGE_PROMPT};
use crate::pipeline::backends::{
    GenerationOptions, ImageBackend, ImageReference, TextBackend, VisionBackend,
};
use crate::pipeline::error::MergeError;

const QUOTE_PAIRS: [(char, char); 6] = [
    ('"', '"'),
    ('\'', '\''),
    ('\u{201C}', '\u{201D}'),
    ('\u{201E}', '\u{201C}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{00AB}', '\u{00BB}'),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConceptParseError {
    #[error("Concept synthesis returned an empty concept")]
    Empty,
}

fn strip_enclosing_quotes(value: &str) -> &str {
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = value
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner;
        }
    }
    value
}

/// Trims the raw completion and removes one layer of enclosing quotes.
pub fn parse_concept(raw: &str) -> Result<String, ConceptParseError> {
    let concept = strip_enclosing_quotes(raw.trim()).trim();
    if concept.is_empty() {
        return Err(ConceptParseError::Empty);
    }
    Ok(concept.to_string())
}

pub fn concept_user_prompt(description1: &str, description2: &str) -> String {
    format!("Image 1: {description1}\nImage 2: {description2}")
}

/// Builds the generation prompt. The creature template is used only for a
/// fusion style that has a concept; everything else merges both descriptions.
pub fn assemble_prompt(
    style: &StyleDefinition,
    description1: &str,
    description2: &str,
    concept: Option<&str>,
) -> String {
    let base = match concept {
        Some(concept) if style.is_fusion => format!(
            "create a creature based on concept: {}. One unified creature, centered composition.",
            concept.trim().trim_end_matches('.')
        ),
        _ => format!(
            "create an image based on: {}, {}. One unified image, creative fusion of both elements.",
            description1.trim(),
            description2.trim()
        ),
    };

    let directive = style.directive.trim();
    if directive.is_empty() {
        base
    } else {
        format!("{base} {directive}")
    }
}

pub async fn describe(
    vision: &dyn VisionBackend,
    image: &str,
    max_tokens: u32,
) -> Result<String, MergeError> {
    let description = vision
        .describe_image(image, DESCRIBE_IMAGE_PROMPT, max_tokens)
        .await
        .map_err(MergeError::backend)?;
    let description = description.trim();
    if description.is_empty() {
        return Err(MergeError::Backend(
            "Vision backend returned an empty description".to_string(),
        ));
    }
    Ok(description.to_string())
}

pub async fn synthesize_concept(
    text: &dyn TextBackend,
    description1: &str,
    description2: &str,
    max_tokens: u32,
    temperature: f32,
) -> Result<String, MergeError> {
    let raw = text
        .complete(
            CONCEPT_SYSTEM_PROMPT,
            &concept_user_prompt(description1, description2),
            max_tokens,
            temperature,
        )
        .await
        .map_err(MergeError::backend)?;
    parse_concept(&raw).map_err(MergeError::backend)
}

/// The two image providers, selected by `ModelDefinition::provider`.
pub struct ImageBackends<'a> {
    pub primary: &'a dyn ImageBackend,
    pub secondary: &'a dyn ImageBackend,
}

impl ImageBackends<'_> {
    fn for_provider(&self, provider: ImageProvider) -> &dyn ImageBackend {
        match provider {
            ImageProvider::Primary => self.primary,
            ImageProvider::Secondary => self.secondary,
        }
    }
}

pub async fn generate(
    backends: &ImageBackends<'_>,
    prompt: &str,
    model: &ModelDefinition,
) -> Result<ImageReference, MergeError> {
    let options = GenerationOptions {
        provider_model_id: match model.provider {
            ImageProvider::Primary => None,
            ImageProvider::Secondary => model.provider_model_id.clone(),
        },
    };
    let backend = backends.for_provider(model.provider);
    info!("Generating image with {} ({})", backend.name(), model.key);
    let image = backend
        .generate_image(prompt, &options)
        .await
        .map_err(MergeError::backend)?;

    let empty = match &image {
        ImageReference::Url(url) => url.trim().is_empty(),
        ImageReference::Inline { bytes, .. } => bytes.is_empty(),
    };
    if empty {
        return Err(MergeError::Backend(format!(
            "{} returned an empty image",
            model.display_name
        )));
    }
    Ok(image)
}
