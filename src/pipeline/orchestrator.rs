use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, ModelDefinition, StyleDefinition};
use crate::config::Config;
use crate::llm::media::encode_data_uri;
use crate::pipeline::backends::{ImageBackend, ImageReference, TextBackend, VisionBackend};
use crate::pipeline::error::MergeError;
use crate::pipeline::stages::{self, ImageBackends};
use crate::storage::{ActivityLog, LogEntry, SessionMetadata, SessionStore, SessionUpload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Describing,
    SynthesizingConcept,
    AssemblingPrompt,
    Generating,
    Persisting,
    Logging,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Describing => "describing",
            Stage::SynthesizingConcept => "synthesizing_concept",
            Stage::AssemblingPrompt => "assembling_prompt",
            Stage::Generating => "generating",
            Stage::Persisting => "persisting",
            Stage::Logging => "logging",
            Stage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub description_max_tokens: u32,
    pub concept_max_tokens: u32,
    pub concept_temperature: f32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        PipelineSettings {
            description_max_tokens: config.description_max_tokens,
            concept_max_tokens: config.concept_max_tokens,
            concept_temperature: config.concept_temperature,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            description_max_tokens: 150,
            concept_max_tokens: 60,
            concept_temperature: 1.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    pub image1: Option<String>,
    pub image2: Option<String>,
    pub style: Option<String>,
    pub model: Option<String>,
    pub client_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeMeta {
    pub style: String,
    pub style_name: String,
    pub model: String,
    pub model_name: String,
    pub provider: String,
    pub description1: String,
    pub description2: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_concept: Option<String>,
    pub image_prompt: String,
    pub style_prompt_suffix: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub image_url: String,
    pub meta: MergeMeta,
}

/// Values accumulated while one request moves through the stages.
#[derive(Debug, Default)]
struct PipelineState {
    description1: String,
    description2: String,
    creative_concept: Option<String>,
    generation_prompt: String,
    result_image: Option<ImageReference>,
}

fn required_image(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Runs describe → (synthesize) → assemble → generate → persist → log for one request.
#[derive(Clone)]
pub struct MergePipeline {
    catalog: Arc<Catalog>,
    vision: Arc<dyn VisionBackend>,
    text: Arc<dyn TextBackend>,
    primary: Arc<dyn ImageBackend>,
    secondary: Arc<dyn ImageBackend>,
    sessions: Arc<dyn SessionStore>,
    activity_log: Arc<dyn ActivityLog>,
    settings: PipelineSettings,
}

impl MergePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        vision: Arc<dyn VisionBackend>,
        text: Arc<dyn TextBackend>,
        primary: Arc<dyn ImageBackend>,
        secondary: Arc<dyn ImageBackend>,
        sessions: Arc<dyn SessionStore>,
        activity_log: Arc<dyn ActivityLog>,
        settings: PipelineSettings,
    ) -> Self {
        MergePipeline {
            catalog,
            vision,
            text,
            primary,
            secondary,
            sessions,
            activity_log,
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn run(&self, request: &MergeRequest) -> Result<MergeOutcome, MergeError> {
        let mut stage = Stage::Validating;
        let result = self.execute(request, &mut stage).await;
        match &result {
            Ok(outcome) => info!(
                "Merge completed: session={} style={} model={}",
                outcome.meta.session_id, outcome.meta.style, outcome.meta.model
            ),
            Err(MergeError::Validation(message)) => {
                warn!("Merge request rejected: {}", message)
            }
            Err(err) => error!(
                "Merge failed at stage {} ({} error): {}",
                stage.as_str(),
                err.kind(),
                err
            ),
        }
        result
    }

    async fn execute(
        &self,
        request: &MergeRequest,
        stage: &mut Stage,
    ) -> Result<MergeOutcome, MergeError> {
        let (Some(image1), Some(image2)) = (
            required_image(request.image1.as_deref()),
            required_image(request.image2.as_deref()),
        ) else {
            return Err(MergeError::Validation(
                "Both images (image1 and image2) are required".to_string(),
            ));
        };

        let style = self.catalog.resolve_style(request.style.as_deref());
        let model = self.catalog.select_model(style, request.model.as_deref());
        let mut state = PipelineState::default();

        *stage = Stage::Describing;
        info!("Describing both images (style={}, model={})", style.key, model.key);
        let max_tokens = self.settings.description_max_tokens;
        let (description1, description2) = tokio::try_join!(
            stages::describe(self.vision.as_ref(), image1, max_tokens),
            stages::describe(self.vision.as_ref(), image2, max_tokens),
        )?;
        state.description1 = description1;
        state.description2 = description2;

        if style.is_fusion {
            *stage = Stage::SynthesizingConcept;
            let concept = stages::synthesize_concept(
                self.text.as_ref(),
                &state.description1,
                &state.description2,
                self.settings.concept_max_tokens,
                self.settings.concept_temperature,
            )
            .await?;
            info!("Creative concept: {}", concept);
            state.creative_concept = Some(concept);
        }

        *stage = Stage::AssemblingPrompt;
        state.generation_prompt = stages::assemble_prompt(
            style,
            &state.description1,
            &state.description2,
            state.creative_concept.as_deref(),
        );

        *stage = Stage::Generating;
        let backends = ImageBackends {
            primary: self.primary.as_ref(),
            secondary: self.secondary.as_ref(),
        };
        let result_image = stages::generate(&backends, &state.generation_prompt, model).await?;
        state.result_image = Some(result_image);

        *stage = Stage::Persisting;
        self.persist(request, image1, image2, style, model, state, stage)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        request: &MergeRequest,
        image1: &str,
        image2: &str,
        style: &StyleDefinition,
        model: &ModelDefinition,
        state: PipelineState,
        stage: &mut Stage,
    ) -> Result<MergeOutcome, MergeError> {
        let result_image = state
            .result_image
            .ok_or_else(|| MergeError::Backend("No image was generated".to_string()))?;

        let metadata = SessionMetadata {
            style_key: style.key.clone(),
            style_name: style.display_name.clone(),
            model_key: model.key.clone(),
            model_name: model.display_name.clone(),
            provider: model.provider.as_str().to_string(),
            provider_model_id: model.provider_model_id.clone(),
            description1: state.description1,
            description2: state.description2,
            creative_concept: state.creative_concept,
            generation_prompt: state.generation_prompt,
            style_prompt_suffix: style.directive.clone(),
            client_address: request.client_address.clone(),
            user_agent: request.user_agent.clone(),
            created_at: Utc::now(),
        };

        let saved = self
            .sessions
            .save_session(SessionUpload {
                image1,
                image2,
                result: &result_image,
                metadata: &metadata,
            })
            .await
            .map_err(MergeError::persistence)?;

        *stage = Stage::Logging;
        self.activity_log
            .append(LogEntry {
                created_at: metadata.created_at,
                client_address: metadata.client_address.clone(),
                style_key: metadata.style_key.clone(),
                session_directory_name: saved.session_directory_name.clone(),
                session_id: saved.session_id.clone(),
            })
            .await
            .map_err(MergeError::persistence)?;

        *stage = Stage::Done;
        let image_url = match (&result_image, saved.result_image_path) {
            (ImageReference::Url(url), _) => url.clone(),
            (ImageReference::Inline { .. }, Some(path)) => path,
            (ImageReference::Inline { bytes, mime_type }, None) => {
                encode_data_uri(bytes, mime_type)
            }
        };

        Ok(MergeOutcome {
            image_url,
            meta: MergeMeta {
                style: metadata.style_key,
                style_name: metadata.style_name,
                model: metadata.model_key,
                model_name: metadata.model_name,
                provider: metadata.provider,
                description1: metadata.description1,
                description2: metadata.description2,
                creative_concept: metadata.creative_concept,
                image_prompt: metadata.generation_prompt,
                style_prompt_suffix: metadata.style_prompt_suffix,
                session_id: saved.session_id,
            },
        })
    }
}
