use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::credential::Credential;
use crate::error::{PromptCraftError, PromptCraftResult};
use crate::intake::data_url;
use crate::llm::classify::classify_image_error;
use crate::llm::gemini::GenerativeTransport;
use crate::utils::timing::log_llm_timing;

pub const SUPPORTED_ASPECT_RATIOS: [&str; 5] = ["1:1", "3:4", "4:3", "9:16", "16:9"];
pub const DEFAULT_ASPECT_RATIO: &str = "3:4";
pub const QUALITY_BOOST_SUFFIX: &str =
    ", highly detailed, 8k resolution, masterpiece, sharp focus, best quality";
const OUTPUT_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionTier {
    /// `1k`: the prompt is sent unchanged.
    #[default]
    Standard,
    /// `2k`: quality keywords are appended to the prompt.
    High,
}

impl ResolutionTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1k" => Some(ResolutionTier::Standard),
            "2k" => Some(ResolutionTier::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionTier::Standard => "1k",
            ResolutionTier::High => "2k",
        }
    }
}

/// Maps a requested ratio onto the allow-list: `2:1` becomes `16:9`, anything
/// else unsupported becomes `1:1`.
pub fn sanitize_aspect_ratio(requested: &str) -> &'static str {
    let trimmed = requested.trim();
    if let Some(supported) = SUPPORTED_ASPECT_RATIOS
        .iter()
        .copied()
        .find(|ratio| *ratio == trimmed)
    {
        return supported;
    }

    let fallback = if trimmed == "2:1" { "16:9" } else { "1:1" };
    warn!(
        "Aspect ratio '{}' is not supported by the image model; using {}",
        requested, fallback
    );
    fallback
}

pub fn enhance_prompt(prompt: &str, tier: ResolutionTier) -> String {
    match tier {
        ResolutionTier::Standard => prompt.to_string(),
        ResolutionTier::High => format!("{prompt}{QUALITY_BOOST_SUFFIX}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub mime_type: String,
    pub encoded_payload: String,
    pub bytes: Vec<u8>,
}

impl RenderResult {
    pub fn data_url(&self) -> String {
        data_url(&self.mime_type, &self.encoded_payload)
    }

    pub fn file_name(&self) -> String {
        format!("imagen-generated-{}.jpg", Utc::now().timestamp_millis())
    }

    /// Writes the image into `dir`, creating it when needed.
    pub async fn save_to_dir(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create '{}'", dir.display()))?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, &self.bytes)
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        info!(path = %path.display(), bytes = self.bytes.len(), "Saved rendered image");
        Ok(path)
    }
}

#[derive(Clone)]
pub struct ImageRenderer {
    transport: Arc<dyn GenerativeTransport>,
    model: String,
}

impl ImageRenderer {
    pub fn new(transport: Arc<dyn GenerativeTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    pub fn from_config(transport: Arc<dyn GenerativeTransport>, config: &Config) -> Self {
        Self::new(transport, config.imagen_model.clone())
    }

    pub fn build_payload(&self, prompt: &str, aspect_ratio: &str) -> Value {
        json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio,
                "outputOptions": { "mimeType": OUTPUT_MIME_TYPE }
            }
        })
    }

    /// Renders one image. Returns `Ok(None)` without any request when the prompt
    /// is blank or no credential is present.
    pub async fn render_image(
        &self,
        credential: Option<&Credential>,
        prompt: &str,
        aspect_ratio: &str,
        tier: ResolutionTier,
    ) -> PromptCraftResult<Option<RenderResult>> {
        let Some(credential) = credential.filter(|credential| !credential.is_empty()) else {
            return Ok(None);
        };
        if prompt.trim().is_empty() {
            return Ok(None);
        }

        let aspect_ratio = sanitize_aspect_ratio(aspect_ratio);
        let final_prompt = enhance_prompt(prompt, tier);
        let payload = self.build_payload(&final_prompt, aspect_ratio);
        let metadata = json!({ "aspectRatio": aspect_ratio, "resolution": tier.as_str() });

        let transport = Arc::clone(&self.transport);
        let api_key = credential.api_key().to_string();
        let model = self.model.clone();
        let response = log_llm_timing(
            "imagen",
            &self.model,
            "render_image",
            Some(metadata),
            || async move { transport.predict(&api_key, &model, payload).await },
        )
        .await
        .map_err(|err| {
            warn!("Image generation failed: {:#}", err);
            classify_image_error(&err)
        })?;

        let Some(prediction) = response.first_image() else {
            warn!(
                filtered = ?response.filtered_reasons(),
                "Image model returned no image"
            );
            return Err(PromptCraftError::NoImageReturned);
        };

        let encoded_payload = prediction
            .bytes_base64_encoded
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        let bytes = general_purpose::STANDARD
            .decode(&encoded_payload)
            .map_err(|err| {
                PromptCraftError::UpstreamError(format!(
                    "Image generation failed: invalid image payload ({err})"
                ))
            })?;
        let mime_type = prediction
            .mime_type
            .clone()
            .unwrap_or_else(|| OUTPUT_MIME_TYPE.to_string());

        info!(
            model = %self.model,
            aspect_ratio,
            bytes = bytes.len(),
            "Rendered image"
        );
        Ok(Some(RenderResult {
            mime_type,
            encoded_payload,
            bytes,
        }))
    }
}
