use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::credential::Credential;
use crate::error::{PromptCraftError, PromptCraftResult};
use crate::intake::UploadedImage;
use crate::llm::classify::{classify_text_error, TEXT_SAFETY_MESSAGE};
use crate::llm::gemini::{GenerateContentResponse, GenerativeTransport};
use crate::preferences::PreferenceSet;
use crate::rulebook::Rulebook;
use crate::utils::timing::log_llm_timing;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_ONLY_HIGH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub prompt_text: String,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            generated_at: Utc::now(),
        }
    }

    pub fn edit(&mut self, prompt_text: impl Into<String>) {
        self.prompt_text = prompt_text.into();
    }
}

fn build_safety_settings() -> Vec<Value> {
    SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": SAFETY_THRESHOLD }))
        .collect()
}

/// Turns the rulebook, the preferences and the reference image into one text-model request.
#[derive(Clone)]
pub struct PromptRequestBuilder {
    transport: Arc<dyn GenerativeTransport>,
    rulebook: Arc<Rulebook>,
    model: String,
    temperature: f32,
}

impl PromptRequestBuilder {
    pub fn new(
        transport: Arc<dyn GenerativeTransport>,
        rulebook: Arc<Rulebook>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            transport,
            rulebook,
            model: model.into(),
            temperature,
        }
    }

    pub fn from_config(
        transport: Arc<dyn GenerativeTransport>,
        rulebook: Arc<Rulebook>,
        config: &Config,
    ) -> Self {
        Self::new(
            transport,
            rulebook,
            config.gemini_text_model.clone(),
            config.gemini_temperature,
        )
    }

    pub fn rulebook(&self) -> &Rulebook {
        &self.rulebook
    }

    pub fn build_instruction(&self, preferences: &PreferenceSet) -> String {
        let rulebook = &self.rulebook;
        let notes = if preferences.notes.is_empty() {
            rulebook.no_notes_placeholder.as_str()
        } else {
            preferences.notes.as_str()
        };

        format!(
            "{preamble}\n\n\
             --- START RULEBOOK ---\n\
             {rules}\n\n\
             {core}\n\
             --- END RULEBOOK ---\n\n\
             USER INPUT:\n\
             1. Desired gender: {gender}\n\
             2. User notes: \"{notes}\"\n\
             3. Camera angle: \"{angle}\"\n\
             4. Background: \"{background}\"\n\n\
             TASK:\n\
             - Analyse the attached image.\n\
             - Write one complete English text prompt that follows the rulebook and the user input.\n\
             - {output_format}\n",
            preamble = rulebook.preamble,
            rules = rulebook.rules,
            core = rulebook.subject_core(preferences.gender),
            gender = preferences.gender.label(),
            notes = notes,
            angle = preferences.camera_angle.instruction_label(),
            background = preferences.background.description(),
            output_format = rulebook.output_format,
        )
    }

    pub fn build_payload(&self, image: &UploadedImage, instruction: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": image.mime_type, "data": image.encoded_payload } },
                    { "text": instruction }
                ]
            }],
            "generationConfig": { "temperature": self.temperature },
            "safetySettings": build_safety_settings(),
        })
    }

    /// Validates inputs, calls the text model once, and returns the trimmed prompt.
    pub async fn build_and_generate(
        &self,
        credential: &Credential,
        image: Option<&UploadedImage>,
        preferences: &PreferenceSet,
    ) -> PromptCraftResult<GenerationResult> {
        if !credential.is_well_formed() {
            return Err(PromptCraftError::InvalidCredential);
        }
        let image = image.ok_or(PromptCraftError::NoImageProvided)?;

        let instruction = self.build_instruction(preferences);
        let payload = self.build_payload(image, &instruction);
        let metadata = json!({
            "gender": preferences.gender.as_stored(),
            "angle": preferences.camera_angle.instruction_label(),
            "background": preferences.background.as_stored(),
            "rulebookVersion": self.rulebook.version,
        });

        let transport = Arc::clone(&self.transport);
        let api_key = credential.api_key().to_string();
        let model = self.model.clone();
        let response = log_llm_timing(
            "gemini",
            &self.model,
            "build_and_generate",
            Some(metadata),
            || async move { transport.generate_content(&api_key, &model, payload).await },
        )
        .await
        .map_err(|err| {
            warn!("Prompt generation failed: {:#}", err);
            classify_text_error(&err)
        })?;

        let prompt_text = interpret_text_response(&response)?;
        info!(
            model = %self.model,
            chars = prompt_text.chars().count(),
            "Generated prompt"
        );
        Ok(GenerationResult::new(prompt_text))
    }
}

fn interpret_text_response(response: &GenerateContentResponse) -> PromptCraftResult<String> {
    if let Some(text) = response.text() {
        return Ok(text.trim().to_string());
    }

    let safety_finish = response
        .finish_reason()
        .map(|reason| reason.eq_ignore_ascii_case("SAFETY"))
        .unwrap_or(false);
    if safety_finish || response.block_reason().is_some() {
        warn!(
            finish_reason = ?response.finish_reason(),
            block_reason = ?response.block_reason(),
            "Prompt generation blocked by safety filter"
        );
        return Err(PromptCraftError::SafetyBlocked(
            TEXT_SAFETY_MESSAGE.to_string(),
        ));
    }

    warn!(finish_reason = ?response.finish_reason(), "Text model returned no text");
    Err(PromptCraftError::EmptyResponse)
}
