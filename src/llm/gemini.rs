use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::http::get_http_client;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    pub candidates: Option<Vec<GeminiCandidate>>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiContent {
    pub parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, joined the way the SDK exposes `response.text`.
    pub fn text(&self) -> Option<String> {
        let candidate = self.candidates.as_deref()?.first()?;
        let parts = candidate.content.as_ref()?.parts.as_deref()?;
        let text: String = parts
            .iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates
            .as_deref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.finish_reason.as_deref())
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictResponse {
    pub predictions: Option<Vec<ImagenPrediction>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenPrediction {
    pub bytes_base64_encoded: Option<String>,
    pub mime_type: Option<String>,
    pub rai_filtered_reason: Option<String>,
}

impl PredictResponse {
    pub fn first_image(&self) -> Option<&ImagenPrediction> {
        self.predictions.as_deref()?.iter().find(|prediction| {
            prediction
                .bytes_base64_encoded
                .as_deref()
                .map(|data| !data.trim().is_empty())
                .unwrap_or(false)
        })
    }

    pub fn filtered_reasons(&self) -> Vec<&str> {
        self.predictions
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|prediction| prediction.rai_filtered_reason.as_deref())
            .collect()
    }
}

/// The two external model calls. Errors carry the upstream status and message text.
#[async_trait]
pub trait GenerativeTransport: Send + Sync {
    async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        payload: Value,
    ) -> Result<GenerateContentResponse>;

    async fn predict(&self, api_key: &str, model: &str, payload: Value) -> Result<PredictResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpGeminiTransport {
    api_base: String,
}

impl HttpGeminiTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.gemini_api_base.clone())
    }

    async fn post_json(
        &self,
        api_key: &str,
        model: &str,
        method: &str,
        payload: &Value,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/models/{}:{}", self.api_base, model, method);
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "llm.gemini",
                model = model,
                method = method,
                payload = %summarize_payload(payload)
            );
        }

        let response = get_http_client()
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_api_key(&err.to_string(), api_key);
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
            let detail = redact_api_key(&message.unwrap_or(body_summary), api_key);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerativeTransport for HttpGeminiTransport {
    async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        payload: Value,
    ) -> Result<GenerateContentResponse> {
        let response = self
            .post_json(api_key, model, "generateContent", &payload)
            .await?;
        let value = response.json::<GenerateContentResponse>().await?;
        debug!(
            target: "llm.gemini",
            model = model,
            finish_reason = ?value.finish_reason(),
            has_text = value.text().is_some()
        );
        Ok(value)
    }

    async fn predict(&self, api_key: &str, model: &str, payload: Value) -> Result<PredictResponse> {
        let response = self.post_json(api_key, model, "predict", &payload).await?;
        let value = response.json::<PredictResponse>().await?;
        debug!(
            target: "llm.gemini",
            model = model,
            predictions = value.predictions.as_ref().map(|p| p.len()).unwrap_or(0)
        );
        Ok(value)
    }
}

fn redact_api_key(text: &str, api_key: &str) -> String {
    let key = api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

/// Log-safe view of a request: inline image data is reduced to its length.
pub(crate) fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized: Vec<Value> = contents
            .iter()
            .map(|content| {
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_parts(parts))
                    .unwrap_or_default();
                json!({ "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized));
    }

    if let Some(instances) = payload.get("instances").and_then(|value| value.as_array()) {
        let prompts: Vec<Value> = instances
            .iter()
            .filter_map(|instance| instance.get("prompt").and_then(|value| value.as_str()))
            .map(|prompt| json!(truncate_for_log(prompt, 200)))
            .collect();
        summary.insert("prompts".to_string(), Value::Array(prompts));
    }

    for key in ["generationConfig", "parameters"] {
        if let Some(config) = payload.get(key) {
            summary.insert(key.to_string(), config.clone());
        }
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
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
        let reason = value
            .pointer("/error/details/0/reason")
            .and_then(|v| v.as_str());
        let message = match (message, reason) {
            (Some(message), Some(reason)) if !message.contains(reason) => {
                Some(format!("{message} ({reason})"))
            }
            (message, _) => message,
        };
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_parts_of_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "A full-body shot " },
                    { "thought": true },
                    { "text": "of a model." }
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("A full-body shot of a model."));
        assert_eq!(response.finish_reason(), Some("STOP"));
    }

    #[test]
    fn safety_finish_without_content_has_no_text() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .unwrap();
        assert!(response.text().is_none());
        assert_eq!(response.finish_reason(), Some("SAFETY"));

        let blocked: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        assert_eq!(blocked.block_reason(), Some("SAFETY"));
    }

    #[test]
    fn predict_skips_filtered_predictions() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "raiFilteredReason": "blocked by filter" },
                { "bytesBase64Encoded": "AAAA", "mimeType": "image/jpeg" }
            ]
        }))
        .unwrap();
        assert_eq!(
            response.first_image().and_then(|p| p.bytes_base64_encoded.as_deref()),
            Some("AAAA")
        );
        assert_eq!(response.filtered_reasons(), vec!["blocked by filter"]);
    }

    #[test]
    fn payload_summary_hides_inline_data() {
        let payload = json!({
            "contents": [{ "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "QUJDRA==" } },
                { "text": "describe" }
            ]}],
            "safetySettings": [{}, {}]
        });
        let summary = summarize_payload(&payload).to_string();
        assert!(!summary.contains("QUJDRA=="));
        assert!(summary.contains("\"dataLen\":8"));
        assert!(summary.contains("\"safetySettingsCount\":2"));
    }

    #[test]
    fn error_body_keeps_message_and_reason() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        let (message, _) = summarize_error_body(body);
        assert_eq!(
            message.as_deref(),
            Some("API key not valid. Please pass a valid API key. (API_KEY_INVALID)")
        );
        assert_eq!(summarize_error_body("  ").1, "empty response body");
    }

    #[test]
    fn api_key_is_redacted() {
        assert_eq!(
            redact_api_key("bad key AIzaSECRET", "AIzaSECRET"),
            "bad key [redacted]"
        );
    }
}
