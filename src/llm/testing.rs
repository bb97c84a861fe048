use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::llm::gemini::{GenerateContentResponse, GenerativeTransport, PredictResponse};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub api_key: String,
    pub model: String,
    pub payload: Value,
}

/// Transport double that replays queued outcomes and records every request.
#[derive(Default)]
pub struct RecordingTransport {
    text_outcomes: Mutex<VecDeque<Result<GenerateContentResponse, String>>>,
    image_outcomes: Mutex<VecDeque<Result<PredictResponse, String>>>,
    pub text_calls: Mutex<Vec<RecordedCall>>,
    pub image_calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        let response = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] }, "finishReason": "STOP" }]
        }))
        .unwrap();
        self.text_outcomes.lock().push_back(Ok(response));
    }

    pub fn push_text_response(&self, response: Value) {
        let response = serde_json::from_value(response).unwrap();
        self.text_outcomes.lock().push_back(Ok(response));
    }

    pub fn push_text_error(&self, message: &str) {
        self.text_outcomes.lock().push_back(Err(message.to_string()));
    }

    pub fn push_image(&self, base64_data: &str) {
        let response = serde_json::from_value(json!({
            "predictions": [{ "bytesBase64Encoded": base64_data, "mimeType": "image/jpeg" }]
        }))
        .unwrap();
        self.image_outcomes.lock().push_back(Ok(response));
    }

    pub fn push_image_response(&self, response: Value) {
        let response = serde_json::from_value(response).unwrap();
        self.image_outcomes.lock().push_back(Ok(response));
    }

    pub fn push_image_error(&self, message: &str) {
        self.image_outcomes.lock().push_back(Err(message.to_string()));
    }

    pub fn text_call_count(&self) -> usize {
        self.text_calls.lock().len()
    }

    pub fn image_call_count(&self) -> usize {
        self.image_calls.lock().len()
    }

    pub fn last_text_call(&self) -> Option<RecordedCall> {
        self.text_calls.lock().last().cloned()
    }

    pub fn last_image_call(&self) -> Option<RecordedCall> {
        self.image_calls.lock().last().cloned()
    }
}

#[async_trait]
impl GenerativeTransport for RecordingTransport {
    async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        payload: Value,
    ) -> Result<GenerateContentResponse> {
        self.text_calls.lock().push(RecordedCall {
            api_key: api_key.to_string(),
            model: model.to_string(),
            payload,
        });
        match self.text_outcomes.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no queued text response")),
        }
    }

    async fn predict(&self, api_key: &str, model: &str, payload: Value) -> Result<PredictResponse> {
        self.image_calls.lock().push(RecordedCall {
            api_key: api_key.to_string(),
            model: model.to_string(),
            payload,
        });
        match self.image_outcomes.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no queued image response")),
        }
    }
}
