//! Local planner backend speaking the Ollama chat API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::ChatBackend;
use crate::errors::PlanError;

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
            temperature,
        }
    }
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    response: Option<String>,
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat(&self, system: &str, user: &str) -> Result<String, PlanError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "options": {
                    "temperature": self.temperature,
                    "top_p": 0.9,
                    "num_predict": 2000,
                },
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: OllamaResponse = response.json().await?;
        body.message
            .map(|m| m.content)
            .or(body.response)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| PlanError::Parse("unexpected Ollama response shape".into()))
    }
}
