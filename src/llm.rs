use crate::config::{LlmProvider, Settings};
use crate::error::{DatahubError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// A text completion service: rendered prompt in, plain text out.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    api_key: Option<String>,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(
        provider: LlmProvider,
        model: String,
        base_url: String,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.llm_provider {
            LlmProvider::Ollama => Self::new(
                LlmProvider::Ollama,
                settings.ollama_model.clone(),
                settings.ollama_base_url.clone(),
                None,
            ),
            LlmProvider::OpenRouter => Self::new(
                LlmProvider::OpenRouter,
                settings.openrouter_model.clone(),
                "https://openrouter.ai/api/v1".to_string(),
                settings.openrouter_api_key.clone(),
            ),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.1 }
        });

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| DatahubError::Llm(format!("Ollama call failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DatahubError::Llm(format!("Ollama returned {}: {}", status, text)));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| DatahubError::Llm(format!("Failed to decode Ollama response: {}", e)))?;
        Ok(parsed.response)
    }

    async fn call_chat_completions(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DatahubError::Llm("missing API key".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DatahubError::Llm(format!("LLM API call failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DatahubError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DatahubError::Llm(format!("Failed to decode LLM response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DatahubError::Llm("LLM response contained no content".to_string()))
    }
}

#[async_trait]
impl TextCompletion for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!("Sending {} char prompt to {}", prompt.len(), self.model);
        match self.provider {
            LlmProvider::Ollama => self.call_ollama(prompt).await,
            LlmProvider::OpenRouter => self.call_chat_completions(prompt).await,
        }
    }
}
