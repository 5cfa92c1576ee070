//! Runtime settings
//!
//! Loaded from the process environment after `.env` has been applied.

use crate::error::{DatahubError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenRouter,
}

impl LlmProvider {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            other => Err(DatahubError::Config(format!("Unsupported provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub llm_provider: LlmProvider,
    pub ollama_model: String,
    pub ollama_base_url: String,
    pub openrouter_model: String,
    #[serde(skip_serializing)]
    pub openrouter_api_key: Option<String>,
    pub database_path: PathBuf,
    pub log_level: String,
    pub query_timeout_secs: u64,
    pub intent_timeout_secs: u64,
    pub schema_ttl_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::Ollama,
            ollama_model: "llama3.2".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            openrouter_api_key: None,
            database_path: PathBuf::from("data/agency/agency_data.db"),
            log_level: "info".to_string(),
            query_timeout_secs: 30,
            intent_timeout_secs: 10,
            schema_ttl_secs: None,
        }
    }
}

impl Settings {
    /// Apply `.env` (if present) and read settings from the environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Missing keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let llm_provider = match lookup("LLM_PROVIDER") {
            Some(value) => LlmProvider::parse(&value)?,
            None => defaults.llm_provider,
        };

        let settings = Settings {
            llm_provider,
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            ollama_base_url: lookup("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            openrouter_model: lookup("OPENROUTER_MODEL").unwrap_or(defaults.openrouter_model),
            openrouter_api_key: lookup("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty()),
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            query_timeout_secs: parse_secs(&lookup, "QUERY_TIMEOUT_SECS")?
                .unwrap_or(defaults.query_timeout_secs),
            intent_timeout_secs: parse_secs(&lookup, "INTENT_TIMEOUT_SECS")?
                .unwrap_or(defaults.intent_timeout_secs),
            schema_ttl_secs: parse_secs(&lookup, "SCHEMA_TTL_SECS")?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm_provider == LlmProvider::OpenRouter && self.openrouter_api_key.is_none() {
            return Err(DatahubError::Config(
                "OPENROUTER_API_KEY is required when using openrouter provider".to_string(),
            ));
        }
        if self.query_timeout_secs == 0 || self.intent_timeout_secs == 0 {
            return Err(DatahubError::Config("timeouts must be at least one second".to_string()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::from_secs(self.intent_timeout_secs)
    }

    pub fn schema_ttl(&self) -> Option<Duration> {
        self.schema_ttl_secs.map(Duration::from_secs)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| DatahubError::Config(format!("{} must be a whole number of seconds: {}", key, e))),
        None => Ok(None),
    }
}
