//! Intent Extractor
//!
//! Turns a natural-language question into an [`Intent`] by prompting a text
//! completion service with the schema summary and the question, then pulling
//! a JSON object out of the reply.
//!
//! A reply that is not strict JSON gets one more chance: the substring from
//! the first `{` to the last `}` is parsed. There is no retry and no partial
//! result; a timeout or an unparseable reply yields no intent.

use crate::error::{ParseFailure, Result};
use crate::intent::Intent;
use crate::llm::TextCompletion;
use crate::prompts::intent_prompt;
use crate::schema::SchemaSummaryCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_INTENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IntentExtractor {
    llm: Arc<dyn TextCompletion>,
    schema_summary: Arc<SchemaSummaryCache>,
}

impl IntentExtractor {
    pub fn new(llm: Arc<dyn TextCompletion>, schema_summary: Arc<SchemaSummaryCache>) -> Self {
        Self { llm, schema_summary }
    }

    pub fn prompt_for(&self, query: &str) -> String {
        intent_prompt(&self.schema_summary.get(), query)
    }

    /// Parse `query` into an intent, waiting at most `timeout` for the model.
    pub async fn parse(&self, query: &str, timeout: Duration) -> Result<Intent> {
        info!("Parsing intent for query: {}", query);
        let prompt = self.prompt_for(query);

        let response = match tokio::time::timeout(timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("Error parsing intent: {}", e);
                return Err(ParseFailure::Completion(e.to_string()).into());
            }
            Err(_) => {
                error!("Intent parsing timed out after {:?}", timeout);
                return Err(ParseFailure::Timeout(timeout).into());
            }
        };

        info!("LLM response: {}", response);

        match extract_intent(&response) {
            Some(intent) => {
                info!("Successfully parsed intent: {:?}", intent);
                Ok(intent)
            }
            None => {
                error!("Failed to parse JSON from LLM response");
                Err(ParseFailure::MalformedResponse(truncate(&response, 200)).into())
            }
        }
    }
}

/// Strict parse of the trimmed text, then the outermost `{ ... }` span.
pub fn extract_intent(response: &str) -> Option<Intent> {
    if let Ok(intent) = serde_json::from_str::<Intent>(response.trim()) {
        return Some(intent);
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Intent>(&response[start..=end]).ok()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
