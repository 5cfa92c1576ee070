//! Query routing
//!
//! Decides whether a question needs data (the SQL pipeline), an explanation
//! (an external retrieval source), or both, and merges the answers.

use crate::error::Result;
use crate::llm::TextCompletion;
use crate::pipeline::{render_failure, SqlPipeline};
use crate::prompts::routing_prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Sql,
    Explanation,
    Both,
}

impl Route {
    /// Read a classifier reply. The earliest recognised label wins;
    /// anything else routes to SQL.
    pub fn parse(reply: &str) -> Self {
        let upper = reply.to_uppercase();
        [("SINGLE_SQL", Route::Sql), ("SINGLE_RAG", Route::Explanation), ("BOTH", Route::Both)]
            .into_iter()
            .filter_map(|(label, route)| upper.find(label).map(|pos| (pos, route)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, route)| route)
            .unwrap_or(Route::Sql)
    }
}

/// Answers explanatory questions from unstructured text.
#[async_trait]
pub trait ExplanationSource: Send + Sync {
    async fn explain(&self, question: &str, history: &[String]) -> Result<String>;
}

pub struct QueryRouter {
    llm: Arc<dyn TextCompletion>,
    timeout: Duration,
}

impl QueryRouter {
    pub fn new(llm: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn route(&self, question: &str) -> Route {
        let prompt = routing_prompt(question);
        match tokio::time::timeout(self.timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(reply)) => {
                let route = Route::parse(&reply);
                info!("Routed question to {:?}", route);
                route
            }
            Ok(Err(e)) => {
                warn!("Routing failed ({}), defaulting to SQL", e);
                Route::Sql
            }
            Err(_) => {
                warn!("Routing timed out after {:?}, defaulting to SQL", self.timeout);
                Route::Sql
            }
        }
    }
}

/// Top-level question answering over the SQL pipeline and an optional
/// explanation source.
pub struct Assistant {
    router: QueryRouter,
    pipeline: Arc<SqlPipeline>,
    explanations: Option<Arc<dyn ExplanationSource>>,
}

impl Assistant {
    pub fn new(router: QueryRouter, pipeline: Arc<SqlPipeline>) -> Self {
        Self {
            router,
            pipeline,
            explanations: None,
        }
    }

    pub fn with_explanations(mut self, source: Arc<dyn ExplanationSource>) -> Self {
        self.explanations = Some(source);
        self
    }

    pub async fn answer(&self, question: &str, history: &[String]) -> String {
        let route = self.router.route(question).await;

        let source = match (&self.explanations, route) {
            (_, Route::Sql) => return self.pipeline.answer(question, history).await,
            (None, _) => {
                info!("No explanation source configured, answering from data only");
                return self.pipeline.answer(question, history).await;
            }
            (Some(source), _) => Arc::clone(source),
        };

        if route == Route::Explanation {
            return explanation_text(source.explain(question, history).await);
        }

        let (data, context) = tokio::join!(
            self.pipeline.answer(question, history),
            source.explain(question, history)
        );
        format!("Data:\n{}\n\nContext:\n{}", data, explanation_text(context))
    }
}

fn explanation_text(result: Result<String>) -> String {
    result.unwrap_or_else(|e| render_failure(&e))
}
