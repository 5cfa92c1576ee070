//! SQL pipeline orchestrator
//!
//! Runs the six stages in order for one question:
//! intent extraction, schema validation, generation, SQL validation,
//! execution and formatting. The first failing stage ends the run; later
//! stages are never attempted. Every run is tagged with a fresh run id.

use crate::config::Settings;
use crate::error::{DatahubError, ExecutionErrorKind, Result};
use crate::intent::Intent;
use crate::intent_extractor::IntentExtractor;
use crate::llm::TextCompletion;
use crate::query_executor::{ExecutionResult, QueryExecutor};
use crate::query_generator::{GeneratedQuery, QueryGenerator};
use crate::query_validator::{QueryValidator, SqlValidation};
use crate::result_formatter::{FormattedResult, ResultFormatter};
use crate::schema::{SchemaCatalog, SchemaSummaryCache};
use crate::schema_validator::SchemaValidator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub question: String,
    pub intent: Intent,
    pub generated: GeneratedQuery,
    pub sql_validation: SqlValidation,
    pub execution: ExecutionResult,
    pub formatted: FormattedResult,
    /// Non-fatal schema, generation and SQL warnings, in stage order.
    pub warnings: Vec<String>,
}

impl PipelineOutput {
    pub fn sql(&self) -> &str {
        &self.generated.sql
    }
}

pub struct SqlPipeline {
    extractor: IntentExtractor,
    validator: SchemaValidator,
    sql_validator: QueryValidator,
    executor: QueryExecutor,
    formatter: ResultFormatter,
    intent_timeout: Duration,
}

impl SqlPipeline {
    /// Wire the stages against the store named in `settings`.
    pub fn new(llm: Arc<dyn TextCompletion>, settings: &Settings) -> Result<Self> {
        let catalog = Arc::new(SchemaCatalog::open(&settings.database_path, settings.schema_ttl())?);
        let summary = Arc::new(SchemaSummaryCache::new(&settings.database_path));
        Ok(Self::from_parts(
            IntentExtractor::new(llm, summary),
            SchemaValidator::new(catalog),
            QueryExecutor::new(&settings.database_path, settings.query_timeout()),
        )
        .with_intent_timeout(settings.intent_timeout()))
    }

    pub fn from_parts(extractor: IntentExtractor, validator: SchemaValidator, executor: QueryExecutor) -> Self {
        Self {
            extractor,
            validator,
            sql_validator: QueryValidator::new(),
            executor,
            formatter: ResultFormatter::new(),
            intent_timeout: crate::intent_extractor::DEFAULT_INTENT_TIMEOUT,
        }
    }

    pub fn with_intent_timeout(mut self, timeout: Duration) -> Self {
        self.intent_timeout = timeout;
        self
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn schema_validator(&self) -> &SchemaValidator {
        &self.validator
    }

    pub fn sql_validator(&self) -> &QueryValidator {
        &self.sql_validator
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub async fn run(&self, question: &str) -> Result<PipelineOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id);
        self.run_stages(run_id, question).instrument(span).await
    }

    async fn run_stages(&self, run_id: Uuid, question: &str) -> Result<PipelineOutput> {
        info!("Processing question: {}", question);
        let mut warnings = Vec::new();

        // 1. Intent
        let intent = self.extractor.parse(question, self.intent_timeout).await?;

        // 2. Schema, pinned for the rest of the run
        let schema = self.validator.snapshot();
        let validation = self.validator.validate_against(&intent, &schema);
        if !validation.valid {
            return Err(DatahubError::SchemaViolation(validation.errors));
        }
        warnings.extend(validation.warnings);

        // 3. SQL
        let generator = QueryGenerator::with_schema(&schema);
        let generated = generator.generate_query(&intent, &validation.schema_info)?;
        warnings.extend(generated.warnings.iter().cloned());

        // 4. Safety
        let sql_validation = self.check_sql(&generated.sql)?;
        warnings.extend(sql_validation.warnings.iter().cloned());

        // 5. Execution
        let execution = self.execute(&generated.sql).await?.into_result()?;

        // 6. Formatting
        let formatted = self.formatter.format_results(&execution, question);
        info!("Pipeline finished with {} rows", execution.row_count);

        Ok(PipelineOutput {
            run_id,
            question: question.to_string(),
            intent,
            generated,
            sql_validation,
            execution,
            formatted,
            warnings,
        })
    }

    fn check_sql(&self, sql: &str) -> Result<SqlValidation> {
        let result = self.sql_validator.validate_query(sql);
        if result.valid && result.safe {
            return Ok(result);
        }
        error!("Rejected SQL: {}", sql);
        Err(DatahubError::UnsafeSql {
            sql: sql.to_string(),
            issues: result.errors,
        })
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult> {
        let executor = self.executor.clone();
        let owned = sql.to_string();
        tokio::task::spawn_blocking(move || executor.execute_read_query(&owned))
            .await
            .map_err(|e| DatahubError::Execution {
                kind: ExecutionErrorKind::Unexpected,
                message: format!("Unexpected error during query execution: {}", e),
                sql: sql.to_string(),
            })
    }

    /// Validate, execute and format caller-supplied SQL.
    pub async fn run_sql(&self, sql: &str) -> Result<FormattedResult> {
        self.check_sql(sql)?;
        let execution = self.execute(sql).await?;
        Ok(self.formatter.format_results(&execution, sql))
    }

    /// Answer `question` as display text. Failures come back in-band,
    /// prefixed with `❌`. `history` is accepted for the routing boundary
    /// and not used by SQL answering.
    pub async fn answer(&self, question: &str, history: &[String]) -> String {
        if !history.is_empty() {
            info!("Ignoring {} history turns for SQL answering", history.len());
        }
        match self.run(question).await {
            Ok(output) => {
                for w in &output.warnings {
                    warn!("{}", w);
                }
                output.formatted.display_text
            }
            Err(e) => render_failure(&e),
        }
    }
}

/// One-line user-facing message for a failed run.
pub fn render_failure(e: &DatahubError) -> String {
    match e {
        DatahubError::Parse(_) => format!("❌ Sorry, I couldn't understand your question: {}", e),
        DatahubError::SchemaViolation(errors) => {
            format!("❌ Sorry, your question refers to data that doesn't exist: {}", errors.join("; "))
        }
        DatahubError::Generation(_) => format!("❌ Sorry, I couldn't build a query for that: {}", e),
        DatahubError::UnsafeSql { .. } => format!("❌ The generated query was rejected: {}", e),
        DatahubError::Execution { message, .. } => {
            format!("❌ Sorry, I couldn't execute your query: {}", message)
        }
        other => format!("❌ {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailure;
    use crate::query_validator::{SqlIssue, SqlIssueKind};

    #[test]
    fn test_render_failure_prefixes() {
        let cases = vec![
            DatahubError::Parse(ParseFailure::Timeout(Duration::from_secs(10))),
            DatahubError::SchemaViolation(vec!["Table 'agents' does not exist in database".to_string()]),
            DatahubError::Generation("no join".to_string()),
            DatahubError::UnsafeSql {
                sql: "DROP TABLE estates".to_string(),
                issues: vec![SqlIssue {
                    kind: SqlIssueKind::Dangerous,
                    message: "Dangerous operation detected: DROP".to_string(),
                }],
            },
            DatahubError::Execution {
                kind: ExecutionErrorKind::Operational,
                message: "SQL execution error: no such table: agents".to_string(),
                sql: "SELECT * FROM agents".to_string(),
            },
            DatahubError::Config("bad".to_string()),
        ];
        for e in &cases {
            assert!(render_failure(e).starts_with("❌ "), "{:?}", e);
        }
        assert!(render_failure(&cases[1]).contains("Table 'agents' does not exist"));
        assert!(render_failure(&cases[3]).contains("Dangerous operation detected: DROP"));
        assert_eq!(
            render_failure(&cases[4]),
            "❌ Sorry, I couldn't execute your query: SQL execution error: no such table: agents"
        );
    }
}
