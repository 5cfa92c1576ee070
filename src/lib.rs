pub mod column_resolver;
pub mod config;
pub mod error;
pub mod intent;
pub mod intent_extractor;
pub mod join_planner;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod query_executor;
pub mod query_generator;
pub mod query_validator;
pub mod result_formatter;
pub mod router;
pub mod schema;
pub mod schema_validator;

pub use config::Settings;
pub use error::{DatahubError, ExecutionErrorKind, ParseFailure, Result};
pub use intent::{AggregateFunction, Intent};
pub use pipeline::{PipelineOutput, SqlPipeline};
pub use query_executor::{ExecutionResult, QueryExecutor};
pub use query_generator::{GeneratedQuery, QueryGenerator, QueryShape};
pub use query_validator::{QueryValidator, SqlIssue, SqlIssueKind, SqlValidation};
pub use result_formatter::{FormattedResult, ResultFormatter, ResultKind};
pub use router::{Assistant, ExplanationSource, QueryRouter, Route};
pub use schema::{SchemaCatalog, SchemaSnapshot, SchemaSummaryCache, TableSchema};
pub use schema_validator::{SchemaValidator, ValidationResult};
