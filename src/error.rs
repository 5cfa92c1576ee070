use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::query_validator::SqlIssue;

/// Why the intent extractor produced no intent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("intent parsing timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed intent response: {0}")]
    MalformedResponse(String),

    #[error("text completion failed: {0}")]
    Completion(String),
}

/// Sub-kinds of execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Operational,
    Integrity,
    Unexpected,
    Safety,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::Operational => "operational",
            ExecutionErrorKind::Integrity => "integrity",
            ExecutionErrorKind::Unexpected => "unexpected",
            ExecutionErrorKind::Safety => "safety",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DatahubError {
    #[error("Intent parsing failed: {0}")]
    Parse(#[from] ParseFailure),

    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Query generation failed: {0}")]
    Generation(String),

    #[error("Unsafe or malformed SQL: {}", format_issues(.issues))]
    UnsafeSql { sql: String, issues: Vec<SqlIssue> },

    #[error("Execution error ({kind}): {message}")]
    Execution {
        kind: ExecutionErrorKind,
        message: String,
        sql: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_issues(issues: &[SqlIssue]) -> String {
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DatahubError {
    /// SQL text carried by the failure, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            DatahubError::UnsafeSql { sql, .. } | DatahubError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatahubError>;
