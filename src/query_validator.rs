//! SQL Safety Validator
//!
//! Pattern-based static checks on SQL text before it reaches the store. The
//! validator does not trust the generator: every statement is checked for
//! write/DDL keywords, quote and parenthesis balance, injection markers, and a
//! few performance smells (advisory only).

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "EXEC", "EXECUTE", "MERGE", "BULK",
];

const INJECTION_PATTERNS: &[&str] = &[r";\s*--", r";\s*/\*", r"union\s+select.*--", r"/\*.*\*/.*select"];

lazy_static! {
    static ref DANGEROUS_REGEXES: Vec<(&'static str, Regex)> = DANGEROUS_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{}\b", kw)).unwrap()))
        .collect();
    static ref INJECTION_REGEXES: Vec<(&'static str, Regex)> = INJECTION_PATTERNS
        .iter()
        .map(|p| (*p, Regex::new(p).unwrap()))
        .collect();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref SELECT_STAR: Regex = Regex::new(r"SELECT\s+\*").unwrap();
    static ref JOIN_WORD: Regex = Regex::new(r"\bJOIN\b").unwrap();
    static ref ON_WORD: Regex = Regex::new(r"\bON\b").unwrap();
    static ref WHERE_WORD: Regex = Regex::new(r"\bWHERE\b").unwrap();
    static ref FROM_WORD: Regex = Regex::new(r"\bFROM\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlIssueKind {
    Dangerous,
    Syntax,
    Injection,
}

impl SqlIssueKind {
    /// Whether an issue of this kind makes a statement unsafe to run.
    pub fn is_safety_issue(&self) -> bool {
        matches!(self, SqlIssueKind::Dangerous | SqlIssueKind::Injection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlIssue {
    pub kind: SqlIssueKind,
    pub message: String,
}

impl SqlIssue {
    fn new(kind: SqlIssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SqlIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// `valid`: no issues at all. `safe`: no dangerous or injection issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlValidation {
    pub valid: bool,
    pub safe: bool,
    pub errors: Vec<SqlIssue>,
    pub warnings: Vec<String>,
}

impl SqlValidation {
    pub fn error_messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    pub fn has(&self, kind: SqlIssueKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_query(&self, sql: &str) -> SqlValidation {
        info!("Validating SQL query: {}", sql);

        let mut errors = Vec::new();
        errors.extend(check_dangerous_operations(sql));
        errors.extend(check_syntax(sql));
        errors.extend(check_injection_patterns(sql));
        let warnings = check_performance(sql);

        let result = SqlValidation {
            valid: errors.is_empty(),
            safe: !errors.iter().any(|e: &SqlIssue| e.kind.is_safety_issue()),
            errors,
            warnings,
        };

        for w in &result.warnings {
            warn!("SQL warning: {}", w);
        }
        if result.valid {
            info!("SQL validation passed");
        } else {
            warn!("SQL validation failed: {:?}", result.error_messages());
        }
        result
    }

    pub fn is_safe_to_execute(&self, sql: &str) -> bool {
        let result = self.validate_query(sql);
        result.valid && result.safe
    }
}

fn check_dangerous_operations(sql: &str) -> Vec<SqlIssue> {
    let upper = sql.to_uppercase();
    DANGEROUS_REGEXES
        .iter()
        .filter(|(_, re)| re.is_match(&upper))
        .map(|(kw, _)| SqlIssue::new(SqlIssueKind::Dangerous, format!("Dangerous operation detected: {}", kw)))
        .collect()
}

fn strip_comments(sql: &str) -> String {
    let without_lines = LINE_COMMENT.replace_all(sql, "");
    BLOCK_COMMENT.replace_all(&without_lines, "").into_owned()
}

fn check_syntax(sql: &str) -> Vec<SqlIssue> {
    let mut issues = Vec::new();
    let cleaned = strip_comments(sql);

    let open = cleaned.matches('(').count();
    let close = cleaned.matches(')').count();
    if open != close {
        issues.push(SqlIssue::new(SqlIssueKind::Syntax, "Unbalanced parentheses"));
    }

    let single = cleaned.matches('\'').count() - cleaned.matches("\\'").count();
    if single % 2 != 0 {
        issues.push(SqlIssue::new(SqlIssueKind::Syntax, "Unbalanced single quotes"));
    }

    let double = cleaned.matches('"').count() - cleaned.matches("\\\"").count();
    if double % 2 != 0 {
        issues.push(SqlIssue::new(SqlIssueKind::Syntax, "Unbalanced double quotes"));
    }

    if !cleaned.trim().to_uppercase().starts_with("SELECT") {
        issues.push(SqlIssue::new(SqlIssueKind::Syntax, "Query must start with SELECT"));
    }

    if cleaned.matches(';').count() > 1 {
        issues.push(SqlIssue::new(SqlIssueKind::Syntax, "Multiple semicolons detected"));
    }

    issues
}

fn check_injection_patterns(sql: &str) -> Vec<SqlIssue> {
    let lower = sql.to_lowercase();
    let mut issues: Vec<SqlIssue> = INJECTION_REGEXES
        .iter()
        .filter(|(_, re)| re.is_match(&lower))
        .map(|(pattern, _)| {
            SqlIssue::new(
                SqlIssueKind::Injection,
                format!("Potential SQL injection pattern detected: {}", pattern),
            )
        })
        .collect();

    if lower.contains("<script") || lower.contains("javascript:") {
        issues.push(SqlIssue::new(SqlIssueKind::Injection, "Script injection attempt detected"));
    }
    issues
}

fn check_performance(sql: &str) -> Vec<String> {
    let upper = sql.to_uppercase();
    let mut warnings = Vec::new();

    if SELECT_STAR.is_match(&upper) && FROM_WORD.is_match(&upper) {
        warnings.push("SELECT * detected - consider specifying columns".to_string());
    }
    if FROM_WORD.is_match(&upper) && !WHERE_WORD.is_match(&upper) {
        warnings.push("Query without WHERE clause may be slow on large tables".to_string());
    }
    if JOIN_WORD.find_iter(&upper).count() > ON_WORD.find_iter(&upper).count() {
        warnings.push("Potential Cartesian product - missing JOIN conditions".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(sql: &str) -> SqlValidation {
        QueryValidator::new().validate_query(sql)
    }

    #[test]
    fn test_valid_select() {
        let result = validate("SELECT estate_name_en FROM estates WHERE district = 'Sai Kung' LIMIT 5");
        assert!(result.valid);
        assert!(result.safe);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_dangerous_keywords() {
        for kw in DANGEROUS_KEYWORDS {
            let result = validate(&format!("{} something", kw.to_lowercase()));
            assert!(!result.valid, "{} should be invalid", kw);
            assert!(!result.safe, "{} should be unsafe", kw);
            assert!(result.has(SqlIssueKind::Dangerous));
        }
    }

    #[test]
    fn test_keyword_inside_identifier_is_not_dangerous() {
        let result = validate("SELECT last_update, created_at FROM estates WHERE estate_id = 1");
        assert!(result.valid);
        assert!(result.safe);
    }

    #[test]
    fn test_drop_table() {
        let result = validate("DROP TABLE estates");
        assert!(!result.safe);
        assert!(result.error_messages().contains(&"Dangerous operation detected: DROP"));
        assert!(result.error_messages().contains(&"Query must start with SELECT"));
        assert!(!QueryValidator::new().is_safe_to_execute("DROP TABLE estates"));
    }

    #[test]
    fn test_syntax_errors_are_unsafe_free() {
        let result = validate("SELECT (estate_id FROM estates WHERE estate_name_en = 'Lohas");
        assert!(!result.valid);
        assert!(result.safe);
        assert_eq!(
            result.error_messages(),
            vec!["Unbalanced parentheses", "Unbalanced single quotes"]
        );
        assert!(!QueryValidator::new().is_safe_to_execute("SELECT (1"));
    }

    #[test]
    fn test_multiple_semicolons() {
        let result = validate("SELECT 1; SELECT 2;");
        assert!(result.error_messages().contains(&"Multiple semicolons detected"));
        assert!(validate("SELECT 1 WHERE 1 = 1;").valid);
    }

    #[test]
    fn test_comments_are_stripped_for_syntax() {
        let result = validate("SELECT estate_id FROM estates WHERE estate_id = 1 /* it's fine */");
        assert!(!result.has(SqlIssueKind::Syntax));
    }

    #[test]
    fn test_injection_patterns() {
        let result = validate("SELECT * FROM estates WHERE estate_name_en = 'x'; -- '");
        assert!(result.has(SqlIssueKind::Injection));
        assert!(!result.safe);

        let result = validate("SELECT * FROM estates WHERE x = 1 UNION SELECT password FROM users --");
        assert!(result.has(SqlIssueKind::Injection));

        let result = validate("SELECT '<script>alert(1)</script>' FROM estates WHERE 1 = 1");
        assert!(result.error_messages().contains(&"Script injection attempt detected"));
    }

    #[test]
    fn test_performance_warnings() {
        let result = validate("SELECT * FROM estates e JOIN buildings b");
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec![
                "SELECT * detected - consider specifying columns",
                "Query without WHERE clause may be slow on large tables",
                "Potential Cartesian product - missing JOIN conditions",
            ]
        );
    }

    #[test]
    fn test_missing_where_needs_a_from() {
        assert!(validate("SELECT 1").warnings.is_empty());
        assert_eq!(
            validate("SELECT estate_name_en FROM estates").warnings,
            vec!["Query without WHERE clause may be slow on large tables"]
        );
    }
}
