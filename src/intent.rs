//! Structured query intent
//!
//! The shape the intent extractor asks the model to emit. Deserialization is
//! lenient about the ways models deviate from the requested JSON (nulls for
//! lists, a bare string where a list was asked for, the literal `"null"`),
//! but never coerces a bad `aggregation` or `limit` into a good one: those are
//! kept verbatim so the schema validator can reject them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Avg,
    Sum,
    Count,
    Max,
    Min,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Avg,
        AggregateFunction::Sum,
        AggregateFunction::Count,
        AggregateFunction::Max,
        AggregateFunction::Min,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "avg" => Some(AggregateFunction::Avg),
            "sum" => Some(AggregateFunction::Sum),
            "count" => Some(AggregateFunction::Count),
            "max" => Some(AggregateFunction::Max),
            "min" => Some(AggregateFunction::Min),
            _ => None,
        }
    }

    /// Lowercase name, used for result column aliases (`avg_price`).
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Avg => "avg",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Max => "max",
            AggregateFunction::Min => "min",
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured interpretation of a question. Never mutated after parsing;
/// the query generator works on a resolved copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default, deserialize_with = "string_list")]
    pub tables: Vec<String>,

    #[serde(default, deserialize_with = "string_list")]
    pub columns: Vec<String>,

    /// `column = value` predicates, not yet bound to a table.
    #[serde(default, deserialize_with = "string_list")]
    pub filters: Vec<String>,

    #[serde(default, deserialize_with = "optional_text")]
    pub aggregation: Option<String>,

    #[serde(default, deserialize_with = "string_list")]
    pub group_by: Vec<String>,

    #[serde(default, deserialize_with = "string_list")]
    pub order_by: Vec<String>,

    /// Raw limit as emitted; see [`Intent::limit_count`].
    #[serde(default, deserialize_with = "optional_limit")]
    pub limit: Option<Value>,
}

impl Intent {
    pub fn new<S: AsRef<str>>(tables: &[S], columns: &[S]) -> Self {
        Self {
            tables: tables.iter().map(|t| t.as_ref().to_string()).collect(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filters.push(filter.to_string());
        self
    }

    pub fn with_aggregation(mut self, aggregation: &str) -> Self {
        self.aggregation = Some(aggregation.to_string());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(Value::from(limit));
        self
    }

    pub fn with_order_by(mut self, column: &str) -> Self {
        self.order_by.push(column.to_string());
        self
    }

    pub fn with_group_by(mut self, column: &str) -> Self {
        self.group_by.push(column.to_string());
        self
    }

    /// The aggregation, if present and one of the supported functions.
    pub fn aggregate_function(&self) -> Option<AggregateFunction> {
        self.aggregation.as_deref().and_then(AggregateFunction::parse)
    }

    /// The limit, if present and a positive integer.
    pub fn limit_count(&self) -> Option<u64> {
        self.limit.as_ref().and_then(Value::as_u64).filter(|n| *n > 0)
    }

    pub fn is_wildcard_projection(&self) -> bool {
        self.columns.is_empty() || self.columns.iter().all(|c| c.trim() == "*")
    }
}

fn is_null_word(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "" | "null" | "none")
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) if is_null_word(&s) => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if is_null_word(&s) => None,
        Some(Value::String(s)) => Some(s.trim().to_lowercase()),
        Some(other) => Some(other.to_string()),
    })
}

fn optional_limit<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if is_null_word(&s) => None,
        Some(other) => Some(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_intent() {
        let raw = r#"{
            "tables": ["estates", "transactions"],
            "columns": ["price"],
            "filters": ["estate_name_en = 'Lohas Park'"],
            "aggregation": "AVG",
            "group_by": [],
            "order_by": [],
            "limit": null
        }"#;
        let intent: Intent = serde_json::from_str(raw).unwrap();
        assert_eq!(intent.tables, vec!["estates", "transactions"]);
        assert_eq!(intent.aggregation.as_deref(), Some("avg"));
        assert_eq!(intent.aggregate_function(), Some(AggregateFunction::Avg));
        assert!(intent.limit.is_none());
    }

    #[test]
    fn test_lenient_fields() {
        let raw = r#"{
            "tables": "estates",
            "columns": null,
            "aggregation": "null",
            "limit": "null"
        }"#;
        let intent: Intent = serde_json::from_str(raw).unwrap();
        assert_eq!(intent.tables, vec!["estates"]);
        assert!(intent.columns.is_empty());
        assert!(intent.filters.is_empty());
        assert!(intent.aggregation.is_none());
        assert!(intent.limit.is_none());
        assert!(intent.is_wildcard_projection());
    }

    #[test]
    fn test_bad_values_are_preserved() {
        let intent: Intent =
            serde_json::from_str(r#"{"tables": ["estates"], "aggregation": "median", "limit": -3}"#).unwrap();
        assert_eq!(intent.aggregation.as_deref(), Some("median"));
        assert!(intent.aggregate_function().is_none());
        assert_eq!(intent.limit, Some(Value::from(-3)));
        assert!(intent.limit_count().is_none());

        let intent: Intent = serde_json::from_str(r#"{"limit": "ten"}"#).unwrap();
        assert!(intent.limit.is_some());
        assert!(intent.limit_count().is_none());
    }

    #[test]
    fn test_limit_count() {
        let intent = Intent::new(&["estates"], &["estate_name_en"]).with_limit(5);
        assert_eq!(intent.limit_count(), Some(5));
        assert_eq!(Intent::default().with_limit(0).limit_count(), None);
    }
}
