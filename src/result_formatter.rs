//! Result Formatter
//!
//! Turns an [`ExecutionResult`] into display text. Classification:
//! failure, then a lone value (one row, one column), then aggregation
//! (a column named like an aggregate), then a plain table.
//!
//! Prices are shown in Hong Kong dollars with thousands separators.

use crate::error::ExecutionErrorKind;
use crate::query_executor::ExecutionResult;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

pub const DEFAULT_MAX_DISPLAY_ROWS: usize = 10;

/// Column-name fragments that mark a monetary value.
pub const CURRENCY_COLUMNS: &[&str] = &[
    "price",
    "avg_price",
    "net_ft_price",
    "avg_ft_price",
    "avg_net_ft_price",
    "unit_price",
    "total_price",
    "avg_transaction_price",
];

const AGGREGATION_INDICATORS: &[&str] = &["avg", "sum", "count", "min", "max", "total"];

lazy_static! {
    /// An indicator at the start of the name or after a non-letter, so
    /// `avg_price`, `AVG(price)` and `price_max` match but `admin_fee` does not.
    static ref AGGREGATE_FRAGMENT: Regex =
        Regex::new(&format!(r"(?:^|[^a-z])(?:{})", AGGREGATION_INDICATORS.join("|"))).unwrap();
    /// Unaliased aggregate such as `AVG(price)` or `COUNT(*)`.
    static ref AGGREGATE_CALL: Regex =
        Regex::new(&format!(r"^({})\s*\(\s*(.*?)\s*\)$", AGGREGATION_INDICATORS.join("|"))).unwrap();
}

/// Prefix -> phrase used in descriptions.
const AGGREGATION_PREFIXES: &[(&str, &str)] = &[
    ("avg_", "average"),
    ("sum_", "total"),
    ("count_", "count"),
    ("min_", "minimum"),
    ("max_", "maximum"),
    ("total_", "total"),
];

const FIELD_ALIASES: &[(&str, &str)] = &[
    ("price", "price"),
    ("transaction_price", "transaction price"),
    ("net_ft_price", "net price per sq ft"),
    ("avg_ft_price", "average price per sq ft"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Error,
    SingleValue,
    Aggregation,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub query: String,
    pub question: String,
    /// Seconds, three decimals.
    pub execution_time: String,
    pub total_rows: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateValue {
    pub column: String,
    pub description: String,
    pub value: Value,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedResult {
    pub success: bool,
    pub result_type: ResultKind,
    pub display_text: String,
    pub raw_data: Vec<HashMap<String, Value>>,
    /// Set for single values.
    pub value: Option<Value>,
    /// Set for aggregations (first row).
    pub aggregations: Vec<AggregateValue>,
    pub error: Option<String>,
    pub error_type: Option<ExecutionErrorKind>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone)]
pub struct ResultFormatter {
    max_display_rows: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self {
            max_display_rows: DEFAULT_MAX_DISPLAY_ROWS,
        }
    }
}

impl ResultFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_display_rows(mut self, rows: usize) -> Self {
        self.max_display_rows = rows.max(1);
        self
    }

    pub fn format_results(&self, result: &ExecutionResult, question: &str) -> FormattedResult {
        let metadata = ResultMetadata {
            query: result.query.clone(),
            question: question.to_string(),
            execution_time: format!("{:.3}s", result.execution_time.as_secs_f64()),
            total_rows: result.row_count,
            has_more: result.has_more,
        };

        let mut formatted = FormattedResult {
            success: result.success,
            result_type: ResultKind::Table,
            display_text: String::new(),
            raw_data: result.data.clone(),
            value: None,
            aggregations: Vec::new(),
            error: result.error.clone(),
            error_type: result.error_type,
            metadata,
        };

        let columns = columns_of(result);

        if !result.success {
            formatted.result_type = ResultKind::Error;
            formatted.display_text = format!(
                "❌ Sorry, I couldn't execute your query: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        } else if result.data.len() == 1 && columns.len() == 1 {
            let column = &columns[0];
            let value = result.data[0].get(column).cloned().unwrap_or(Value::Null);
            let display = format_value(column, &value);
            formatted.result_type = ResultKind::SingleValue;
            formatted.display_text = if aggregation_prefix(column).is_some() || is_aggregate_call(column) {
                format!("{}: {}", aggregation_description(column), display)
            } else {
                format!("The result is: {}", display)
            };
            formatted.value = Some(value);
        } else if columns.iter().any(|c| is_aggregation_column(c)) {
            formatted.result_type = ResultKind::Aggregation;
            let (text, aggregations) = self.render_aggregation(result, &columns);
            formatted.display_text = text;
            formatted.aggregations = aggregations;
        } else {
            formatted.display_text = self.render_table(result, &columns);
        }

        info!("Formatted {:?} result for: {}", formatted.result_type, question);
        formatted
    }

    fn render_aggregation(&self, result: &ExecutionResult, columns: &[String]) -> (String, Vec<AggregateValue>) {
        let Some(first) = result.data.first() else {
            return ("No data found for your query.".to_string(), Vec::new());
        };

        let aggregations: Vec<AggregateValue> = columns
            .iter()
            .filter(|c| is_aggregation_column(c))
            .map(|c| {
                let value = first.get(c).cloned().unwrap_or(Value::Null);
                AggregateValue {
                    column: c.clone(),
                    description: aggregation_description(c),
                    display: format_value(c, &value),
                    value,
                }
            })
            .collect();

        if result.data.len() == 1 {
            let lines: Vec<String> = columns
                .iter()
                .map(|c| {
                    let value = first.get(c).unwrap_or(&Value::Null);
                    if is_aggregation_column(c) {
                        format!("{}: {}", aggregation_description(c), format_value(c, value))
                    } else {
                        format!("{}: {}", c.replace('_', " "), format_value(c, value))
                    }
                })
                .collect();
            return (lines.join("\n"), aggregations);
        }

        // Grouped aggregation: one line per group.
        let mut lines = Vec::new();
        for row in result.data.iter().take(self.max_display_rows) {
            let keys: Vec<String> = columns
                .iter()
                .filter(|c| !is_aggregation_column(c))
                .map(|c| format_value(c, row.get(c).unwrap_or(&Value::Null)))
                .collect();
            let values: Vec<String> = columns
                .iter()
                .filter(|c| is_aggregation_column(c))
                .map(|c| {
                    format!(
                        "{}: {}",
                        aggregation_description(c),
                        format_value(c, row.get(c).unwrap_or(&Value::Null))
                    )
                })
                .collect();
            if keys.is_empty() {
                lines.push(values.join(", "));
            } else {
                lines.push(format!("{} - {}", keys.join(", "), values.join(", ")));
            }
        }
        if let Some(trailer) = self.trailer(result) {
            lines.push(trailer);
        }
        (lines.join("\n"), aggregations)
    }

    fn render_table(&self, result: &ExecutionResult, columns: &[String]) -> String {
        if result.data.is_empty() {
            return "No results found for your query.".to_string();
        }

        let displayed = result.data.len().min(self.max_display_rows);
        let mut lines = vec![format!("Found {} results:", result.row_count)];
        if displayed > 5 {
            lines.push(format!("Showing first {} rows:", displayed));
        }
        lines.push(String::new());

        let header = columns.join(" | ");
        let rule = "-".repeat(header.chars().count());
        lines.push(header);
        lines.push(rule);

        for row in result.data.iter().take(displayed) {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| format_value(c, row.get(c).unwrap_or(&Value::Null)))
                .collect();
            lines.push(cells.join(" | "));
        }

        if let Some(trailer) = self.trailer(result) {
            lines.push(trailer);
        }
        lines.join("\n")
    }

    fn trailer(&self, result: &ExecutionResult) -> Option<String> {
        let displayed = result.data.len().min(self.max_display_rows);
        let hidden = result.row_count.saturating_sub(displayed);
        if result.has_more && hidden == 0 {
            Some("... and more rows".to_string())
        } else if result.has_more {
            Some(format!("... and {}+ more rows", hidden))
        } else if hidden > 0 {
            Some(format!("... and {} more rows", hidden))
        } else {
            None
        }
    }
}

fn columns_of(result: &ExecutionResult) -> Vec<String> {
    if !result.columns.is_empty() {
        return result.columns.clone();
    }
    let mut keys: Vec<String> = result.data.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
    keys.sort();
    keys
}

fn is_aggregation_column(column: &str) -> bool {
    AGGREGATE_FRAGMENT.is_match(&column.to_lowercase())
}

fn is_aggregate_call(column: &str) -> bool {
    AGGREGATE_CALL.is_match(&column.to_lowercase())
}

fn aggregation_prefix(column: &str) -> Option<(&'static str, &'static str)> {
    let lower = column.to_lowercase();
    AGGREGATION_PREFIXES.iter().copied().find(|(prefix, _)| lower.starts_with(prefix))
}

fn is_currency_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    if lower.starts_with("count") {
        return false;
    }
    CURRENCY_COLUMNS.iter().any(|fragment| lower.contains(fragment))
}

/// "avg_price" -> "The average price".
pub fn aggregation_description(column: &str) -> String {
    let lower = column.to_lowercase();
    if lower == "count_all" || lower.replace(' ', "") == "count(*)" {
        return "The number of rows".to_string();
    }

    let call = AGGREGATE_CALL.captures(&lower);
    let (phrase, field) = match (aggregation_prefix(&lower), &call) {
        (Some((prefix, phrase)), _) => (phrase, &lower[prefix.len()..]),
        (None, Some(caps)) => {
            let function = caps.get(1).map_or("", |m| m.as_str());
            let phrase = AGGREGATION_PREFIXES
                .iter()
                .find(|(prefix, _)| prefix.trim_end_matches('_') == function)
                .map(|(_, phrase)| *phrase)
                .unwrap_or("result");
            (phrase, caps.get(2).map_or("", |m| m.as_str()))
        }
        (None, None) => {
            let phrase = AGGREGATION_PREFIXES
                .iter()
                .find(|(prefix, _)| lower.contains(prefix.trim_end_matches('_')))
                .map(|(_, phrase)| *phrase)
                .unwrap_or("result");
            (phrase, lower.as_str())
        }
    };

    let field = FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, alias)| alias.to_string())
        .unwrap_or_else(|| field.replace('_', " "));

    format!("The {} {}", phrase, field)
}

/// Render one cell. See module docs for the currency rule.
pub fn format_value(column: &str, value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::Number(n) => {
            if is_currency_column(column) {
                if let Some(f) = n.as_f64() {
                    return format!("HK${}", group_thousands(f.round() as i64));
                }
            }
            if let Some(i) = n.as_i64() {
                if i.abs() > 1000 {
                    group_thousands(i)
                } else {
                    i.to_string()
                }
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (f as i64).to_string()
                } else {
                    format!("{:.2}", f)
                }
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 1234567 -> "1,234,567".
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> ExecutionResult {
        let data: Vec<HashMap<String, Value>> = rows
            .into_iter()
            .map(|row| columns.iter().map(|c| c.to_string()).zip(row).collect())
            .collect();
        ExecutionResult {
            success: true,
            row_count: data.len(),
            data,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            has_more: false,
            execution_time: Duration::from_millis(12),
            query: "SELECT ...".to_string(),
            error: None,
            error_type: None,
        }
    }

    #[test]
    fn test_single_aggregate_value() {
        let formatted = ResultFormatter::new().format_results(
            &result(&["avg_price"], vec![vec![json!(8523456.7)]]),
            "What is the average price?",
        );
        assert_eq!(formatted.result_type, ResultKind::SingleValue);
        assert_eq!(formatted.display_text, "The average price: HK$8,523,457");
        assert_eq!(formatted.metadata.execution_time, "0.012s");
    }

    #[test]
    fn test_single_plain_value() {
        let formatted =
            ResultFormatter::new().format_results(&result(&["estate_name_en"], vec![vec![json!("Lohas Park")]]), "q");
        assert_eq!(formatted.display_text, "The result is: Lohas Park");
        assert_eq!(formatted.value, Some(json!("Lohas Park")));
    }

    #[test]
    fn test_error_rendering() {
        let failed = ExecutionResult::failure(
            "SELECT x",
            ExecutionErrorKind::Operational,
            "SQL execution error: no such column: x".to_string(),
            Duration::ZERO,
        );
        let formatted = ResultFormatter::new().format_results(&failed, "q");
        assert!(!formatted.success);
        assert_eq!(formatted.result_type, ResultKind::Error);
        assert!(formatted.display_text.starts_with("❌ Sorry, I couldn't execute your query: SQL execution error"));
    }

    #[test]
    fn test_grouped_aggregation() {
        let formatted = ResultFormatter::new().format_results(
            &result(
                &["district", "avg_price"],
                vec![vec![json!("Sai Kung"), json!(9000000.0)], vec![json!("Sha Tin"), json!(7000000.0)]],
            ),
            "average price by district",
        );
        assert_eq!(formatted.result_type, ResultKind::Aggregation);
        assert_eq!(
            formatted.display_text,
            "Sai Kung - The average price: HK$9,000,000\nSha Tin - The average price: HK$7,000,000"
        );
        assert_eq!(formatted.aggregations.len(), 1);
        assert_eq!(formatted.aggregations[0].display, "HK$9,000,000");
    }

    #[test]
    fn test_unaliased_aggregate_column() {
        let formatted = ResultFormatter::new().format_results(
            &result(
                &["estate_id", "AVG(price)"],
                vec![vec![json!(1), json!(9000000.0)], vec![json!(2), json!(6000000.0)]],
            ),
            "q",
        );
        assert_eq!(formatted.result_type, ResultKind::Aggregation);
        assert_eq!(
            formatted.display_text,
            "1 - The average price: HK$9,000,000\n2 - The average price: HK$6,000,000"
        );

        let single = ResultFormatter::new().format_results(&result(&["COUNT(*)"], vec![vec![json!(4)]]), "q");
        assert_eq!(single.display_text, "The number of rows: 4");
    }

    #[test]
    fn test_aggregate_fragments_need_a_boundary() {
        assert!(is_aggregation_column("avgprice"));
        assert!(is_aggregation_column("price_max"));
        assert!(is_aggregation_column("Total_Units"));
        assert!(!is_aggregation_column("admin_fee"));
        assert!(!is_aggregation_column("estate_name_en"));
    }

    #[test]
    fn test_empty_results() {
        let formatted = ResultFormatter::new().format_results(&result(&["estate_name_en"], vec![]), "q");
        assert_eq!(formatted.display_text, "No results found for your query.");

        let formatted = ResultFormatter::new().format_results(&result(&["district", "count_all"], vec![]), "q");
        assert_eq!(formatted.result_type, ResultKind::Aggregation);
        assert_eq!(formatted.display_text, "No data found for your query.");
    }

    #[test]
    fn test_table_with_trailer() {
        let rows = (0..12).map(|i| vec![json!(format!("Estate {}", i)), json!(1500 + i)]).collect();
        let formatted = ResultFormatter::new().format_results(&result(&["estate_name_en", "units"], rows), "q");
        let lines: Vec<&str> = formatted.display_text.lines().collect();
        assert_eq!(lines[0], "Found 12 results:");
        assert_eq!(lines[1], "Showing first 10 rows:");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "estate_name_en | units");
        assert_eq!(lines[4], "----------------------");
        assert_eq!(lines[5], "Estate 0 | 1,500");
        assert_eq!(*lines.last().unwrap(), "... and 2 more rows");
    }

    #[test]
    fn test_trailer_when_capped() {
        let mut capped = result(&["estate_name_en", "district"], vec![vec![json!("A"), json!("B")]; 3]);
        capped.has_more = true;
        let text = ResultFormatter::new().format_results(&capped, "q").display_text;
        assert!(text.ends_with("... and more rows"));
        assert!(!text.contains("Showing first"));
    }

    #[test]
    fn test_format_value_rules() {
        assert_eq!(format_value("price", &Value::Null), "N/A");
        assert_eq!(format_value("net_ft_price", &json!(12345.6)), "HK$12,346");
        assert_eq!(format_value("count_price", &json!(12345)), "12,345");
        assert_eq!(format_value("COUNT(price)", &json!(12345)), "12,345");
        assert_eq!(format_value("saleable_area", &json!(512.0)), "512");
        assert_eq!(format_value("ratio", &json!(3.14159)), "3.14");
        assert_eq!(format_value("units", &json!(999)), "999");
        assert_eq!(format_value("units", &json!(-25000)), "-25,000");
        assert_eq!(format_value("district", &json!("Sha Tin")), "Sha Tin");
    }

    #[test]
    fn test_aggregation_description() {
        assert_eq!(aggregation_description("avg_price"), "The average price");
        assert_eq!(aggregation_description("avg_net_ft_price"), "The average net price per sq ft");
        assert_eq!(aggregation_description("max_saleable_area"), "The maximum saleable area");
        assert_eq!(aggregation_description("total_units"), "The total units");
        assert_eq!(aggregation_description("count_all"), "The number of rows");
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let r = result(&["estate_name_en", "price"], vec![vec![json!("A"), json!(1.0)], vec![json!("B"), json!(2.0)]]);
        let formatter = ResultFormatter::new();
        assert_eq!(
            formatter.format_results(&r, "q").display_text,
            formatter.format_results(&r, "q").display_text
        );
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
        assert_eq!(group_thousands(i64::MIN), "-9,223,372,036,854,775,808");
    }
}
