//! Semantic Column Resolver
//!
//! Maps the column names a model tends to produce ("average_price",
//! "market_price") onto physical columns of the tables an intent names.
//!
//! Resolution order for each requested column:
//! 1. Domain synonym table, if the mapped column exists in a named table
//! 2. The literal name, if it exists in a named table
//! 3. A price column, if the requested name mentions price
//! 4. Any column of a named table whose name contains, or is contained in,
//!    the requested name
//!
//! Resolution never fails; an unmatched name is passed through unchanged with
//! `ResolutionStrategy::Unresolved` and zero confidence.

use crate::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Domain synonym -> physical column.
pub const SEMANTIC_COLUMN_MAP: &[(&str, &str)] = &[
    ("price", "price"),
    ("avg_price", "price"),
    ("average_price", "price"),
    ("transaction_price", "price"),
    ("sale_price", "price"),
    ("market_price", "avg_ft_price"),
    ("net_price", "avg_net_ft_price"),
    ("rent_price", "avg_ft_rent"),
    ("net_rent_price", "avg_net_ft_rent"),
    ("avg_net_ft_price", "price"),
];

/// Price-bearing columns, most specific first.
pub const PRICE_COLUMNS: &[&str] = &["price", "avg_ft_price", "avg_net_ft_price", "unit_price"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    SemanticAlias,
    Exact,
    PriceFallback,
    Substring,
    Unresolved,
}

impl ResolutionStrategy {
    pub fn confidence(&self) -> f64 {
        match self {
            ResolutionStrategy::SemanticAlias | ResolutionStrategy::Exact => 1.0,
            ResolutionStrategy::PriceFallback => 0.6,
            ResolutionStrategy::Substring => 0.5,
            ResolutionStrategy::Unresolved => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnResolution {
    pub requested: String,
    pub resolved: String,
    pub strategy: ResolutionStrategy,
    pub confidence: f64,
}

impl ColumnResolution {
    fn new(requested: &str, resolved: &str, strategy: ResolutionStrategy) -> Self {
        Self {
            requested: requested.to_string(),
            resolved: resolved.to_string(),
            strategy,
            confidence: strategy.confidence(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.strategy != ResolutionStrategy::Unresolved
    }
}

pub fn semantic_alias(column: &str) -> Option<&'static str> {
    let key = column.trim().to_lowercase().replace(' ', "_");
    SEMANTIC_COLUMN_MAP
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, physical)| *physical)
}

/// First named table (in intent order) that has `column`.
pub fn find_column_table<'a>(column: &str, tables: &'a [String], schema: &SchemaSnapshot) -> Option<&'a str> {
    tables
        .iter()
        .find(|t| schema.has_column(t, column))
        .map(|t| t.as_str())
}

pub fn column_exists_in_tables(column: &str, tables: &[String], schema: &SchemaSnapshot) -> bool {
    find_column_table(column, tables, schema).is_some()
}

fn price_fallback(tables: &[String], schema: &SchemaSnapshot) -> Option<&'static str> {
    PRICE_COLUMNS
        .iter()
        .copied()
        .find(|c| column_exists_in_tables(c, tables, schema))
}

fn substring_match(requested: &str, tables: &[String], schema: &SchemaSnapshot) -> Option<String> {
    let needle = requested.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    tables
        .iter()
        .filter_map(|t| schema.table(t))
        .flat_map(|t| t.columns.iter())
        .find(|c| {
            let lower = c.to_lowercase();
            lower.contains(&needle) || needle.contains(&lower)
        })
        .cloned()
}

/// Resolve one requested column against the named tables.
pub fn resolve_column(requested: &str, tables: &[String], schema: &SchemaSnapshot) -> ColumnResolution {
    if requested.trim() == "*" {
        return ColumnResolution::new(requested, "*", ResolutionStrategy::Exact);
    }

    if let Some(mapped) = semantic_alias(requested) {
        if column_exists_in_tables(mapped, tables, schema) {
            if mapped != requested {
                info!("Mapped column '{}' to '{}'", requested, mapped);
            }
            return ColumnResolution::new(requested, mapped, ResolutionStrategy::SemanticAlias);
        }
    }

    if column_exists_in_tables(requested, tables, schema) {
        return ColumnResolution::new(requested, requested, ResolutionStrategy::Exact);
    }

    if requested.to_lowercase().contains("price") {
        if let Some(candidate) = price_fallback(tables, schema) {
            info!("Replaced invalid column '{}' with fallback '{}'", requested, candidate);
            return ColumnResolution::new(requested, candidate, ResolutionStrategy::PriceFallback);
        }
    }

    if let Some(candidate) = substring_match(requested, tables, schema) {
        info!("Replaced invalid column '{}' with fallback '{}'", requested, candidate);
        return ColumnResolution::new(requested, &candidate, ResolutionStrategy::Substring);
    }

    warn!("Could not find valid column for '{}', keeping as-is", requested);
    ColumnResolution::new(requested, requested, ResolutionStrategy::Unresolved)
}

pub fn resolve_columns(columns: &[String], tables: &[String], schema: &SchemaSnapshot) -> Vec<ColumnResolution> {
    columns
        .iter()
        .map(|c| resolve_column(c, tables, schema))
        .collect()
}

/// Pick the column an aggregate should be computed over: a mapped synonym,
/// then a literal column, then a substring match, then any price column.
pub fn select_aggregation_column(
    columns: &[String],
    tables: &[String],
    schema: &SchemaSnapshot,
) -> Option<ColumnResolution> {
    for column in columns {
        if let Some(mapped) = semantic_alias(column) {
            if column_exists_in_tables(mapped, tables, schema) {
                return Some(ColumnResolution::new(column, mapped, ResolutionStrategy::SemanticAlias));
            }
        }
    }

    for column in columns {
        if column_exists_in_tables(column, tables, schema) {
            return Some(ColumnResolution::new(column, column, ResolutionStrategy::Exact));
        }
    }

    for column in columns {
        if let Some(candidate) = substring_match(column, tables, schema) {
            return Some(ColumnResolution::new(column, &candidate, ResolutionStrategy::Substring));
        }
    }

    price_fallback(tables, schema).map(|candidate| {
        let requested = columns.first().map(|c| c.as_str()).unwrap_or(candidate);
        ColumnResolution::new(requested, candidate, ResolutionStrategy::PriceFallback)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            ("estates", TableSchema::new(&["estate_id", "estate_name_en", "district"])),
            ("transactions", TableSchema::new(&["tx_id", "unit_id", "price", "net_ft_price"])),
            ("estate_monthly_market_info", TableSchema::new(&["estate_id", "record_date", "avg_ft_price", "avg_net_ft_price"])),
        ])
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_semantic_alias() {
        let r = resolve_column("average price", &tables(&["transactions"]), &schema());
        assert_eq!(r.resolved, "price");
        assert_eq!(r.strategy, ResolutionStrategy::SemanticAlias);

        let r = resolve_column("market_price", &tables(&["estate_monthly_market_info"]), &schema());
        assert_eq!(r.resolved, "avg_ft_price");
    }

    #[test]
    fn test_alias_target_missing_falls_back_to_literal() {
        // avg_net_ft_price maps to price, which this table lacks.
        let r = resolve_column("avg_net_ft_price", &tables(&["estate_monthly_market_info"]), &schema());
        assert_eq!(r.resolved, "avg_net_ft_price");
        assert_eq!(r.strategy, ResolutionStrategy::Exact);
    }

    #[test]
    fn test_price_fallback_and_substring() {
        let r = resolve_column("unit_price_hkd", &tables(&["transactions"]), &schema());
        assert_eq!(r.resolved, "price");
        assert_eq!(r.strategy, ResolutionStrategy::PriceFallback);

        let r = resolve_column("name_en", &tables(&["estates"]), &schema());
        assert_eq!(r.resolved, "estate_name_en");
        assert_eq!(r.strategy, ResolutionStrategy::Substring);
        assert!(r.confidence < 1.0);
    }

    #[test]
    fn test_unresolved_passthrough() {
        let r = resolve_column("bedrooms", &tables(&["estates"]), &schema());
        assert_eq!(r.resolved, "bedrooms");
        assert!(!r.is_resolved());
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_select_aggregation_column() {
        let t = tables(&["estates", "transactions"]);
        let r = select_aggregation_column(&["average_price".to_string()], &t, &schema()).unwrap();
        assert_eq!(r.resolved, "price");

        let r = select_aggregation_column(&[], &t, &schema()).unwrap();
        assert_eq!(r.resolved, "price");
        assert_eq!(r.strategy, ResolutionStrategy::PriceFallback);

        assert!(select_aggregation_column(&["bedrooms".to_string()], &tables(&["estates"]), &schema()).is_none());
    }

    #[test]
    fn test_find_column_table_prefers_intent_order() {
        let t = tables(&["estate_monthly_market_info", "estates"]);
        assert_eq!(find_column_table("estate_id", &t, &schema()), Some("estate_monthly_market_info"));
        assert_eq!(find_column_table("price", &t, &schema()), None);
    }
}
