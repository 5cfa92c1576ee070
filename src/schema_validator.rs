//! Schema Validator
//!
//! Checks that an intent only names tables and columns that exist in the live
//! schema, and annotates it with the slice of the schema it touches.

use crate::error::Result;
use crate::intent::{AggregateFunction, Intent};
use crate::schema::{SchemaCatalog, SchemaSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::{info, warn};

/// Outcome of validating one intent. `schema_info` always covers the named
/// tables that exist, whether or not the intent is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub schema_info: SchemaSnapshot,
}

pub struct SchemaValidator {
    catalog: Arc<SchemaCatalog>,
}

impl SchemaValidator {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Load the schema from the store at `db_path`, cached for this validator.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(Arc::new(SchemaCatalog::open(db_path, None)?)))
    }

    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self::new(Arc::new(SchemaCatalog::from_snapshot(snapshot)))
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.catalog.snapshot()
    }

    pub fn validate_intent(&self, intent: &Intent) -> ValidationResult {
        self.validate_against(intent, &self.catalog.snapshot())
    }

    /// Validate against a snapshot the caller already holds, so later stages
    /// can plan against the same schema version.
    pub fn validate_against(&self, intent: &Intent, schema: &SchemaSnapshot) -> ValidationResult {
        info!("Validating intent: {:?}", intent);

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Tables
        if intent.tables.is_empty() {
            errors.push("No tables specified in intent".to_string());
        } else {
            for table in &intent.tables {
                if !schema.contains_table(table) {
                    let mut message = format!("Table '{}' does not exist in database", table);
                    if let Some(hint) = rank_candidates(table, schema.table_names()).first() {
                        message.push_str(&format!(" (did you mean '{}'?)", hint));
                    }
                    errors.push(message);
                }
            }
        }

        // Columns
        let all_columns = schema.all_columns();
        for column in &intent.columns {
            if column.trim() == "*" {
                continue;
            }
            let in_named_table = intent.tables.iter().any(|t| schema.has_column(t, column));
            if in_named_table {
                continue;
            }
            if all_columns.contains(column.as_str()) {
                warnings.push(format!(
                    "Column '{}' exists but not in specified tables - may need JOIN",
                    column
                ));
            } else {
                errors.push(format!("Column '{}' does not exist in any table", column));
            }
        }

        // Aggregation
        if let Some(aggregation) = &intent.aggregation {
            if AggregateFunction::parse(aggregation).is_none() {
                errors.push(format!("Invalid aggregation function: {}", aggregation));
            }
        }

        // Grouping and ordering should be projected
        for column in &intent.group_by {
            if !intent.columns.contains(column) {
                warnings.push(format!("GROUP BY column '{}' not in selected columns", column));
            }
        }
        for column in &intent.order_by {
            if !intent.columns.contains(column) {
                warnings.push(format!("ORDER BY column '{}' not in selected columns", column));
            }
        }

        // Limit
        if let Some(limit) = &intent.limit {
            if intent.limit_count().is_none() {
                errors.push(format!("Invalid LIMIT value: {}", limit));
            }
        }

        let result = ValidationResult {
            valid: errors.is_empty(),
            schema_info: schema.restrict(&intent.tables),
            errors,
            warnings,
        };

        for warning in &result.warnings {
            warn!("Intent warning: {}", warning);
        }
        if result.valid {
            info!("Intent validation passed");
        } else {
            warn!("Intent validation failed: {:?}", result.errors);
        }

        result
    }

    /// Tables whose name contains `partial` (or is contained in it), closest first.
    pub fn table_suggestions(&self, partial: &str) -> Vec<String> {
        let schema = self.catalog.snapshot();
        rank_candidates(partial, schema.table_names())
    }

    /// Columns of `table` whose name contains `partial`, closest first.
    pub fn column_suggestions(&self, table: &str, partial: &str) -> Vec<String> {
        let schema = self.catalog.snapshot();
        match schema.table(table) {
            Some(t) => rank_candidates(partial, t.columns.iter().map(|c| c.as_str())),
            None => Vec::new(),
        }
    }
}

fn rank_candidates<'a>(partial: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<String> {
    let needle = partial.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &str)> = candidates
        .filter(|c| {
            let lower = c.to_lowercase();
            lower.contains(&needle) || needle.contains(&lower)
        })
        .map(|c| (jaro_winkler(&needle, &c.to_lowercase()), c))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(b.1)));
    scored.into_iter().map(|(_, c)| c.to_string()).collect()
}
