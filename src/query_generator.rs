//! Query Generator
//!
//! Compiles a validated [`Intent`] into one SQLite `SELECT`.
//!
//! Shape is a function of (has aggregation, table count):
//! - no aggregation: simple select
//! - aggregation over one table: simple aggregation
//! - aggregation over several tables: aggregation with join
//!
//! Columns are resolved first (see [`crate::column_resolver`]). Filters are
//! bound to the first named table that owns their column; a filter that binds
//! nowhere is dropped and reported in [`GeneratedQuery::dropped_filters`].

use crate::column_resolver::{find_column_table, resolve_column, resolve_columns, select_aggregation_column, ColumnResolution};
use crate::error::{DatahubError, Result};
use crate::intent::{AggregateFunction, Intent};
use crate::join_planner::{table_alias, JoinPlan, JoinPlanner};
use crate::schema::SchemaSnapshot;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

lazy_static! {
    static ref FILTER_PATTERN: Regex =
        Regex::new(r"(?i)^\s*(?:(\w+)\.)?(\w+)\s*(>=|<=|!=|<>|=|>|<|\bNOT\s+LIKE\b|\bLIKE\b)\s*(.+?)\s*;?\s*$")
            .unwrap();
    static ref NUMERIC_LITERAL: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    SimpleSelect,
    SimpleAggregation,
    AggregationWithJoin,
}

impl QueryShape {
    pub fn classify(intent: &Intent) -> Self {
        match (intent.aggregation.is_some(), intent.tables.len() > 1) {
            (true, true) => QueryShape::AggregationWithJoin,
            (true, false) => QueryShape::SimpleAggregation,
            (false, _) => QueryShape::SimpleSelect,
        }
    }
}

/// SQL plus the decisions made while producing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub shape: QueryShape,
    /// Copy of the input intent with physical column names.
    pub intent: Intent,
    pub resolutions: Vec<ColumnResolution>,
    pub dropped_filters: Vec<String>,
    pub warnings: Vec<String>,
}

/// A parsed `column <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: String,
    pub value: String,
}

impl FilterCondition {
    /// Parse `[table.]column <op> value`. The table qualifier is discarded;
    /// binding happens against the intent's tables.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = FILTER_PATTERN.captures(text)?;
        let operator = caps[3].split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        Some(Self {
            column: caps[2].to_string(),
            operator,
            value: sql_literal(&caps[4]),
        })
    }

    fn render(&self, column_ref: &str) -> String {
        format!("{} {} {}", column_ref, self.operator, self.value)
    }
}

/// Quote a value as exactly one string literal. Numbers and NULL/TRUE/FALSE
/// are kept; a single-quoted value is kept only when its inner quotes are
/// already doubled, otherwise the outer quotes are stripped and it is
/// re-escaped.
fn sql_literal(raw: &str) -> String {
    let value = raw.trim();
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        let inner = &value[1..value.len() - 1];
        if !inner.replace("''", "").contains('\'') {
            return value.to_string();
        }
        return format!("'{}'", inner.replace('\'', "''"));
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        return format!("'{}'", inner.replace('\'', "''"));
    }
    if NUMERIC_LITERAL.is_match(value) || matches!(value.to_uppercase().as_str(), "NULL" | "TRUE" | "FALSE") {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

/// Split an `ORDER BY` term into column and direction.
fn split_direction(term: &str) -> (&str, Option<&'static str>) {
    let trimmed = term.trim();
    if let Some((column, dir)) = trimmed.rsplit_once(char::is_whitespace) {
        match dir.to_uppercase().as_str() {
            "ASC" => return (column.trim(), Some("ASC")),
            "DESC" => return (column.trim(), Some("DESC")),
            _ => {}
        }
    }
    (trimmed, None)
}

/// The FROM target of a query and how its columns are referenced.
enum Scope {
    Single(String),
    Joined(JoinPlan),
}

impl Scope {
    fn from_clause(&self) -> String {
        match self {
            Scope::Single(table) => table.clone(),
            Scope::Joined(plan) => plan.render(),
        }
    }

    fn is_joined(&self) -> bool {
        matches!(self, Scope::Joined(plan) if !plan.steps.is_empty())
    }

    /// Alias-qualified when joined and the owner is known.
    fn column_ref(&self, column: &str, tables: &[String], schema: &SchemaSnapshot) -> String {
        match self {
            Scope::Single(_) => column.to_string(),
            Scope::Joined(plan) => find_column_table(column, tables, schema)
                .and_then(|table| plan.alias_of(table))
                .map(|alias| format!("{}.{}", alias, column))
                .unwrap_or_else(|| column.to_string()),
        }
    }
}

/// Everything one generation call accumulates.
struct Draft<'a> {
    intent: &'a Intent,
    schema: &'a SchemaSnapshot,
    resolutions: Vec<ColumnResolution>,
    dropped_filters: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> Draft<'a> {
    fn where_clause(&mut self, scope: &Scope) -> Option<String> {
        let mut conditions = Vec::new();
        for raw in &self.intent.filters {
            let bound = FilterCondition::parse(raw).and_then(|filter| {
                find_column_table(&filter.column, &self.intent.tables, self.schema).map(|_| filter)
            });
            match bound {
                Some(filter) => {
                    let column_ref = scope.column_ref(&filter.column, &self.intent.tables, self.schema);
                    conditions.push(filter.render(&column_ref));
                }
                None => {
                    warn!("Dropping filter '{}': no named table has that column", raw);
                    self.warnings.push(format!("Filter '{}' was dropped: no matching column in the queried tables", raw));
                    self.dropped_filters.push(raw.clone());
                }
            }
        }
        if conditions.is_empty() {
            None
        } else {
            Some(format!("WHERE {}", conditions.join(" AND ")))
        }
    }

    fn order_clause(&mut self, scope: &Scope, output_aliases: &[String]) -> Option<String> {
        let mut terms = Vec::new();
        for term in &self.intent.order_by {
            let (column, direction) = split_direction(term);
            if column.is_empty() {
                continue;
            }
            let column_ref = if output_aliases.iter().any(|a| a == column) {
                column.to_string()
            } else {
                let resolution = resolve_column(column, &self.intent.tables, self.schema);
                let column_ref = scope.column_ref(&resolution.resolved, &self.intent.tables, self.schema);
                self.resolutions.push(resolution);
                column_ref
            };
            terms.push(match direction {
                Some(dir) => format!("{} {}", column_ref, dir),
                None => column_ref,
            });
        }
        if terms.is_empty() {
            None
        } else {
            Some(format!("ORDER BY {}", terms.join(", ")))
        }
    }

    fn group_refs(&mut self, scope: &Scope) -> Vec<String> {
        let mut refs = Vec::new();
        for column in &self.intent.group_by {
            let resolution = resolve_column(column, &self.intent.tables, self.schema);
            let column_ref = scope.column_ref(&resolution.resolved, &self.intent.tables, self.schema);
            self.resolutions.push(resolution);
            if !refs.contains(&column_ref) {
                refs.push(column_ref);
            }
        }
        refs
    }

    fn limit_clause(&self) -> Option<String> {
        self.intent.limit_count().map(|n| format!("LIMIT {}", n))
    }

    fn note_unresolved(&mut self, resolutions: &[ColumnResolution]) {
        for r in resolutions.iter().filter(|r| !r.is_resolved()) {
            self.warnings.push(format!("Column '{}' could not be resolved in the queried tables", r.requested));
        }
    }
}

fn assemble(parts: Vec<Option<String>>) -> String {
    parts.into_iter().flatten().collect::<Vec<_>>().join(" ")
}

/// Compiles intents to SQL.
///
/// Join paths come from the foreign keys of the snapshot given to
/// [`QueryGenerator::with_schema`]; without one, only the keys inside the
/// intent's own schema slice and the known join patterns are available.
#[derive(Default)]
pub struct QueryGenerator {
    planner: Option<JoinPlanner>,
}

impl QueryGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: &SchemaSnapshot) -> Self {
        Self {
            planner: Some(JoinPlanner::new(schema)),
        }
    }

    pub fn generate_query(&self, intent: &Intent, schema_info: &SchemaSnapshot) -> Result<GeneratedQuery> {
        let shape = QueryShape::classify(intent);
        info!("Generating {:?} query for tables {:?}", shape, intent.tables);

        let first_table = intent
            .tables
            .first()
            .ok_or_else(|| DatahubError::Generation("intent names no tables".to_string()))?;
        if let Some(missing) = intent.tables.iter().find(|t| !schema_info.contains_table(t)) {
            return Err(DatahubError::Generation(format!("Table '{}' not found in schema", missing)));
        }

        let mut draft = Draft {
            intent,
            schema: schema_info,
            resolutions: Vec::new(),
            dropped_filters: Vec::new(),
            warnings: Vec::new(),
        };

        let column_resolutions: Vec<ColumnResolution> = resolve_columns(&intent.columns, &intent.tables, schema_info);
        let mut resolved_intent = intent.clone();
        resolved_intent.columns = column_resolutions.iter().map(|r| r.resolved.clone()).collect();

        let sql = match shape {
            QueryShape::SimpleSelect => self.simple_select(&mut draft, first_table, &column_resolutions)?,
            QueryShape::SimpleAggregation => self.simple_aggregation(&mut draft, first_table, &column_resolutions)?,
            QueryShape::AggregationWithJoin => self.aggregation_with_join(&mut draft)?,
        };

        let mut resolutions = column_resolutions;
        resolutions.append(&mut draft.resolutions);

        info!("Generated SQL: {}", sql);
        Ok(GeneratedQuery {
            sql,
            shape,
            intent: resolved_intent,
            resolutions,
            dropped_filters: draft.dropped_filters,
            warnings: draft.warnings,
        })
    }

    fn plan(&self, tables: &[String], schema_info: &SchemaSnapshot) -> Option<JoinPlan> {
        match &self.planner {
            Some(planner) => planner.plan(tables),
            None => JoinPlanner::new(schema_info).plan(tables),
        }
    }

    fn simple_select(&self, draft: &mut Draft<'_>, table: &str, resolutions: &[ColumnResolution]) -> Result<String> {
        let intent = draft.intent;
        let scope = if intent.tables.len() > 1 {
            match self.plan(&intent.tables, draft.schema) {
                Some(plan) => Scope::Joined(plan),
                None => {
                    draft.warnings.push(format!(
                        "No join path between {:?}; only '{}' is queried",
                        intent.tables, table
                    ));
                    Scope::Single(table.to_string())
                }
            }
        } else {
            Scope::Single(table.to_string())
        };

        draft.note_unresolved(resolutions);
        if !intent.group_by.is_empty() {
            draft.warnings.push("GROUP BY ignored for a query without aggregation".to_string());
        }

        let projection = if intent.is_wildcard_projection() {
            "*".to_string()
        } else {
            resolutions
                .iter()
                .filter(|r| r.resolved != "*")
                .map(|r| scope.column_ref(&r.resolved, &intent.tables, draft.schema))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let where_clause = draft.where_clause(&scope);
        let order_clause = draft.order_clause(&scope, &[]);
        Ok(assemble(vec![
            Some(format!("SELECT {} FROM {}", projection, scope.from_clause())),
            where_clause,
            order_clause,
            draft.limit_clause(),
        ]))
    }

    fn simple_aggregation(&self, draft: &mut Draft<'_>, table: &str, resolutions: &[ColumnResolution]) -> Result<String> {
        let intent = draft.intent;
        let function = aggregate_of(intent)?;
        let scope = Scope::Single(table.to_string());

        let candidate = aggregation_candidates(intent, resolutions).into_iter().next();
        let (expression, alias) = match candidate {
            None if function == AggregateFunction::Count => count_all(),
            None => {
                return Err(DatahubError::Generation(format!(
                    "No column to compute {} over in table '{}'",
                    function.sql_name(),
                    table
                )))
            }
            Some(resolution) => {
                if !draft.schema.has_column(table, &resolution.resolved) {
                    return Err(DatahubError::Generation(format!(
                        "Column '{}' not found in table '{}'",
                        resolution.requested, table
                    )));
                }
                aggregate_expression(function, &resolution.resolved, &resolution.resolved)
            }
        };

        self.render_aggregation(draft, &scope, expression, alias)
    }

    fn aggregation_with_join(&self, draft: &mut Draft<'_>) -> Result<String> {
        let intent = draft.intent;
        let function = aggregate_of(intent)?;

        let candidates: Vec<String> = intent
            .columns
            .iter()
            .filter(|c| c.trim() != "*" && !intent.group_by.contains(c))
            .cloned()
            .collect();

        let target = if candidates.is_empty() && function == AggregateFunction::Count {
            None
        } else {
            let selected = select_aggregation_column(&candidates, &intent.tables, draft.schema).ok_or_else(|| {
                DatahubError::Generation(format!("No aggregation column found among {:?}", candidates))
            })?;
            info!(
                "Aggregating {} over '{}' ({:?})",
                function.sql_name(),
                selected.resolved,
                selected.strategy
            );
            draft.resolutions.push(selected.clone());
            Some(selected)
        };

        let plan = self.plan(&intent.tables, draft.schema).ok_or_else(|| {
            DatahubError::Generation(format!("Could not determine JOIN path between tables {:?}", intent.tables))
        })?;
        let scope = Scope::Joined(plan);

        let (expression, alias) = match target {
            None => count_all(),
            Some(selected) => {
                let owner = find_column_table(&selected.resolved, &intent.tables, draft.schema).ok_or_else(|| {
                    DatahubError::Generation(format!("Column '{}' not found in any named table", selected.resolved))
                })?;
                let qualified = match &scope {
                    Scope::Joined(plan) => plan
                        .alias_of(owner)
                        .map(|a| format!("{}.{}", a, selected.resolved))
                        .unwrap_or_else(|| format!("{}.{}", table_alias(owner), selected.resolved)),
                    Scope::Single(_) => selected.resolved.clone(),
                };
                aggregate_expression(function, &qualified, &selected.resolved)
            }
        };

        self.render_aggregation(draft, &scope, expression, alias)
    }

    fn render_aggregation(&self, draft: &mut Draft<'_>, scope: &Scope, expression: String, alias: String) -> Result<String> {
        let group_refs = draft.group_refs(scope);
        let mut select_list = group_refs.clone();
        select_list.push(expression);

        let group_clause = if group_refs.is_empty() {
            None
        } else {
            Some(format!("GROUP BY {}", group_refs.join(", ")))
        };
        let where_clause = draft.where_clause(scope);
        let order_clause = draft.order_clause(scope, &[alias]);

        if scope.is_joined() {
            info!("Aggregation spans joined tables");
        }

        Ok(assemble(vec![
            Some(format!("SELECT {} FROM {}", select_list.join(", "), scope.from_clause())),
            where_clause,
            group_clause,
            order_clause,
            draft.limit_clause(),
        ]))
    }
}

fn aggregate_of(intent: &Intent) -> Result<AggregateFunction> {
    intent.aggregate_function().ok_or_else(|| {
        DatahubError::Generation(format!(
            "Unsupported aggregation: {}",
            intent.aggregation.as_deref().unwrap_or("")
        ))
    })
}

/// Resolved non-wildcard columns that are not grouping keys.
fn aggregation_candidates(intent: &Intent, resolutions: &[ColumnResolution]) -> Vec<ColumnResolution> {
    resolutions
        .iter()
        .filter(|r| r.resolved != "*" && !intent.group_by.contains(&r.requested) && !intent.group_by.contains(&r.resolved))
        .cloned()
        .collect()
}

fn aggregate_expression(function: AggregateFunction, column_ref: &str, column: &str) -> (String, String) {
    let alias = format!("{}_{}", function.as_str(), column);
    (format!("{}({}) AS {}", function.sql_name(), column_ref, alias), alias)
}

fn count_all() -> (String, String) {
    ("COUNT(*) AS count_all".to_string(), "count_all".to_string())
}
