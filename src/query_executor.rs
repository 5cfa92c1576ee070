//! Query Executor
//!
//! Runs one read-only statement against the housing store. Every call opens
//! its own read-only connection, which is dropped on every exit path.
//!
//! At most `max_rows` rows are materialized; one further row is probed to
//! decide `has_more`. A wall-clock deadline is enforced through SQLite's
//! progress handler, so a runaway query is interrupted rather than awaited.

use crate::error::{DatahubError, ExecutionErrorKind, Result};
use crate::schema::quote_ident;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const DEFAULT_MAX_ROWS: usize = 1000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress handler granularity, in SQLite VM instructions.
const PROGRESS_STEPS: i32 = 1000;

lazy_static! {
    static ref TABLE_REFERENCE: Regex = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\w+)").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Vec<HashMap<String, Value>>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub has_more: bool,
    pub execution_time: Duration,
    pub query: String,
    pub error: Option<String>,
    pub error_type: Option<ExecutionErrorKind>,
}

impl ExecutionResult {
    pub fn failure(query: &str, kind: ExecutionErrorKind, message: String, execution_time: Duration) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            has_more: false,
            execution_time,
            query: query.to_string(),
            error: Some(message),
            error_type: Some(kind),
        }
    }

    /// Turn a failed result into a typed error carrying the SQL.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(DatahubError::Execution {
            kind: self.error_type.unwrap_or(ExecutionErrorKind::Unexpected),
            message: self.error.unwrap_or_default(),
            sql: self.query,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStats {
    pub query_plan: Vec<String>,
    /// Row counts of the tables referenced after FROM/JOIN.
    pub table_counts: BTreeMap<String, i64>,
    /// Number of plan steps.
    pub complexity: usize,
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    db_path: PathBuf,
    max_rows: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(db_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            db_path: db_path.into(),
            max_rows: DEFAULT_MAX_ROWS,
            timeout,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(self.timeout)?;
        let deadline = Instant::now() + self.timeout;
        conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
        Ok(conn)
    }

    pub fn execute_query(&self, sql: &str) -> ExecutionResult {
        info!("Executing query: {}", sql);
        let started = Instant::now();

        match self.fetch(sql) {
            Ok((columns, data, has_more)) => {
                let execution_time = started.elapsed();
                info!(
                    "Query executed successfully. Rows: {}, Time: {:.3}s",
                    data.len(),
                    execution_time.as_secs_f64()
                );
                ExecutionResult {
                    success: true,
                    row_count: data.len(),
                    data,
                    columns,
                    has_more,
                    execution_time,
                    query: sql.to_string(),
                    error: None,
                    error_type: None,
                }
            }
            Err(e) => {
                let (kind, message) = classify_error(&e);
                error!("{}", message);
                ExecutionResult::failure(sql, kind, message, started.elapsed())
            }
        }
    }

    /// Like [`execute_query`](Self::execute_query), refusing anything that is
    /// not a `SELECT`.
    pub fn execute_read_query(&self, sql: &str) -> ExecutionResult {
        if !sql.trim().to_uppercase().starts_with("SELECT") {
            warn!("Refusing non-SELECT statement: {}", sql);
            return ExecutionResult::failure(
                sql,
                ExecutionErrorKind::Safety,
                "Only SELECT queries are allowed in read mode".to_string(),
                Duration::ZERO,
            );
        }
        self.execute_query(sql)
    }

    fn fetch(&self, sql: &str) -> rusqlite::Result<(Vec<String>, Vec<HashMap<String, Value>>, bool)> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut data = Vec::new();
        while data.len() < self.max_rows {
            match rows.next()? {
                Some(row) => {
                    let mut record = HashMap::with_capacity(columns.len());
                    for (i, name) in columns.iter().enumerate() {
                        record.insert(name.clone(), json_value(row.get_ref(i)?));
                    }
                    data.push(record);
                }
                None => return Ok((columns, data, false)),
            }
        }

        let has_more = rows.next()?.is_some();
        Ok((columns, data, has_more))
    }

    /// Plan and size information for `sql` without running it.
    pub fn query_stats(&self, sql: &str) -> Result<QueryStats> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {}", sql))?;
        let query_plan: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(3))?
            .collect::<std::result::Result<_, _>>()?;

        let mut table_counts = BTreeMap::new();
        for caps in TABLE_REFERENCE.captures_iter(sql) {
            let table = caps[1].to_string();
            if table_counts.contains_key(&table) {
                continue;
            }
            let count_sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&table));
            match conn.query_row(&count_sql, [], |row| row.get::<_, i64>(0)) {
                Ok(count) => {
                    table_counts.insert(table, count);
                }
                Err(e) => warn!("Could not count rows of '{}': {}", table, e),
            }
        }

        Ok(QueryStats {
            complexity: query_plan.len(),
            query_plan,
            table_counts,
        })
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn classify_error(e: &rusqlite::Error) -> (ExecutionErrorKind, String) {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            (ExecutionErrorKind::Integrity, format!("Data integrity error: {}", e))
        }
        rusqlite::Error::SqliteFailure(_, _)
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidQuery
        | rusqlite::Error::MultipleStatement
        | rusqlite::Error::InvalidPath(_) => (ExecutionErrorKind::Operational, format!("SQL execution error: {}", e)),
        _ => (
            ExecutionErrorKind::Unexpected,
            format!("Unexpected error during query execution: {}", e),
        ),
    }
}
