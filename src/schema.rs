//! Live schema snapshot of the housing store
//!
//! The snapshot is read once from SQLite (`sqlite_master`, `PRAGMA table_info`,
//! `PRAGMA foreign_key_list`) and then shared read-only. `SchemaCatalog` owns
//! the current snapshot and reloads it on `refresh()` or when its TTL lapses.
//! `SchemaSummaryCache` owns the prompt text derived from it.

use crate::error::{DatahubError, Result};
use crate::prompts::FALLBACK_SCHEMA_SUMMARY;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One foreign-key edge: `from_column` of the owning table references
/// `to_table.to_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    pub fn new(from_column: &str, to_table: &str, to_column: &str) -> Self {
        Self {
            from_column: from_column.to_string(),
            to_table: to_table.to_string(),
            to_column: to_column.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Declared SQL type per column (may be empty for untyped columns).
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key.push(column.to_string());
        self
    }

    pub fn with_foreign_key(mut self, from_column: &str, to_table: &str, to_column: &str) -> Self {
        self.foreign_keys.push(ForeignKey::new(from_column, to_table, to_column));
        self
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Table name -> columns and foreign keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaSnapshot {
    pub fn from_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = (S, TableSchema)>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(|(name, t)| (name.into(), t)).collect(),
        }
    }

    /// Introspect the SQLite store at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::load_from_connection(&conn)
    }

    pub fn load_from_connection(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut tables = BTreeMap::new();
        // Foreign keys without an explicit target column are resolved after
        // every table's primary key is known.
        let mut pending: Vec<(String, String, String, Option<String>)> = Vec::new();

        for table in &table_names {
            let mut schema = TableSchema::default();

            let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
            let mut rows = info.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                let data_type: Option<String> = row.get(2)?;
                let pk: i64 = row.get(5)?;
                if pk > 0 {
                    schema.primary_key.push(name.clone());
                }
                schema.column_types.insert(name.clone(), data_type.unwrap_or_default());
                schema.columns.push(name);
            }

            let mut fks = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
            let mut rows = fks.query([])?;
            while let Some(row) = rows.next()? {
                let to_table: String = row.get(2)?;
                let from_column: String = row.get(3)?;
                let to_column: Option<String> = row.get(4)?;
                pending.push((table.clone(), from_column, to_table, to_column));
            }

            tables.insert(table.clone(), schema);
        }

        for (table, from_column, to_table, to_column) in pending {
            let to_column = to_column
                .or_else(|| {
                    tables
                        .get(&to_table)
                        .and_then(|t: &TableSchema| t.primary_key.first().cloned())
                })
                .unwrap_or_else(|| from_column.clone());
            if let Some(schema) = tables.get_mut(&table) {
                schema.foreign_keys.push(ForeignKey {
                    from_column,
                    to_table,
                    to_column,
                });
            }
        }

        info!("Loaded schema for {} tables", tables.len());
        Ok(Self { tables })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).map(|t| t.has_column(column)).unwrap_or(false)
    }

    /// Every column name across all tables.
    pub fn all_columns(&self) -> HashSet<&str> {
        self.tables
            .values()
            .flat_map(|t| t.columns.iter().map(|c| c.as_str()))
            .collect()
    }

    /// Sub-mapping restricted to the given tables (unknown names are skipped).
    pub fn restrict(&self, tables: &[String]) -> SchemaSnapshot {
        let tables = tables
            .iter()
            .filter_map(|name| self.tables.get(name).map(|t| (name.clone(), t.clone())))
            .collect();
        SchemaSnapshot { tables }
    }

    /// Human-readable `table: col, col` listing used as prompt context.
    pub fn summary(&self) -> String {
        let lines = self
            .tables
            .iter()
            .map(|(name, t)| format!("{}: {}", name, t.columns.iter().join(", ")))
            .join("\n");
        format!("KEY TABLES AND COLUMNS:\n\n{}", lines)
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct CatalogState {
    snapshot: Arc<SchemaSnapshot>,
    version: u64,
    loaded_at: DateTime<Utc>,
    checked: Instant,
}

/// Owner of the current schema snapshot.
///
/// Readers get a cheap `Arc` to an immutable snapshot. A reload swaps the
/// `Arc` and bumps `version`; snapshots already handed out stay valid.
pub struct SchemaCatalog {
    db_path: Option<PathBuf>,
    ttl: Option<Duration>,
    state: RwLock<CatalogState>,
}

impl SchemaCatalog {
    /// Load the schema eagerly from the store at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>, ttl: Option<Duration>) -> Result<Self> {
        let db_path = db_path.into();
        let snapshot = SchemaSnapshot::load(&db_path)?;
        Ok(Self {
            db_path: Some(db_path),
            ttl,
            state: RwLock::new(CatalogState {
                snapshot: Arc::new(snapshot),
                version: 1,
                loaded_at: Utc::now(),
                checked: Instant::now(),
            }),
        })
    }

    /// A catalog over a fixed snapshot with no backing store.
    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self {
            db_path: None,
            ttl: None,
            state: RwLock::new(CatalogState {
                snapshot: Arc::new(snapshot),
                version: 1,
                loaded_at: Utc::now(),
                checked: Instant::now(),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        if self.is_expired() {
            if let Err(e) = self.refresh() {
                warn!("Schema reload failed, keeping previous snapshot: {}", e);
                let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                state.checked = Instant::now();
            }
        }
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&state.snapshot)
    }

    /// Reload from the store and return the new version.
    pub fn refresh(&self) -> Result<u64> {
        let path = self
            .db_path
            .as_ref()
            .ok_or_else(|| DatahubError::Schema("catalog has no backing store".to_string()))?;
        let snapshot = SchemaSnapshot::load(path)?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.snapshot = Arc::new(snapshot);
        state.version += 1;
        state.loaded_at = Utc::now();
        state.checked = Instant::now();
        info!("Schema catalog refreshed to version {}", state.version);
        Ok(state.version)
    }

    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).loaded_at
    }

    fn is_expired(&self) -> bool {
        match (self.ttl, &self.db_path) {
            (Some(ttl), Some(_)) => {
                let state = self.state.read().unwrap_or_else(|e| e.into_inner());
                state.checked.elapsed() >= ttl
            }
            _ => false,
        }
    }
}

/// Prompt-ready schema summary, computed once and reused until refreshed.
pub struct SchemaSummaryCache {
    db_path: Option<PathBuf>,
    text: RwLock<Option<String>>,
}

impl SchemaSummaryCache {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            text: RwLock::new(None),
        }
    }

    /// A cache pinned to the given text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self {
            db_path: None,
            text: RwLock::new(Some(text.into())),
        }
    }

    pub fn get(&self) -> String {
        if let Some(text) = self.text.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return text.clone();
        }
        self.refresh()
    }

    /// Recompute from the live store, falling back to the fixed summary.
    pub fn refresh(&self) -> String {
        let computed = match &self.db_path {
            Some(path) => match SchemaSnapshot::load(path) {
                Ok(snapshot) if !snapshot.is_empty() => snapshot.summary(),
                Ok(_) => {
                    warn!("Live schema is empty, using fallback schema summary");
                    FALLBACK_SCHEMA_SUMMARY.to_string()
                }
                Err(e) => {
                    warn!("Could not read live schema ({}), using fallback schema summary", e);
                    FALLBACK_SCHEMA_SUMMARY.to_string()
                }
            },
            None => {
                let current = self.text.read().unwrap_or_else(|e| e.into_inner());
                return current.clone().unwrap_or_else(|| FALLBACK_SCHEMA_SUMMARY.to_string());
            }
        };

        let mut text = self.text.write().unwrap_or_else(|e| e.into_inner());
        *text = Some(computed.clone());
        computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_store(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE estates (estate_id INTEGER PRIMARY KEY, estate_name_en TEXT);
             CREATE TABLE buildings (
                 building_id INTEGER PRIMARY KEY,
                 estate_id INTEGER REFERENCES estates(estate_id),
                 building_name_en TEXT
             );
             CREATE TABLE phases (phase_id INTEGER PRIMARY KEY, estate_id INTEGER REFERENCES estates);",
        )
        .unwrap();
    }

    #[test]
    fn test_load_reads_columns_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("housing.db");
        create_store(&path);

        let snapshot = SchemaSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.table("buildings").unwrap().columns,
            vec!["building_id", "estate_id", "building_name_en"]
        );
        assert_eq!(snapshot.table("estates").unwrap().primary_key, vec!["estate_id"]);
        assert_eq!(
            snapshot.table("buildings").unwrap().foreign_keys,
            vec![ForeignKey::new("estate_id", "estates", "estate_id")]
        );
        // Implicit target column resolves to the referenced primary key.
        assert_eq!(
            snapshot.table("phases").unwrap().foreign_keys,
            vec![ForeignKey::new("estate_id", "estates", "estate_id")]
        );
        assert_eq!(snapshot.table("estates").unwrap().column_types["estate_name_en"], "TEXT");
    }

    #[test]
    fn test_restrict_and_summary() {
        let snapshot = SchemaSnapshot::from_tables(vec![
            ("estates", TableSchema::new(&["estate_id", "estate_name_en"])),
            ("transactions", TableSchema::new(&["tx_id", "price"])),
        ]);
        let slice = snapshot.restrict(&["transactions".to_string(), "missing".to_string()]);
        assert_eq!(slice.len(), 1);
        assert!(slice.contains_table("transactions"));

        let summary = snapshot.summary();
        assert!(summary.contains("estates: estate_id, estate_name_en"));
        assert!(summary.contains("transactions: tx_id, price"));
        assert!(snapshot.all_columns().contains("price"));
    }

    #[test]
    fn test_catalog_refresh_picks_up_new_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("housing.db");
        create_store(&path);

        let catalog = SchemaCatalog::open(&path, None).unwrap();
        let before = catalog.snapshot();
        assert!(!before.contains_table("units"));
        assert_eq!(catalog.version(), 1);

        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE units (unit_id INTEGER PRIMARY KEY, building_id INTEGER);")
            .unwrap();

        // No TTL: the snapshot is stable until an explicit refresh.
        assert!(!catalog.snapshot().contains_table("units"));
        assert_eq!(catalog.refresh().unwrap(), 2);
        assert!(catalog.snapshot().contains_table("units"));
        // Handed-out snapshots are unaffected.
        assert!(!before.contains_table("units"));
    }

    #[test]
    fn test_catalog_ttl_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("housing.db");
        create_store(&path);

        let catalog = SchemaCatalog::open(&path, Some(Duration::from_millis(0))).unwrap();
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE regions (region_id INTEGER PRIMARY KEY);")
            .unwrap();
        assert!(catalog.snapshot().contains_table("regions"));
        assert!(catalog.version() >= 2);
    }

    #[test]
    fn test_failed_ttl_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("housing.db");
        create_store(&path);

        let catalog = SchemaCatalog::open(&path, Some(Duration::from_millis(0))).unwrap();
        assert_eq!(catalog.version(), 1);
        std::fs::remove_file(&path).unwrap();

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains_table("buildings"));
        assert_eq!(catalog.version(), 1);
        assert!(catalog.refresh().is_err());
        assert!(catalog.snapshot().contains_table("estates"));
        assert_eq!(catalog.version(), 1);
    }

    #[test]
    fn test_fixed_catalog_cannot_refresh() {
        let catalog = SchemaCatalog::from_snapshot(SchemaSnapshot::default());
        assert!(catalog.refresh().is_err());
        assert_eq!(catalog.version(), 1);
    }

    #[test]
    fn test_summary_cache_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SchemaSummaryCache::new(dir.path().join("does-not-exist.db"));
        assert_eq!(cache.get(), FALLBACK_SCHEMA_SUMMARY);

        let path = dir.path().join("housing.db");
        create_store(&path);
        let cache = SchemaSummaryCache::new(&path);
        let text = cache.get();
        assert!(text.contains("buildings: building_id, estate_id, building_name_en"));
        assert_eq!(cache.get(), text);
    }
}
