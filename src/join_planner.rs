//! Join Path Planning
//!
//! Connects the tables an intent names. The schema's foreign keys form an
//! undirected graph of tables; starting from the first named table, each
//! further table is reached by the shortest path from anything already joined
//! (breadth-first). Intermediate tables the intent never named are pulled in
//! along the way.
//!
//! When the foreign keys do not connect the tables (older stores were built
//! without declared constraints), the known multi-hop chains of the housing
//! schema are tried instead. Anything else is unplannable.

use crate::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Short aliases used when rendering multi-table queries.
pub const TABLE_ALIASES: &[(&str, &str)] = &[
    ("estates", "e"),
    ("buildings", "b"),
    ("units", "u"),
    ("transactions", "t"),
    ("estate_school_nets", "esn"),
    ("estate_mtr_lines", "eml"),
    ("estate_facilities", "ef"),
    ("facilities", "f"),
    ("districts", "d"),
    ("subregions", "sr"),
    ("regions", "r"),
    ("phases", "p"),
    ("estate_monthly_market_info", "emmi"),
];

/// Fixed alias for `table`, else its first letter.
pub fn table_alias(table: &str) -> String {
    TABLE_ALIASES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, alias)| alias.to_string())
        .or_else(|| table.chars().next().map(|c| c.to_ascii_lowercase().to_string()))
        .unwrap_or_else(|| "t".to_string())
}

/// A join chain known to hold in the housing schema even when no foreign
/// keys are declared: `(table, column on previous table, column on table)`.
pub struct KnownJoinPattern {
    pub root: &'static str,
    pub chain: &'static [(&'static str, &'static str, &'static str)],
    /// Both tables must be named for the pattern to apply.
    pub trigger: (&'static str, &'static str),
}

pub const KNOWN_JOIN_PATTERNS: &[KnownJoinPattern] = &[KnownJoinPattern {
    root: "estates",
    chain: &[
        ("buildings", "estate_id", "estate_id"),
        ("units", "building_id", "building_id"),
        ("transactions", "unit_id", "unit_id"),
    ],
    trigger: ("estates", "transactions"),
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSource {
    SingleTable,
    ForeignKeys,
    KnownPattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStep {
    pub table: String,
    pub alias: String,
    pub left_alias: String,
    pub left_column: String,
    pub right_column: String,
}

impl JoinStep {
    pub fn render(&self) -> String {
        format!(
            "JOIN {} {} ON {}.{} = {}.{}",
            self.table, self.alias, self.left_alias, self.left_column, self.alias, self.right_column
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPlan {
    pub root: String,
    pub root_alias: String,
    pub steps: Vec<JoinStep>,
    pub source: JoinSource,
}

impl JoinPlan {
    pub fn from_clause(&self) -> String {
        format!("{} {}", self.root, self.root_alias)
    }

    pub fn join_clauses(&self) -> Vec<String> {
        self.steps.iter().map(JoinStep::render).collect()
    }

    /// `FROM` target including all joins, e.g. `estates e JOIN buildings b ON ...`.
    pub fn render(&self) -> String {
        std::iter::once(self.from_clause())
            .chain(self.join_clauses())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn alias_of(&self, table: &str) -> Option<&str> {
        if self.root == table {
            return Some(&self.root_alias);
        }
        self.steps.iter().find(|s| s.table == table).map(|s| s.alias.as_str())
    }

    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.root.as_str())
            .chain(self.steps.iter().map(|s| s.table.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Edge {
    to: String,
    local_column: String,
    remote_column: String,
}

#[derive(Debug, Clone)]
struct Hop {
    from: String,
    to: String,
    from_column: String,
    to_column: String,
}

#[derive(Default)]
struct AliasAllocator {
    used: HashSet<String>,
    assigned: HashMap<String, String>,
}

impl AliasAllocator {
    fn alias_for(&mut self, table: &str) -> String {
        if let Some(alias) = self.assigned.get(table) {
            return alias.clone();
        }
        let base = table_alias(table);
        let mut alias = base.clone();
        let mut n = 2;
        while self.used.contains(&alias) {
            alias = format!("{}{}", base, n);
            n += 1;
        }
        self.used.insert(alias.clone());
        self.assigned.insert(table.to_string(), alias.clone());
        alias
    }
}

/// Undirected foreign-key graph over a schema snapshot.
#[derive(Debug, Clone, Default)]
pub struct JoinPlanner {
    adjacency: BTreeMap<String, Vec<Edge>>,
}

impl JoinPlanner {
    pub fn new(schema: &SchemaSnapshot) -> Self {
        let mut adjacency: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        for (table, info) in &schema.tables {
            for fk in &info.foreign_keys {
                if !schema.contains_table(&fk.to_table) || fk.to_table == *table {
                    continue;
                }
                adjacency.entry(table.clone()).or_default().push(Edge {
                    to: fk.to_table.clone(),
                    local_column: fk.from_column.clone(),
                    remote_column: fk.to_column.clone(),
                });
                adjacency.entry(fk.to_table.clone()).or_default().push(Edge {
                    to: table.clone(),
                    local_column: fk.to_column.clone(),
                    remote_column: fk.from_column.clone(),
                });
            }
        }
        for edges in adjacency.values_mut() {
            edges.sort_by(|a, b| a.to.cmp(&b.to).then(a.local_column.cmp(&b.local_column)));
        }
        Self { adjacency }
    }

    /// A planner that only knows the fixed join patterns.
    pub fn patterns_only() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum::<usize>() / 2
    }

    /// Plan joins connecting `tables`, rooted at the first one.
    pub fn plan(&self, tables: &[String]) -> Option<JoinPlan> {
        let mut required: Vec<&str> = Vec::new();
        for t in tables {
            if !required.contains(&t.as_str()) {
                required.push(t.as_str());
            }
        }
        let root = *required.first()?;

        if required.len() == 1 {
            return Some(JoinPlan {
                root: root.to_string(),
                root_alias: table_alias(root),
                steps: Vec::new(),
                source: JoinSource::SingleTable,
            });
        }

        if let Some(plan) = self.plan_from_foreign_keys(&required) {
            info!("Planned {} joins from foreign keys", plan.steps.len());
            return Some(plan);
        }

        debug!("Foreign keys do not connect {:?}, trying known join patterns", required);
        let plan = plan_from_known_patterns(&required);
        if plan.is_none() {
            warn!("Could not determine JOIN path between tables {:?}", required);
        }
        plan
    }

    fn plan_from_foreign_keys(&self, required: &[&str]) -> Option<JoinPlan> {
        let root = required[0];
        let mut aliases = AliasAllocator::default();
        let root_alias = aliases.alias_for(root);
        let mut joined: Vec<String> = vec![root.to_string()];
        let mut steps = Vec::new();

        for target in &required[1..] {
            if joined.iter().any(|j| j == target) {
                continue;
            }
            let path = self.shortest_path(&joined, target)?;
            for hop in path {
                if joined.contains(&hop.to) {
                    continue;
                }
                let left_alias = aliases.alias_for(&hop.from);
                let alias = aliases.alias_for(&hop.to);
                steps.push(JoinStep {
                    table: hop.to.clone(),
                    alias,
                    left_alias,
                    left_column: hop.from_column,
                    right_column: hop.to_column,
                });
                joined.push(hop.to);
            }
        }

        Some(JoinPlan {
            root: root.to_string(),
            root_alias,
            steps,
            source: JoinSource::ForeignKeys,
        })
    }

    /// Multi-source BFS from every joined table to `target`.
    fn shortest_path(&self, sources: &[String], target: &str) -> Option<Vec<Hop>> {
        let mut visited: HashSet<&str> = sources.iter().map(|s| s.as_str()).collect();
        let mut previous: HashMap<&str, (&str, &Edge)> = HashMap::new();
        let mut queue: VecDeque<&str> = sources.iter().map(|s| s.as_str()).collect();

        while let Some(current) = queue.pop_front() {
            if current == target {
                break;
            }
            for edge in self.adjacency.get(current).map(|e| e.as_slice()).unwrap_or(&[]) {
                if visited.insert(edge.to.as_str()) {
                    previous.insert(edge.to.as_str(), (current, edge));
                    queue.push_back(edge.to.as_str());
                }
            }
        }

        if !previous.contains_key(target) {
            return None;
        }

        let mut hops = Vec::new();
        let mut node = target;
        while let Some((from, edge)) = previous.get(node) {
            hops.push(Hop {
                from: from.to_string(),
                to: node.to_string(),
                from_column: edge.local_column.clone(),
                to_column: edge.remote_column.clone(),
            });
            node = *from;
        }
        hops.reverse();
        Some(hops)
    }
}

fn plan_from_known_patterns(required: &[&str]) -> Option<JoinPlan> {
    let pattern = KNOWN_JOIN_PATTERNS
        .iter()
        .find(|p| required.contains(&p.trigger.0) && required.contains(&p.trigger.1))?;

    let covered: Vec<&str> = std::iter::once(pattern.root)
        .chain(pattern.chain.iter().map(|(t, _, _)| *t))
        .collect();
    if let Some(missing) = required.iter().find(|t| !covered.contains(*t)) {
        warn!("Known join pattern from '{}' does not reach '{}'", pattern.root, missing);
        return None;
    }

    let mut aliases = AliasAllocator::default();
    let root_alias = aliases.alias_for(pattern.root);
    let mut previous = pattern.root;
    let mut steps = Vec::new();
    for &(table, left_column, right_column) in pattern.chain {
        let left_alias = aliases.alias_for(previous);
        steps.push(JoinStep {
            table: table.to_string(),
            alias: aliases.alias_for(table),
            left_alias,
            left_column: left_column.to_string(),
            right_column: right_column.to_string(),
        });
        previous = table;
    }

    Some(JoinPlan {
        root: pattern.root.to_string(),
        root_alias,
        steps,
        source: JoinSource::KnownPattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    fn housing_schema() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            ("estates", TableSchema::new(&["estate_id", "estate_name_en", "district_id"])
                .with_foreign_key("district_id", "districts", "district_id")),
            ("districts", TableSchema::new(&["district_id", "district_name_en"])),
            ("buildings", TableSchema::new(&["building_id", "estate_id"])
                .with_foreign_key("estate_id", "estates", "estate_id")),
            ("units", TableSchema::new(&["unit_id", "building_id", "area"])
                .with_foreign_key("building_id", "buildings", "building_id")),
            ("transactions", TableSchema::new(&["tx_id", "unit_id", "price"])
                .with_foreign_key("unit_id", "units", "unit_id")),
        ])
    }

    fn names(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_bfs_three_hop_chain() {
        let planner = JoinPlanner::new(&housing_schema());
        assert_eq!(planner.edge_count(), 4);

        let plan = planner.plan(&names(&["estates", "transactions"])).unwrap();
        assert_eq!(plan.source, JoinSource::ForeignKeys);
        assert_eq!(
            plan.render(),
            "estates e JOIN buildings b ON e.estate_id = b.estate_id \
             JOIN units u ON b.building_id = u.building_id \
             JOIN transactions t ON u.unit_id = t.unit_id"
        );
        assert_eq!(plan.alias_of("units"), Some("u"));
    }

    #[test]
    fn test_bfs_reverse_direction() {
        let planner = JoinPlanner::new(&housing_schema());
        let plan = planner.plan(&names(&["transactions", "districts"])).unwrap();
        assert_eq!(plan.tables(), vec!["transactions", "units", "buildings", "estates", "districts"]);
        assert_eq!(plan.steps[0].render(), "JOIN units u ON t.unit_id = u.unit_id");
        assert_eq!(plan.steps[3].render(), "JOIN districts d ON e.district_id = d.district_id");
    }

    #[test]
    fn test_reuses_joined_tables() {
        let planner = JoinPlanner::new(&housing_schema());
        let plan = planner.plan(&names(&["estates", "units", "transactions", "units"])).unwrap();
        assert_eq!(plan.tables(), vec!["estates", "buildings", "units", "transactions"]);
    }

    #[test]
    fn test_known_pattern_without_foreign_keys() {
        let plan = JoinPlanner::patterns_only().plan(&names(&["estates", "transactions"])).unwrap();
        assert_eq!(plan.source, JoinSource::KnownPattern);
        assert!(plan.render().contains("JOIN buildings b ON e.estate_id = b.estate_id"));
        assert!(plan.render().contains("JOIN transactions t ON u.unit_id = t.unit_id"));
    }

    #[test]
    fn test_unknown_pair_fails() {
        assert!(JoinPlanner::patterns_only().plan(&names(&["estates", "facilities"])).is_none());
        assert!(JoinPlanner::patterns_only()
            .plan(&names(&["estates", "transactions", "regions"]))
            .is_none());
        assert!(JoinPlanner::new(&housing_schema()).plan(&[]).is_none());
    }

    #[test]
    fn test_alias_defaults_and_collisions() {
        assert_eq!(table_alias("estate_monthly_market_info"), "emmi");
        assert_eq!(table_alias("agents"), "a");

        let schema = SchemaSnapshot::from_tables(vec![
            ("transactions", TableSchema::new(&["tx_id", "tenant_id"])
                .with_foreign_key("tenant_id", "tenants", "tenant_id")),
            ("tenants", TableSchema::new(&["tenant_id"])),
        ]);
        let plan = JoinPlanner::new(&schema).plan(&names(&["transactions", "tenants"])).unwrap();
        assert_eq!(plan.render(), "transactions t JOIN tenants t2 ON t.tenant_id = t2.tenant_id");
    }
}
