#![allow(dead_code)]

use async_trait::async_trait;
use housing_datahub::llm::TextCompletion;
use housing_datahub::{Result, Settings, SqlPipeline};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Replies with `intent` to intent prompts and `route` to routing prompts.
pub struct ScriptedLlm {
    pub intent: String,
    pub route: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(intent: &str) -> Self {
        Self {
            intent: intent.to_string(),
            route: "SINGLE_SQL".to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn routing_to(mut self, route: &str) -> Self {
        self.route = route.to_string();
        self
    }

    pub fn intent_prompts(&self) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("DATABASE SCHEMA SUMMARY"))
            .count()
    }
}

#[async_trait]
impl TextCompletion for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("Respond with ONLY: SINGLE_SQL, SINGLE_RAG, or BOTH") {
            Ok(self.route.clone())
        } else {
            Ok(self.intent.clone())
        }
    }
}

/// Estates -> buildings -> units -> transactions, with declared foreign keys.
pub fn create_housing_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE districts (
             district_id INTEGER PRIMARY KEY,
             district_name_en TEXT
         );
         CREATE TABLE estates (
             estate_id INTEGER PRIMARY KEY,
             estate_name_en TEXT NOT NULL,
             district_id INTEGER REFERENCES districts(district_id)
         );
         CREATE TABLE buildings (
             building_id INTEGER PRIMARY KEY,
             building_name_en TEXT,
             estate_id INTEGER REFERENCES estates(estate_id)
         );
         CREATE TABLE units (
             unit_id INTEGER PRIMARY KEY,
             floor TEXT,
             flat TEXT,
             area INTEGER,
             building_id INTEGER REFERENCES buildings(building_id)
         );
         CREATE TABLE transactions (
             tx_id INTEGER PRIMARY KEY,
             tx_date TEXT,
             price REAL,
             net_ft_price REAL,
             unit_id INTEGER REFERENCES units(unit_id)
         );

         INSERT INTO districts VALUES (1, 'Sai Kung'), (2, 'Sha Tin');
         INSERT INTO estates VALUES (1, 'Lohas Park', 1), (2, 'Festival City', 2);
         INSERT INTO buildings VALUES (1, 'Tower 1', 1), (2, 'Tower 2', 1), (3, 'Block A', 2);
         INSERT INTO units VALUES
             (1, '10', 'A', 500, 1),
             (2, '20', 'B', 600, 1),
             (3, '30', 'C', 700, 2),
             (4, '5', 'D', 650, 3);
         INSERT INTO transactions VALUES
             (1, '2024-01-10', 8000000, 16000, 1),
             (2, '2024-02-11', 9000000, 15000, 2),
             (3, '2024-03-12', 10000000, 14285.7, 3),
             (4, '2024-04-13', 6000000, 9230.8, 4);",
    )
    .unwrap();
}

pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("housing.db");
        create_housing_store(&db_path);
        Self { dir, db_path }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            database_path: self.db_path.clone(),
            ..Settings::default()
        }
    }

    pub fn pipeline(&self, llm: Arc<ScriptedLlm>) -> SqlPipeline {
        SqlPipeline::new(llm, &self.settings()).unwrap()
    }
}
