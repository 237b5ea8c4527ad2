use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use trustcraft_types::{EvalResult, MetricsResult, Observation, ObservationOutcome};

/// SQLite-backed history of evaluation runs and intercepted observations.
#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl Store {
    /// Open a new store at the given path (e.g., "trustcraft.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS evals (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                summary TEXT,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cases (
                id INTEGER PRIMARY KEY,
                eval_id INTEGER NOT NULL,
                case_id TEXT,
                prompt TEXT NOT NULL,
                dimension TEXT,
                answer TEXT,
                error TEXT,
                overall REAL,
                evaluation TEXT,
                FOREIGN KEY(eval_id) REFERENCES evals(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY,
                key TEXT NOT NULL,
                route TEXT,
                recorded_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                faithfulness REAL,
                overall REAL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Create a new run entry
    pub fn create_run(&self, metadata: Option<serde_json::Value>) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO runs (created_at, metadata) VALUES (?1, ?2)",
            params![now.to_rfc3339(), metadata.map(|v| v.to_string())],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Save a full evaluation result into the database
    pub fn save_eval(&self, run_id: i64, name: &str, result: &EvalResult) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO evals (run_id, name, summary) VALUES (?1, ?2, ?3)",
            params![run_id, name, serde_json::to_string(&result.summary)?],
        )?;
        let eval_id = tx.last_insert_rowid();

        for case in &result.cases {
            let evaluation = case.evaluation.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                "INSERT INTO cases (eval_id, case_id, prompt, dimension, answer, error, overall, evaluation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    eval_id,
                    case.case.id,
                    case.case.prompt,
                    case.case.dimension,
                    case.answer,
                    case.error,
                    case.metrics().map(MetricsResult::overall_score),
                    evaluation,
                ],
            )?;
        }

        tx.commit()?;
        Ok(eval_id)
    }

    pub fn save_observation(&self, observation: &Observation) -> Result<i64> {
        let payload = serde_json::to_string(observation)?;
        let kind = match &observation.outcome {
            ObservationOutcome::Scored { .. } => "scored",
            ObservationOutcome::Failed { .. } => "failed",
        };
        let metrics = observation.metrics();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO observations (key, route, recorded_at, kind, faithfulness, overall, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                observation.key,
                observation.route,
                observation.recorded_at.to_rfc3339(),
                kind,
                metrics.map(|m| m.faithfulness),
                metrics.map(MetricsResult::overall_score),
                payload,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent observations first.
    pub fn recent_observations(&self, limit: usize) -> Result<Vec<Observation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM observations ORDER BY id DESC LIMIT ?1")?;
        let payloads = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str::<Observation>(p).context("Corrupt observation payload"))
            .collect()
    }

    pub fn runs(&self) -> Result<Vec<RunEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, created_at, metadata FROM runs ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, created_at, metadata)| -> Result<RunEntity> {
                Ok(RunEntity {
                    id,
                    created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                    metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                })
            })
            .collect()
    }
}
