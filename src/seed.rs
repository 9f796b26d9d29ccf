//! Startup seed: engineers and their already-planned tasks as JSON.
//!
//! ```json
//! {
//!   "engineers": [{ "id": "E1", "name": "Asha", "region": "south" }],
//!   "tasks": [{
//!     "id": "T1", "engineer_id": "E1", "priority": "P2",
//!     "start": "2024-03-04T09:00:00Z", "end": "2024-03-04T10:00:00Z"
//!   }]
//! }
//! ```
//!
//! Tasks are loaded verbatim, without reconciliation. A task without
//! `engineer_id` goes to the unassigned pool.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::*;

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub engineers: Vec<Engineer>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub engineer_id: Option<String>,
    pub priority: Priority,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl TaskRecord {
    fn into_task(self) -> Result<Task, EngineError> {
        let (start, end) = (self.start.timestamp_millis(), self.end.timestamp_millis());
        let span = Span::try_new(start, end).ok_or(EngineError::InvalidInterval { start, end })?;
        Ok(Task {
            id: self.id,
            priority: self.priority,
            engineer_id: self.engineer_id,
            span,
            status: self.status,
            title: self.title,
            description: self.description,
            customer_id: self.customer_id,
            location_id: self.location_id,
            timezone: self.timezone,
            country: self.country,
        })
    }
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Engine(EngineError),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "reading seed file: {e}"),
            SeedError::Json(e) => write!(f, "parsing seed file: {e}"),
            SeedError::Engine(e) => write!(f, "loading seed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<EngineError> for SeedError {
    fn from(e: EngineError) -> Self {
        SeedError::Engine(e)
    }
}

impl Seed {
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        serde_json::from_str(json).map_err(SeedError::Json)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        Self::from_json(&raw)
    }

    /// Register every engineer, then install each engineer's tasks as one
    /// commit. Returns the number of tasks loaded.
    pub async fn load(self, engine: &Engine) -> Result<usize, SeedError> {
        for engineer in self.engineers {
            engine.register_engineer(engineer)?;
        }

        let mut by_engineer: BTreeMap<String, Vec<Task>> = BTreeMap::new();
        let mut pool = Vec::new();
        for record in self.tasks {
            let task = record.into_task()?;
            match task.engineer_id.clone() {
                Some(eid) => by_engineer.entry(eid).or_default().push(task),
                None => pool.push(task),
            }
        }

        let mut loaded = pool.len();
        for task in pool {
            engine.put_unassigned(task).await?;
        }
        for (engineer_id, tasks) in by_engineer {
            loaded += tasks.len();
            engine.replace_engineer_tasks(&engineer_id, tasks).await?;
            let conflicts = engine.conflicts(&engineer_id).await?;
            if !conflicts.is_empty() {
                warn!(
                    engineer = %engineer_id,
                    conflicts = conflicts.len(),
                    "seeded schedule has conflicts; the next relocation or insert will not repair them"
                );
            }
        }
        info!(
            engineers = engine.store.engineer_count(),
            tasks = loaded,
            "seed loaded"
        );
        Ok(loaded)
    }
}
