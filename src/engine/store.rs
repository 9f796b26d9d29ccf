use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock};

use crate::model::*;

use super::SharedTimeline;

/// Owner of every task. One lock per engineer timeline plus one for the
/// unassigned pool; the index maps task id → engineer id (`None` = pool).
///
/// Lock order: engineer timelines in ascending id order, then the pool.
pub struct TimelineStore {
    timelines: DashMap<String, SharedTimeline>,
    task_index: DashMap<String, Option<String>>,
    unassigned: Mutex<HashMap<String, Task>>,
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineStore {
    pub fn new() -> Self {
        Self {
            timelines: DashMap::new(),
            task_index: DashMap::new(),
            unassigned: Mutex::new(HashMap::new()),
        }
    }

    // ── Engineers ────────────────────────────────────────────

    pub fn engineer_count(&self) -> usize {
        self.timelines.len()
    }

    pub fn contains_engineer(&self, id: &str) -> bool {
        self.timelines.contains_key(id)
    }

    pub fn get_timeline(&self, id: &str) -> Option<SharedTimeline> {
        self.timelines.get(id).map(|e| e.value().clone())
    }

    /// Returns false if the id is taken.
    pub fn insert_timeline(&self, engineer: Engineer) -> bool {
        match self.timelines.entry(engineer.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(EngineerTimeline::new(engineer))));
                true
            }
        }
    }

    pub fn timelines(&self) -> Vec<SharedTimeline> {
        let mut entries: Vec<(String, SharedTimeline)> = self
            .timelines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, tl)| tl).collect()
    }

    // ── Task index ───────────────────────────────────────────

    /// `Some(None)` means the task is in the unassigned pool.
    pub fn locate_task(&self, task_id: &str) -> Option<Option<String>> {
        self.task_index.get(task_id).map(|e| e.value().clone())
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.task_index.contains_key(task_id)
    }

    /// Reserve a fresh task id. Returns false if it is already indexed.
    pub fn claim_task(&self, task_id: &str, engineer_id: Option<String>) -> bool {
        match self.task_index.entry(task_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(engineer_id);
                true
            }
        }
    }

    pub fn map_task(&self, task_id: &str, engineer_id: Option<String>) {
        self.task_index.insert(task_id.to_string(), engineer_id);
    }

    pub fn unmap_task(&self, task_id: &str) {
        self.task_index.remove(task_id);
    }

    pub fn task_count(&self) -> usize {
        self.task_index.len()
    }

    // ── Unassigned pool ──────────────────────────────────────

    pub fn unassigned(&self) -> &Mutex<HashMap<String, Task>> {
        &self.unassigned
    }

    // ── Commit ───────────────────────────────────────────────

    /// Copy-on-write replacement of one engineer's task set. The caller
    /// holds the timeline's write lock and has already validated `tasks`.
    pub fn commit(&self, timeline: &mut EngineerTimeline, mut tasks: Vec<Task>) {
        let engineer_id = timeline.engineer.id.clone();
        for task in &mut tasks {
            task.engineer_id = Some(engineer_id.clone());
            self.map_task(&task.id, Some(engineer_id.clone()));
        }
        timeline.replace_tasks(tasks);
    }
}
